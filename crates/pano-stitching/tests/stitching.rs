mod common;

use common::{sweep, Scene, FOCAL, WIDTH};
use pano_image::Image;
use pano_stitching::config::{BlenderKind, SeamFinderKind};
use pano_stitching::features::{find_features, OrbFeatureExtractor};
use pano_stitching::matcher::{match_pairs, BestOf2NearestMatcher};
use pano_stitching::{
    DropReason, StageTimings, StitchContext, StitchError, StitchOutput, Stitcher, StitcherConfig,
};

fn config() -> StitcherConfig {
    StitcherConfig {
        seam_megapix: 0.03,
        ..Default::default()
    }
}

fn stitch(images: &[Image<u8, 3>]) -> Result<StitchOutput, Box<dyn std::error::Error>> {
    let stitcher = Stitcher::new(config());
    Ok(stitcher.stitch(images, &mut StitchContext::new())?)
}

#[test]
fn three_overlapping_images() -> Result<(), Box<dyn std::error::Error>> {
    let scene = Scene::new(7);
    let images = sweep(&scene, &[-25.0, 0.0, 25.0]);

    let mut timings = StageTimings::default();
    let stitcher = Stitcher::new(config());
    let mut ctx = StitchContext::new().with_telemetry(&mut timings);
    let output = stitcher.stitch(&images, &mut ctx)?;
    drop(ctx);

    assert_eq!(output.report.used, vec![0, 1, 2]);
    assert!(output.report.dropped.is_empty());
    assert_eq!(output.cameras.len(), 3);

    // every image owns part of the panorama
    assert_eq!(output.seam_pixel_counts.len(), 3);
    assert!(output.seam_pixel_counts.iter().all(|c| *c > 0));

    // about 94 degrees of horizontal field of view
    let width = output.panorama.roi.width;
    assert!(width > 3 * WIDTH / 2 && width < 3 * WIDTH, "width {width}");
    assert!(output.panorama_scale > 0.8 * FOCAL && output.panorama_scale < 1.2 * FOCAL);

    let mask = output.panorama.mask.as_slice();
    let covered = mask.iter().filter(|m| **m == 255).count();
    assert!(covered as f64 > 0.6 * mask.len() as f64);

    // refinement never makes the registration worse
    assert!(output.registration.final_cost <= output.registration.initial_cost);
    assert!(output.registration.rms_error() < 5.0);

    assert!(timings.total >= timings.registration);
    assert!(timings.composing >= timings.seam_search);
    Ok(())
}

#[test]
fn stitching_is_deterministic() -> Result<(), Box<dyn std::error::Error>> {
    let scene = Scene::new(11);
    let images = sweep(&scene, &[0.0, 24.0, 48.0]);

    let first = stitch(&images)?;
    let second = stitch(&images)?;
    assert_eq!(first.panorama.roi, second.panorama.roi);
    assert_eq!(first.panorama.image.as_slice(), second.panorama.image.as_slice());
    assert_eq!(first.panorama.mask.as_slice(), second.panorama.mask.as_slice());
    assert_eq!(first.cameras, second.cameras);
    Ok(())
}

#[test]
fn image_without_features_is_dropped() -> Result<(), Box<dyn std::error::Error>> {
    let scene = Scene::new(3);
    let mut images = sweep(&scene, &[-12.0, 0.0, 12.0]);
    images[1] = Image::from_size_val(images[1].size(), 128)?;

    let output = stitch(&images)?;
    assert_eq!(output.report.used, vec![0, 2]);
    assert_eq!(output.report.drop_reason(1), Some(&DropReason::NoFeatures));
    assert_eq!(output.seam_pixel_counts.len(), 2);
    Ok(())
}

#[test]
fn images_without_overlap_fail() -> Result<(), Box<dyn std::error::Error>> {
    let scene = Scene::new(5);
    let images = sweep(&scene, &[0.0, 120.0]);

    // the pair is rejected outright
    let float_images = images
        .iter()
        .map(|i| i.cast::<f32>())
        .collect::<Result<Vec<_>, _>>()?;
    let features = find_features(&float_images, &OrbFeatureExtractor::default());
    assert!(features.iter().all(|f| !f.is_empty()));
    let matches = match_pairs(&features, &BestOf2NearestMatcher::default(), None);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].confidence, 0.0);
    assert_eq!(matches[0].num_inliers, 0);
    assert!(matches[0].homography.is_none());

    let failure = match Stitcher::new(config()).stitch(&images, &mut StitchContext::new()) {
        Ok(_) => return Err("stitching unrelated images must fail".into()),
        Err(failure) => failure,
    };
    assert!(matches!(
        failure.error,
        StitchError::InsufficientOverlap { component_size: 1 }
    ));
    assert!(failure.report.used.is_empty());
    assert_eq!(failure.report.drop_reason(0), Some(&DropReason::NotConnected));
    assert_eq!(failure.report.drop_reason(1), Some(&DropReason::NotConnected));
    Ok(())
}

#[test]
fn voronoi_seams_and_feather_blending() -> Result<(), Box<dyn std::error::Error>> {
    let scene = Scene::new(13);
    let images = sweep(&scene, &[-10.0, 15.0]);

    let mut config = config();
    config.seam.finder = SeamFinderKind::Voronoi;
    config.blender.kind = BlenderKind::Feather;
    let output = Stitcher::new(config).stitch(&images, &mut StitchContext::new())?;

    assert_eq!(output.report.used, vec![0, 1]);
    assert!(output.seam_pixel_counts.iter().all(|c| *c > 0));
    assert_eq!(output.panorama.image.size(), output.panorama.mask.size());
    Ok(())
}
