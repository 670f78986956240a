//! The [`Stitcher`] driving every stage of a run.

use std::time::Instant;

use rayon::prelude::*;

use pano_image::{Image, ImageSize};
use pano_imgproc::interpolation::InterpolationMode;
use pano_imgproc::resize::resize_native;

use crate::blender::{Blender, FeatherBlender, MultiBandBlender, Panorama};
use crate::bundle::{bundle_adjust, BundleAdjustment};
use crate::camera::CameraParams;
use crate::config::{BlenderKind, ExposureKind, SeamFinderKind, StitcherConfig};
use crate::context::{Stage, StitchContext};
use crate::error::{DropReason, StitchError, StitchFailure, StitchReport};
use crate::estimator::initialize_cameras;
use crate::exposure::{apply_gain, ExposureCompensator, GainCompensator, NoExposureCompensator};
use crate::features::{find_features, FeatureExtractor, OrbFeatureExtractor};
use crate::focal::median_focal;
use crate::graph::build_image_graph;
use crate::matcher::{match_pairs, BestOf2NearestMatcher, PairwiseMatcher};
use crate::seam::{blend_mask, upscale_labels, GraphCutSeamFinder, SeamFinder, VoronoiSeamFinder};
use crate::warper::{surface_for, ProjectionSurface, Roi, WarpedImage, Warper, WrapFrame};
use crate::wave::wave_correct;

type BlenderFactory = Box<dyn Fn() -> Box<dyn Blender> + Send + Sync>;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct StitchOutput {
    /// The composited panorama.
    pub panorama: Panorama,
    /// Cameras at compose resolution, one per entry of `report.used`.
    pub cameras: Vec<CameraParams>,
    /// Images used and dropped.
    pub report: StitchReport,
    /// Outcome of the bundle adjustment.
    pub registration: BundleAdjustment,
    /// Median focal of the compose cameras, the panorama pixels per radian.
    pub panorama_scale: f64,
    /// Panorama pixels owned by each image of `report.used`.
    pub seam_pixel_counts: Vec<usize>,
}

/// Panorama stitcher with pluggable stages.
///
/// The strategies are built from the [`StitcherConfig`] and can be replaced with the `with_*`
/// methods.
///
/// # Example
///
/// ```no_run
/// use pano_image::Image;
/// use pano_stitching::{StitchContext, Stitcher, StitcherConfig};
///
/// let images: Vec<Image<u8, 3>> = Vec::new();
/// let stitcher = Stitcher::new(StitcherConfig::default());
/// match stitcher.stitch(&images, &mut StitchContext::new()) {
///     Ok(output) => println!("{}x{}", output.panorama.roi.width, output.panorama.roi.height),
///     Err(failure) => println!("{failure}, dropped {:?}", failure.report.dropped),
/// }
/// ```
pub struct Stitcher {
    config: StitcherConfig,
    extractor: Box<dyn FeatureExtractor>,
    matcher: Box<dyn PairwiseMatcher>,
    surface: Box<dyn ProjectionSurface>,
    seam_finder: Box<dyn SeamFinder>,
    exposure: Box<dyn ExposureCompensator>,
    blender: BlenderFactory,
}

impl Stitcher {
    /// Create a stitcher with the strategies selected by `config`.
    pub fn new(config: StitcherConfig) -> Self {
        let extractor = Box::new(OrbFeatureExtractor::new(&config.features));
        let matcher = Box::new(BestOf2NearestMatcher::new(config.matcher.clone()));
        let surface = surface_for(config.warper.surface);
        let seam_finder: Box<dyn SeamFinder> = match config.seam.finder {
            SeamFinderKind::GraphCut => {
                Box::new(GraphCutSeamFinder::new(config.seam.gradient_weight))
            }
            SeamFinderKind::Voronoi => Box::new(VoronoiSeamFinder),
        };
        let exposure: Box<dyn ExposureCompensator> = match config.exposure.kind {
            ExposureKind::Gain => Box::new(GainCompensator::default()),
            ExposureKind::None => Box::new(NoExposureCompensator),
        };
        let blender_config = config.blender.clone();
        let blender: BlenderFactory = Box::new(move || -> Box<dyn Blender> {
            match blender_config.kind {
                BlenderKind::MultiBand => Box::new(MultiBandBlender::new(blender_config.num_bands)),
                BlenderKind::Feather => Box::new(FeatherBlender::new(blender_config.sharpness)),
            }
        });

        Self {
            config,
            extractor,
            matcher,
            surface,
            seam_finder,
            exposure,
            blender,
        }
    }

    /// The session configuration.
    pub fn config(&self) -> &StitcherConfig {
        &self.config
    }

    /// Replace the feature extractor.
    pub fn with_feature_extractor(mut self, extractor: impl FeatureExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    /// Replace the pairwise matcher.
    pub fn with_matcher(mut self, matcher: impl PairwiseMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Replace the projection surface.
    pub fn with_surface(mut self, surface: impl ProjectionSurface + 'static) -> Self {
        self.surface = Box::new(surface);
        self
    }

    /// Replace the seam finder.
    pub fn with_seam_finder(mut self, seam_finder: impl SeamFinder + 'static) -> Self {
        self.seam_finder = Box::new(seam_finder);
        self
    }

    /// Replace the exposure compensator.
    pub fn with_exposure_compensator(
        mut self,
        exposure: impl ExposureCompensator + 'static,
    ) -> Self {
        self.exposure = Box::new(exposure);
        self
    }

    /// Replace the blender; `factory` creates a fresh blender for every run.
    pub fn with_blender<B, F>(mut self, factory: F) -> Self
    where
        B: Blender + 'static,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.blender = Box::new(move || -> Box<dyn Blender> { Box::new(factory()) });
        self
    }

    /// Stitch the images into a panorama.
    ///
    /// Images that cannot take part (empty, without features, not connected, failing to
    /// warp) are dropped and listed in the report. Cancellation and the deadline of `ctx`
    /// are checked before each stage.
    ///
    /// # Errors
    ///
    /// A [`StitchFailure`] holding the error and the images used and dropped so far.
    pub fn stitch(
        &self,
        images: &[Image<u8, 3>],
        ctx: &mut StitchContext,
    ) -> Result<StitchOutput, StitchFailure> {
        let start = Instant::now();
        let mut report = StitchReport::all_used(images.len());
        let result = self.run(images, ctx, &mut report);
        ctx.record(Stage::Total, start.elapsed());

        match result {
            Ok(mut output) => {
                output.report = report;
                Ok(output)
            }
            Err(error) => {
                log::warn!("Stitching failed: {error}");
                Err(StitchFailure::new(error, report))
            }
        }
    }

    fn run(
        &self,
        images: &[Image<u8, 3>],
        ctx: &mut StitchContext,
        report: &mut StitchReport,
    ) -> Result<StitchOutput, StitchError> {
        for (idx, image) in images.iter().enumerate() {
            if image.size().area() == 0 {
                log::warn!("Image #{} is empty", idx + 1);
                report.drop_image(idx, DropReason::EmptyImage);
            }
        }
        let active = report.used.clone();
        if active.len() < 2 {
            return Err(StitchError::InsufficientImages {
                usable: active.len(),
            });
        }

        let first = images[active[0]].size();
        let work_scale = megapix_scale(self.config.registration_megapix, first);
        let seam_scale = megapix_scale(self.config.seam_megapix, first);
        let compose_scale = self
            .config
            .compose_megapix
            .map_or(1.0, |mp| megapix_scale(mp, first));
        log::debug!(
            "Scales: registration {work_scale:.3}, seam {seam_scale:.3}, compose {compose_scale:.3}"
        );

        ctx.checkpoint(Stage::Features)?;
        log::info!("Finding features...");
        let timer = Instant::now();
        let work_images = active
            .par_iter()
            .map(|&idx| to_float_scaled(&images[idx], work_scale))
            .collect::<Result<Vec<_>, _>>()?;
        let features = find_features(&work_images, self.extractor.as_ref());
        drop(work_images);
        ctx.record(Stage::Features, timer.elapsed());

        ctx.checkpoint(Stage::Matching)?;
        log::info!("Registering images...");
        let timer = Instant::now();
        let matches = match_pairs(
            &features,
            self.matcher.as_ref(),
            self.config.matcher.range_width,
        );
        let matching_time = timer.elapsed();
        ctx.record(Stage::Matching, matching_time);

        ctx.checkpoint(Stage::Adjusting)?;
        let timer = Instant::now();
        let (mut graph, dropped) = match build_image_graph(&features, &matches, &self.config.graph)
        {
            Ok(built) => built,
            Err(err) => {
                for (local, set) in features.iter().enumerate() {
                    let reason = if set.is_empty() {
                        DropReason::NoFeatures
                    } else {
                        DropReason::NotConnected
                    };
                    report.drop_image(active[local], reason);
                }
                return Err(err);
            }
        };
        for (local, reason) in dropped {
            log::warn!("Image #{} dropped: {reason}", active[local] + 1);
            report.drop_image(active[local], reason);
        }
        if self.config.graph.prune_to_spanning_tree {
            graph.prune_to_spanning_tree();
        }

        let (mut cameras, reference) = initialize_cameras(&features, &matches, &graph)?;
        let registration = bundle_adjust(
            &features,
            &matches,
            &graph,
            &mut cameras,
            reference,
            &self.config.bundle,
        )?;
        wave_correct(&mut cameras, self.config.bundle.wave_correction);
        let adjusting_time = timer.elapsed();
        ctx.record(Stage::Adjusting, adjusting_time);
        ctx.record(Stage::Registration, matching_time + adjusting_time);

        let registered: Vec<usize> = graph.nodes.iter().map(|&local| active[local]).collect();
        let scales = Scales {
            work: work_scale,
            seam: seam_scale,
            compose: compose_scale,
        };
        let composed = self.compose(images, ctx, report, &registered, &cameras, scales)?;
        Ok(StitchOutput {
            panorama: composed.panorama,
            cameras: composed.cameras,
            report: StitchReport::default(),
            registration,
            panorama_scale: composed.scale,
            seam_pixel_counts: composed.seam_pixel_counts,
        })
    }

    /// Warp, find seams and blend the registered images.
    ///
    /// `cameras` are at registration resolution and follow `registered`.
    fn compose(
        &self,
        images: &[Image<u8, 3>],
        ctx: &mut StitchContext,
        report: &mut StitchReport,
        registered: &[usize],
        cameras: &[CameraParams],
        scales: Scales,
    ) -> Result<Composed, StitchError> {
        ctx.checkpoint(Stage::SeamSearch)?;
        log::info!("Composing pano...");
        let timer = Instant::now();

        let focals: Vec<f64> = cameras.iter().map(|c| c.focal).collect();
        let focal = median_focal(&focals)
            .ok_or_else(|| StitchError::Optimization("no registered camera".into()))?;
        let frame = WrapFrame::from_cameras(cameras);

        // low resolution pass for exposure and seams
        let seam_aspect = scales.seam / scales.work;
        let seam_warper = Warper::new(self.surface.as_ref(), focal * seam_aspect, frame);
        let seam_results: Vec<Result<WarpedImage, StitchError>> = registered
            .par_iter()
            .zip(cameras.par_iter())
            .map(|(&idx, cam)| {
                let image = to_float_scaled(&images[idx], scales.seam)?;
                seam_warper.warp(&image, &cam.scaled(seam_aspect))
            })
            .collect();

        let mut kept = Vec::new();
        let mut seam_images = Vec::new();
        for ((&idx, cam), result) in registered.iter().zip(cameras).zip(seam_results) {
            match result {
                Ok(warped) => {
                    kept.push((idx, *cam));
                    seam_images.push(warped);
                }
                Err(err) => drop_for_composition(report, idx, err),
            }
        }
        if seam_images.is_empty() {
            return Err(StitchError::Composition("no image could be warped".into()));
        }

        let gains = self.exposure.gains(&seam_images)?;
        for (warped, gain) in seam_images.iter_mut().zip(&gains) {
            apply_gain(&mut warped.image, *gain);
        }
        let mut seam_labels = self.seam_finder.find(&seam_images)?;
        drop(seam_images);
        let seam_time = timer.elapsed();
        ctx.record(Stage::SeamSearch, seam_time);

        ctx.checkpoint(Stage::Blending)?;
        let timer = Instant::now();
        let compose_aspect = scales.compose / scales.work;
        let compose_focal = focal * compose_aspect;
        let compose_warper = Warper::new(self.surface.as_ref(), compose_focal, frame);
        let compose_results: Vec<Result<WarpedImage, StitchError>> = kept
            .par_iter()
            .zip(gains.par_iter())
            .map(|((idx, cam), gain)| {
                let image = to_float_scaled(&images[*idx], scales.compose)?;
                let mut warped = compose_warper.warp(&image, &cam.scaled(compose_aspect))?;
                apply_gain(&mut warped.image, *gain);
                Ok(warped)
            })
            .collect();

        let mut keep = Vec::with_capacity(kept.len());
        let mut warped_images = Vec::new();
        let mut compose_cameras = Vec::new();
        for ((idx, cam), result) in kept.iter().zip(compose_results) {
            match result {
                Ok(warped) => {
                    keep.push(true);
                    compose_cameras.push(cam.scaled(compose_aspect));
                    warped_images.push(warped);
                }
                Err(err) => {
                    keep.push(false);
                    drop_for_composition(report, *idx, err);
                }
            }
        }
        if warped_images.is_empty() {
            return Err(StitchError::Composition("no image could be warped".into()));
        }
        if keep.iter().any(|k| !k) {
            seam_labels.retain_labels(&keep);
        }

        let labels = upscale_labels(&seam_labels, &warped_images, scales.seam / scales.compose)?;
        let roi = Roi::union_all(warped_images.iter().map(|w| &w.roi))
            .ok_or_else(|| StitchError::Composition("empty panorama".into()))?;

        let mut blender = (self.blender)();
        blender.prepare(roi)?;
        for (label, warped) in warped_images.iter().enumerate() {
            let mask = blend_mask(&labels, label, warped)?;
            blender.feed(&warped.image, &mask, warped.roi)?;
        }
        let panorama = blender.blend()?;
        let seam_pixel_counts = labels.label_counts(warped_images.len());

        let blend_time = timer.elapsed();
        ctx.record(Stage::Blending, blend_time);
        ctx.record(Stage::Composing, seam_time + blend_time);
        log::info!(
            "Panorama of {}x{} from {} images",
            panorama.roi.width,
            panorama.roi.height,
            warped_images.len()
        );

        Ok(Composed {
            panorama,
            cameras: compose_cameras,
            scale: compose_focal,
            seam_pixel_counts,
        })
    }
}

struct Composed {
    panorama: Panorama,
    cameras: Vec<CameraParams>,
    scale: f64,
    seam_pixel_counts: Vec<usize>,
}

/// Image scales of the three processing resolutions.
#[derive(Debug, Clone, Copy)]
struct Scales {
    work: f64,
    seam: f64,
    compose: f64,
}

fn drop_for_composition(report: &mut StitchReport, idx: usize, err: StitchError) {
    log::warn!("Image #{} excluded from the panorama: {err}", idx + 1);
    report.drop_image(idx, DropReason::CompositionFailed(err.to_string()));
}

/// Scale bringing an image of `size` to at most `megapix` megapixels, never upscaling.
///
/// A non positive budget keeps the full resolution.
pub fn megapix_scale(megapix: f64, size: ImageSize) -> f64 {
    if megapix <= 0.0 || size.area() == 0 {
        return 1.0;
    }
    (megapix * 1e6 / size.area() as f64).sqrt().min(1.0)
}

/// Convert an 8 bit image to floats in `[0, 255]`, resized by `scale`.
fn to_float_scaled(image: &Image<u8, 3>, scale: f64) -> Result<Image<f32, 3>, StitchError> {
    let image = image.cast::<f32>()?;
    if (scale - 1.0).abs() < f64::EPSILON {
        return Ok(image);
    }
    let size = ImageSize {
        width: ((image.width() as f64 * scale).round() as usize).max(1),
        height: ((image.height() as f64 * scale).round() as usize).max(1),
    };
    let mut resized = Image::from_size_val(size, 0.0)?;
    resize_native(&image, &mut resized, InterpolationMode::Bilinear)?;
    Ok(resized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_megapix_scale() {
        let size = ImageSize {
            width: 2000,
            height: 1500,
        };
        assert_relative_eq!(megapix_scale(0.75, size), 0.5);
        assert_eq!(megapix_scale(10.0, size), 1.0);
        assert_eq!(megapix_scale(-1.0, size), 1.0);
    }

    #[test]
    fn test_to_float_scaled() -> Result<(), StitchError> {
        let image = Image::<u8, 3>::from_size_val([40, 30].into(), 200)?;
        let half = to_float_scaled(&image, 0.5)?;
        assert_eq!(half.size(), ImageSize::from([20, 15]));
        assert!(half.as_slice().iter().all(|v| (*v - 200.0).abs() < 1e-3));
        let full = to_float_scaled(&image, 1.0)?;
        assert_eq!(full.size(), image.size());
        Ok(())
    }

    #[test]
    fn test_too_few_images() {
        let stitcher = Stitcher::new(StitcherConfig::default());
        let images = vec![
            Image::<u8, 3>::from_size_val([0, 0].into(), 0).unwrap(),
            Image::<u8, 3>::from_size_val([32, 32].into(), 0).unwrap(),
        ];
        let failure = match stitcher.stitch(&images, &mut StitchContext::new()) {
            Ok(_) => panic!("stitching a single image must fail"),
            Err(failure) => failure,
        };
        assert!(matches!(
            failure.error,
            StitchError::InsufficientImages { usable: 1 }
        ));
        assert_eq!(failure.report.used, vec![1]);
        assert_eq!(failure.report.drop_reason(0), Some(&DropReason::EmptyImage));
    }

    #[test]
    fn test_cancelled_before_features() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let stitcher = Stitcher::new(StitcherConfig::default());
        let images = vec![Image::<u8, 3>::from_size_val([32, 32].into(), 0).unwrap(); 2];
        let flag = Arc::new(AtomicBool::new(true));
        let mut ctx = StitchContext::new().with_cancel_flag(flag);
        let failure = match stitcher.stitch(&images, &mut ctx) {
            Ok(_) => panic!("cancelled run must fail"),
            Err(failure) => failure,
        };
        assert!(matches!(failure.error, StitchError::Cancelled(Stage::Features)));
        assert_eq!(failure.report.used, vec![0, 1]);
    }
}
