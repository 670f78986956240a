mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{sweep, Scene};
use glam::{DVec2, DVec3};
use pano_stitching::config::WaveCorrection;
use pano_stitching::warper::{ProjectionSurface, SphericalSurface};
use pano_stitching::{
    DropReason, Stage, StitchContext, StitchOutput, Stitcher, StitcherConfig, Telemetry,
};

/// Spherical surface refusing rays beyond a longitude once enabled.
struct LimitedSurface {
    max_longitude: f64,
    enabled: Arc<AtomicBool>,
}

impl ProjectionSurface for LimitedSurface {
    fn project(&self, ray: DVec3) -> Option<DVec2> {
        let uv = SphericalSurface.project(ray)?;
        if self.enabled.load(Ordering::SeqCst) && uv.x.abs() > self.max_longitude {
            return None;
        }
        Some(uv)
    }

    fn unproject(&self, uv: DVec2) -> DVec3 {
        SphericalSurface.unproject(uv)
    }

    fn pole_v(&self) -> Option<f64> {
        SphericalSurface.pole_v()
    }
}

/// Enables the surface limit once the seams are found.
struct EnableAfterSeams(Arc<AtomicBool>);

impl Telemetry for EnableAfterSeams {
    fn record(&mut self, stage: Stage, _elapsed: Duration) {
        if stage == Stage::SeamSearch {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

fn stitcher(enabled: Arc<AtomicBool>) -> Stitcher {
    let mut config = StitcherConfig {
        seam_megapix: 0.03,
        ..Default::default()
    };
    // keep the middle camera as the longitude origin
    config.bundle.wave_correction = WaveCorrection::None;
    Stitcher::new(config).with_surface(LimitedSurface {
        max_longitude: 45f64.to_radians(),
        enabled,
    })
}

fn check_last_image_dropped(output: &StitchOutput) {
    assert_eq!(output.report.used, vec![0, 1]);
    assert!(matches!(
        output.report.drop_reason(2),
        Some(DropReason::CompositionFailed(_))
    ));
    assert_eq!(output.cameras.len(), output.report.used.len());
    assert_eq!(output.seam_pixel_counts.len(), output.report.used.len());
    assert!(output.seam_pixel_counts.iter().all(|c| *c > 0));
}

// the right image reaches about 48 degrees of longitude, the left one about 42

#[test]
fn image_failing_seam_warp_is_dropped() -> Result<(), Box<dyn std::error::Error>> {
    let scene = Scene::new(17);
    let images = sweep(&scene, &[-20.0, 0.0, 26.0]);

    let enabled = Arc::new(AtomicBool::new(true));
    let output = stitcher(enabled).stitch(&images, &mut StitchContext::new())?;

    check_last_image_dropped(&output);
    Ok(())
}

#[test]
fn image_failing_compose_warp_is_dropped() -> Result<(), Box<dyn std::error::Error>> {
    let scene = Scene::new(17);
    let images = sweep(&scene, &[-20.0, 0.0, 26.0]);

    let enabled = Arc::new(AtomicBool::new(false));
    let mut telemetry = EnableAfterSeams(enabled.clone());
    let mut ctx = StitchContext::new().with_telemetry(&mut telemetry);
    let output = stitcher(enabled).stitch(&images, &mut ctx)?;
    drop(ctx);

    check_last_image_dropped(&output);
    assert_eq!(output.panorama.image.size(), output.panorama.mask.size());
    Ok(())
}
