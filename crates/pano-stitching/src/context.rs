use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::StitchError;

/// Timed sections of a stitching run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Keypoint detection and description.
    Features,
    /// Pairwise matching and geometric verification.
    Matching,
    /// Camera initialization, bundle adjustment and wave correction.
    Adjusting,
    /// Matching plus adjusting.
    Registration,
    /// Seam estimation on the low resolution warped images.
    SeamSearch,
    /// Warping at compose scale and blending.
    Blending,
    /// Seam search plus blending.
    Composing,
    /// The whole run.
    Total,
}

/// Sink for per-stage elapsed times.
pub trait Telemetry {
    /// Record the time spent in a stage.
    fn record(&mut self, stage: Stage, elapsed: Duration);
}

impl Telemetry for () {
    fn record(&mut self, _stage: Stage, _elapsed: Duration) {}
}

/// Accumulated elapsed time of every stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    /// Time spent finding features.
    pub features: Duration,
    /// Time spent matching pairs.
    pub matching: Duration,
    /// Time spent estimating and refining cameras.
    pub adjusting: Duration,
    /// Time spent registering images.
    pub registration: Duration,
    /// Time spent searching seams.
    pub seam_search: Duration,
    /// Time spent warping and blending at compose scale.
    pub blending: Duration,
    /// Time spent composing the panorama.
    pub composing: Duration,
    /// Time spent in the whole run.
    pub total: Duration,
}

impl Telemetry for StageTimings {
    fn record(&mut self, stage: Stage, elapsed: Duration) {
        let slot = match stage {
            Stage::Features => &mut self.features,
            Stage::Matching => &mut self.matching,
            Stage::Adjusting => &mut self.adjusting,
            Stage::Registration => &mut self.registration,
            Stage::SeamSearch => &mut self.seam_search,
            Stage::Blending => &mut self.blending,
            Stage::Composing => &mut self.composing,
            Stage::Total => &mut self.total,
        };
        *slot += elapsed;
    }
}

/// Caller supplied state threaded through a run.
///
/// The deadline and the cancel flag are only checked between stages, so a run always stops
/// on a stage boundary.
#[derive(Default)]
pub struct StitchContext<'a> {
    telemetry: Option<&'a mut dyn Telemetry>,
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> StitchContext<'a> {
    /// Context without telemetry, deadline or cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report stage timings to the given sink.
    pub fn with_telemetry(mut self, telemetry: &'a mut dyn Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Abort the run at the first stage boundary after `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort the run at the first stage boundary after `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Forward an elapsed time to the telemetry sink, if any.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        if let Some(telemetry) = self.telemetry.as_deref_mut() {
            telemetry.record(stage, elapsed);
        }
    }

    /// Check cancellation and deadline before entering `next`.
    pub fn checkpoint(&self, next: Stage) -> Result<(), StitchError> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(StitchError::Cancelled(next));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StitchError::DeadlineExceeded(next));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timings_accumulate() {
        let mut timings = StageTimings::default();
        let mut ctx = StitchContext::new().with_telemetry(&mut timings);
        ctx.record(Stage::Matching, Duration::from_millis(5));
        ctx.record(Stage::Matching, Duration::from_millis(7));
        ctx.record(Stage::Total, Duration::from_millis(20));
        drop(ctx);

        assert_eq!(timings.matching, Duration::from_millis(12));
        assert_eq!(timings.total, Duration::from_millis(20));
        assert_eq!(timings.features, Duration::ZERO);
    }

    #[test]
    fn test_checkpoint() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = StitchContext::new().with_cancel_flag(flag.clone());
        assert!(ctx.checkpoint(Stage::Features).is_ok());

        flag.store(true, Ordering::Relaxed);
        assert!(matches!(
            ctx.checkpoint(Stage::Matching),
            Err(StitchError::Cancelled(Stage::Matching))
        ));

        let past = Instant::now() - Duration::from_millis(1);
        let ctx = StitchContext::new().with_deadline(past);
        assert!(matches!(
            ctx.checkpoint(Stage::Blending),
            Err(StitchError::DeadlineExceeded(Stage::Blending))
        ));
    }
}
