//! Per-stage progress counters.

use crate::error::{PipelineError, Result};
use meshpipe_proto::StageId;

/// Monotone progress counters for one stage.
///
/// Created zeroed at the start of a measurement job, mutated only by the
/// owning cluster's single thread, discarded (or [`reset`](Self::reset))
/// at job end. Cross-cluster reads happen only via message payloads, never
/// by peeking at another stage's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageCounters {
    /// Tiles fully read into the stage's input buffers.
    pub tiles_in: u64,
    /// Tiles the accelerator has finished computing.
    pub tiles_compute: u64,
    /// Tiles fully written out of the stage.
    pub tiles_out: u64,
    /// Input transfers currently in flight.
    pub in_flight_in: u64,
    /// Output transfers currently in flight.
    pub in_flight_out: u64,
}

impl StageCounters {
    /// Whole images written out, given the job's tiles-per-image.
    pub fn images_out(&self, tiles_per_image: u64) -> u64 {
        self.tiles_out / tiles_per_image
    }

    /// Whole images read in, given the job's tiles-per-image.
    pub fn images_in(&self, tiles_per_image: u64) -> u64 {
        self.tiles_in / tiles_per_image
    }

    /// Whether both in-flight counts have drained to zero.
    pub fn drained(&self) -> bool {
        self.in_flight_in == 0 && self.in_flight_out == 0
    }

    /// Check the monotone chain `tiles_in >= tiles_compute >= tiles_out`.
    ///
    /// Called after every controller round; a violation means the round
    /// logic corrupted its own bookkeeping.
    ///
    /// # Errors
    ///
    /// [`PipelineError::CounterRegression`] naming the broken relation.
    pub fn check(&self, stage: StageId) -> Result<()> {
        if self.tiles_in < self.tiles_compute {
            return Err(PipelineError::regression(
                stage,
                format!(
                    "tiles_in {} < tiles_compute {}",
                    self.tiles_in, self.tiles_compute
                ),
            ));
        }
        if self.tiles_compute < self.tiles_out {
            return Err(PipelineError::regression(
                stage,
                format!(
                    "tiles_compute {} < tiles_out {}",
                    self.tiles_compute, self.tiles_out
                ),
            ));
        }
        Ok(())
    }

    /// Zero every counter for the next measurement job.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_counters_pass_the_check() {
        StageCounters::default().check(StageId(0)).unwrap();
    }

    #[test]
    fn image_accounting() {
        let c = StageCounters {
            tiles_in: 9,
            tiles_compute: 8,
            tiles_out: 8,
            ..Default::default()
        };
        assert_eq!(c.images_out(4), 2);
        assert_eq!(c.images_in(4), 2);
        c.check(StageId(0)).unwrap();
    }

    #[test]
    fn regression_is_detected() {
        let c = StageCounters {
            tiles_in: 2,
            tiles_compute: 3,
            ..Default::default()
        };
        let err = c.check(StageId(1)).unwrap_err();
        assert!(matches!(err, PipelineError::CounterRegression { .. }));
    }

    #[test]
    fn drained_requires_both_in_flight_zero() {
        let mut c = StageCounters::default();
        assert!(c.drained());
        c.in_flight_out = 1;
        assert!(!c.drained());
    }
}
