//! Global barrier and restart, with cluster 0 as collector.
//!
//! All-to-one-to-all: every participant reports exactly one arrival to the
//! collector, which releases everyone once its checklist is complete. The
//! testbed firmware cross-checked the arrival count against the
//! hardware pending-event counter and merely logged on disagreement; here
//! the check is a hard typed error and duplicate arrivals fail the barrier
//! outright.

use crate::error::{FabricError, Result};
use crate::mailbox::Endpoint;
use meshpipe_proto::{ClusterId, KindSet, SignalKind};
use tracing::{debug, warn};

impl Endpoint {
    /// Synchronize all clusters at a checkpoint.
    ///
    /// The collector (cluster 0) loops `wait_and_clear(Arrival)` until all
    /// `N - 1` other clusters have reported exactly once, then fans out one
    /// release per participant. Every other cluster sends exactly one
    /// arrival carrying its own id, then blocks on its release.
    ///
    /// A single-cluster fabric degenerates to an immediate success.
    ///
    /// # Errors
    ///
    /// - [`FabricError::BarrierMismatch`] on a duplicate arrival;
    /// - [`FabricError::UnexpectedMessage`] on an out-of-range or forged
    ///   reporter id;
    /// - [`FabricError::Timeout`] if a participant never arrives within the
    ///   fabric deadline.
    pub fn barrier(&self) -> Result<()> {
        let n = self.cluster_count();
        if n <= 1 {
            return Ok(());
        }
        if self.id().is_master() {
            self.collect(n)?;
            self.fan_out_release(n)
        } else {
            self.signal(ClusterId::MASTER, SignalKind::Arrival, self.id().0)?;
            self.wait_and_clear(KindSet::of(SignalKind::Release))?;
            Ok(())
        }
    }

    /// One-to-all wake-up, called by the master immediately after a
    /// barrier to kick off the next phase. Participants block on exactly
    /// one release per `restart` call — wake-ups do not accumulate beyond
    /// the calls made.
    ///
    /// # Errors
    ///
    /// [`FabricError::Timeout`] on a participant that is never woken.
    pub fn restart(&self) -> Result<()> {
        let n = self.cluster_count();
        if n <= 1 {
            return Ok(());
        }
        if self.id().is_master() {
            self.fan_out_release(n)
        } else {
            self.wait_and_clear(KindSet::of(SignalKind::Release))?;
            Ok(())
        }
    }

    fn collect(&self, n: usize) -> Result<()> {
        let expected = n - 1;
        let mut seen = vec![false; n];
        let mut received = 0usize;
        while received < expected {
            let sig = self.wait_and_clear(KindSet::of(SignalKind::Arrival))?;
            let reporter = sig.payload as usize;
            if reporter == 0 || reporter >= n || sig.sender.index() != reporter {
                warn!("barrier: bad arrival {sig}");
                return Err(FabricError::unexpected(sig));
            }
            if seen[reporter] {
                // Seen in the wild when a participant re-enters the barrier
                // early; the firmware logged "MST has passed barrier without
                // waiting for SLV" and carried on. We fail instead.
                warn!(
                    "barrier: MST has passed barrier without waiting for SLV \
                     (duplicate arrival from {})",
                    sig.sender
                );
                return Err(FabricError::BarrierMismatch {
                    duplicate: sig.sender,
                    received,
                    expected,
                });
            }
            seen[reporter] = true;
            received += 1;
        }
        debug_assert_eq!(received, expected);
        debug!("barrier: collector complete ({received}/{expected})");
        Ok(())
    }

    fn fan_out_release(&self, n: usize) -> Result<()> {
        for i in 1..n {
            self.signal(ClusterId(i as u32), SignalKind::Release, 0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::mailbox::Fabric;
    use meshpipe_proto::{ClusterId, SignalKind};
    use std::time::Duration;

    #[test]
    fn single_cluster_barrier_is_noop() {
        let fabric = Fabric::with_deadline(1, Duration::from_millis(50));
        let master = fabric.endpoint(ClusterId(0)).unwrap();
        master.barrier().unwrap();
        master.restart().unwrap();
    }

    #[test]
    fn forged_reporter_id_is_rejected() {
        let fabric = Fabric::with_deadline(3, Duration::from_millis(200));
        let master = fabric.endpoint(ClusterId(0)).unwrap();
        let worker = fabric.endpoint(ClusterId(1)).unwrap();
        // Cluster 1 claims to be cluster 2.
        worker.signal(ClusterId(0), SignalKind::Arrival, 2).unwrap();
        let err = master.barrier().unwrap_err();
        assert!(matches!(err, crate::FabricError::UnexpectedMessage { .. }));
    }

    #[test]
    fn duplicate_arrival_is_a_mismatch() {
        let fabric = Fabric::with_deadline(3, Duration::from_millis(200));
        let master = fabric.endpoint(ClusterId(0)).unwrap();
        let worker = fabric.endpoint(ClusterId(1)).unwrap();
        worker.signal(ClusterId(0), SignalKind::Arrival, 1).unwrap();
        worker.signal(ClusterId(0), SignalKind::Arrival, 1).unwrap();
        let err = master.barrier().unwrap_err();
        assert!(matches!(
            err,
            crate::FabricError::BarrierMismatch {
                duplicate: ClusterId(1),
                ..
            }
        ));
    }
}
