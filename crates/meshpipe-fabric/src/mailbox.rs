//! Per-cluster mailboxes and the selective wait-and-clear primitive.
//!
//! The testbed hardware expressed this as a memory-mapped event FIFO per
//! cluster: set the receive mask to the line bits of interest, block until
//! any matching line fires, read the one pending event, clear it. The
//! portable form is a bounded tagged-signal queue per receiver; the mask
//! semantics are preserved behaviorally, the register layout is not.

use crate::error::{FabricError, Result};
use meshpipe_proto::{ClusterId, KindSet, Signal, SignalKind};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

/// Default bounded capacity per mailbox.
///
/// Sized well above anything the pipeline protocol can have in flight
/// (per-stage traffic is bounded by buffer depth); hitting it means a
/// protocol bug, surfaced as [`FabricError::MailboxOverflow`].
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

struct Mailbox {
    queue: Mutex<VecDeque<Signal>>,
    ready: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }
}

/// The shared signal fabric connecting `N` clusters.
///
/// Constructed once per job and shared by `Arc`; each cluster thread holds
/// exactly one [`Endpoint`].
pub struct Fabric {
    mailboxes: Vec<Mailbox>,
    capacity: usize,
    deadline: Option<Duration>,
}

impl Fabric {
    /// Create a fabric with no wait deadline (waits may block forever,
    /// matching the testbed hardware's behavior).
    pub fn new(clusters: usize) -> Arc<Self> {
        Self::build(clusters, DEFAULT_MAILBOX_CAPACITY, None)
    }

    /// Create a fabric whose blocking waits time out after `deadline`.
    pub fn with_deadline(clusters: usize, deadline: Duration) -> Arc<Self> {
        Self::build(clusters, DEFAULT_MAILBOX_CAPACITY, Some(deadline))
    }

    /// Create a fabric with explicit mailbox capacity and deadline.
    pub fn with_capacity(
        clusters: usize,
        capacity: usize,
        deadline: Option<Duration>,
    ) -> Arc<Self> {
        Self::build(clusters, capacity, deadline)
    }

    fn build(clusters: usize, capacity: usize, deadline: Option<Duration>) -> Arc<Self> {
        let mailboxes = (0..clusters).map(|_| Mailbox::new()).collect();
        Arc::new(Self {
            mailboxes,
            capacity,
            deadline,
        })
    }

    /// Number of clusters on the fabric.
    pub fn cluster_count(&self) -> usize {
        self.mailboxes.len()
    }

    /// Hand out the endpoint for one cluster.
    ///
    /// Each cluster thread should hold exactly one endpoint; the fabric
    /// does not enforce single ownership, the caller's threading does.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::UnknownCluster`] if `id` is out of range.
    pub fn endpoint(self: &Arc<Self>, id: ClusterId) -> Result<Endpoint> {
        if id.index() >= self.mailboxes.len() {
            return Err(FabricError::UnknownCluster {
                target: id,
                count: self.mailboxes.len(),
            });
        }
        Ok(Endpoint {
            fabric: Arc::clone(self),
            id,
        })
    }

    fn mailbox(&self, id: ClusterId) -> Result<&Mailbox> {
        self.mailboxes
            .get(id.index())
            .ok_or(FabricError::UnknownCluster {
                target: id,
                count: self.mailboxes.len(),
            })
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("clusters", &self.mailboxes.len())
            .field("capacity", &self.capacity)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// One cluster's handle to the fabric.
#[derive(Debug)]
pub struct Endpoint {
    fabric: Arc<Fabric>,
    id: ClusterId,
}

impl Endpoint {
    /// This endpoint's cluster id.
    pub fn id(&self) -> ClusterId {
        self.id
    }

    /// Number of clusters on the fabric.
    pub fn cluster_count(&self) -> usize {
        self.fabric.cluster_count()
    }

    /// Raise a signal on `target`'s mailbox. Non-blocking, fire-and-forget:
    /// there is no acknowledgement and no retry.
    ///
    /// # Errors
    ///
    /// [`FabricError::UnknownCluster`] for an invalid target,
    /// [`FabricError::MailboxOverflow`] if the target's bounded queue is
    /// full (a protocol bug on the sender's side).
    pub fn signal(&self, target: ClusterId, kind: SignalKind, payload: u32) -> Result<()> {
        let sig = Signal {
            sender: self.id,
            kind,
            payload,
        };
        let mailbox = self.fabric.mailbox(target)?;
        let mut queue = mailbox.queue.lock().map_err(|_| FabricError::Poisoned)?;
        if queue.len() >= self.fabric.capacity {
            return Err(FabricError::MailboxOverflow {
                target,
                capacity: self.fabric.capacity,
            });
        }
        trace!("{} -> {target}: {sig}", self.id);
        queue.push_back(sig);
        mailbox.ready.notify_all();
        Ok(())
    }

    /// Block until a signal whose kind is in `mask` is pending, remove the
    /// first such signal in queue order, and return it.
    ///
    /// Signals outside the mask are left pending untouched. If several
    /// masked kinds are pending, queue order decides — no ordering is
    /// guaranteed across kinds, but FIFO per (sender, kind) holds because
    /// there is a single queue.
    ///
    /// # Errors
    ///
    /// [`FabricError::Timeout`] once the fabric deadline expires.
    pub fn wait_and_clear(&self, mask: KindSet) -> Result<Signal> {
        let start = Instant::now();
        let mailbox = self.fabric.mailbox(self.id)?;
        let mut queue = mailbox.queue.lock().map_err(|_| FabricError::Poisoned)?;
        loop {
            if let Some(pos) = queue.iter().position(|sig| sig.matches(mask)) {
                // remove() preserves relative order of the remainder.
                let sig = queue.remove(pos).ok_or(FabricError::Poisoned)?;
                trace!("{}: cleared {sig}", self.id);
                return Ok(sig);
            }
            queue = match self.fabric.deadline {
                Some(deadline) => {
                    let remaining = deadline
                        .checked_sub(start.elapsed())
                        .ok_or_else(|| self.timeout(start, mask))?;
                    let (guard, timed_out) = mailbox
                        .ready
                        .wait_timeout(queue, remaining)
                        .map_err(|_| FabricError::Poisoned)?;
                    if timed_out.timed_out() && !guard.iter().any(|sig| sig.matches(mask)) {
                        return Err(self.timeout(start, mask));
                    }
                    guard
                }
                None => mailbox
                    .ready
                    .wait(queue)
                    .map_err(|_| FabricError::Poisoned)?,
            };
        }
    }

    /// Non-blocking variant of [`wait_and_clear`](Self::wait_and_clear):
    /// returns `None` when nothing in the mask is pending.
    ///
    /// Kept for diagnostics and opportunistic draining; the blocking form
    /// is the primary suspension point.
    ///
    /// # Errors
    ///
    /// Only lock poisoning; an empty mailbox is not an error.
    pub fn try_poll(&self, mask: KindSet) -> Result<Option<Signal>> {
        let mailbox = self.fabric.mailbox(self.id)?;
        let mut queue = mailbox.queue.lock().map_err(|_| FabricError::Poisoned)?;
        match queue.iter().position(|sig| sig.matches(mask)) {
            Some(pos) => Ok(queue.remove(pos)),
            None => Ok(None),
        }
    }

    /// How many signals are currently pending on this cluster's mailbox.
    ///
    /// Diagnostic counterpart of the hardware's pending-event count; tests
    /// use it to assert a quiesced fabric.
    ///
    /// # Errors
    ///
    /// Only lock poisoning.
    pub fn pending(&self) -> Result<usize> {
        let mailbox = self.fabric.mailbox(self.id)?;
        let queue = mailbox.queue.lock().map_err(|_| FabricError::Poisoned)?;
        Ok(queue.len())
    }

    fn timeout(&self, start: Instant, mask: KindSet) -> FabricError {
        FabricError::Timeout {
            cluster: self.id,
            waited_ms: start.elapsed().as_millis().min(u128::from(u64::MAX)) as u64,
            mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshpipe_proto::{AcceleratorId, CommandKind};

    fn pair() -> (Endpoint, Endpoint) {
        let fabric = Fabric::with_deadline(2, Duration::from_secs(2));
        (
            fabric.endpoint(ClusterId(0)).unwrap(),
            fabric.endpoint(ClusterId(1)).unwrap(),
        )
    }

    #[test]
    fn signal_then_wait_returns_payload() {
        let (a, b) = pair();
        a.signal(ClusterId(1), SignalKind::Arrival, 7).unwrap();
        let sig = b.wait_and_clear(KindSet::of(SignalKind::Arrival)).unwrap();
        assert_eq!(sig.payload, 7);
        assert_eq!(sig.sender, ClusterId(0));
        assert_eq!(b.pending().unwrap(), 0);
    }

    #[test]
    fn mask_leaves_other_kinds_pending() {
        let (a, b) = pair();
        let cmd = SignalKind::Command(CommandKind::StageInvocation);
        a.signal(ClusterId(1), cmd, 1).unwrap();
        a.signal(ClusterId(1), SignalKind::Release, 0).unwrap();

        let sig = b.wait_and_clear(KindSet::of(SignalKind::Release)).unwrap();
        assert_eq!(sig.kind, SignalKind::Release);
        // The command is still there.
        assert_eq!(b.pending().unwrap(), 1);
        let sig = b.try_poll(KindSet::all_commands()).unwrap().unwrap();
        assert_eq!(sig.kind, cmd);
    }

    #[test]
    fn fifo_per_sender_kind_triple() {
        let (a, b) = pair();
        let kind = SignalKind::Command(CommandKind::DmaInTerminate);
        for payload in 0..10 {
            a.signal(ClusterId(1), kind, payload).unwrap();
        }
        for expected in 0..10 {
            let sig = b.wait_and_clear(KindSet::of(kind)).unwrap();
            assert_eq!(sig.payload, expected, "FIFO order violated");
        }
    }

    #[test]
    fn wait_blocks_until_signal_arrives() {
        let fabric = Fabric::with_deadline(2, Duration::from_secs(5));
        let a = fabric.endpoint(ClusterId(0)).unwrap();
        let b = fabric.endpoint(ClusterId(1)).unwrap();

        let waiter = std::thread::spawn(move || b.wait_and_clear(KindSet::of(SignalKind::Release)));
        std::thread::sleep(Duration::from_millis(20));
        a.signal(ClusterId(1), SignalKind::Release, 0).unwrap();
        let sig = waiter.join().unwrap().unwrap();
        assert_eq!(sig.kind, SignalKind::Release);
    }

    #[test]
    fn wait_times_out() {
        let fabric = Fabric::with_deadline(1, Duration::from_millis(30));
        let a = fabric.endpoint(ClusterId(0)).unwrap();
        let err = a.wait_and_clear(KindSet::of(SignalKind::Arrival)).unwrap_err();
        assert!(matches!(err, FabricError::Timeout { .. }), "got {err}");
    }

    #[test]
    fn unknown_target_is_an_error() {
        let (a, _b) = pair();
        let err = a
            .signal(ClusterId(9), SignalKind::Arrival, 0)
            .unwrap_err();
        assert!(matches!(err, FabricError::UnknownCluster { .. }));
    }

    #[test]
    fn bounded_mailbox_overflows() {
        let fabric = Fabric::with_capacity(2, 4, None);
        let a = fabric.endpoint(ClusterId(0)).unwrap();
        for _ in 0..4 {
            a.signal(ClusterId(1), SignalKind::Arrival, 0).unwrap();
        }
        let err = a.signal(ClusterId(1), SignalKind::Arrival, 0).unwrap_err();
        assert!(matches!(err, FabricError::MailboxOverflow { capacity: 4, .. }));
    }

    #[test]
    fn self_signal_is_allowed() {
        let (a, _b) = pair();
        let sig = Signal::command(a.id(), CommandKind::DmaOutTerminate, AcceleratorId(0));
        a.signal(a.id(), sig.kind, sig.payload).unwrap();
        let got = a.wait_and_clear(KindSet::all_commands()).unwrap();
        assert_eq!(got.kind, sig.kind);
    }
}
