//! Error types for fabric operations.

use meshpipe_proto::{ClusterId, KindSet, SignalKind};
use thiserror::Error;

/// Result type alias for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;

/// Errors that can occur on the cluster fabric.
#[derive(Debug, Error)]
pub enum FabricError {
    /// A signal was addressed to a cluster the fabric does not have.
    #[error("Unknown cluster {target} (fabric has {count} clusters)")]
    UnknownCluster {
        /// The invalid target.
        target: ClusterId,
        /// Number of clusters in the fabric.
        count: usize,
    },

    /// A mailbox reached its bounded capacity.
    #[error("Mailbox overflow on {target}: {capacity} signals pending")]
    MailboxOverflow {
        /// The receiver whose mailbox is full.
        target: ClusterId,
        /// Configured mailbox capacity.
        capacity: usize,
    },

    /// A blocking wait exceeded the fabric deadline.
    #[error("Wait on {cluster} timed out after {waited_ms}ms (mask {mask:?})")]
    Timeout {
        /// The cluster that was waiting.
        cluster: ClusterId,
        /// How long it waited, in milliseconds.
        waited_ms: u64,
        /// The mask it was armed with.
        mask: KindSet,
    },

    /// The barrier collector saw a duplicate arrival before release.
    #[error("Barrier mismatch: duplicate arrival from {duplicate} with {received} of {expected} collected")]
    BarrierMismatch {
        /// The cluster that reported twice.
        duplicate: ClusterId,
        /// Distinct arrivals collected so far.
        received: usize,
        /// Arrivals required for release.
        expected: usize,
    },

    /// A signal arrived that the protocol does not allow at this point.
    #[error("Unexpected message: {kind} from {sender} with payload {payload}")]
    UnexpectedMessage {
        /// Originating cluster.
        sender: ClusterId,
        /// Signal classification.
        kind: SignalKind,
        /// The data word it carried.
        payload: u32,
    },

    /// A cluster thread panicked while holding a mailbox lock.
    #[error("Fabric poisoned: a cluster thread panicked mid-operation")]
    Poisoned,
}

impl FabricError {
    /// Create an unexpected-message error from a received signal.
    pub fn unexpected(sig: meshpipe_proto::Signal) -> Self {
        Self::UnexpectedMessage {
            sender: sig.sender,
            kind: sig.kind,
            payload: sig.payload,
        }
    }
}
