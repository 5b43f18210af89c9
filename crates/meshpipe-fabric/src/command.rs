//! Point-to-point command channel over the mailbox.
//!
//! The testbed firmware shared 8 event lines across every logically
//! distinct conversation and classified each arrival in hand-written
//! `if this kind, else if that kind` chains, the most failure-prone part
//! of that code. `CommandPort` replaces that with one dedicated
//! queue per (sender, kind) pair: arrivals are filed under their key as
//! they come in, and each `recv` drains only its own key's queue.

use crate::error::Result;
use crate::mailbox::Endpoint;
use meshpipe_proto::{AcceleratorId, ClusterId, CommandKind, KindSet, Signal, SignalKind};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// A cluster's command channel endpoint.
///
/// Owns the cluster's [`Endpoint`] plus a local stash keyed by
/// (sender, kind); barrier calls go through [`endpoint`](Self::endpoint).
/// The sender identity on every outgoing command is this port's own
/// cluster id by construction, so the firmware's sender cross-check has
/// nothing left to catch.
#[derive(Debug)]
pub struct CommandPort {
    endpoint: Endpoint,
    stash: HashMap<(ClusterId, CommandKind), VecDeque<u32>>,
}

impl CommandPort {
    /// Wrap a cluster endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stash: HashMap::new(),
        }
    }

    /// This port's cluster id.
    pub fn id(&self) -> ClusterId {
        self.endpoint.id()
    }

    /// The underlying endpoint, for barrier/restart calls.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send one command to `target`, carrying the accelerator id in the
    /// payload word. Non-blocking, fire-and-forget.
    ///
    /// # Errors
    ///
    /// Propagates mailbox errors (unknown target, overflow).
    pub fn send(
        &self,
        target: ClusterId,
        accelerator: AcceleratorId,
        kind: CommandKind,
    ) -> Result<()> {
        self.endpoint
            .signal(target, SignalKind::Command(kind), accelerator.raw())
    }

    /// Block until a command of `kind` from `from` is available and return
    /// its accelerator id.
    ///
    /// Commands of other (sender, kind) keys that arrive in the meantime
    /// are filed into their own queues, not dropped and not special-cased.
    ///
    /// # Errors
    ///
    /// [`crate::FabricError::Timeout`] once the fabric deadline expires.
    pub fn recv(&mut self, from: ClusterId, kind: CommandKind) -> Result<AcceleratorId> {
        loop {
            if let Some(payload) = self.pop(from, kind) {
                return Ok(AcceleratorId(payload));
            }
            let sig = self.endpoint.wait_and_clear(KindSet::all_commands())?;
            self.file(sig);
        }
    }

    /// Non-blocking receive: drains the mailbox into the stash, then pops
    /// the (from, kind) queue if non-empty.
    ///
    /// # Errors
    ///
    /// Only mailbox lock errors; an empty queue is `Ok(None)`.
    pub fn try_recv(
        &mut self,
        from: ClusterId,
        kind: CommandKind,
    ) -> Result<Option<AcceleratorId>> {
        self.drain()?;
        Ok(self.pop(from, kind).map(AcceleratorId))
    }

    /// Select-style receive: block until a command of any kind in `kinds`
    /// (from any sender) is available, and return the full key.
    ///
    /// Stashed commands are served first, in stash order; fresh arrivals
    /// of other kinds are filed, not dropped.
    ///
    /// # Errors
    ///
    /// [`crate::FabricError::Timeout`] once the fabric deadline expires.
    pub fn recv_any(
        &mut self,
        kinds: &[CommandKind],
    ) -> Result<(ClusterId, CommandKind, AcceleratorId)> {
        loop {
            if let Some(hit) = self.pop_any(kinds) {
                return Ok(hit);
            }
            let sig = self.endpoint.wait_and_clear(KindSet::all_commands())?;
            self.file(sig);
        }
    }

    /// Block until *any* command arrives, filing it into the stash.
    ///
    /// This is the controller's idle suspension point: wake on the next
    /// command, let the following round classify it.
    ///
    /// # Errors
    ///
    /// [`crate::FabricError::Timeout`] once the fabric deadline expires.
    pub fn wait_any(&mut self) -> Result<()> {
        let sig = self.endpoint.wait_and_clear(KindSet::all_commands())?;
        self.file(sig);
        Ok(())
    }

    /// Move every pending command from the mailbox into the stash.
    fn drain(&mut self) -> Result<()> {
        while let Some(sig) = self.endpoint.try_poll(KindSet::all_commands())? {
            self.file(sig);
        }
        Ok(())
    }

    fn file(&mut self, sig: Signal) {
        if let SignalKind::Command(kind) = sig.kind {
            trace!("{}: filed {sig}", self.id());
            self.stash
                .entry((sig.sender, kind))
                .or_default()
                .push_back(sig.payload);
        }
    }

    fn pop(&mut self, from: ClusterId, kind: CommandKind) -> Option<u32> {
        self.stash.get_mut(&(from, kind))?.pop_front()
    }

    fn pop_any(&mut self, kinds: &[CommandKind]) -> Option<(ClusterId, CommandKind, AcceleratorId)> {
        let key = self
            .stash
            .iter()
            .find(|((_, kind), queue)| kinds.contains(kind) && !queue.is_empty())
            .map(|(key, _)| *key)?;
        let payload = self.stash.get_mut(&key)?.pop_front()?;
        Some((key.0, key.1, AcceleratorId(payload)))
    }
}
