//! Protocol model for the meshpipe cluster fabric.
//!
//! This crate has **no dependencies** and **no runtime state** — it is a
//! pure model of the coordination protocol: cluster/accelerator identifiers,
//! the closed set of command kinds, signal classification, and the wait
//! masks a cluster arms before blocking.
//!
//! The protocol descends from a hardware event unit with 8 physical event
//! lines per cluster, where the command kind *was* the line number. The
//! portable model keeps the kinds as a tagged enum carried inside the
//! message, so the 8-line ceiling no longer binds; the historical line
//! assignment survives only as [`SignalKind::line`] for log readability.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`id`] | `ClusterId`, `AcceleratorId`, `StageId` newtypes |
//! | [`kind`] | `CommandKind`, `SignalKind`, `KindSet` wait masks |
//! | [`signal`] | the `Signal` wire unit (sender, kind, payload) |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod id;
pub mod kind;
pub mod signal;

pub use id::{AcceleratorId, ClusterId, StageId};
pub use kind::{CommandKind, KindSet, SignalKind};
pub use signal::Signal;
