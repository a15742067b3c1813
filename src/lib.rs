//! HCI command/event correlation and packet admission control.
//!
//! The crate sits between a Bluetooth host stack and an HCI transport. It
//! tracks every outstanding command in a bounded request pool, dispatches
//! commands within the controller's command credits, correlates received
//! events with the commands that caused them, supervises command timeouts, and
//! admits outbound ACL and SCO packets to the controller's data buffers
//! according to per-device priority tiers.
//!
//! All state is owned by a single task that is reachable through a [`Gate`]
//! handle. Transport completion paths hand events and data to the gate instead
//! of mutating shared state.

#![warn(missing_debug_implementations)]
#![warn(non_ascii_idents)]
#![warn(single_use_lifetimes)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_qualifications)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::exhaustive_enums)]
#![warn(clippy::todo)]
#![warn(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]

pub use {
    config::{Config, FlowPolicy, Reserve, Weights},
    ctl::{Controller, Lifecycle, PowerState, Stats},
    dev::{DeviceRef, RawAddr},
    flow::{Admit, Admitted, LinkKind, Outbound, Tier},
    gate::{Gate, GateLoop, Notification},
    req::{Completion, ControlFlags, Notifier, Outcome, RequestId, State, Submission, TaskId},
};

pub mod config;
pub mod ctl;
pub mod dev;
pub mod flow;
pub mod gate;
pub mod hci;
pub mod host;
pub mod registry;
pub mod req;
#[path = "util/util.rs"]
mod util;

/// Error type returned by request, dispatch, and admission operations.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Hci(#[from] hci::Error),
    #[error(transparent)]
    Host(#[from] host::Error),
    #[error("request pool exhausted")]
    OutOfRequests,
    #[error("request is in an invalid state for this operation")]
    InvalidState,
    #[error("request not found")]
    NotFound,
    #[error("transport unavailable")]
    TransportUnavailable,
    #[error("command timed out")]
    TimedOut,
    #[error("command aborted")]
    Aborted,
    #[error("admission queue full")]
    QueueFull,
    #[error("{opcode} command rejected by controller: {status}")]
    HardwareRejected {
        opcode: hci::Opcode,
        status: hci::Status,
    },
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceRef),
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: Lifecycle, to: Lifecycle },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("gate closed")]
    Closed,
}

impl Error {
    /// Returns the controller status code for commands rejected by the
    /// controller.
    #[must_use]
    pub const fn status(&self) -> Option<hci::Status> {
        match *self {
            Self::HardwareRejected { status, .. } => Some(status),
            _ => None,
        }
    }
}

/// Common crate result type.
pub type Result<T> = std::result::Result<T, Error>;
