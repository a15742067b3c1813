use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use structbuf::StructBuf;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::dev::RawAddr;
use crate::hci::{Command, ConnHandle, EventHeader, Expect, Opcode, Status};
use crate::util::Latch;
use crate::{Error, Result};

/// Pool-unique request identifier. The sequence number changes every time a
/// slot is reused, so identifiers of disposed requests never match new ones.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId {
    pub(super) slot: u32,
    pub(super) seq: u64,
}

impl RequestId {
    /// Returns the pool slot index.
    #[inline(always)]
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Req({}#{})", self.slot, self.seq)
    }
}

/// Identifier of the task that submitted a request.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct TaskId(pub u64);

/// Request state.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
pub enum State {
    /// Created or completed and not queued.
    Idle,
    /// Queued for dispatch.
    Waiting,
    /// Written to the transport and awaiting completion.
    Busy,
}

bitflags! {
    /// Request control flags.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct ControlFlags: u8 {
        /// Command is never timed out.
        const NO_TIMEOUT = 1 << 0;
        /// Request is disposed as soon as its completion is delivered.
        const AUTO_DISPOSE = 1 << 1;
        /// At most one request with the same opcode and device address may
        /// be busy at a time. Later requests wait in submission order.
        const SERIALIZE = 1 << 2;
    }
}

/// Command submission.
#[derive(Clone, Debug)]
pub struct Submission {
    pub cmd: Command,
    pub owner: TaskId,
    /// Command timeout or [`None`] for the configured default.
    pub timeout: Option<Duration>,
    /// Maximum number of result bytes to keep.
    pub result_cap: usize,
    pub flags: ControlFlags,
}

impl Submission {
    /// Creates a submission with default options.
    #[inline]
    #[must_use]
    pub const fn new(cmd: Command) -> Self {
        Self {
            cmd,
            owner: TaskId(0),
            timeout: None,
            result_cap: u8::MAX as usize,
            flags: ControlFlags::empty(),
        }
    }

    /// Sets the command timeout.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    /// Sets the owner task.
    #[inline]
    #[must_use]
    pub fn owner(mut self, t: TaskId) -> Self {
        self.owner = t;
        self
    }

    /// Sets the result capacity.
    #[inline]
    #[must_use]
    pub fn result_cap(mut self, n: usize) -> Self {
        self.result_cap = n;
        self
    }

    /// Adds control flags.
    #[inline]
    #[must_use]
    pub fn flags(mut self, f: ControlFlags) -> Self {
        self.flags = self.flags.union(f);
        self
    }
}

impl From<Command> for Submission {
    #[inline]
    fn from(cmd: Command) -> Self {
        Self::new(cmd)
    }
}

/// Final request outcome.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Completion event received with the specified status.
    Complete(Status),
    /// No completion event within the command timeout.
    TimedOut,
    /// Request was canceled.
    Aborted,
}

/// Completion delivered exactly once per request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Completion {
    pub id: RequestId,
    pub opcode: Opcode,
    pub outcome: Outcome,
    /// Return parameters or completion event parameters, truncated to the
    /// result capacity.
    pub params: Vec<u8>,
}

impl Completion {
    /// Returns the completion parameters if the command succeeded or the
    /// error corresponding to the outcome.
    pub fn result(&self) -> Result<&[u8]> {
        match self.outcome {
            Outcome::Complete(s) if s.is_ok() => Ok(&self.params),
            Outcome::Complete(status) => Err(Error::HardwareRejected {
                opcode: self.opcode,
                status,
            }),
            Outcome::TimedOut => Err(Error::TimedOut),
            Outcome::Aborted => Err(Error::Aborted),
        }
    }

    /// Converts the completion into its parameters or an error.
    #[inline]
    pub fn into_result(self) -> Result<Vec<u8>> {
        self.result()?;
        Ok(self.params)
    }
}

/// Request completion notification mechanism.
pub enum Notifier {
    /// Closure invoked within the serialized context.
    Callback(Box<dyn FnOnce(Completion) + Send>),
    /// Single-use channel for asynchronous waiters.
    Channel(oneshot::Sender<Completion>),
    /// Latch for synchronous (thread-blocking) waiters.
    Latch(Arc<Latch<Completion>>),
}

impl Notifier {
    /// Creates a callback notifier.
    #[inline]
    pub fn callback(f: impl FnOnce(Completion) + Send + 'static) -> Self {
        Self::Callback(Box::new(f))
    }

    /// Delivers the completion.
    pub(crate) fn notify(self, c: Completion) {
        match self {
            Self::Callback(f) => f(c),
            Self::Channel(tx) => {
                let _ = tx.send(c); // Receiver may be gone
            }
            Self::Latch(l) => l.set(c),
        }
    }
}

impl Debug for Notifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match *self {
            Self::Callback(_) => "Notifier::Callback",
            Self::Channel(_) => "Notifier::Channel",
            Self::Latch(_) => "Notifier::Latch",
        })
    }
}

/// Tracked command.
#[derive(Debug)]
pub struct Request {
    pub(crate) owner: TaskId,
    pub(crate) opcode: Opcode,
    pub(crate) addr: Option<RawAddr>,
    pub(crate) handle: Option<ConnHandle>,
    pub(crate) state: State,
    pub(crate) flags: ControlFlags,
    pub(crate) packet: StructBuf,
    pub(crate) expect: Expect,
    pub(crate) result_cap: usize,
    pub(crate) results: Vec<u8>,
    pub(crate) outcome: Option<Outcome>,
    pub(crate) timeout: Duration,
    pub(crate) orig_timeout: Duration,
    /// Time when the request was queued.
    pub(crate) queued: Option<Instant>,
    /// Time when the command was written to the transport.
    pub(crate) started: Option<Instant>,
    /// Armed timer deadline.
    pub(crate) deadline: Option<Instant>,
    pub(crate) idle_since: Instant,
    pub(crate) notifier: Option<Notifier>,
    pub(crate) intermediate_seen: u16,
    /// `CommandStatus` or `CommandComplete` received.
    pub(crate) acked: bool,
}

impl Request {
    /// Creates an idle request from a submission.
    pub fn new(sub: Submission, default_timeout: Duration, now: Instant) -> Result<Self> {
        let packet = sub.cmd.encode()?;
        let (addr, handle) = sub.cmd.target();
        let timeout = sub.timeout.unwrap_or(default_timeout);
        Ok(Self {
            owner: sub.owner,
            opcode: sub.cmd.opcode(),
            addr,
            handle,
            state: State::Idle,
            flags: sub.flags,
            packet,
            expect: sub.cmd.expect(),
            result_cap: sub.result_cap,
            results: Vec::new(),
            outcome: None,
            timeout,
            orig_timeout: timeout,
            queued: None,
            started: None,
            deadline: None,
            idle_since: now,
            notifier: None,
            intermediate_seen: 0,
            acked: false,
        })
    }

    /// Returns the request state.
    #[inline(always)]
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Returns the command opcode.
    #[inline(always)]
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the owner task.
    #[inline(always)]
    #[must_use]
    pub const fn owner(&self) -> TaskId {
        self.owner
    }

    /// Returns the target device address.
    #[inline(always)]
    #[must_use]
    pub const fn addr(&self) -> Option<RawAddr> {
        self.addr
    }

    /// Returns the target connection handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Option<ConnHandle> {
        self.handle
    }

    /// Returns the request outcome, if completed.
    #[inline(always)]
    #[must_use]
    pub const fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Returns the stored results.
    #[inline(always)]
    #[must_use]
    pub fn results(&self) -> &[u8] {
        &self.results
    }

    /// Returns the current command timeout.
    #[inline(always)]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the request serialization key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> Key {
        Key {
            opcode: self.opcode,
            addr: self.addr,
            handle: self.handle,
        }
    }

    /// Returns whether the request is ordered with other requests having the
    /// same opcode and address.
    #[inline(always)]
    #[must_use]
    pub const fn is_serialized(&self) -> bool {
        self.flags.contains(ControlFlags::SERIALIZE)
    }
}

/// Request lookup key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Key {
    pub opcode: Opcode,
    pub addr: Option<RawAddr>,
    pub handle: Option<ConnHandle>,
}

impl From<&EventHeader> for Key {
    /// Returns the lookup key of a received event: the command opcode for
    /// command events and the device address and connection handle that the
    /// event refers to, if any.
    #[inline]
    fn from(hdr: &EventHeader) -> Self {
        Self {
            opcode: hdr.opcode,
            addr: hdr.addr,
            handle: hdr.handle,
        }
    }
}

impl Key {
    /// Returns whether request `r` matches the key. The opcode must always
    /// match. With `use_attrs`, the address and handle must match as well.
    #[must_use]
    pub fn matches(&self, r: &Request, use_attrs: bool) -> bool {
        r.opcode == self.opcode && (!use_attrs || (r.addr == self.addr && r.handle == self.handle))
    }

    /// Returns whether the key identifies the same serialization group as
    /// request `r`.
    #[inline]
    #[must_use]
    pub fn same_group(&self, r: &Request) -> bool {
        r.opcode == self.opcode && r.addr == self.addr
    }
}
