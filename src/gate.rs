//! Serialized execution context.
//!
//! The [`Controller`] is owned by a single task. [`Gate`] is a cloneable
//! handle that sends operations to that task, so transport completion paths
//! and upper layers never mutate controller state directly. The task also
//! sleeps until the next command timeout, orphan reclaim, or SCO guard
//! deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::ctl::{Controller, Lifecycle, PowerState, Stats};
use crate::dev::RawAddr;
use crate::flow::{Admit, Admitted, Outbound, Tier};
use crate::hci::{Command, ConnHandle, EventType};
use crate::host::Transport;
use crate::req::{Completion, ControlFlags, Notifier, Outcome, RequestId, Submission};
use crate::util::Latch;
use crate::{Error, Result};

/// Unmatched event or inbound data delivered to listeners.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Notification {
    /// Event that did not complete a request, including intermediate events.
    Event { typ: EventType, raw: Vec<u8> },
    Acl { handle: ConnHandle, payload: Vec<u8> },
    Sco { handle: ConnHandle, payload: Vec<u8> },
}

/// Operation executed by the serialized context.
#[derive(Debug)]
enum Msg {
    Submit(Submission, Notifier, oneshot::Sender<Result<RequestId>>),
    Dispose(RequestId, oneshot::Sender<Result<()>>),
    Abort(RequestId, oneshot::Sender<Result<()>>),
    /// Timeout change or [`None`] to restore the original timeout.
    SetTimeout(RequestId, Option<Duration>, oneshot::Sender<Result<()>>),
    KillAll { destroy: bool, include_idle: bool },
    Event { raw: Vec<u8>, seq: u64 },
    InboundAcl(ConnHandle, Vec<u8>),
    InboundSco(ConnHandle, Vec<u8>),
    Packet(Outbound, oneshot::Sender<Result<Admit>>),
    Packets(Vec<Outbound>, oneshot::Sender<Result<Admitted>>),
    ScoSent(ConnHandle, u16),
    BufferSize { acl: u16, sco: u16, le: Option<u16> },
    ControllerReset,
    Power(PowerState),
    Advance(Lifecycle, oneshot::Sender<Result<()>>),
    SetPriority(RawAddr, Tier),
    Stats(oneshot::Sender<Stats>),
    Shutdown,
}

/// Handle of the serialized context.
#[derive(Clone, Debug)]
pub struct Gate {
    tx: mpsc::Sender<Msg>,
    notify: broadcast::Sender<Notification>,
}

impl Gate {
    /// Creates controller state for transport `t` and spawns the task that
    /// owns it. Must be called from within a Tokio runtime.
    pub fn new<T: Transport>(t: T, cfg: Config) -> Result<(Self, GateLoop)> {
        let cap = cfg.channel_capacity;
        let ctl = Controller::new(t, cfg)?;
        let notify = ctl.listeners();
        let (tx, rx) = mpsc::channel(cap);
        let c = CancellationToken::new();
        let lp = GateLoop {
            h: tokio::spawn(GateLoop::run(ctl, rx, c.clone())),
            c: c.clone(),
            _g: c.drop_guard(),
        };
        Ok((Self { tx, notify }, lp))
    }

    /// Returns a receiver of unmatched events and inbound data.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify.subscribe()
    }

    /// Submits a command. The notifier is invoked exactly once from within
    /// the serialized context.
    pub async fn submit(&self, sub: Submission, n: Notifier) -> Result<RequestId> {
        self.call(|tx| Msg::Submit(sub, n, tx)).await?
    }

    /// Executes a command and returns its completion. The request is
    /// disposed automatically.
    pub async fn exec(&self, sub: impl Into<Submission> + Send) -> Result<Completion> {
        let (tx, rx) = oneshot::channel();
        let sub = sub.into().flags(ControlFlags::AUTO_DISPOSE);
        self.submit(sub, Notifier::Channel(tx)).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Executes a command, blocking the current thread until the command
    /// completes or the outer timeout `d` expires. The request is aborted on
    /// expiry. Must not be called from an async context.
    pub fn exec_blocking(&self, sub: impl Into<Submission>, d: Duration) -> Result<Completion> {
        let latch = Arc::new(Latch::new());
        let sub = sub.into().flags(ControlFlags::AUTO_DISPOSE);
        let (tx, rx) = oneshot::channel();
        (self.tx)
            .blocking_send(Msg::Submit(sub, Notifier::Latch(Arc::clone(&latch)), tx))
            .map_err(|_| Error::Closed)?;
        let id = rx.blocking_recv().map_err(|_| Error::Closed)??;
        if let Some(c) = latch.wait_timeout(d) {
            return Ok(c);
        }
        warn!("{id} not completed within {d:?}");
        let (tx, rx) = oneshot::channel();
        if self.tx.blocking_send(Msg::Abort(id, tx)).is_ok() {
            let _ = rx.blocking_recv();
        }
        match latch.take() {
            Some(c) if c.outcome != Outcome::Aborted => Ok(c),
            _ => Err(Error::TimedOut),
        }
    }

    /// Disposes an idle request.
    pub async fn dispose(&self, id: RequestId) -> Result<()> {
        self.call(|tx| Msg::Dispose(id, tx)).await?
    }

    /// Aborts a waiting or busy request.
    pub async fn abort(&self, id: RequestId) -> Result<()> {
        self.call(|tx| Msg::Abort(id, tx)).await?
    }

    /// Changes the timeout of a request, re-arming its timer if it is busy.
    pub async fn set_timeout(&self, id: RequestId, d: Duration) -> Result<()> {
        self.call(|tx| Msg::SetTimeout(id, Some(d), tx)).await?
    }

    /// Restores the original timeout of a request.
    pub async fn restore_timeout(&self, id: RequestId) -> Result<()> {
        self.call(|tx| Msg::SetTimeout(id, None, tx)).await?
    }

    /// Aborts all pending requests. With `destroy`, they are also disposed,
    /// along with idle ones if `include_idle` is set.
    pub async fn kill_all_pending(&self, destroy: bool, include_idle: bool) -> Result<()> {
        self.send(Msg::KillAll {
            destroy,
            include_idle,
        })
        .await
    }

    /// Hands a received event to the serialized context. `seq` is the
    /// transport sequence number of the event.
    pub async fn event(&self, raw: Vec<u8>, seq: u64) -> Result<()> {
        self.send(Msg::Event { raw, seq }).await
    }

    /// Hands a received event to the serialized context without waiting for
    /// mailbox capacity.
    pub fn try_event(&self, raw: Vec<u8>, seq: u64) -> Result<()> {
        self.tx.try_send(Msg::Event { raw, seq }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(_) => Error::Closed,
        })
    }

    /// Delivers an inbound ACL payload to listeners.
    pub async fn inbound_acl(&self, h: ConnHandle, payload: Vec<u8>) -> Result<()> {
        self.send(Msg::InboundAcl(h, payload)).await
    }

    /// Delivers an inbound SCO payload to listeners.
    pub async fn inbound_sco(&self, h: ConnHandle, payload: Vec<u8>) -> Result<()> {
        self.send(Msg::InboundSco(h, payload)).await
    }

    /// Submits an outbound data packet.
    pub async fn send_packet(&self, out: Outbound) -> Result<Admit> {
        self.call(|tx| Msg::Packet(out, tx)).await?
    }

    /// Submits outbound ACL packets at the same time, so that tier priority
    /// decides which are written first.
    pub async fn send_packets(&self, batch: Vec<Outbound>) -> Result<Admitted> {
        self.call(|tx| Msg::Packets(batch, tx)).await?
    }

    /// Reports SCO packets written by a transport that does not report
    /// completed SCO packets.
    pub async fn sco_packet_sent(&self, h: ConnHandle, n: u16) -> Result<()> {
        self.send(Msg::ScoSent(h, n)).await
    }

    /// Reports controller buffer counts.
    pub async fn buffer_size(&self, acl: u16, sco: u16, le: Option<u16>) -> Result<()> {
        self.send(Msg::BufferSize { acl, sco, le }).await
    }

    /// Reports a controller reset.
    pub async fn controller_reset(&self) -> Result<()> {
        self.send(Msg::ControllerReset).await
    }

    /// Reports a power state transition.
    pub async fn power(&self, p: PowerState) -> Result<()> {
        self.send(Msg::Power(p)).await
    }

    /// Moves the controller to the specified configuration state.
    pub async fn advance(&self, to: Lifecycle) -> Result<()> {
        self.call(|tx| Msg::Advance(to, tx)).await?
    }

    /// Assigns the priority tier of a device.
    pub async fn set_priority(&self, addr: RawAddr, tier: Tier) -> Result<()> {
        self.send(Msg::SetPriority(addr, tier)).await
    }

    /// Returns a controller state snapshot.
    pub async fn stats(&self) -> Result<Stats> {
        self.call(Msg::Stats).await
    }

    /// Initializes the controller: resets it, reads its buffer sizes, and
    /// brings it online.
    pub async fn setup(&self) -> Result<()> {
        if self.stats().await?.lifecycle == Lifecycle::Uninitialized {
            self.advance(Lifecycle::KernelSetupPending).await?;
        }
        self.exec(Command::Reset).await?.into_result()?;
        self.exec(Command::ReadBufferSize).await?.into_result()?;
        if let Err(e) = self.exec(Command::LeReadBufferSize).await?.result() {
            debug!("LE buffer size unavailable: {e}");
        }
        while let Some(next) = self.stats().await?.lifecycle.next() {
            self.advance(next).await?;
        }
        Ok(())
    }

    /// Stops the serialized context. All requests are aborted and disposed.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Msg::Shutdown).await
    }

    /// Sends a message without waiting for its result.
    async fn send(&self, m: Msg) -> Result<()> {
        self.tx.send(m).await.map_err(|_| Error::Closed)
    }

    /// Sends a message and waits for its result.
    async fn call<R: Send>(&self, f: impl FnOnce(oneshot::Sender<R>) -> Msg) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.send(f(tx)).await?;
        rx.await.map_err(|_| Error::Closed)
    }
}

/// Serialized context task.
#[derive(Debug)]
pub struct GateLoop {
    h: tokio::task::JoinHandle<Result<()>>,
    c: CancellationToken,
    _g: tokio_util::sync::DropGuard,
}

impl GateLoop {
    /// Stops the serialized context.
    #[inline]
    pub async fn stop(self) -> Result<()> {
        self.c.cancel();
        self.h.await.map_err(|_| Error::Closed)?
    }

    /// Executes operations and fires timers until cancellation or shutdown.
    async fn run<T: Transport>(
        mut ctl: Controller<T>,
        mut rx: mpsc::Receiver<Msg>,
        c: CancellationToken,
    ) -> Result<()> {
        debug!("Gate started");
        loop {
            let deadline = ctl.next_deadline();
            tokio::select! {
                biased;
                _ = c.cancelled() => break,
                _ = sleep(deadline) => ctl.on_tick(Instant::now()),
                m = rx.recv() => match m {
                    Some(Msg::Shutdown) | None => break,
                    Some(m) => handle(&mut ctl, m),
                },
            }
        }
        debug!("Gate terminating");
        ctl.kill_all_pending(true, true, Instant::now());
        Ok(())
    }
}

impl Future for GateLoop {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Poll::Ready(ready!(Pin::new(&mut self.h).poll(cx)).map_err(|_| Error::Closed)?)
    }
}

/// Sleeps until the deadline, if there is one.
async fn sleep(deadline: Option<Instant>) {
    match deadline {
        Some(t) => tokio::time::sleep_until(t).await,
        None => std::future::pending().await,
    }
}

/// Executes one operation.
fn handle<T: Transport>(ctl: &mut Controller<T>, m: Msg) {
    let now = Instant::now();
    match m {
        Msg::Submit(sub, n, tx) => {
            let _ = tx.send(ctl.submit(sub, n, now));
        }
        Msg::Dispose(id, tx) => {
            let _ = tx.send(ctl.dispose(id));
        }
        Msg::Abort(id, tx) => {
            let _ = tx.send(ctl.abort_request(id, now));
        }
        Msg::SetTimeout(id, d, tx) => {
            let r = match d {
                Some(d) => ctl.set_timeout(id, d, now),
                None => ctl.restore_timeout(id, now),
            };
            let _ = tx.send(r);
        }
        Msg::KillAll {
            destroy,
            include_idle,
        } => ctl.kill_all_pending(destroy, include_idle, now),
        Msg::Event { raw, seq } => {
            if let Err(e) = ctl.process_event(&raw, seq, now) {
                warn!("Event #{seq} ignored: {e}");
            }
        }
        Msg::InboundAcl(h, payload) => ctl.inbound_acl(h, payload),
        Msg::InboundSco(h, payload) => ctl.inbound_sco(h, payload),
        Msg::Packet(out, tx) => {
            let _ = tx.send(ctl.send_packet(out, now));
        }
        Msg::Packets(batch, tx) => {
            let _ = tx.send(ctl.send_packets(batch));
        }
        Msg::ScoSent(h, n) => ctl.sco_packet_sent(h, n, now),
        Msg::BufferSize { acl, sco, le } => ctl.buffer_size(acl, sco, le),
        Msg::ControllerReset => ctl.controller_reset(now),
        Msg::Power(p) => ctl.set_power(p, now),
        Msg::Advance(to, tx) => {
            let _ = tx.send(ctl.advance(to, now));
        }
        Msg::SetPriority(addr, tier) => ctl.set_priority(addr, tier),
        Msg::Stats(tx) => {
            let _ = tx.send(ctl.stats());
        }
        Msg::Shutdown => {}
    }
}
