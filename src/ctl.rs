//! Command dispatch, timeout supervision, and event correlation.
//!
//! [`Controller`] owns the request pool, device registry, and admission
//! state of one controller. It is not thread-safe; all operations must run in
//! a single serialized context, which is provided by [`crate::Gate`].

use std::collections::BTreeSet;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use lifecycle::*;

use crate::config::Config;
use crate::dev::RawAddr;
use crate::flow::{Admit, Admitted, Counters, Flow, LinkKind, Outbound, Tier};
use crate::gate::Notification;
use crate::hci::{acl_packet, sco_packet, ConnHandle};
use crate::host::Transport;
use crate::registry::Registry;
use crate::req::{Pool, Queue, RequestId};
use crate::{Error, Result};

mod correlate;
mod dispatch;
mod lifecycle;
mod supervisor;


/// Controller state snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub lifecycle: Lifecycle,
    pub power: PowerState,
    /// Allocated requests.
    pub requests: usize,
    pub waiting: usize,
    pub busy: usize,
    /// Available command credits.
    pub credits: u8,
    pub devices: usize,
    pub acl: Counters,
    pub le: Counters,
    pub sco_outstanding: u16,
    pub sco_queued: usize,
    /// Events missing from the received sequence.
    pub lost_events: u64,
    pub timeouts: u64,
    pub hard_resets: u64,
    pub unmatched_events: u64,
    pub stale_completions: u64,
}

/// Controller state owned by the serialized context.
#[derive(Debug)]
pub struct Controller<T> {
    t: T,
    cfg: Config,
    pool: Pool,
    credits: u8,
    /// Armed command timers.
    timers: BTreeSet<(Instant, RequestId)>,
    /// Reclaim deadlines of completed requests that were not disposed.
    orphans: BTreeSet<(Instant, RequestId)>,
    timeout_streak: u32,
    lifecycle: Lifecycle,
    power: PowerState,
    reg: Registry,
    flow: Flow,
    last_seq: Option<u64>,
    stats: Stats,
    listeners: broadcast::Sender<Notification>,
}

impl<T: Transport> Controller<T> {
    /// Creates controller state for transport `t`.
    pub fn new(t: T, cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let (listeners, _) = broadcast::channel(cfg.listener_capacity);
        Ok(Self {
            t,
            pool: Pool::new(cfg.max_requests),
            credits: cfg.commands_allowed,
            timers: BTreeSet::new(),
            orphans: BTreeSet::new(),
            timeout_streak: 0,
            lifecycle: Lifecycle::default(),
            power: PowerState::default(),
            reg: Registry::new(cfg.flow.default_tier),
            flow: Flow::new(&cfg),
            last_seq: None,
            stats: Stats::default(),
            listeners,
            cfg,
        })
    }

    /// Returns the transport.
    #[inline(always)]
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.t
    }

    /// Returns the configuration.
    #[inline(always)]
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.cfg
    }

    /// Returns the request pool.
    #[inline(always)]
    #[must_use]
    pub const fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Returns the device registry.
    #[inline(always)]
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.reg
    }

    /// Returns the admission state.
    #[inline(always)]
    #[must_use]
    pub const fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Returns the number of available command credits.
    #[inline(always)]
    #[must_use]
    pub const fn credits(&self) -> u8 {
        self.credits
    }

    /// Returns the controller configuration state.
    #[inline(always)]
    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Returns the controller power state.
    #[inline(always)]
    #[must_use]
    pub const fn power(&self) -> PowerState {
        self.power
    }

    /// Returns a receiver of unmatched events and inbound data.
    #[inline]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.listeners.subscribe()
    }

    /// Returns the notification channel.
    #[inline]
    pub(crate) fn listeners(&self) -> broadcast::Sender<Notification> {
        self.listeners.clone()
    }

    /// Returns a state snapshot.
    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats {
            lifecycle: self.lifecycle,
            power: self.power,
            requests: self.pool.len(),
            waiting: self.pool.queue_len(Queue::Wait),
            busy: self.pool.queue_len(Queue::Busy),
            credits: self.credits,
            devices: self.reg.len(),
            acl: *self.flow.admission(LinkKind::Acl).counters(),
            le: *self.flow.admission(LinkKind::LeAcl).counters(),
            sco_outstanding: self.flow.sco().outstanding(),
            sco_queued: self.flow.sco().queued(),
            ..self.stats.clone()
        }
    }

    /// Moves the controller to the specified configuration state and
    /// dispatches any commands that were waiting for it.
    pub fn advance(&mut self, to: Lifecycle, now: Instant) -> Result<()> {
        let from = self.lifecycle;
        if !from.can_transition(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        debug!("Controller state: {from} -> {to}");
        self.lifecycle = to;
        self.process_waiting_requests(false, now);
        Ok(())
    }

    /// Handles a controller reset notification. All pending requests are
    /// aborted, devices and admission counters are cleared, and the
    /// controller enters [`Lifecycle::ResetPending`].
    pub fn controller_reset(&mut self, now: Instant) {
        warn!("Controller reset");
        self.cleanup_expired(now);
        self.kill_all_pending(false, false, now);
        self.reg.clear();
        self.flow.reset();
        self.credits = self.cfg.commands_allowed;
        self.timeout_streak = 0;
        self.last_seq = None;
        self.lifecycle = Lifecycle::ResetPending;
    }

    /// Handles a power state transition. New commands are accepted only in
    /// [`PowerState::On`]. Entering sleep reclaims expired requests, and
    /// powering off aborts all pending requests.
    pub fn set_power(&mut self, p: PowerState, now: Instant) {
        if p == self.power {
            return;
        }
        debug!("Power state: {} -> {p}", self.power);
        self.power = p;
        match p {
            PowerState::On => self.process_waiting_requests(false, now),
            PowerState::Sleep => self.cleanup_expired(now),
            PowerState::Off => self.kill_all_pending(false, false, now),
        }
    }

    /// Updates buffer counts reported by the transport. An LE count of zero
    /// means that LE links share the ACL buffers.
    pub fn buffer_size(&mut self, acl: u16, sco: u16, le: Option<u16>) {
        self.flow.set_buffer_size(acl, sco, &mut self.t);
        if let Some(n) = le {
            self.flow.set_le_buffer_size(n, &mut self.t);
        }
    }

    /// Assigns the priority tier of a device.
    pub fn set_priority(&mut self, addr: RawAddr, tier: Tier) {
        if let Some(h) = self.reg.set_priority(addr, tier) {
            self.flow.set_tier(h, tier, &mut self.t);
        }
    }

    /// Submits an outbound data packet.
    pub fn send_packet(&mut self, out: Outbound, now: Instant) -> Result<Admit> {
        let (h, pkt) = self.outbound(&out)?;
        self.flow.send(h, pkt, out.hint, now, &mut self.t)
    }

    /// Submits outbound ACL packets at the same time.
    pub fn send_packets(&mut self, batch: Vec<Outbound>) -> Result<Admitted> {
        let mut v = Vec::with_capacity(batch.len());
        for out in &batch {
            let (h, pkt) = self.outbound(out)?;
            v.push((h, pkt, out.hint));
        }
        self.flow.send_batch(v, &mut self.t)
    }

    /// Handles a notification from a transport that does not report
    /// completed SCO packets.
    pub fn sco_packet_sent(&mut self, h: ConnHandle, n: u16, now: Instant) {
        match self.flow.kind(h) {
            Some(LinkKind::Sco) => self.flow.completed(h, n, now, &mut self.t),
            _ => warn!("SCO packet sent notification for non-SCO {h}"),
        }
    }

    /// Delivers an inbound ACL payload to listeners.
    pub fn inbound_acl(&mut self, h: ConnHandle, payload: Vec<u8>) {
        if self.reg.by_handle(h).is_none() {
            warn!("Dropped ACL data for unknown {h}");
            return;
        }
        self.notify(Notification::Acl { handle: h, payload });
    }

    /// Delivers an inbound SCO payload to listeners.
    pub fn inbound_sco(&mut self, h: ConnHandle, payload: Vec<u8>) {
        if self.reg.by_handle(h).is_none() {
            warn!("Dropped SCO data for unknown {h}");
            return;
        }
        self.notify(Notification::Sco { handle: h, payload });
    }

    /// Returns the earliest time at which [`Self::on_tick`] has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.timers.first().map(|&(t, _)| t),
            self.orphans.first().map(|&(t, _)| t),
            self.flow.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Handles all expired timers.
    pub fn on_tick(&mut self, now: Instant) {
        self.fire_timeouts(now);
        self.cleanup_orphaned(now);
        self.flow.fire_timers(now, &mut self.t);
    }

    /// Resolves the target of an outbound packet and encodes it.
    fn outbound(&self, out: &Outbound) -> Result<(ConnHandle, structbuf::StructBuf)> {
        if !self.lifecycle.is_online() {
            return Err(Error::TransportUnavailable);
        }
        let unknown = || Error::UnknownDevice(out.target);
        let h = self.reg.resolve(out.target).ok_or_else(unknown)?;
        let pkt = match self.flow.kind(h).ok_or_else(unknown)? {
            LinkKind::Sco => sco_packet(h, &out.payload)?,
            LinkKind::Acl | LinkKind::LeAcl => acl_packet(h, out.boundary, &out.payload)?,
        };
        Ok((h, pkt))
    }

    /// Broadcasts a notification to listeners, if there are any.
    #[inline]
    fn notify(&self, n: Notification) {
        let _ = self.listeners.send(n);
    }
}
