use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use structbuf::StructBuf;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::hci::ConnHandle;
use crate::host::Transport;
use crate::{Error, Result};

use super::Admit;

/// SCO packet pipeline. SCO links share one buffer pool without priority
/// tiers. Controllers are not required to report completed SCO packets
/// ([Vol 4] Part E, Section 7.3.36), so credits of packets that are not
/// reported within the guard time are released.
#[derive(Debug)]
pub struct ScoPipeline {
    hw_bufs: u16,
    outstanding: u16,
    queue: VecDeque<(ConnHandle, StructBuf)>,
    /// In-flight packets per link.
    links: HashMap<ConnHandle, u16>,
    guard: Duration,
    last_activity: Option<Instant>,
    max_queued: usize,
}

impl ScoPipeline {
    /// Creates a pipeline with no buffers.
    #[must_use]
    pub fn new(guard: Duration, max_queued: usize) -> Self {
        Self {
            hw_bufs: 0,
            outstanding: 0,
            queue: VecDeque::new(),
            links: HashMap::new(),
            guard,
            last_activity: None,
            max_queued,
        }
    }

    /// Returns the number of controller buffers.
    #[inline(always)]
    #[must_use]
    pub const fn hw_bufs(&self) -> u16 {
        self.hw_bufs
    }

    /// Returns the number of packets written and not yet completed.
    #[inline(always)]
    #[must_use]
    pub const fn outstanding(&self) -> u16 {
        self.outstanding
    }

    /// Returns the number of queued packets.
    #[inline(always)]
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Sets the number of controller buffers and drains queued packets.
    pub fn set_hw_bufs<T: Transport + ?Sized>(&mut self, n: u16, t: &mut T) {
        self.hw_bufs = n;
        self.drain(Instant::now(), t);
    }

    /// Registers a SCO link.
    #[inline]
    pub fn add_link(&mut self, h: ConnHandle) {
        self.links.entry(h).or_default();
    }

    /// Removes a SCO link, discarding its queued packets and releasing the
    /// credits of its in-flight packets. Returns the number of discarded
    /// packets.
    pub fn remove_link<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        now: Instant,
        t: &mut T,
    ) -> usize {
        let before = self.queue.len();
        self.queue.retain(|&(v, _)| v != h);
        let n = before - self.queue.len();
        if let Some(inflight) = self.links.remove(&h) {
            self.outstanding = self.outstanding.saturating_sub(inflight);
        }
        self.drain(now, t);
        n
    }

    /// Writes a packet if a buffer is available or queues it otherwise.
    pub fn enqueue<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        pkt: StructBuf,
        now: Instant,
        t: &mut T,
    ) -> Result<Admit> {
        if !self.links.contains_key(&h) {
            return Err(Error::UnknownDevice(h.into()));
        }
        if self.queue.is_empty() && self.outstanding < self.hw_bufs {
            self.write(h, &pkt, now, t)?;
            return Ok(Admit::Sent);
        }
        if self.queue.len() >= self.max_queued {
            return Err(Error::QueueFull);
        }
        trace!("Queued SCO packet for {h}");
        self.queue.push_back((h, pkt));
        Ok(Admit::Queued)
    }

    /// Processes `n` completed packets of link `h`.
    pub fn completed<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        n: u16,
        now: Instant,
        t: &mut T,
    ) {
        let Some(inflight) = self.links.get_mut(&h) else {
            warn!("Completed SCO packets for unknown {h}: {n}");
            return;
        };
        if n > *inflight {
            warn!("{h} reported {n} completed SCO packets with only {inflight} outstanding");
        }
        let n = n.min(*inflight);
        *inflight -= n;
        self.outstanding = self.outstanding.saturating_sub(n);
        self.last_activity = Some(now);
        self.drain(now, t);
    }

    /// Returns the guard timer deadline, if any credits are outstanding.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        (self.outstanding > 0)
            .then_some(self.last_activity)
            .flatten()
            .map(|t| t + self.guard)
    }

    /// Releases all outstanding credits if the guard timer expired.
    pub fn fire_guard<T: Transport + ?Sized>(&mut self, now: Instant, t: &mut T) {
        if !self.deadline().map_or(false, |d| d <= now) {
            return;
        }
        warn!(
            "No SCO completions for {:?}, releasing {} credits",
            self.guard, self.outstanding
        );
        self.outstanding = 0;
        self.links.values_mut().for_each(|v| *v = 0);
        self.last_activity = None;
        self.drain(now, t);
    }

    /// Discards all links and packets and clears buffer counts.
    pub fn reset(&mut self) {
        self.hw_bufs = 0;
        self.outstanding = 0;
        self.queue.clear();
        self.links.clear();
        self.last_activity = None;
    }

    /// Writes queued packets while buffers are available. Draining stops at
    /// the first transport error, leaving the failed packet at the head of
    /// the queue.
    fn drain<T: Transport + ?Sized>(&mut self, now: Instant, t: &mut T) {
        while self.outstanding < self.hw_bufs {
            let Some((h, pkt)) = self.queue.pop_front() else {
                break;
            };
            if self.write(h, &pkt, now, t).is_err() {
                self.queue.push_front((h, pkt));
                break;
            }
        }
    }

    fn write<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        pkt: &StructBuf,
        now: Instant,
        t: &mut T,
    ) -> Result<()> {
        if let Err(e) = t.send_sco(pkt.as_ref()) {
            error!("Failed to write SCO packet for {h}: {e}");
            return Err(e.into());
        }
        self.outstanding += 1;
        if let Some(v) = self.links.get_mut(&h) {
            *v += 1;
        }
        if self.outstanding == 1 {
            debug!("SCO guard armed");
            self.last_activity = Some(now);
        }
        Ok(())
    }
}
