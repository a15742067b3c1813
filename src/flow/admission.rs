use std::collections::{HashMap, VecDeque};

use structbuf::StructBuf;
use tracing::{debug, error, trace, warn};

use crate::config::FlowPolicy;
use crate::hci::ConnHandle;
use crate::host::Transport;
use crate::{Error, Result};

use super::{Admit, Admitted, LinkKind, Tier};

/// Buffer accounting of one admission pipeline.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Counters {
    /// Controller data buffers.
    pub hw_bufs: u16,
    /// Per-tier buffer allowance.
    pub allowed: [u16; 3],
    /// Per-tier packets written to the controller and not yet completed.
    pub outstanding: [u16; 3],
    /// Per-tier packets waiting for buffers.
    pub queued: [usize; 3],
    pub total_outstanding: u16,
    pub total_queued: usize,
}

impl Counters {
    /// Returns whether a packet of tier `t` can be written now, ignoring
    /// packets queued ahead of it.
    #[inline]
    #[must_use]
    const fn has_room(&self, t: usize) -> bool {
        self.outstanding[t] < self.allowed[t] && self.total_outstanding < self.hw_bufs
    }
}

/// Queue state of one connected link.
#[derive(Debug, Default)]
struct Link {
    /// Tier of packets without a tier hint.
    tier: Option<Tier>,
    /// Queued packets by tier.
    pkts: [VecDeque<StructBuf>; 3],
    /// Tiers of in-flight packets in transmission order. The controller
    /// completes packets of a link in the order they were sent.
    in_flight: VecDeque<Tier>,
}

/// ACL packet admission controller for one buffer pool.
#[derive(Debug)]
pub struct Admission {
    kind: LinkKind,
    policy: FlowPolicy,
    c: Counters,
    links: HashMap<ConnHandle, Link>,
    /// Per-tier round-robin order of links with queued packets.
    rr: [VecDeque<ConnHandle>; 3],
}

impl Admission {
    /// Creates an admission controller with no buffers.
    #[must_use]
    pub fn new(kind: LinkKind, policy: FlowPolicy) -> Self {
        Self {
            kind,
            policy,
            c: Counters::default(),
            links: HashMap::new(),
            rr: Default::default(),
        }
    }

    /// Returns buffer accounting counters.
    #[inline(always)]
    #[must_use]
    pub const fn counters(&self) -> &Counters {
        &self.c
    }

    /// Returns the tiers that currently have links, in-flight packets, or
    /// queued packets.
    #[must_use]
    pub fn active_tiers(&self) -> [bool; 3] {
        let mut a = [false; 3];
        for t in self.links.values().filter_map(|l| l.tier) {
            a[t.idx()] = true;
        }
        for (i, v) in a.iter_mut().enumerate() {
            *v |= self.c.outstanding[i] > 0 || self.c.queued[i] > 0;
        }
        a
    }

    /// Sets the number of controller buffers, recomputes tier allowances, and
    /// drains queued packets.
    pub fn set_hw_bufs<T: Transport + ?Sized>(&mut self, n: u16, t: &mut T) {
        self.c.hw_bufs = n;
        self.recompute();
        self.drain(t);
    }

    /// Registers a link of the specified tier.
    pub fn add_link(&mut self, h: ConnHandle, tier: Tier) {
        self.links.entry(h).or_default().tier = Some(tier);
        self.recompute();
    }

    /// Changes link tier. Packets that are already queued or in flight keep
    /// the tier they were admitted with.
    pub fn set_tier<T: Transport + ?Sized>(&mut self, h: ConnHandle, tier: Tier, t: &mut T) {
        let Some(l) = self.links.get_mut(&h) else {
            return;
        };
        l.tier = Some(tier);
        self.recompute();
        self.drain(t);
    }

    /// Removes link `h` after disconnection. Queued packets are discarded and
    /// in-flight packets are considered completed ([Vol 4] Part E, Section
    /// 4.3). Returns the number of discarded packets.
    pub fn remove_link<T: Transport + ?Sized>(&mut self, h: ConnHandle, t: &mut T) -> usize {
        let n = self.remove_all_packets_belonging_to(h);
        if let Some(l) = self.links.remove(&h) {
            for tier in l.in_flight {
                self.release(tier);
            }
        }
        self.recompute();
        self.drain(t);
        n
    }

    /// Discards queued packets of link `h` and returns their count. Packets
    /// already written to the controller are unaffected.
    pub fn remove_all_packets_belonging_to(&mut self, h: ConnHandle) -> usize {
        let Some(l) = self.links.get_mut(&h) else {
            return 0;
        };
        let mut total = 0;
        for (i, q) in l.pkts.iter_mut().enumerate() {
            let n = q.len();
            q.clear();
            self.c.queued[i] -= n;
            total += n;
        }
        self.c.total_queued -= total;
        for rr in &mut self.rr {
            rr.retain(|&v| v != h);
        }
        if total > 0 {
            debug!("Discarded {total} queued {} packets for {h}", self.kind);
        }
        total
    }

    /// Admits a packet for link `h`. The packet is written immediately if its
    /// tier has no queued packets and both the tier and the controller have
    /// buffers available. Otherwise, it is queued.
    pub fn enqueue<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        pkt: StructBuf,
        hint: Option<Tier>,
        t: &mut T,
    ) -> Result<Admit> {
        let tier = self.tier_of(h, hint)?;
        let i = tier.idx();
        if self.c.queued[i] == 0 && self.c.has_room(i) {
            self.write(h, tier, &pkt, t)?;
            return Ok(Admit::Sent);
        }
        if self.c.queued[i] >= self.policy.max_queued_per_tier {
            return Err(Error::QueueFull);
        }
        self.push(h, tier, pkt);
        Ok(Admit::Queued)
    }

    /// Returns an error if any packet of the batch targets an unknown link or
    /// would overflow its tier queue.
    pub fn check_capacity(&self, batch: &[(ConnHandle, StructBuf, Option<Tier>)]) -> Result<()> {
        let mut n = self.c.queued;
        for &(h, _, hint) in batch {
            let i = self.tier_of(h, hint)?.idx();
            n[i] += 1;
            if n[i] > self.policy.max_queued_per_tier {
                return Err(Error::QueueFull);
            }
        }
        Ok(())
    }

    /// Admits packets that were submitted at the same time. All packets are
    /// queued first and then drained, so tier priority decides which ones are
    /// written.
    pub fn enqueue_batch<T: Transport + ?Sized>(
        &mut self,
        batch: Vec<(ConnHandle, StructBuf, Option<Tier>)>,
        t: &mut T,
    ) -> Result<Admitted> {
        if batch.is_empty() {
            return Ok(Admitted::default());
        }
        self.check_capacity(&batch)?;
        let n = batch.len();
        for (h, pkt, hint) in batch {
            let tier = self.tier_of(h, hint)?;
            self.push(h, tier, pkt);
        }
        let sent = self.drain(t).min(n);
        Ok(Admitted {
            sent,
            queued: n - sent,
        })
    }

    /// Processes `n` completed packets of link `h` and drains queued packets.
    pub fn decrement_outstanding<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        n: u16,
        t: &mut T,
    ) {
        let Some(l) = self.links.get_mut(&h) else {
            warn!("Completed {} packets for unknown {h}: {n}", self.kind);
            return;
        };
        let avail = l.in_flight.len();
        let tiers: Vec<Tier> = (l.in_flight.drain(..usize::from(n).min(avail))).collect();
        if usize::from(n) > avail {
            warn!(
                "{h} reported {n} completed {} packets with only {avail} outstanding",
                self.kind
            );
        }
        for tier in tiers {
            self.release(tier);
        }
        self.recompute();
        self.drain(t);
    }

    /// Writes queued packets while buffers are available, highest tier first
    /// and round-robin between links within a tier. Draining stops at the
    /// first transport error, leaving the failed packet at the head of its
    /// link queue. Returns the number of packets written.
    pub fn drain<T: Transport + ?Sized>(&mut self, t: &mut T) -> usize {
        let mut sent = 0;
        for tier in Tier::DRAIN_ORDER {
            let i = tier.idx();
            while self.c.has_room(i) {
                let Some(&h) = self.rr[i].front() else {
                    break;
                };
                let Some(pkt) = (self.links.get_mut(&h)).and_then(|l| l.pkts[i].pop_front())
                else {
                    self.rr[i].pop_front();
                    continue;
                };
                if self.write(h, tier, &pkt, t).is_err() {
                    if let Some(l) = self.links.get_mut(&h) {
                        l.pkts[i].push_front(pkt);
                    }
                    return sent;
                }
                sent += 1;
                self.rr[i].pop_front();
                self.c.queued[i] -= 1;
                self.c.total_queued -= 1;
                if self.links.get(&h).map_or(false, |l| !l.pkts[i].is_empty()) {
                    self.rr[i].push_back(h);
                }
            }
        }
        sent
    }

    /// Discards all links and packets and clears buffer counts.
    pub fn reset(&mut self) {
        self.c = Counters::default();
        self.links.clear();
        for rr in &mut self.rr {
            rr.clear();
        }
    }

    /// Returns the tier of a packet for link `h`.
    fn tier_of(&self, h: ConnHandle, hint: Option<Tier>) -> Result<Tier> {
        match self.links.get(&h) {
            Some(l) => Ok(hint.or(l.tier).unwrap_or(self.policy.default_tier)),
            None => Err(Error::UnknownDevice(h.into())),
        }
    }

    /// Queues a packet.
    fn push(&mut self, h: ConnHandle, tier: Tier, pkt: StructBuf) {
        let i = tier.idx();
        let l = self.links.entry(h).or_default();
        if l.pkts[i].is_empty() {
            self.rr[i].push_back(h);
        }
        l.pkts[i].push_back(pkt);
        self.c.queued[i] += 1;
        self.c.total_queued += 1;
        trace!("Queued {tier} {} packet for {h}", self.kind);
    }

    /// Writes a packet to the transport and accounts for its buffer.
    fn write<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        tier: Tier,
        pkt: &StructBuf,
        t: &mut T,
    ) -> Result<()> {
        trace!("{} packet: {:02X?}", self.kind, pkt.as_ref());
        if let Err(e) = t.send_acl(pkt.as_ref()) {
            error!("Failed to write {} packet for {h}: {e}", self.kind);
            return Err(e.into());
        }
        let i = tier.idx();
        self.c.outstanding[i] += 1;
        self.c.total_outstanding += 1;
        if let Some(l) = self.links.get_mut(&h) {
            l.in_flight.push_back(tier);
        }
        Ok(())
    }

    /// Releases the buffer of a completed packet.
    fn release(&mut self, tier: Tier) {
        let i = tier.idx();
        self.c.outstanding[i] = self.c.outstanding[i].saturating_sub(1);
        self.c.total_outstanding = self.c.total_outstanding.saturating_sub(1);
    }

    /// Recomputes per-tier buffer allowances. Allowances never drop below the
    /// number of outstanding packets, and their sum never exceeds the number
    /// of controller buffers unless outstanding packets already do.
    fn recompute(&mut self) {
        let hw = self.c.hw_bufs;
        let mut a = split(hw, self.active_tiers(), &self.policy);
        for (v, &out) in a.iter_mut().zip(&self.c.outstanding) {
            *v = (*v).max(out);
        }
        let mut sum: u32 = a.iter().map(|&v| u32::from(v)).sum();
        for tier in [Tier::Low, Tier::Mid, Tier::High] {
            if sum <= u32::from(hw) {
                break;
            }
            let i = tier.idx();
            #[allow(clippy::cast_possible_truncation)]
            let cut = u32::from(a[i] - self.c.outstanding[i]).min(sum - u32::from(hw)) as u16;
            a[i] -= cut;
            sum -= u32::from(cut);
        }
        if a != self.c.allowed {
            debug!("{} allowance: {a:?} of {hw} buffers", self.kind);
        }
        self.c.allowed = a;
    }
}

/// Divides `hw` buffers between active tiers. The high tier receives its
/// reserve first, the rest is divided by weight, and every active tier gets at
/// least one buffer as long as another tier has more than one.
#[must_use]
pub(super) fn split(hw: u16, active: [bool; 3], p: &FlowPolicy) -> [u16; 3] {
    let mut a = [0_u16; 3];
    let Some(top) = Tier::DRAIN_ORDER.into_iter().find(|t| active[t.idx()]) else {
        return a;
    };
    let high = Tier::High.idx();
    let reserve = if active[high] {
        p.high_reserve.of(hw)
    } else {
        0
    };
    let rem = hw - reserve;
    let weight = |i: usize| {
        if active[i] {
            u32::from(p.weights.get([Tier::Low, Tier::Mid, Tier::High][i]))
        } else {
            0
        }
    };
    let sum_w: u32 = (0..3).map(weight).sum();
    if sum_w == 0 {
        a[top.idx()] = rem;
    } else {
        for (i, v) in a.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let share = (u32::from(rem) * weight(i) / sum_w) as u16;
            *v = share;
        }
        let used: u16 = a.iter().sum();
        a[top.idx()] += rem - used;
    }
    a[high] += reserve;
    for tier in Tier::DRAIN_ORDER {
        let i = tier.idx();
        if !active[i] || a[i] > 0 {
            continue;
        }
        let donor = (0..3).filter(|&d| a[d] > 1).max_by_key(|&d| a[d]);
        if let Some(d) = donor {
            a[d] -= 1;
            a[i] += 1;
        }
    }
    a
}
