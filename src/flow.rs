//! Packet admission control ([Vol 4] Part E, Section 4.1).
//!
//! The controller accepts only as many data packets as it has buffers, and
//! reports freed buffers with `HCI_Number_Of_Completed_Packets` events. Buffers
//! are divided between three priority tiers. Each connected device belongs to
//! a tier, and every packet is either written immediately, if its tier and
//! the controller have buffers available, or queued until they do. Queued
//! packets are drained highest tier first, round-robin between devices within
//! a tier.

use std::collections::HashMap;

use structbuf::StructBuf;
use tokio::time::Instant;
use tracing::warn;

pub use admission::*;
pub use sco::*;

use crate::config::Config;
use crate::dev::DeviceRef;
use crate::hci::ConnHandle;
use crate::host::Transport;
use crate::{Error, Result};

mod admission;
mod sco;

#[cfg(test)]
mod tests;

/// Packet priority tier.
#[allow(clippy::exhaustive_enums)]
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
)]
#[repr(u8)]
pub enum Tier {
    Low = 0,
    Mid = 1,
    High = 2,
}

impl Tier {
    /// Tiers in drain order.
    pub const DRAIN_ORDER: [Self; 3] = [Self::High, Self::Mid, Self::Low];

    /// Returns the tier index.
    #[inline(always)]
    #[must_use]
    pub const fn idx(self) -> usize {
        self as usize
    }
}

/// Logical link type.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
pub enum LinkKind {
    /// BR/EDR ACL link.
    Acl,
    /// LE ACL link.
    LeAcl,
    /// SCO or eSCO link.
    Sco,
}

/// Packet admission result.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admit {
    /// Packet was written to the transport.
    Sent,
    /// Packet was queued until buffers become available.
    Queued,
}

/// Admission result of a packet batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Admitted {
    pub sent: usize,
    pub queued: usize,
}

impl std::ops::AddAssign for Admitted {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.sent += rhs.sent;
        self.queued += rhs.queued;
    }
}

/// Outbound ACL packet submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outbound {
    pub target: DeviceRef,
    pub payload: Vec<u8>,
    /// Tier override for this packet.
    pub hint: Option<Tier>,
    pub boundary: crate::hci::Boundary,
}

impl Outbound {
    /// Creates a packet submission that uses the device tier.
    #[inline]
    #[must_use]
    pub fn new(target: impl Into<DeviceRef>, payload: Vec<u8>) -> Self {
        Self {
            target: target.into(),
            payload,
            hint: None,
            boundary: crate::hci::Boundary::default(),
        }
    }

    /// Sets the packet tier.
    #[inline]
    #[must_use]
    pub fn tier(mut self, t: Tier) -> Self {
        self.hint = Some(t);
        self
    }
}

/// Admission state of all link types.
#[derive(Debug)]
pub struct Flow {
    acl: Admission,
    le: Admission,
    /// LE links use BR/EDR buffers ([Vol 4] Part E, Section 7.8.2).
    le_shared: bool,
    sco: ScoPipeline,
    kinds: HashMap<ConnHandle, LinkKind>,
}

impl Flow {
    /// Creates admission state with no controller buffers.
    #[must_use]
    pub fn new(cfg: &Config) -> Self {
        Self {
            acl: Admission::new(LinkKind::Acl, cfg.flow.clone()),
            le: Admission::new(LinkKind::LeAcl, cfg.flow.clone()),
            le_shared: false,
            sco: ScoPipeline::new(cfg.sco_completion_timeout(), cfg.flow.max_queued_per_tier),
            kinds: HashMap::new(),
        }
    }

    /// Returns the admission state of ACL links of the specified kind.
    #[inline]
    #[must_use]
    pub const fn admission(&self, kind: LinkKind) -> &Admission {
        match kind {
            LinkKind::LeAcl if !self.le_shared => &self.le,
            _ => &self.acl,
        }
    }

    #[inline]
    fn admission_mut(&mut self, kind: LinkKind) -> &mut Admission {
        match kind {
            LinkKind::LeAcl if !self.le_shared => &mut self.le,
            _ => &mut self.acl,
        }
    }

    /// Returns the SCO pipeline.
    #[inline(always)]
    #[must_use]
    pub const fn sco(&self) -> &ScoPipeline {
        &self.sco
    }

    /// Returns the kind of a connected link.
    #[inline]
    #[must_use]
    pub fn kind(&self, h: ConnHandle) -> Option<LinkKind> {
        self.kinds.get(&h).copied()
    }

    /// Updates BR/EDR ACL and SCO buffer counts from `HCI_Read_Buffer_Size`
    /// and drains queued packets.
    pub fn set_buffer_size<T: Transport + ?Sized>(&mut self, acl: u16, sco: u16, t: &mut T) {
        self.acl.set_hw_bufs(acl, t);
        self.sco.set_hw_bufs(sco, t);
    }

    /// Updates the LE ACL buffer count from `HCI_LE_Read_Buffer_Size`. A count
    /// of zero means that LE links share the BR/EDR buffers.
    pub fn set_le_buffer_size<T: Transport + ?Sized>(&mut self, n: u16, t: &mut T) {
        self.le_shared = n == 0;
        if !self.le_shared {
            self.le.set_hw_bufs(n, t);
        }
    }

    /// Registers a connected link.
    pub fn add_link(&mut self, h: ConnHandle, kind: LinkKind, tier: Tier) {
        if self.kinds.insert(h, kind).is_some() {
            warn!("Duplicate connection handle: {h}");
        }
        match kind {
            LinkKind::Sco => self.sco.add_link(h),
            _ => self.admission_mut(kind).add_link(h, tier),
        }
    }

    /// Removes a disconnected link, discarding its queued packets and
    /// releasing the buffers of its in-flight packets. Returns the number of
    /// discarded packets.
    pub fn remove_link<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        now: Instant,
        t: &mut T,
    ) -> usize {
        match self.kinds.remove(&h) {
            Some(LinkKind::Sco) => self.sco.remove_link(h, now, t),
            Some(kind) => self.admission_mut(kind).remove_link(h, t),
            None => 0,
        }
    }

    /// Changes the tier of an ACL link.
    pub fn set_tier<T: Transport + ?Sized>(&mut self, h: ConnHandle, tier: Tier, t: &mut T) {
        match self.kind(h) {
            Some(LinkKind::Sco) | None => {}
            Some(kind) => self.admission_mut(kind).set_tier(h, tier, t),
        }
    }

    /// Submits an encoded ACL or SCO packet for link `h`.
    pub fn send<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        pkt: StructBuf,
        hint: Option<Tier>,
        now: Instant,
        t: &mut T,
    ) -> Result<Admit> {
        match self.kind(h) {
            Some(LinkKind::Sco) => self.sco.enqueue(h, pkt, now, t),
            Some(kind) => self.admission_mut(kind).enqueue(h, pkt, hint, t),
            None => Err(Error::UnknownDevice(DeviceRef::Handle(h))),
        }
    }

    /// Submits encoded ACL packets at the same time, so that tier priority
    /// rather than submission order decides which are written first. The
    /// batch is rejected as a whole if any link is unknown or any tier queue
    /// would overflow.
    pub fn send_batch<T: Transport + ?Sized>(
        &mut self,
        batch: Vec<(ConnHandle, StructBuf, Option<Tier>)>,
        t: &mut T,
    ) -> Result<Admitted> {
        let (mut acl, mut le) = (Vec::new(), Vec::new());
        for (h, pkt, hint) in batch {
            match self.kind(h) {
                Some(LinkKind::LeAcl) if !self.le_shared => le.push((h, pkt, hint)),
                Some(LinkKind::Acl | LinkKind::LeAcl) => acl.push((h, pkt, hint)),
                Some(LinkKind::Sco) | None => {
                    return Err(Error::UnknownDevice(DeviceRef::Handle(h)))
                }
            }
        }
        self.acl.check_capacity(&acl)?;
        self.le.check_capacity(&le)?;
        let mut r = self.acl.enqueue_batch(acl, t)?;
        r += self.le.enqueue_batch(le, t)?;
        Ok(r)
    }

    /// Processes completed packet counts for link `h`.
    pub fn completed<T: Transport + ?Sized>(
        &mut self,
        h: ConnHandle,
        n: u16,
        now: Instant,
        t: &mut T,
    ) {
        match self.kind(h) {
            Some(LinkKind::Sco) => self.sco.completed(h, n, now, t),
            Some(kind) => self.admission_mut(kind).decrement_outstanding(h, n, t),
            None => warn!("Completed packets for unknown {h}: {n}"),
        }
    }

    /// Returns the next SCO guard timer deadline.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.sco.deadline()
    }

    /// Handles an expired SCO guard timer.
    #[inline]
    pub fn fire_timers<T: Transport + ?Sized>(&mut self, now: Instant, t: &mut T) {
        self.sco.fire_guard(now, t);
    }

    /// Discards all links, packets, and buffer counts.
    pub fn reset(&mut self) {
        self.acl.reset();
        self.le.reset();
        self.sco.reset();
        self.le_shared = false;
        self.kinds.clear();
    }
}
