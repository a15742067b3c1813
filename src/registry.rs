//! Connected device registry.
//!
//! Devices are created by connection complete events and removed by
//! disconnection complete events or a controller reset. Each device belongs to
//! a priority tier that selects the admission counters used for its ACL
//! packets. Tier overrides may be assigned before the device connects and
//! survive reconnections.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::dev::{DeviceRef, RawAddr};
use crate::flow::{LinkKind, Tier};
use crate::hci::ConnHandle;

/// Connected device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Device {
    pub addr: RawAddr,
    /// ACL link handle.
    pub acl: Option<ConnHandle>,
    /// SCO or eSCO link handle.
    pub sco: Option<ConnHandle>,
    /// ACL link kind.
    pub kind: LinkKind,
    pub tier: Tier,
}

/// Link removed by a disconnection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Removed {
    pub addr: RawAddr,
    pub handle: ConnHandle,
    pub kind: LinkKind,
}

/// Device registry keyed by address and by connection handle.
#[derive(Debug)]
pub struct Registry {
    devs: HashMap<RawAddr, Device>,
    handles: HashMap<ConnHandle, RawAddr>,
    overrides: HashMap<RawAddr, Tier>,
    default_tier: Tier,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(default_tier: Tier) -> Self {
        Self {
            devs: HashMap::new(),
            handles: HashMap::new(),
            overrides: HashMap::new(),
            default_tier,
        }
    }

    /// Returns the number of connected devices.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.devs.len()
    }

    /// Returns whether no devices are connected.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devs.is_empty()
    }

    /// Registers a new ACL connection and returns the device tier.
    pub fn connect(&mut self, addr: RawAddr, h: ConnHandle, kind: LinkKind) -> Tier {
        let tier = (self.overrides.get(&addr).copied()).unwrap_or(self.default_tier);
        let dev = self.devs.entry(addr).or_insert(Device {
            addr,
            acl: None,
            sco: None,
            kind,
            tier,
        });
        if let Some(old) = dev.acl.replace(h) {
            warn!("{addr} reconnected as {h} without disconnecting {old}");
            self.handles.remove(&old);
        }
        (dev.kind, dev.tier) = (kind, tier);
        self.handles.insert(h, addr);
        debug!("{addr} connected as {h} ({kind}, {tier})");
        tier
    }

    /// Registers a synchronous connection of a device that may not have an
    /// ACL link yet.
    pub fn connect_sco(&mut self, addr: RawAddr, h: ConnHandle) {
        let tier = (self.overrides.get(&addr).copied()).unwrap_or(self.default_tier);
        let dev = self.devs.entry(addr).or_insert(Device {
            addr,
            acl: None,
            sco: None,
            kind: LinkKind::Acl,
            tier,
        });
        if let Some(old) = dev.sco.replace(h) {
            self.handles.remove(&old);
        }
        self.handles.insert(h, addr);
        debug!("{addr} connected SCO as {h}");
    }

    /// Removes the link with handle `h`. The device is removed once it has no
    /// remaining links.
    pub fn disconnect(&mut self, h: ConnHandle) -> Option<Removed> {
        let addr = self.handles.remove(&h)?;
        let dev = self.devs.get_mut(&addr)?;
        let kind = if dev.acl == Some(h) {
            dev.acl = None;
            dev.kind
        } else {
            dev.sco = None;
            LinkKind::Sco
        };
        if dev.acl.is_none() && dev.sco.is_none() {
            self.devs.remove(&addr);
        }
        debug!("{addr} disconnected {h}");
        Some(Removed { addr, handle: h, kind })
    }

    /// Returns the device that owns handle `h`.
    #[inline]
    #[must_use]
    pub fn by_handle(&self, h: ConnHandle) -> Option<&Device> {
        self.handles.get(&h).and_then(|a| self.devs.get(a))
    }

    /// Returns the device with address `addr`.
    #[inline]
    #[must_use]
    pub fn by_addr(&self, addr: RawAddr) -> Option<&Device> {
        self.devs.get(&addr)
    }

    /// Resolves a device reference to the ACL handle, or to the referenced
    /// handle itself.
    #[must_use]
    pub fn resolve(&self, r: DeviceRef) -> Option<ConnHandle> {
        match r {
            DeviceRef::Addr(a) => self.devs.get(&a).and_then(|d| d.acl),
            DeviceRef::Handle(h) => self.handles.contains_key(&h).then_some(h),
        }
    }

    /// Assigns a device tier. The tier applies at the next connection if the
    /// device is not connected. Returns the ACL handle of a connected device
    /// whose tier changed.
    pub fn set_priority(&mut self, addr: RawAddr, tier: Tier) -> Option<ConnHandle> {
        self.overrides.insert(addr, tier);
        let dev = self.devs.get_mut(&addr)?;
        if dev.tier == tier {
            return None;
        }
        debug!("{addr} tier changed from {} to {tier}", dev.tier);
        dev.tier = tier;
        dev.acl
    }

    /// Removes all devices. Tier overrides are kept.
    pub fn clear(&mut self) {
        self.devs.clear();
        self.handles.clear();
    }
}
