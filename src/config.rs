//! Runtime configuration.

use std::time::Duration;

use crate::flow::Tier;
use crate::{Error, Result};

/// Request pool, command supervision, and packet admission configuration.
/// Missing fields take their default values when loaded from JSON.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Request pool capacity.
    pub max_requests: usize,
    /// Command timeout used when a submission does not specify one.
    pub default_timeout_ms: u64,
    /// Command credits available before the controller reports its own
    /// `Num_HCI_Command_Packets` ([Vol 4] Part E, Section 4.4).
    pub commands_allowed: u8,
    /// Number of consecutive command timeouts that triggers a hard reset of
    /// the controller through the transport.
    pub timeout_reset_threshold: u32,
    /// Time after which a completed request that was never disposed is
    /// reclaimed.
    pub orphan_grace_ms: u64,
    /// Mailbox capacity of the serialized context.
    pub channel_capacity: usize,
    /// Capacity of the event and data notification channel.
    pub listener_capacity: usize,
    /// Time without SCO completion reports after which outstanding SCO
    /// credits are released.
    pub sco_completion_timeout_ms: u64,
    /// Packet admission policy.
    pub flow: FlowPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_requests: 500,
            default_timeout_ms: 5000,
            commands_allowed: 1,
            timeout_reset_threshold: 3,
            orphan_grace_ms: 30_000,
            channel_capacity: 64,
            listener_capacity: 64,
            sco_completion_timeout_ms: 100,
            flow: FlowPolicy::default(),
        }
    }
}

impl Config {
    /// Parses and validates a JSON configuration.
    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks configuration limits.
    pub fn validate(&self) -> Result<()> {
        let invalid = |s: &str| Err(Error::InvalidConfig(s.to_owned()));
        if self.max_requests == 0 || u32::try_from(self.max_requests).is_err() {
            return invalid("max_requests must be in [1, 2^32)");
        }
        if self.commands_allowed == 0 {
            return invalid("commands_allowed must be non-zero");
        }
        if self.timeout_reset_threshold == 0 {
            return invalid("timeout_reset_threshold must be non-zero");
        }
        if self.channel_capacity == 0 || self.listener_capacity == 0 {
            return invalid("channel capacities must be non-zero");
        }
        self.flow.validate()
    }

    /// Returns the default command timeout.
    #[inline]
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Returns the orphaned request grace period.
    #[inline]
    #[must_use]
    pub const fn orphan_grace(&self) -> Duration {
        Duration::from_millis(self.orphan_grace_ms)
    }

    /// Returns the SCO completion guard timeout.
    #[inline]
    #[must_use]
    pub const fn sco_completion_timeout(&self) -> Duration {
        Duration::from_millis(self.sco_completion_timeout_ms)
    }
}

/// Division of controller data buffers between priority tiers.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct FlowPolicy {
    /// Relative shares of the buffers that remain after the high tier
    /// reserve.
    pub weights: Weights,
    /// Buffers set aside for the high tier whenever it has a device.
    pub high_reserve: Reserve,
    /// Maximum number of queued packets per tier.
    pub max_queued_per_tier: usize,
    /// Tier of devices without a priority override.
    pub default_tier: Tier,
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            high_reserve: Reserve::Fixed(1),
            max_queued_per_tier: 256,
            default_tier: Tier::Mid,
        }
    }
}

impl FlowPolicy {
    fn validate(&self) -> Result<()> {
        let invalid = |s: &str| Err(Error::InvalidConfig(s.to_owned()));
        if matches!(self.high_reserve, Reserve::Percent(p) if p > 100) {
            return invalid("high_reserve percentage exceeds 100");
        }
        if self.weights.low == 0 && self.weights.mid == 0 && self.weights.high == 0 {
            return invalid("at least one tier weight must be non-zero");
        }
        if self.max_queued_per_tier == 0 {
            return invalid("max_queued_per_tier must be non-zero");
        }
        Ok(())
    }
}

/// Per-tier buffer weights.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Weights {
    pub low: u16,
    pub mid: u16,
    pub high: u16,
}

impl Weights {
    /// Returns the weight of tier `t`.
    #[inline]
    #[must_use]
    pub const fn get(&self, t: Tier) -> u16 {
        match t {
            Tier::Low => self.low,
            Tier::Mid => self.mid,
            Tier::High => self.high,
        }
    }
}

impl Default for Weights {
    #[inline]
    fn default() -> Self {
        Self {
            low: 1,
            mid: 2,
            high: 4,
        }
    }
}

/// High tier buffer reserve.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reserve {
    /// Fixed number of buffers.
    Fixed(u16),
    /// Percentage of the controller buffers.
    Percent(u8),
}

impl Reserve {
    /// Returns the number of reserved buffers out of `hw_bufs`.
    #[must_use]
    pub fn of(self, hw_bufs: u16) -> u16 {
        match self {
            Self::Fixed(n) => n.min(hw_bufs),
            #[allow(clippy::cast_possible_truncation)]
            Self::Percent(p) => (u32::from(hw_bufs) * u32::from(p.min(100)) / 100) as u16,
        }
    }
}
