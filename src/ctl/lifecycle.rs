/// Controller configuration state.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, strum::Display)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    KernelSetupPending,
    DaemonSetupPending,
    DaemonSetupComplete,
    Online,
    ResetPending,
    KernelPostResetSetupPending,
    DaemonPostResetSetupPending,
    DaemonPostResetSetupComplete,
}

impl Lifecycle {
    /// Returns whether the transition from `self` to `to` is valid. Any
    /// state may transition to [`Lifecycle::ResetPending`].
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        use Lifecycle::*;
        matches!(
            (self, to),
            (_, ResetPending)
                | (Uninitialized, KernelSetupPending)
                | (KernelSetupPending, DaemonSetupPending)
                | (DaemonSetupPending, DaemonSetupComplete)
                | (DaemonSetupComplete | DaemonPostResetSetupComplete, Online)
                | (ResetPending, KernelPostResetSetupPending)
                | (KernelPostResetSetupPending, DaemonPostResetSetupPending)
                | (DaemonPostResetSetupPending, DaemonPostResetSetupComplete)
        )
    }

    /// Returns the next state on the path to [`Lifecycle::Online`].
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        use Lifecycle::*;
        Some(match self {
            Uninitialized => KernelSetupPending,
            KernelSetupPending => DaemonSetupPending,
            DaemonSetupPending => DaemonSetupComplete,
            DaemonSetupComplete | DaemonPostResetSetupComplete => Online,
            ResetPending => KernelPostResetSetupPending,
            KernelPostResetSetupPending => DaemonPostResetSetupPending,
            DaemonPostResetSetupPending => DaemonPostResetSetupComplete,
            Online => return None,
        })
    }

    /// Returns whether commands may be written to the controller. Commands
    /// submitted before the controller is initialized stay queued.
    #[inline]
    #[must_use]
    pub const fn accepts_commands(self) -> bool {
        !matches!(self, Self::Uninitialized)
    }

    /// Returns whether data packets may be admitted.
    #[inline(always)]
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Controller power state.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, strum::Display)]
pub enum PowerState {
    #[default]
    On,
    Sleep,
    Off,
}
