//! Host transport layer ([Vol 4] Parts A-D).

use std::fmt::Debug;

#[cfg(test)]
pub(crate) mod mock;

/// Local host errors.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("transport unavailable")]
    Unavailable,
    #[error("transport write failed: {0}")]
    Write(String),
}

/// Common host result type.
pub type Result<T> = std::result::Result<T, Error>;

/// HCI transport layer. Packets are complete HCI packets without the
/// transport-specific packet indicator. Inbound traffic is delivered to the
/// crate by the transport owner, so only the outbound direction is part of
/// the interface.
pub trait Transport: Debug + Send + 'static {
    /// Writes a command packet.
    fn send_command(&mut self, pkt: &[u8]) -> Result<()>;

    /// Writes an ACL data packet.
    fn send_acl(&mut self, pkt: &[u8]) -> Result<()>;

    /// Writes a synchronous data packet.
    fn send_sco(&mut self, pkt: &[u8]) -> Result<()>;

    /// Performs a transport-level reset of the controller after repeated
    /// command timeouts. The default implementation does nothing.
    fn hard_reset(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    #[inline]
    fn send_command(&mut self, pkt: &[u8]) -> Result<()> {
        (**self).send_command(pkt)
    }

    #[inline]
    fn send_acl(&mut self, pkt: &[u8]) -> Result<()> {
        (**self).send_acl(pkt)
    }

    #[inline]
    fn send_sco(&mut self, pkt: &[u8]) -> Result<()> {
        (**self).send_sco(pkt)
    }

    #[inline]
    fn hard_reset(&mut self) {
        (**self).hard_reset();
    }
}
