//! Host Controller Interface wire format ([Vol 4] Part E).

pub use {cmd::*, consts::*, data::*, event::*, handle::*};

mod cmd;
mod consts;
mod data;
mod event;
mod handle;

#[cfg(test)]
mod tests;

/// Error type returned by the HCI layer.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid event: {0:02X?}")]
    InvalidEvent(Vec<u8>),
    #[error("invalid data packet: {0:02X?}")]
    InvalidPacket(Vec<u8>),
    #[error("{opcode} command parameters too long ({len} bytes)")]
    CommandTooLong { opcode: Opcode, len: usize },
    #[error("{len}-byte payload exceeds the data packet limit")]
    PayloadTooLong { len: usize },
}

/// Common HCI result type.
pub type Result<T> = std::result::Result<T, Error>;
