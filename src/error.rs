use thiserror::Error;

/// Errors that abort the current layer operation.
///
/// These are the tier-2 (local validation) and tier-3 (remote failure)
/// errors of the layering contract. Flow-control dispositions
/// (`PENDING`/`PARTIAL`/`RETRY`) are not errors and are carried instead
/// by [`crate::layer::Status`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    #[error("buffer too small: needed at least {needed} bytes, had {available}")]
    TooSmall { needed: usize, available: usize },

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("layer offsets diverged: {0}")]
    BadConfig(String),

    #[error("out of memory encoding the routing path")]
    NoMem,

    #[error("malformed reply: {0}")]
    BadReply(String),

    #[error("CIP status {status:#04x} (extended {extended:#06x?})")]
    BadStatus { status: u8, extended: Option<u16> },

    #[error("remote CIP error, status {status:#04x} (extended {extended:#06x?})")]
    RemoteErr { status: u8, extended: Option<u16> },
}

pub type Result<T> = core::result::Result<T, LayerError>;
