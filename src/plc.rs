//! Collaborators the driver supplies to a layer chain.

use crate::error::LayerError;

/// Identity embedded in Forward Open/Close and PCCC requests.
///
/// Owned by the driver, not this crate, since product identity has
/// nothing to do with the layering protocol itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
    pub vendor_id: u16,
    pub vendor_serial_number: u32,
}

/// The subset of the surrounding PLC driver a layer needs to call into.
///
/// Implemented by the driver; this crate only ever holds `&mut dyn
/// PlcHandle` for the duration of a `connect`/`process_response` call.
pub trait PlcHandle {
    /// Ask the transport/session to raise its receive buffer to at
    /// least `min_size` bytes. May fail if the transport cannot grow
    /// any further.
    fn set_buffer_size(&mut self, min_size: usize) -> Result<(), LayerError>;
}

/// A [`PlcHandle`] that accepts every resize request.
///
/// Useful in tests and for drivers that pre-allocate their largest
/// possible receive buffer up front.
#[derive(Debug, Default)]
pub struct AlwaysResize {
    pub last_requested: Option<usize>,
}

impl PlcHandle for AlwaysResize {
    fn set_buffer_size(&mut self, min_size: usize) -> Result<(), LayerError> {
        self.last_requested = Some(min_size);
        Ok(())
    }
}
