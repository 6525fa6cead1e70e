//! The layering engine.
//!
//! This is not a strict OSI stack but a short chain of protocol layers,
//! each agreeing with its neighbours on shared buffer offsets, connection
//! state, and retry semantics. Every layer exposes the same six
//! operations and the engine drives them in a fixed direction:
//!
//! ```text
//! [ App request ]
//!       | build (top -> down)
//! +-------------------+
//! |  PCCC layer       |  emits CIP "Execute PCCC" wrapper
//! +-------------------+
//! |  CIP layer        |  emits CPF + connected/unconnected frame
//! +-------------------+
//! |  EIP session      |  (external, supplied by the driver)
//! +-------------------+
//! |  TCP transport     |  (external)
//! +-------------------+
//!       ^ process (bottom -> up)
//! ```
//!
//! `reserve_space` and `process_response` are bottom-up: a layer first
//! delegates to its `next` and only then acts on whatever window the
//! lower layers left it. `build_layer` is top-down: a layer writes its
//! own header, then delegates to `next`. `connect`/`disconnect` are
//! hybrid — a layer first asks `next` to connect, and only emits its own
//! handshake once the lower layers report success.
//!
//! Layer chains are built by generic nesting (`PcccLayer<CipLayer<N>>`)
//! rather than trait objects, keeping the recursive delegation
//! monomorphic; depth is bounded in practice to 3-4 layers.

pub mod cip;
pub mod pccc;

use crate::error::LayerError;
use crate::frame::Frame;
use crate::plc::PlcHandle;

/// Disposition of a layer operation that completed without a fatal
/// error.
///
/// `Retry`/`Pending`/`Partial` are flow control, not errors: encoding
/// them inside `Ok(..)` rather than as a fourth error variant makes it a
/// type error for a caller to silently treat a retry as success (see
/// Design Notes, "Retry as control flow").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The step completed; the caller may continue.
    Ok,
    /// A lower layer is still handshaking; the caller should retry the
    /// same operation later.
    Pending,
    /// The response is incomplete; the caller must read more bytes and
    /// re-enter `process_response` at the same cursors.
    Partial,
    /// The remote replied with a recoverable error and the layer already
    /// adjusted its own state; the caller must redrive `connect`.
    Retry,
}

/// A single protocol layer in the chain.
///
/// Implementors own a reference to the next (lower) layer as a field,
/// not as a trait object, so that composing `PcccLayer<CipLayer<N>>`
/// resolves to static dispatch all the way down.
pub trait Layer {
    /// Reset runtime state (connection flags, ids, saved offsets)
    /// without reallocating. Safe to call repeatedly across reconnects.
    fn initialize(&mut self);

    /// Ask lower layers to connect; once they succeed, emit this layer's
    /// own connection handshake if it has one.
    fn connect(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError>;

    /// Ask lower layers to connect the bottom of the chain while asking
    /// this layer to emit its own connection teardown if it has one.
    fn disconnect(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError>;

    /// Bottom-up: delegate to `next`, then reserve this layer's header
    /// region by advancing `payload_start` and clamping `payload_end`.
    fn reserve_space(&mut self, frame: &mut Frame<'_>) -> Result<(), LayerError>;

    /// Top-down: write this layer's header into the region it reserved,
    /// then delegate to `next`.
    fn build_layer(&mut self, frame: &mut Frame<'_>) -> Result<(), LayerError>;

    /// Bottom-up: delegate to `next`, then consume this layer's header
    /// from the resulting window.
    fn process_response(
        &mut self,
        frame: &mut Frame<'_>,
        plc: &mut dyn PlcHandle,
    ) -> Result<Status, LayerError>;
}

/// The bottom of a layer chain built purely from this crate.
///
/// Stands in for the EtherNet/IP session layer (out of scope, spec §1):
/// every operation is a no-op that reports success, so a
/// `CipLayer<NullLayer>` behaves as if the session below it were
/// already connected and ready. Production drivers substitute their own
/// EIP session layer here instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLayer;

impl Layer for NullLayer {
    fn initialize(&mut self) {}

    fn connect(&mut self, _frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        Ok(Status::Ok)
    }

    fn disconnect(&mut self, _frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        Ok(Status::Ok)
    }

    fn reserve_space(&mut self, _frame: &mut Frame<'_>) -> Result<(), LayerError> {
        Ok(())
    }

    fn build_layer(&mut self, _frame: &mut Frame<'_>) -> Result<(), LayerError> {
        Ok(())
    }

    fn process_response(
        &mut self,
        _frame: &mut Frame<'_>,
        _plc: &mut dyn PlcHandle,
    ) -> Result<Status, LayerError> {
        Ok(Status::Ok)
    }
}
