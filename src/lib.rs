//! Layering engine and innermost protocol layers for Allen-Bradley /
//! Rockwell EtherNet/IP PLCs.
//!
//! This crate implements the two layers closest to the wire in a CIP
//! request chain:
//!
//! - [`layer::cip`]: the Connection Manager layer, which negotiates a
//!   class-3 connection with Forward Open/Forward Close and frames
//!   subsequent traffic into Common Packet Format (CPF).
//! - [`layer::pccc`]: the "Execute PCCC" encapsulation layer, which
//!   wraps a legacy DF1/PCCC command for delivery over CIP.
//!
//! Both are expressed against the generic [`layer::Layer`] trait so a
//! driver can stack them on top of its own EtherNet/IP session and TCP
//! transport layers (`PcccLayer<CipLayer<YourSessionLayer>>`), or on top
//! of [`layer::NullLayer`] when exercising them in isolation.

#![forbid(unsafe_code)]

pub mod error;
pub mod frame;
pub mod layer;
pub mod path;
pub mod plc;

pub use error::{LayerError, Result};
pub use frame::Frame;
pub use layer::{Layer, NullLayer, Status};
pub use path::EncodedPath;
pub use plc::{ConnectionParams, PlcHandle};
