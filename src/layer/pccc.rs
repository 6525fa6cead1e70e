//! The PCCC encapsulation layer.
//!
//! Wraps a legacy DF1/PCCC command inside a CIP "Execute PCCC" request
//! (service 0x4B against the PCCC object, class 0x67 instance 1). This
//! layer never negotiates a connection itself — it rides whatever
//! connection the layer below it (normally [`crate::layer::cip::CipLayer`])
//! has already established.

use tracing::warn;

use crate::error::LayerError;
use crate::frame::Frame;
use crate::layer::{Layer, Status};
use crate::plc::ConnectionParams;

const PCCC_EXECUTE_SERVICE: u8 = 0x4B;
const PCCC_EXECUTE_REPLY: u8 = PCCC_EXECUTE_SERVICE | 0x80;

/// Request path to the PCCC object (class 0x67, instance 1), two
/// 16-bit words long.
const PCCC_OBJECT_PATH_WORDS: u8 = 2;
const PCCC_OBJECT_PATH: [u8; 4] = [0x20, 0x67, 0x24, 0x01];

/// `requestor_id` field length: a 1-byte CIP path-segment-style size
/// word (7) and then vendor id (2) plus vendor serial number (4).
const REQUESTOR_ID_LENGTH: u8 = 7;

/// Bytes this layer always reserves: service(1) + path length(1) +
/// path(4) + requestor-id length(1) + requestor id(7).
const PCCC_HEADER_SIZE: usize = 1 + 1 + PCCC_OBJECT_PATH.len() + 1 + REQUESTOR_ID_LENGTH as usize;

/// Bytes of the CIP reply prefix read before the status check:
/// service(1) + reserved(1) + status(1) + status size(1).
const PCCC_REPLY_PREFIX_SIZE: usize = 4;

/// Bytes this layer consumes from a successful reply before handing
/// the rest to the caller.
const PCCC_RESP_HEADER_SIZE: usize = 11;

/// Wraps requests for (and unwraps replies from) the PCCC object.
///
/// Generic over the next (lower) layer, normally a `CipLayer`.
pub struct PcccLayer<N> {
    next: N,
    connection_params: ConnectionParams,
    header_start_offset: usize,
}

impl<N: Layer> PcccLayer<N> {
    pub fn new(next: N, connection_params: ConnectionParams) -> Self {
        PcccLayer {
            next,
            connection_params,
            header_start_offset: 0,
        }
    }
}

impl<N: Layer> Layer for PcccLayer<N> {
    fn initialize(&mut self) {
        self.header_start_offset = 0;
        self.next.initialize();
    }

    fn connect(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        self.next.connect(frame)
    }

    fn disconnect(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        self.next.disconnect(frame)
    }

    fn reserve_space(&mut self, frame: &mut Frame<'_>) -> Result<(), LayerError> {
        self.next.reserve_space(frame)?;

        let remaining = frame.capacity().saturating_sub(frame.payload_start());
        if remaining < PCCC_HEADER_SIZE {
            return Err(LayerError::TooSmall {
                needed: PCCC_HEADER_SIZE,
                available: remaining,
            });
        }

        self.header_start_offset = frame.payload_start();
        frame.set_payload_start(self.header_start_offset + PCCC_HEADER_SIZE);
        Ok(())
    }

    fn build_layer(&mut self, frame: &mut Frame<'_>) -> Result<(), LayerError> {
        let saved_payload_start = frame.payload_start();
        let mut offset = self.header_start_offset;

        frame.put_u8(&mut offset, PCCC_EXECUTE_SERVICE)?;
        frame.put_u8(&mut offset, PCCC_OBJECT_PATH_WORDS)?;
        frame.put_bytes(&mut offset, &PCCC_OBJECT_PATH)?;
        frame.put_u8(&mut offset, REQUESTOR_ID_LENGTH)?;
        frame.put_u16_le(&mut offset, self.connection_params.vendor_id)?;
        frame.put_u32_le(&mut offset, self.connection_params.vendor_serial_number)?;

        if offset != saved_payload_start {
            return Err(LayerError::BadConfig(format!(
                "PCCC header ended at {offset} but payload starts at {saved_payload_start}"
            )));
        }

        frame.lower_payload_start_to(self.header_start_offset);
        self.next.build_layer(frame)
    }

    fn process_response(
        &mut self,
        frame: &mut Frame<'_>,
        plc: &mut dyn crate::plc::PlcHandle,
    ) -> Result<Status, LayerError> {
        let status = self.next.process_response(frame, plc)?;
        if status != Status::Ok {
            return Ok(status);
        }

        if frame.payload_len() < PCCC_REPLY_PREFIX_SIZE {
            return Ok(Status::Partial);
        }

        let reply_start = frame.payload_start();
        let mut offset = reply_start;
        let service = frame.get_u8(&mut offset)?;
        let _reserved = frame.get_u8(&mut offset)?;
        let status_code = frame.get_u8(&mut offset)?;
        let status_size = frame.get_u8(&mut offset)?;

        if service != PCCC_EXECUTE_REPLY {
            return Err(LayerError::BadReply(format!(
                "expected CIP service {PCCC_EXECUTE_REPLY:#04x}, got {service:#04x}"
            )));
        }

        if status_code == 0 {
            frame.set_payload_start(reply_start + PCCC_RESP_HEADER_SIZE);
            return Ok(Status::Ok);
        }

        let extended = if status_size > 0 {
            Some(frame.get_u16_le(&mut offset)?)
        } else {
            None
        };
        warn!(status = status_code, ?extended, "PCCC request rejected by remote");
        Err(LayerError::BadStatus {
            status: status_code,
            extended,
        })
    }
}
