//! The CIP connection manager layer.
//!
//! Negotiates a class-3 connected session with Forward Open/Forward
//! Close, frames subsequent requests into CIP Common Packet Format
//! (CPF), and owns the connection identifiers and sequence counter. See
//! spec §4.2-§4.4 for the exact wire layout; this module follows it
//! byte for byte.

use tracing::warn;

use crate::error::LayerError;
use crate::frame::Frame;
use crate::layer::{Layer, Status};
use crate::path::EncodedPath;
use crate::plc::{ConnectionParams, PlcHandle};

const CPF_UNCONNECTED_HEADER_SIZE: usize = 16;
const CPF_CONNECTED_HEADER_SIZE: usize = 20;
/// Bytes reserved on top of the connected CPF header for the connected
/// sequence id that rides along with the data item.
const CONNECTED_SEQUENCE_ID_SIZE: usize = 2;

const CIP_PAYLOAD_HEADER_FUDGE: usize = 40;

/// Default/maximum small-format CIP payload (spec §3, `cip_payload`).
pub const CIP_STD_PAYLOAD: u16 = 504;
/// The size Forward Open renegotiation falls back to before giving up
/// on the extended format entirely.
pub const CIP_STD_EX_PAYLOAD: u16 = 4000;
/// 9-bit ceiling of the standard (non-extended) connection parameter
/// field.
const STD_CONNECTION_PARAM_CEILING: u16 = 0x01F8;

const CPF_UNCONNECTED_ADDRESS_ITEM: u16 = 0x0000;
const CPF_UNCONNECTED_DATA_ITEM: u16 = 0x00B2;
const CPF_CONNECTED_ADDRESS_ITEM: u16 = 0x00A1;
const CPF_CONNECTED_DATA_ITEM: u16 = 0x00B1;

const CIP_FORWARD_OPEN_REQUEST: u8 = 0x54;
const CIP_FORWARD_OPEN_REQUEST_EX: u8 = 0x5B;
const CIP_FORWARD_CLOSE_REQUEST: u8 = 0x4E;
const CIP_CMD_EXECUTED_FLAG: u8 = 0x80;

const CIP_SERVICE_STATUS_OK: u8 = 0x00;
const CIP_ERR_UNSUPPORTED: u8 = 0x08;
const CIP_ERR_NO_RESOURCES: u8 = 0x02;
const CIP_EXT_STATUS_INVALID_SIZE: u16 = 0x0109;
const CIP_EXT_STATUS_DUPLICATE_CONNECTION_ID: u16 = 0x0100;

const CIP_CONN_PARAM: u16 = 0x4200;
const CIP_CONN_PARAM_EX: u32 = 0x4200_0000;

const FORWARD_OPEN_SECONDS_PER_TICK: u8 = 10;
const FORWARD_OPEN_TIMEOUT_TICKS: u8 = 5;
const CIP_TIMEOUT_MULTIPLIER: u8 = 1;
const CIP_RPI_US: u32 = 1_000_000;
const CIP_CONNECTION_TYPE: u8 = 0xA3;

/// Request path to the Connection Manager object (class 0x06,
/// instance 1), two words long.
const CONNECTION_MANAGER_PATH: [u8; 5] = [0x02, 0x20, 0x06, 0x24, 0x01];

/// Minimum remaining space needed to build a Forward Open or Forward
/// Close request. Empirical in the original implementation; no tighter
/// bound has been derived, so it is preserved verbatim.
const MIN_CONNECT_PAYLOAD: usize = 92;

/// Maximum `cip_payload` accepted at configuration time (spec §6); the
/// inclusive upper bound is preserved verbatim from the original even
/// though real wire limits may be tighter.
const MAX_CIP_PAYLOAD: u32 = 65525;

/// Configuration for a [`CipLayer`], supplied once at setup.
#[derive(Clone, Debug)]
pub struct CipLayerConfig {
    /// Pre-encoded routing path bytes and DH+ flags.
    pub encoded_path: EncodedPath,
    /// Requested maximum CIP payload in bytes. Values above
    /// [`CIP_STD_PAYLOAD`] enable the extended Forward Open variant.
    pub cip_payload: u32,
    /// Vendor id / serial number embedded in Forward Open/Close.
    pub connection_params: ConnectionParams,
}

/// The CIP connection manager layer.
///
/// Generic over its next (lower) layer so that a chain such as
/// `PcccLayer<CipLayer<N>>` is built with static dispatch all the way
/// down to `N` (normally the driver's EtherNet/IP session layer, or
/// [`crate::layer::NullLayer`] in tests).
pub struct CipLayer<N> {
    next: N,
    connection_params: ConnectionParams,
    encoded_path: EncodedPath,

    connected: bool,
    header_start_offset: usize,

    cip_payload: u16,
    cip_payload_ex: u16,
    forward_open_ex_enabled: bool,

    pub(crate) our_connection_id: u32,
    plc_connection_id: u32,
    pub(crate) sequence_id: u16,
}

impl<N: Layer> CipLayer<N> {
    /// Build a CIP layer on top of `next`, validating the configured
    /// payload size and deciding whether the extended Forward Open
    /// variant is enabled.
    pub fn new(next: N, config: CipLayerConfig) -> Result<Self, LayerError> {
        if config.cip_payload > MAX_CIP_PAYLOAD {
            return Err(LayerError::BadConfig(format!(
                "cip_payload must be between 0 and {MAX_CIP_PAYLOAD}, was {}",
                config.cip_payload
            )));
        }

        let (cip_payload, cip_payload_ex, forward_open_ex_enabled) =
            if config.cip_payload > CIP_STD_PAYLOAD as u32 {
                (CIP_STD_PAYLOAD, config.cip_payload as u16, true)
            } else {
                (config.cip_payload as u16, 0, false)
            };

        let mut layer = CipLayer {
            next,
            connection_params: config.connection_params,
            encoded_path: config.encoded_path,
            connected: false,
            header_start_offset: 0,
            cip_payload,
            cip_payload_ex,
            forward_open_ex_enabled,
            our_connection_id: 0,
            plc_connection_id: 0,
            sequence_id: 0,
        };
        layer.initialize();
        Ok(layer)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn plc_connection_id(&self) -> u32 {
        self.plc_connection_id
    }

    pub fn cip_payload(&self) -> u16 {
        self.cip_payload
    }

    pub fn cip_payload_ex(&self) -> u16 {
        self.cip_payload_ex
    }

    pub fn forward_open_ex_enabled(&self) -> bool {
        self.forward_open_ex_enabled
    }

    pub fn our_connection_id(&self) -> u32 {
        self.our_connection_id
    }

    pub fn sequence_id(&self) -> u16 {
        self.sequence_id
    }

    fn write_connection_params(&self, frame: &mut Frame<'_>, offset: &mut usize) -> Result<(), LayerError> {
        if self.forward_open_ex_enabled {
            frame.put_u32_le(offset, CIP_CONN_PARAM_EX | self.cip_payload_ex as u32)
        } else {
            frame.put_u16_le(offset, CIP_CONN_PARAM | self.cip_payload)
        }
    }

    /// Emit a Forward Open (or Forward Open Extended) request directly
    /// at `frame.payload_start()`. Called once the lower layers report
    /// they are connected.
    fn build_forward_open(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        let remaining = frame.capacity().saturating_sub(frame.payload_start());
        if remaining < MIN_CONNECT_PAYLOAD {
            return Err(LayerError::TooSmall {
                needed: MIN_CONNECT_PAYLOAD,
                available: remaining,
            });
        }

        let mut offset = frame.payload_start();

        // Unconnected-send encapsulation preamble.
        frame.put_u32_le(&mut offset, 0)?;
        frame.put_u16_le(&mut offset, FORWARD_OPEN_TIMEOUT_TICKS as u16)?;

        // Unconnected CPF: null address item, then the unconnected data
        // item whose length we backfill once we know it.
        frame.put_u16_le(&mut offset, 2)?;
        frame.put_u16_le(&mut offset, CPF_UNCONNECTED_ADDRESS_ITEM)?;
        frame.put_u16_le(&mut offset, 0)?;
        frame.put_u16_le(&mut offset, CPF_UNCONNECTED_DATA_ITEM)?;
        let unconnected_payload_size_index = offset;
        frame.put_u16_le(&mut offset, 0)?;

        let payload_start_index = offset;
        let service = if self.forward_open_ex_enabled {
            CIP_FORWARD_OPEN_REQUEST_EX
        } else {
            CIP_FORWARD_OPEN_REQUEST
        };
        frame.put_u8(&mut offset, service)?;
        frame.put_bytes(&mut offset, &CONNECTION_MANAGER_PATH)?;

        frame.put_u8(&mut offset, FORWARD_OPEN_SECONDS_PER_TICK)?;
        frame.put_u8(&mut offset, FORWARD_OPEN_TIMEOUT_TICKS)?;

        frame.put_u32_le(&mut offset, 0)?; // O->T connection id, filled in by the PLC's reply
        frame.put_u32_le(&mut offset, self.our_connection_id)?;
        frame.put_u16_le(&mut offset, self.sequence_id)?;
        self.sequence_id = self.sequence_id.wrapping_add(1);

        frame.put_u16_le(&mut offset, self.connection_params.vendor_id)?;
        frame.put_u32_le(&mut offset, self.connection_params.vendor_serial_number)?;

        frame.put_u8(&mut offset, CIP_TIMEOUT_MULTIPLIER)?;
        frame.put_u8(&mut offset, 0)?;
        frame.put_u8(&mut offset, 0)?;
        frame.put_u8(&mut offset, 0)?;

        frame.put_u32_le(&mut offset, CIP_RPI_US)?;
        self.write_connection_params(frame, &mut offset)?;
        frame.put_u32_le(&mut offset, CIP_RPI_US)?;
        self.write_connection_params(frame, &mut offset)?;

        frame.put_u8(&mut offset, CIP_CONNECTION_TYPE)?;

        frame.put_bytes(&mut offset, self.encoded_path.as_bytes())?;

        let forward_open_size = (offset - payload_start_index) as u16;
        frame.patch_u16_le(unconnected_payload_size_index, forward_open_size)?;

        frame.set_payload_end(offset);
        Ok(Status::Ok)
    }

    /// Emit a Forward Close request directly at `frame.payload_start()`.
    fn build_forward_close(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        let remaining = frame.payload_len();
        if remaining < MIN_CONNECT_PAYLOAD {
            return Err(LayerError::TooSmall {
                needed: MIN_CONNECT_PAYLOAD,
                available: remaining,
            });
        }

        let mut offset = frame.payload_start();

        frame.put_u32_le(&mut offset, 0)?;
        frame.put_u16_le(&mut offset, FORWARD_OPEN_TIMEOUT_TICKS as u16)?;

        frame.put_u16_le(&mut offset, 2)?;
        frame.put_u16_le(&mut offset, CPF_UNCONNECTED_ADDRESS_ITEM)?;
        frame.put_u16_le(&mut offset, 0)?;
        frame.put_u16_le(&mut offset, CPF_UNCONNECTED_DATA_ITEM)?;
        let payload_size_index = offset;
        frame.put_u16_le(&mut offset, 0)?;
        let close_payload_start_index = offset;

        frame.put_u8(&mut offset, CIP_FORWARD_CLOSE_REQUEST)?;
        frame.put_bytes(&mut offset, &CONNECTION_MANAGER_PATH)?;

        frame.put_u8(&mut offset, FORWARD_OPEN_SECONDS_PER_TICK)?;
        frame.put_u8(&mut offset, FORWARD_OPEN_TIMEOUT_TICKS)?;

        frame.put_u16_le(&mut offset, self.sequence_id)?;
        self.sequence_id = self.sequence_id.wrapping_add(1);

        frame.put_u16_le(&mut offset, self.connection_params.vendor_id)?;
        frame.put_u32_le(&mut offset, self.connection_params.vendor_serial_number)?;

        // A single padding byte is spliced in immediately after the
        // path's length-in-words byte (index 0 of the source bytes).
        for (index, byte) in self.encoded_path.as_bytes().iter().enumerate() {
            if index == 1 {
                frame.put_u8(&mut offset, 0)?;
            }
            frame.put_u8(&mut offset, *byte)?;
        }

        let close_size = (offset - close_payload_start_index) as u16;
        frame.patch_u16_le(payload_size_index, close_size)?;

        frame.set_payload_end(offset);
        Ok(Status::Ok)
    }

    fn process_response_disconnected(
        &mut self,
        frame: &mut Frame<'_>,
        plc: &mut dyn PlcHandle,
    ) -> Result<Status, LayerError> {
        if frame.payload_len() < CPF_UNCONNECTED_HEADER_SIZE {
            return Ok(Status::Partial);
        }

        let mut offset = frame.payload_start();
        let _interface_handle = frame.get_u32_le(&mut offset)?;
        let _router_timeout = frame.get_u16_le(&mut offset)?;
        let _item_count = frame.get_u16_le(&mut offset)?;
        let _null_addr_type = frame.get_u16_le(&mut offset)?;
        let _null_addr_len = frame.get_u16_le(&mut offset)?;
        let _data_item_type = frame.get_u16_le(&mut offset)?;
        let cpf_payload_size = frame.get_u16_le(&mut offset)?;

        if cpf_payload_size < 4 {
            return Err(LayerError::BadReply(
                "unconnected CPF payload shorter than a CIP reply prefix".into(),
            ));
        }

        frame.set_payload_start(offset);
        let service_code = frame.peek_u8(offset)?;

        if service_code == (CIP_FORWARD_OPEN_REQUEST | CIP_CMD_EXECUTED_FLAG)
            || service_code == (CIP_FORWARD_OPEN_REQUEST_EX | CIP_CMD_EXECUTED_FLAG)
        {
            self.process_forward_open_response(frame, plc)
        } else if service_code == (CIP_FORWARD_CLOSE_REQUEST | CIP_CMD_EXECUTED_FLAG) {
            self.process_forward_close_response(frame)
        } else {
            // Not a reply this layer knows how to interpret; leave it
            // for whatever called us to decide what to do with it.
            Ok(Status::Ok)
        }
    }

    fn process_response_connected(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        let advance = CPF_CONNECTED_HEADER_SIZE + CONNECTED_SEQUENCE_ID_SIZE;
        if frame.payload_len() < advance {
            return Ok(Status::Partial);
        }
        frame.set_payload_start(frame.payload_start() + advance);
        Ok(Status::Ok)
    }

    fn process_forward_open_response(
        &mut self,
        frame: &mut Frame<'_>,
        plc: &mut dyn PlcHandle,
    ) -> Result<Status, LayerError> {
        let mut offset = frame.payload_start();
        let _service = frame.get_u8(&mut offset)?;
        let reserved = frame.get_u8(&mut offset)?;
        if reserved != 0 {
            warn!(reserved, "Forward Open reply: nonzero reserved byte");
        }
        let status = frame.get_u8(&mut offset)?;
        let status_size = frame.get_u8(&mut offset)?;

        if status == CIP_SERVICE_STATUS_OK {
            self.plc_connection_id = frame.get_u32_le(&mut offset)?;

            let buffer_size =
                CIP_PAYLOAD_HEADER_FUDGE + self.cip_payload.max(self.cip_payload_ex) as usize;
            plc.set_buffer_size(buffer_size)?;

            frame.set_payload_start(frame.payload_end());
            self.connected = true;
            return Ok(Status::Ok);
        }

        if status == 0x01 && status_size >= 2 {
            let extended_status = frame.get_u16_le(&mut offset)?;

            return match extended_status {
                CIP_EXT_STATUS_INVALID_SIZE => {
                    let supported_size = frame.get_u16_le(&mut offset)?;
                    if self.forward_open_ex_enabled {
                        self.cip_payload_ex = supported_size;
                    } else {
                        self.cip_payload = supported_size.min(STD_CONNECTION_PARAM_CEILING);
                    }
                    Ok(Status::Retry)
                }
                CIP_EXT_STATUS_DUPLICATE_CONNECTION_ID => Ok(Status::Retry),
                other => {
                    warn!(status, extended = other, "Forward Open rejected by remote");
                    Err(LayerError::RemoteErr {
                        status,
                        extended: Some(other),
                    })
                }
            };
        }

        if status == CIP_ERR_UNSUPPORTED {
            if self.forward_open_ex_enabled {
                self.forward_open_ex_enabled = false;
                return Ok(Status::Retry);
            }
            warn!(status, "Forward Open service not supported by remote");
            return Err(LayerError::RemoteErr {
                status,
                extended: None,
            });
        }

        if status == CIP_ERR_NO_RESOURCES {
            if !self.forward_open_ex_enabled {
                warn!(status, "Forward Open: insufficient resources on remote");
                return Err(LayerError::RemoteErr {
                    status,
                    extended: None,
                });
            }
            if self.cip_payload_ex > CIP_STD_EX_PAYLOAD {
                self.cip_payload_ex = CIP_STD_EX_PAYLOAD;
            } else if self.cip_payload_ex > CIP_STD_PAYLOAD {
                self.cip_payload_ex = CIP_STD_PAYLOAD;
            } else {
                self.forward_open_ex_enabled = false;
                if self.cip_payload == 0 {
                    self.cip_payload = CIP_STD_PAYLOAD;
                }
            }
            return Ok(Status::Retry);
        }

        warn!(status, "Forward Open rejected by remote with unhandled status");
        Err(LayerError::RemoteErr {
            status,
            extended: None,
        })
    }

    fn process_forward_close_response(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        self.connected = false;

        let mut offset = frame.payload_start();
        let _service = frame.get_u8(&mut offset)?;
        let _reserved = frame.get_u8(&mut offset)?;
        let status = frame.get_u8(&mut offset)?;
        let status_size = frame.get_u8(&mut offset)?;

        if status == CIP_SERVICE_STATUS_OK {
            frame.set_payload_start(frame.payload_end());
            return Ok(Status::Ok);
        }

        let extended = if status == 0x01 && status_size >= 2 {
            Some(frame.get_u16_le(&mut offset)?)
        } else {
            None
        };
        warn!(status, ?extended, "Forward Close rejected by remote");
        Err(LayerError::RemoteErr { status, extended })
    }
}

impl<N: Layer> Layer for CipLayer<N> {
    fn initialize(&mut self) {
        self.connected = false;
        self.header_start_offset = 0;
        self.our_connection_id = rand::random();
        self.sequence_id = rand::random();
        self.next.initialize();
    }

    fn connect(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        if self.connected {
            self.reserve_space(frame)?;
            return Ok(Status::Ok);
        }

        let status = self.next.connect(frame)?;
        if status != Status::Ok {
            return Ok(status);
        }

        self.build_forward_open(frame)
    }

    fn disconnect(&mut self, frame: &mut Frame<'_>) -> Result<Status, LayerError> {
        if !self.connected {
            return self.next.disconnect(frame);
        }

        self.next.reserve_space(frame)?;
        self.build_forward_close(frame)
    }

    fn reserve_space(&mut self, frame: &mut Frame<'_>) -> Result<(), LayerError> {
        self.next.reserve_space(frame)?;

        let needed = if self.connected {
            CPF_CONNECTED_HEADER_SIZE + CONNECTED_SEQUENCE_ID_SIZE
        } else {
            CPF_UNCONNECTED_HEADER_SIZE
        };

        let remaining = frame.capacity().saturating_sub(frame.payload_start());
        if remaining < needed {
            return Err(LayerError::TooSmall {
                needed,
                available: remaining,
            });
        }

        self.header_start_offset = frame.payload_start();
        let new_payload_start = self.header_start_offset + needed;
        frame.set_payload_start(new_payload_start);

        let budget = if self.forward_open_ex_enabled {
            self.cip_payload_ex
        } else {
            self.cip_payload
        } as usize;
        let mut payload_end = new_payload_start + budget + CIP_PAYLOAD_HEADER_FUDGE;
        if payload_end > frame.capacity() {
            payload_end = frame.capacity();
        }
        if new_payload_start > payload_end {
            return Err(LayerError::TooSmall {
                needed: new_payload_start,
                available: payload_end,
            });
        }
        frame.set_payload_end(payload_end);

        Ok(())
    }

    fn build_layer(&mut self, frame: &mut Frame<'_>) -> Result<(), LayerError> {
        if self.connected {
            let payload_size = frame.payload_len();
            if payload_size <= CONNECTED_SEQUENCE_ID_SIZE {
                return Err(LayerError::TooSmall {
                    needed: CONNECTED_SEQUENCE_ID_SIZE + 1,
                    available: payload_size,
                });
            }

            let saved_payload_start = frame.payload_start();
            let mut offset = self.header_start_offset;

            frame.put_u32_le(&mut offset, 0)?;
            frame.put_u16_le(&mut offset, FORWARD_OPEN_TIMEOUT_TICKS as u16)?;
            frame.put_u16_le(&mut offset, 2)?;
            frame.put_u16_le(&mut offset, CPF_CONNECTED_ADDRESS_ITEM)?;
            frame.put_u16_le(&mut offset, 4)?;
            frame.put_u32_le(&mut offset, self.plc_connection_id)?;
            frame.put_u16_le(&mut offset, CPF_CONNECTED_DATA_ITEM)?;
            frame.put_u16_le(&mut offset, (payload_size + CONNECTED_SEQUENCE_ID_SIZE) as u16)?;
            frame.put_u16_le(&mut offset, self.sequence_id)?;
            self.sequence_id = self.sequence_id.wrapping_add(1);

            if offset != saved_payload_start {
                return Err(LayerError::BadConfig(format!(
                    "CIP header ended at {offset} but payload starts at {saved_payload_start}"
                )));
            }

            frame.lower_payload_start_to(self.header_start_offset);
        }

        self.next.build_layer(frame)
    }

    fn process_response(
        &mut self,
        frame: &mut Frame<'_>,
        plc: &mut dyn PlcHandle,
    ) -> Result<Status, LayerError> {
        let status = self.next.process_response(frame, plc)?;
        if status != Status::Ok {
            return Ok(status);
        }

        if self.connected {
            self.process_response_connected(frame)
        } else {
            self.process_response_disconnected(frame, plc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::NullLayer;
    use crate::plc::AlwaysResize;

    fn layer_for_test(cip_payload: u32) -> CipLayer<NullLayer> {
        let config = CipLayerConfig {
            encoded_path: EncodedPath::plain(vec![0x01, 0x00, 0x01]),
            cip_payload,
            connection_params: ConnectionParams {
                vendor_id: 0x1234,
                vendor_serial_number: 0xDEAD_BEEF,
            },
        };
        let mut layer = CipLayer::new(NullLayer, config).unwrap();
        layer.our_connection_id = 0x1122_3344;
        layer.sequence_id = 0x0001;
        layer
    }

    #[test]
    fn extended_forward_open_request_starts_with_documented_prefix() {
        let mut layer = layer_for_test(4002);
        let mut buf = [0u8; 256];
        let mut frame = Frame::new(&mut buf);
        assert_eq!(layer.connect(&mut frame).unwrap(), Status::Ok);

        let expected_prefix: [u8; 24] = [
            0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xB2, 0x00,
            0, 0, // length, backfilled, checked separately below
            0x5B, 0x02, 0x20, 0x06, 0x24, 0x01, 0x0A, 0x05,
        ];
        let actual = &buf[..24];
        assert_eq!(&actual[..14], &expected_prefix[..14]);
        assert_eq!(&actual[16..24], &expected_prefix[16..24]);
    }

    /// Wrap `body` (a CIP reply starting with the service code) in the
    /// fixed 16-byte unconnected CPF prefix real unconnected-send
    /// replies arrive inside, and hand back a frame ready to process.
    fn wrap_in_cpf_reply<'a>(buf: &'a mut [u8], body: &[u8]) -> Frame<'a> {
        let mut frame = Frame::new(buf);
        let mut offset = 0usize;
        frame.put_u32_le(&mut offset, 0).unwrap();
        frame.put_u16_le(&mut offset, 0).unwrap();
        frame.put_u16_le(&mut offset, 2).unwrap();
        frame.put_u16_le(&mut offset, 0).unwrap();
        frame.put_u16_le(&mut offset, 0).unwrap();
        frame.put_u16_le(&mut offset, CPF_UNCONNECTED_DATA_ITEM).unwrap();
        frame.put_u16_le(&mut offset, body.len() as u16).unwrap();
        frame.put_bytes(&mut offset, body).unwrap();
        frame.set_payload_end(offset);
        frame
    }

    #[test]
    fn forward_open_accepted_sets_connection_id_and_connected_flag() {
        let mut layer = layer_for_test(4002);
        let body: [u8; 8] = {
            let mut b = [0u8; 8];
            b[0] = 0xDB; // service | 0x80
            b[1] = 0; // reserved
            b[2] = 0x00; // status OK
            b[3] = 0; // status size
            b[4..8].copy_from_slice(&0xAABB_CCDDu32.to_le_bytes());
            b
        };
        let mut buf = [0u8; 64];
        let mut frame = wrap_in_cpf_reply(&mut buf, &body);

        let mut plc = AlwaysResize::default();
        let status = layer.process_response(&mut frame, &mut plc).unwrap();
        assert_eq!(status, Status::Ok);
        assert!(layer.is_connected());
        assert_eq!(layer.plc_connection_id(), 0xAABB_CCDD);
        assert_eq!(plc.last_requested, Some(40 + 4002));
    }

    #[test]
    fn forward_open_size_renegotiation_retries_with_advertised_size() {
        let mut layer = layer_for_test(4002);
        let body: [u8; 8] = {
            let mut b = [0u8; 8];
            b[0] = 0xDB;
            b[1] = 0;
            b[2] = 0x01; // status: extended status follows
            b[3] = 2; // two words of extended status
            b[4..6].copy_from_slice(&0x0109u16.to_le_bytes());
            b[6..8].copy_from_slice(&0x01F0u16.to_le_bytes());
            b
        };
        let mut buf = [0u8; 64];
        let mut frame = wrap_in_cpf_reply(&mut buf, &body);

        let mut plc = AlwaysResize::default();
        let status = layer.process_response(&mut frame, &mut plc).unwrap();
        assert_eq!(status, Status::Retry);
        assert_eq!(layer.cip_payload_ex(), 0x01F0);
        assert!(!layer.is_connected());
    }

    #[test]
    fn forward_open_unsupported_falls_back_to_standard() {
        let mut layer = layer_for_test(4002);
        let body: [u8; 4] = [0xDB, 0, 0x08, 0]; // service not supported
        let mut buf = [0u8; 64];
        let mut frame = wrap_in_cpf_reply(&mut buf, &body);

        let mut plc = AlwaysResize::default();
        let status = layer.process_response(&mut frame, &mut plc).unwrap();
        assert_eq!(status, Status::Retry);
        assert!(!layer.forward_open_ex_enabled());

        // The next attempt uses the plain Forward Open service and a
        // 16-bit connection parameter.
        let mut buf2 = [0u8; 256];
        let mut frame2 = Frame::new(&mut buf2);
        layer.connect(&mut frame2).unwrap();
        assert_eq!(buf2[16], CIP_FORWARD_OPEN_REQUEST);
    }

    #[test]
    fn connected_cpf_header_matches_documented_layout() {
        let mut layer = layer_for_test(504);
        layer.connected = true;
        layer.plc_connection_id = 0xAABB_CCDD;
        layer.sequence_id = 0x0010;
        layer.header_start_offset = 0;

        let mut buf = [0u8; 64];
        for (i, byte) in buf[22..28].iter_mut().enumerate() {
            *byte = i as u8;
        }
        let mut frame = Frame::with_cursors(&mut buf, 22, 28);
        layer.build_layer(&mut frame).unwrap();

        let expected: [u8; 22] = [
            0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x02, 0x00, 0xA1, 0x00, 0x04, 0x00, 0xDD, 0xCC,
            0xBB, 0xAA, 0xB1, 0x00, 0x08, 0x00, 0x10, 0x00,
        ];
        assert_eq!(&buf[0..22], &expected);
        assert_eq!(frame.payload_start(), 0);
    }

    #[test]
    fn forward_close_splices_padding_byte_after_path_length() {
        let mut layer = layer_for_test(504);
        layer.encoded_path = EncodedPath::plain(vec![0x02, 0x01, 0x00, 0x01, 0x00]);
        layer.connected = true;

        let mut buf = [0u8; 256];
        let mut frame = Frame::new(&mut buf);
        frame.set_payload_start(0);
        frame.set_payload_end(256);
        layer.disconnect(&mut frame).unwrap();

        // path region starts right after the Connection Manager request
        // header and the two timeout bytes and the sequence/vendor/serial
        // fields: header(16) + service+path(6) + ticks(2) + seq(2) +
        // vendor(2) + serial(4) = 32.
        let path_region = &buf[32..38];
        assert_eq!(path_region, &[0x02, 0x00, 0x01, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn reserve_space_disconnected_uses_unconnected_header_size() {
        let mut layer = layer_for_test(504);
        let mut buf = [0u8; 600];
        let mut frame = Frame::new(&mut buf);
        layer.reserve_space(&mut frame).unwrap();
        assert_eq!(frame.payload_start(), CPF_UNCONNECTED_HEADER_SIZE);
        assert_eq!(
            frame.payload_end(),
            CPF_UNCONNECTED_HEADER_SIZE + CIP_STD_PAYLOAD as usize + CIP_PAYLOAD_HEADER_FUDGE
        );
    }

    #[test]
    fn reserve_space_connected_reserves_room_for_sequence_id() {
        let mut layer = layer_for_test(504);
        layer.connected = true;
        let mut buf = [0u8; 600];
        let mut frame = Frame::new(&mut buf);
        layer.reserve_space(&mut frame).unwrap();
        assert_eq!(
            frame.payload_start(),
            CPF_CONNECTED_HEADER_SIZE + CONNECTED_SEQUENCE_ID_SIZE
        );
    }

    #[test]
    fn rejects_cip_payload_above_inclusive_bound() {
        let config = CipLayerConfig {
            encoded_path: EncodedPath::plain(vec![0x01]),
            cip_payload: 65526,
            connection_params: ConnectionParams {
                vendor_id: 1,
                vendor_serial_number: 1,
            },
        };
        assert!(CipLayer::new(NullLayer, config).is_err());
    }

    #[test]
    fn initialize_regenerates_ids_but_resets_connected_flag() {
        let mut layer = layer_for_test(504);
        layer.connected = true;
        layer.initialize();
        assert!(!layer.is_connected());
    }
}
