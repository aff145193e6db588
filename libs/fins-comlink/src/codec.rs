//! FINS/TCP frame building and response validation

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::*;
use crate::error::{FinsError, Result};

/// Node pair negotiated by the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReply {
    pub client_node: u8,
    pub server_node: u8,
}

/// Decoded response envelope
#[derive(Debug, Clone, PartialEq)]
pub struct FinsResponse {
    /// Error code field of the TCP envelope
    pub transport_error: u32,
    /// FINS end code (main << 8 | sub)
    pub end_code: u16,
    /// Data following the end code
    pub payload: Bytes,
}

impl FinsResponse {
    /// Decode a complete data frame. Truncated input is an error, never a
    /// partial success.
    pub fn decode(frame: &[u8], expected_service: [u8; 2]) -> Result<Self> {
        if frame.len() < RESPONSE_DATA_OFFSET {
            return Err(FinsError::malformed(format!(
                "response truncated: {}B < {}B",
                frame.len(),
                RESPONSE_DATA_OFFSET
            )));
        }
        check_envelope(frame)?;

        let command = be_u32(&frame[8..12]);
        if command != CMD_FRAME {
            return Err(FinsError::malformed(format!(
                "unexpected command {} in data response",
                command
            )));
        }

        let service = [
            frame[RESPONSE_SERVICE_OFFSET],
            frame[RESPONSE_SERVICE_OFFSET + 1],
        ];
        if service != expected_service {
            return Err(FinsError::malformed(format!(
                "service {:02X}{:02X} does not answer {:02X}{:02X}",
                service[0], service[1], expected_service[0], expected_service[1]
            )));
        }

        Ok(Self {
            transport_error: be_u32(&frame[12..16]),
            end_code: u16::from_be_bytes([
                frame[RESPONSE_END_CODE_OFFSET],
                frame[RESPONSE_END_CODE_OFFSET + 1],
            ]),
            payload: Bytes::copy_from_slice(&frame[RESPONSE_DATA_OFFSET..]),
        })
    }

    /// Ok only when both error fields are exactly zero
    pub fn into_result(self) -> Result<Bytes> {
        if self.transport_error != 0 {
            return Err(FinsError::TransportError(self.transport_error));
        }
        if self.end_code != 0 {
            let [main, sub] = self.end_code.to_be_bytes();
            return Err(FinsError::PlcError { main, sub });
        }
        Ok(self.payload)
    }
}

fn be_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

/// Magic and declared length must agree with what was received
fn check_envelope(frame: &[u8]) -> Result<()> {
    if frame[0..4] != FINS_MAGIC {
        return Err(FinsError::malformed("missing FINS marker"));
    }
    let declared = be_u32(&frame[4..8]) as usize;
    if declared + TCP_LENGTH_PREFIX != frame.len() {
        return Err(FinsError::malformed(format!(
            "declared length {} does not match {}B frame",
            declared,
            frame.len()
        )));
    }
    Ok(())
}

fn is_bit_area(area_code: u8) -> bool {
    matches!(
        area_code,
        AREA_DM_BIT | AREA_CIO_BIT | AREA_WR_BIT | AREA_HR_BIT | AREA_AR_BIT
    )
}

/// Builds request frames for one negotiated node pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    client_node: u8,
    server_node: u8,
}

impl FrameCodec {
    pub fn new(client_node: u8, server_node: u8) -> Self {
        Self {
            client_node,
            server_node,
        }
    }

    pub fn from_handshake(reply: HandshakeReply) -> Self {
        Self::new(reply.client_node, reply.server_node)
    }

    pub fn client_node(&self) -> u8 {
        self.client_node
    }

    pub fn server_node(&self) -> u8 {
        self.server_node
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Node address request; `AUTO_NODE` lets the PLC pick the client node
    pub fn build_handshake(client_node: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_REQUEST_LEN);
        buf.put_slice(&FINS_MAGIC);
        buf.put_u32((HANDSHAKE_REQUEST_LEN - TCP_LENGTH_PREFIX) as u32);
        buf.put_u32(CMD_NODE_REQUEST);
        buf.put_u32(0);
        buf.put_u32(u32::from(client_node));
        buf.freeze()
    }

    pub fn parse_handshake_reply(frame: &[u8]) -> Result<HandshakeReply> {
        if frame.len() < HANDSHAKE_REPLY_LEN {
            return Err(FinsError::handshake(format!(
                "reply truncated: {}B < {}B",
                frame.len(),
                HANDSHAKE_REPLY_LEN
            )));
        }
        check_envelope(frame).map_err(|e| FinsError::handshake(e.to_string()))?;

        let command = be_u32(&frame[8..12]);
        let error_code = be_u32(&frame[12..16]);
        if command != CMD_NODE_RESPONSE {
            return Err(FinsError::handshake(format!(
                "unexpected command {} in reply",
                command
            )));
        }
        if error_code != 0 {
            return Err(FinsError::handshake(format!(
                "PLC rejected node request: {:#010X}",
                error_code
            )));
        }

        // Node ids travel as 4-byte fields; only the low byte is meaningful
        Ok(HandshakeReply {
            client_node: frame[19],
            server_node: frame[23],
        })
    }

    // ========================================================================
    // Requests
    // ========================================================================

    fn put_request_head(&self, buf: &mut BytesMut, body_len: usize, service: [u8; 2]) {
        let length = 8 + FINS_HEADER_LEN + 2 + body_len;
        buf.put_slice(&FINS_MAGIC);
        buf.put_u32(length as u32);
        buf.put_u32(CMD_FRAME);
        buf.put_u32(0);

        buf.put_u8(ICF_COMMAND);
        buf.put_u8(0x00); // RSV
        buf.put_u8(GCT);
        buf.put_u8(0x00); // DNA: local network
        buf.put_u8(self.server_node);
        buf.put_u8(0x00); // DA2: CPU unit
        buf.put_u8(0x00); // SNA
        buf.put_u8(self.client_node);
        buf.put_u8(0x00); // SA2
        buf.put_u8(SID);

        buf.put_slice(&service);
    }

    /// Memory area read of `word_count` items
    pub fn build_read(&self, area_code: u8, offset: u16, bit: u8, word_count: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN);
        self.put_request_head(&mut buf, MEMORY_SPEC_LEN, SERVICE_READ);
        buf.put_u8(area_code);
        buf.put_u16(offset);
        buf.put_u8(bit);
        buf.put_u16(word_count);
        buf.freeze()
    }

    /// Memory area write. Item count is derived from `data`: one byte per item
    /// for bit areas, two bytes per word otherwise.
    pub fn build_write(&self, area_code: u8, offset: u16, bit: u8, data: &[u8]) -> Bytes {
        let count = if is_bit_area(area_code) {
            data.len()
        } else {
            data.len() / 2
        };

        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + data.len());
        self.put_request_head(&mut buf, MEMORY_SPEC_LEN + data.len(), SERVICE_WRITE);
        buf.put_u8(area_code);
        buf.put_u16(offset);
        buf.put_u8(bit);
        buf.put_u16(count as u16);
        buf.put_slice(data);
        buf.freeze()
    }

    // ========================================================================
    // Responses
    // ========================================================================

    /// Payload of a successful read response
    pub fn parse_read_response(frame: &[u8]) -> Result<Bytes> {
        FinsResponse::decode(frame, SERVICE_READ)?.into_result()
    }

    /// Success of a write response
    pub fn parse_write_response(frame: &[u8]) -> Result<()> {
        FinsResponse::decode(frame, SERVICE_WRITE)?
            .into_result()
            .map(|_| ())
    }
}
