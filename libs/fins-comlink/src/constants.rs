//! FINS/TCP protocol constants
//!
//! Frame layout (all multi-byte fields big-endian):
//!
//! ```text
//! [ "FINS"(4) ][ Length(4) ][ Command(4) ][ ErrorCode(4) ]      TCP envelope
//! [ ICF RSV GCT DNA DA1 DA2 SNA SA1 SA2 SID ]                  FINS header
//! [ MRC SRC ][ Area(1) ][ Address(2) ][ Bit(1) ][ Count(2) ]   read/write body
//! ```
//!
//! `Length` counts every byte after the length field itself.

use std::time::Duration;

// ============================================================================
// TCP envelope
// ============================================================================

/// "FINS" marker at the head of every TCP frame
pub const FINS_MAGIC: [u8; 4] = *b"FINS";

/// Envelope size: magic + length + command + error code
pub const TCP_HEADER_LEN: usize = 16;

/// Bytes of the envelope not counted by the length field (magic + length)
pub const TCP_LENGTH_PREFIX: usize = 8;

/// Node address request (client -> PLC)
pub const CMD_NODE_REQUEST: u32 = 0;

/// Node address response (PLC -> client)
pub const CMD_NODE_RESPONSE: u32 = 1;

/// FINS frame carried in the envelope
pub const CMD_FRAME: u32 = 2;

/// Client node 0 asks the PLC to assign one
pub const AUTO_NODE: u8 = 0;

/// Handshake request: envelope + client node (4)
pub const HANDSHAKE_REQUEST_LEN: usize = 20;

/// Handshake reply: envelope + client node (4) + server node (4)
pub const HANDSHAKE_REPLY_LEN: usize = 24;

/// Upper bound on a declared body length; larger values mean a desynced stream
pub const MAX_FRAME_LEN: usize = 4096;

// ============================================================================
// FINS header
// ============================================================================

/// FINS header size
pub const FINS_HEADER_LEN: usize = 10;

/// ICF: command, response required
pub const ICF_COMMAND: u8 = 0x80;

/// Gateway count
pub const GCT: u8 = 0x02;

/// Service id. Responses are matched by order, so a fixed id is sufficient.
pub const SID: u8 = 0x00;

// ============================================================================
// Service body
// ============================================================================

/// Memory area read (MRC, SRC)
pub const SERVICE_READ: [u8; 2] = [0x01, 0x01];

/// Memory area write (MRC, SRC)
pub const SERVICE_WRITE: [u8; 2] = [0x01, 0x02];

/// Area(1) + address(2) + bit(1) + count(2)
pub const MEMORY_SPEC_LEN: usize = 6;

/// Full request without payload
pub const REQUEST_HEADER_LEN: usize = TCP_HEADER_LEN + FINS_HEADER_LEN + 2 + MEMORY_SPEC_LEN;

/// Offset of the MRC/SRC echo in a response
pub const RESPONSE_SERVICE_OFFSET: usize = TCP_HEADER_LEN + FINS_HEADER_LEN;

/// Offset of the 2-byte end code in a response
pub const RESPONSE_END_CODE_OFFSET: usize = RESPONSE_SERVICE_OFFSET + 2;

/// Offset of the first data byte in a response
pub const RESPONSE_DATA_OFFSET: usize = RESPONSE_END_CODE_OFFSET + 2;

/// Words per read request the PLC family accepts
pub const MAX_WORDS_PER_REQUEST: u16 = 999;

// ============================================================================
// Area codes (word access, bit access)
// ============================================================================

pub const AREA_DM_WORD: u8 = 0x82;
pub const AREA_DM_BIT: u8 = 0x02;
pub const AREA_CIO_WORD: u8 = 0xB0;
pub const AREA_CIO_BIT: u8 = 0x30;
pub const AREA_WR_WORD: u8 = 0xB1;
pub const AREA_WR_BIT: u8 = 0x31;
pub const AREA_HR_WORD: u8 = 0xB2;
pub const AREA_HR_BIT: u8 = 0x32;
pub const AREA_AR_WORD: u8 = 0xB3;
pub const AREA_AR_BIT: u8 = 0x33;

// ============================================================================
// Defaults
// ============================================================================

/// FINS/TCP well-known port
pub const DEFAULT_PORT: u16 = 9600;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
