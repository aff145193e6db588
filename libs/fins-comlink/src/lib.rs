//! FINS/TCP communication link
//!
//! Layers, leaf to root:
//! - [`address`]: register address text -> area code / word offset / bit
//! - [`codec`] + [`word_order`]: request frames, response validation, CDAB word order
//! - [`connection`] + [`link`]: TCP session with node handshake, single in-flight
//!   request, heartbeat
//! - [`reconnect`]: the one supervisor task that brings a dropped link back
//! - [`registers`]: typed bit / 16 / 32 / 64-bit access over any [`WordIo`]

pub mod address;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod error;
pub mod link;
pub mod reconnect;
pub mod registers;
pub mod word_order;

pub use address::{resolve, Address, MemoryArea};
pub use codec::{FinsResponse, FrameCodec, HandshakeReply};
pub use error::{FinsError, Result};
pub use link::{LinkConfig, LinkState, ProtocolLink};
pub use reconnect::{ReconnectPolicy, ReconnectSupervisor};
pub use registers::{RegisterAccess, WordIo};
