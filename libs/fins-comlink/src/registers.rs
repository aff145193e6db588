//! Typed register access
//!
//! Every typed operation goes through [`WordIo`], so all of them inherit the
//! link's single in-flight rule and its error taxonomy unchanged.
//!
//! Bit writes are read-modify-write over the containing word. That is not
//! atomic at the PLC: a change the PLC program makes to the same word between
//! the read and the write is lost.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::address::Address;
use crate::error::{FinsError, Result};
use crate::word_order;

/// Word-level PLC access
#[async_trait]
pub trait WordIo: Send + Sync {
    /// Read `count` words starting at `address` (bit part ignored)
    async fn read_words(&self, address: &Address, count: u16) -> Result<Bytes>;

    /// Write whole words starting at `address` (bit part ignored)
    async fn write_words(&self, address: &Address, data: &[u8]) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Strongly typed reads and writes by address text
#[derive(Clone)]
pub struct RegisterAccess {
    io: Arc<dyn WordIo>,
}

impl std::fmt::Debug for RegisterAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterAccess")
            .field("connected", &self.io.is_connected())
            .finish()
    }
}

macro_rules! typed_access {
    ($read:ident, $write:ident, $ty:ty, $words:expr, $encode:path, $decode:path) => {
        pub async fn $read(&self, address: &str) -> Result<$ty> {
            let address = Address::parse(address)?;
            let data = self.read(&address, $words).await?;
            $decode(&data)
        }

        pub async fn $write(&self, address: &str, value: $ty) -> Result<()> {
            let address = Address::parse(address)?;
            self.write(&address, &$encode(value)).await
        }
    };
}

impl RegisterAccess {
    pub fn new(io: Arc<dyn WordIo>) -> Self {
        Self { io }
    }

    pub fn is_connected(&self) -> bool {
        self.io.is_connected()
    }

    async fn read(&self, address: &Address, words: u16) -> Result<Bytes> {
        if !self.io.is_connected() {
            return Err(FinsError::NotConnected);
        }
        self.io.read_words(address, words).await
    }

    async fn write(&self, address: &Address, data: &[u8]) -> Result<()> {
        if !self.io.is_connected() {
            return Err(FinsError::NotConnected);
        }
        trace!("Write {} <- {}", address, common::hex::encode_upper(data));
        self.io.write_words(address, data).await
    }

    /// Bit addresses need an explicit bit: `W0.00`, `D100.15`
    fn bit_address(text: &str) -> Result<(Address, u8)> {
        let address = Address::parse(text)?;
        let bit = address
            .bit
            .ok_or_else(|| FinsError::invalid_address(text, "bit access needs a .bit suffix"))?;
        Ok((address.word(), bit))
    }

    pub async fn read_bit(&self, address: &str) -> Result<bool> {
        let (word, bit) = Self::bit_address(address)?;
        let value = word_order::decode_u16(&self.read(&word, 1).await?)?;
        Ok(value & (1 << bit) != 0)
    }

    /// Read-modify-write of the containing word
    pub async fn write_bit(&self, address: &str, value: bool) -> Result<()> {
        let (word, bit) = Self::bit_address(address)?;
        let current = word_order::decode_u16(&self.read(&word, 1).await?)?;
        let updated = if value {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };
        if updated == current {
            return Ok(());
        }
        self.write(&word, &word_order::encode_u16(updated)).await
    }

    typed_access!(read_i16, write_i16, i16, 1, word_order::encode_i16, word_order::decode_i16);
    typed_access!(read_u16, write_u16, u16, 1, word_order::encode_u16, word_order::decode_u16);
    typed_access!(read_i32, write_i32, i32, 2, word_order::encode_i32, word_order::decode_i32);
    typed_access!(read_u32, write_u32, u32, 2, word_order::encode_u32, word_order::decode_u32);
    typed_access!(read_f32, write_f32, f32, 2, word_order::encode_f32, word_order::decode_f32);
    typed_access!(read_i64, write_i64, i64, 4, word_order::encode_i64, word_order::decode_i64);
    typed_access!(read_u64, write_u64, u64, 4, word_order::encode_u64, word_order::decode_u64);
    typed_access!(read_f64, write_f64, f64, 4, word_order::encode_f64, word_order::decode_f64);
}
