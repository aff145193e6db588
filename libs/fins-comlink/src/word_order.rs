//! CDAB word order for multi-word values
//!
//! The PLC stores 32 and 64-bit values low word first while keeping each
//! 16-bit word big-endian. Using ABCD notation (A = most significant byte):
//!
//! - 32-bit `0x12345678` -> `[0x56, 0x78, 0x12, 0x34]` (CDAB)
//! - 64-bit `0x0102030405060708` -> `[0x07, 0x08, 0x05, 0x06, 0x03, 0x04, 0x01, 0x02]`
//!
//! Reversing the word sequence is its own inverse, so encode and decode apply
//! the same reordering.

use crate::error::{FinsError, Result};

fn take<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    if data.len() < N {
        return Err(FinsError::malformed(format!(
            "need {} bytes for value, got {}",
            N,
            data.len()
        )));
    }
    let mut be = [0u8; N];
    for (i, word) in data[..N].chunks_exact(2).rev().enumerate() {
        be[i * 2..i * 2 + 2].copy_from_slice(word);
    }
    Ok(be)
}

fn put<const N: usize>(be: [u8; N]) -> [u8; N] {
    let mut wire = [0u8; N];
    for (i, word) in be.chunks_exact(2).rev().enumerate() {
        wire[i * 2..i * 2 + 2].copy_from_slice(word);
    }
    wire
}

// ============================================================================
// 16-bit (single word, no reordering)
// ============================================================================

pub fn encode_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn decode_u16(data: &[u8]) -> Result<u16> {
    take::<2>(data).map(u16::from_be_bytes)
}

pub fn encode_i16(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn decode_i16(data: &[u8]) -> Result<i16> {
    take::<2>(data).map(i16::from_be_bytes)
}

// ============================================================================
// 32-bit
// ============================================================================

pub fn encode_u32(value: u32) -> [u8; 4] {
    put(value.to_be_bytes())
}

pub fn decode_u32(data: &[u8]) -> Result<u32> {
    take::<4>(data).map(u32::from_be_bytes)
}

pub fn encode_i32(value: i32) -> [u8; 4] {
    put(value.to_be_bytes())
}

pub fn decode_i32(data: &[u8]) -> Result<i32> {
    take::<4>(data).map(i32::from_be_bytes)
}

pub fn encode_f32(value: f32) -> [u8; 4] {
    put(value.to_be_bytes())
}

pub fn decode_f32(data: &[u8]) -> Result<f32> {
    take::<4>(data).map(f32::from_be_bytes)
}

// ============================================================================
// 64-bit
// ============================================================================

pub fn encode_u64(value: u64) -> [u8; 8] {
    put(value.to_be_bytes())
}

pub fn decode_u64(data: &[u8]) -> Result<u64> {
    take::<8>(data).map(u64::from_be_bytes)
}

pub fn encode_i64(value: i64) -> [u8; 8] {
    put(value.to_be_bytes())
}

pub fn decode_i64(data: &[u8]) -> Result<i64> {
    take::<8>(data).map(i64::from_be_bytes)
}

pub fn encode_f64(value: f64) -> [u8; 8] {
    put(value.to_be_bytes())
}

pub fn decode_f64(data: &[u8]) -> Result<f64> {
    take::<8>(data).map(f64::from_be_bytes)
}
