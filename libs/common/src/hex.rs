//! Hex formatting for protocol frame traces

use std::fmt::Write;

/// Encode bytes to an uppercase hex string without separators.
/// Example: [0x46, 0x49, 0x4E] -> "46494E"
pub fn encode_upper(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        // Writing into a String cannot fail
        let _ = write!(&mut out, "{:02X}", byte);
    }
    out
}

/// Encode bytes as space separated uppercase pairs, the layout used in
/// TX/RX trace lines.
/// Example: [0x46, 0x49, 0x4E] -> "46 49 4E"
pub fn encode_spaced(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(&mut out, "{:02X}", byte);
    }
    out
}
