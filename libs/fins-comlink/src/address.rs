//! Register address resolution
//!
//! Grammar: `[area prefix] word_offset [ "." bit ]`
//!
//! | prefix       | area |
//! |--------------|------|
//! | `D`          | DM   |
//! | `W`          | WR   |
//! | `H`          | HR   |
//! | `A`          | AR   |
//! | `CIO`, `C`   | CIO  |
//! | (none)       | CIO  |
//!
//! Examples: `D4400`, `W0.00`, `H100`, `CIO10`, `10`.

use std::fmt;
use std::str::FromStr;

use crate::constants::*;
use crate::error::{FinsError, Result};

/// PLC memory area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    Dm,
    Wr,
    Hr,
    Ar,
    Cio,
}

impl MemoryArea {
    /// Area code for word-granular access
    pub fn word_code(self) -> u8 {
        match self {
            MemoryArea::Dm => AREA_DM_WORD,
            MemoryArea::Wr => AREA_WR_WORD,
            MemoryArea::Hr => AREA_HR_WORD,
            MemoryArea::Ar => AREA_AR_WORD,
            MemoryArea::Cio => AREA_CIO_WORD,
        }
    }

    /// Area code for bit-granular access
    pub fn bit_code(self) -> u8 {
        match self {
            MemoryArea::Dm => AREA_DM_BIT,
            MemoryArea::Wr => AREA_WR_BIT,
            MemoryArea::Hr => AREA_HR_BIT,
            MemoryArea::Ar => AREA_AR_BIT,
            MemoryArea::Cio => AREA_CIO_BIT,
        }
    }

    /// Canonical prefix used when printing
    pub fn prefix(self) -> &'static str {
        match self {
            MemoryArea::Dm => "D",
            MemoryArea::Wr => "W",
            MemoryArea::Hr => "H",
            MemoryArea::Ar => "A",
            MemoryArea::Cio => "CIO",
        }
    }
}

/// A parsed register address. Cheap to build, so callers parse per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub area: MemoryArea,
    pub offset: u16,
    /// Bit within the word, always 0..=15 when present
    pub bit: Option<u8>,
}

impl Address {
    pub fn new(area: MemoryArea, offset: u16) -> Self {
        Self {
            area,
            offset,
            bit: None,
        }
    }

    pub fn with_bit(self, bit: u8) -> Result<Self> {
        if bit > 15 {
            return Err(FinsError::invalid_address(
                self.to_string(),
                format!("bit index {} out of range 0-15", bit),
            ));
        }
        Ok(Self {
            bit: Some(bit),
            ..self
        })
    }

    /// Parse address text
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let upper = trimmed.to_ascii_uppercase();

        let (area, rest) = split_prefix(&upper)
            .ok_or_else(|| FinsError::invalid_address(text, "unknown area prefix"))?;

        let (word, bit) = match rest.split_once('.') {
            Some((word, bit)) => (word, Some(bit)),
            None => (rest, None),
        };

        let offset = parse_decimal(word)
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| FinsError::invalid_address(text, "word offset is not a 16-bit decimal"))?;

        let bit = match bit {
            Some(b) => {
                let value = parse_decimal(b)
                    .ok_or_else(|| FinsError::invalid_address(text, "bit index is not decimal"))?;
                if value > 15 {
                    return Err(FinsError::invalid_address(
                        text,
                        format!("bit index {} out of range 0-15", value),
                    ));
                }
                Some(value as u8)
            },
            None => None,
        };

        Ok(Self { area, offset, bit })
    }

    /// Area code for a request. The bit code is chosen when the caller asks
    /// for bit access or the address itself names a bit.
    pub fn area_code(&self, for_bit_access: bool) -> u8 {
        if for_bit_access || self.bit.is_some() {
            self.area.bit_code()
        } else {
            self.area.word_code()
        }
    }

    /// Bit byte for the request body
    pub fn bit_index(&self) -> u8 {
        self.bit.unwrap_or(0)
    }

    /// Same address without the bit part
    pub fn word(&self) -> Self {
        Self::new(self.area, self.offset)
    }

    /// Address `n` words further on in the same area
    pub fn offset_by(&self, n: u16) -> Result<Self> {
        let offset = self.offset.checked_add(n).ok_or_else(|| {
            FinsError::invalid_address(self.to_string(), "word range runs past 65535")
        })?;
        Ok(Self::new(self.area, offset))
    }
}

fn split_prefix(text: &str) -> Option<(MemoryArea, &str)> {
    if let Some(rest) = text.strip_prefix("CIO") {
        return Some((MemoryArea::Cio, rest));
    }
    let first = text.chars().next()?;
    if first.is_ascii_digit() {
        return Some((MemoryArea::Cio, text));
    }
    let area = match first {
        'D' => MemoryArea::Dm,
        'W' => MemoryArea::Wr,
        'H' => MemoryArea::Hr,
        'A' => MemoryArea::Ar,
        'C' => MemoryArea::Cio,
        _ => return None,
    };
    Some((area, &text[1..]))
}

/// Plain decimal digits only; no sign, no whitespace
fn parse_decimal(text: &str) -> Option<u32> {
    if text.is_empty() || text.len() > 5 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl FromStr for Address {
    type Err = FinsError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.area.prefix(), self.offset)?;
        if let Some(bit) = self.bit {
            write!(f, ".{:02}", bit)?;
        }
        Ok(())
    }
}

/// Resolve address text to `(area_code, word_offset, bit_index)`.
///
/// Pure: the same text always yields the same triple.
pub fn resolve(text: &str, for_bit_access: bool) -> Result<(u8, u16, u8)> {
    let address = Address::parse(text)?;
    Ok((
        address.area_code(for_bit_access),
        address.offset,
        address.bit_index(),
    ))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_resolve_table() {
        let cases: &[(&str, bool, (u8, u16, u8))] = &[
            ("D4400", false, (0x82, 4400, 0)),
            ("D4400", true, (0x02, 4400, 0)),
            ("W0.00", false, (0x31, 0, 0)),
            ("W12.07", false, (0x31, 12, 7)),
            ("H100", false, (0xB2, 100, 0)),
            ("H100.15", false, (0x32, 100, 15)),
            ("A5", false, (0xB3, 5, 0)),
            ("CIO10", false, (0xB0, 10, 0)),
            ("C10", false, (0xB0, 10, 0)),
            ("10", false, (0xB0, 10, 0)),
            ("10.3", false, (0x30, 10, 3)),
            ("d200", false, (0x82, 200, 0)),
            (" D65535 ", false, (0x82, 65535, 0)),
        ];

        for (text, for_bit, expected) in cases {
            assert_eq!(resolve(text, *for_bit).unwrap(), *expected, "address {}", text);
        }
    }

    #[test]
    fn test_resolve_is_pure() {
        for text in ["D4400", "W0.00", "CIO10", "10"] {
            assert_eq!(resolve(text, false).unwrap(), resolve(text, false).unwrap());
        }
    }

    #[test]
    fn test_invalid_addresses() {
        for text in [
            "", "X10", "D", "D-1", "D+5", "D65536", "D99999999", "W0.16", "W0.99", "W0.", "D1.2.3",
            "DA10", "CIO", "D 10",
        ] {
            let err = resolve(text, false).unwrap_err();
            assert!(
                matches!(err, FinsError::InvalidAddress { .. }),
                "{} should be invalid, got {:?}",
                text,
                err
            );
        }
    }

    #[test]
    fn test_bit_index_above_15_always_fails() {
        for bit in 16..=40 {
            let text = format!("W0.{}", bit);
            assert!(resolve(&text, true).is_err(), "{}", text);
        }
        for bit in 0..=15 {
            let text = format!("W0.{}", bit);
            assert_eq!(resolve(&text, false).unwrap().2, bit as u8);
        }
    }

    #[test]
    fn test_display_and_word() {
        let address = Address::parse("w3.5").unwrap();
        assert_eq!(address.to_string(), "W3.05");
        assert_eq!(address.word().to_string(), "W3");
        assert_eq!(Address::parse("10").unwrap().to_string(), "CIO10");
    }

    #[test]
    fn test_offset_by() {
        let address = Address::parse("D100").unwrap();
        assert_eq!(address.offset_by(2).unwrap().offset, 102);
        assert!(Address::parse("D65535").unwrap().offset_by(1).is_err());
    }

    #[test]
    fn test_with_bit() {
        let address = Address::new(MemoryArea::Dm, 10);
        assert_eq!(address.with_bit(15).unwrap().bit, Some(15));
        assert!(address.with_bit(16).is_err());
    }
}
