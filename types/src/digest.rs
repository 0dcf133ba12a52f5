//! Content digest type used to address ledgers, tree nodes and entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// A 32-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Default for Digest {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Digest {
    pub const ZERO: Self = Self([0u8; 32]);

    /// Number of hex characters in the textual form.
    pub const HEX_LEN: usize = 64;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The `depth`-th nibble (4 bits) of the digest, most significant first.
    ///
    /// Used to route keys through a 16-way tree. `depth` must be below 64.
    pub fn nibble(&self, depth: usize) -> usize {
        let byte = self.0[depth / 2];
        if depth % 2 == 0 {
            (byte >> 4) as usize
        } else {
            (byte & 0x0f) as usize
        }
    }

    /// Parse a digest from exactly 64 hex characters (either case).
    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        if s.len() != Self::HEX_LEN {
            return Err(TypesError::InvalidHexLength(s.len()));
        }
        let mut out = [0u8; 32];
        let bytes = s.as_bytes();
        for (i, slot) in out.iter_mut().enumerate() {
            let hi = hex_value(bytes[2 * i]).ok_or(TypesError::InvalidHexChar)?;
            let lo = hex_value(bytes[2 * i + 1]).ok_or(TypesError::InvalidHexChar)?;
            *slot = (hi << 4) | lo;
        }
        Ok(Self(out))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl FromStr for Digest {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_digest() {
        assert!(Digest::ZERO.is_zero());
        assert!(!Digest::new([1u8; 32]).is_zero());
        assert_eq!(Digest::default(), Digest::ZERO);
    }

    #[test]
    fn parses_mixed_case_hex() {
        let text = "AbCdEf0123456789abcdef0123456789ABCDEF0123456789abcdef0123456789";
        let digest = Digest::from_hex(text).expect("valid hex");
        assert_eq!(digest.as_bytes()[0], 0xab);
        assert_eq!(digest.to_hex(), text.to_lowercase());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            Digest::from_hex("abcd"),
            Err(TypesError::InvalidHexLength(4))
        ));
    }

    #[test]
    fn rejects_non_hex() {
        let text = "zz".repeat(32);
        assert!(matches!(
            Digest::from_hex(&text),
            Err(TypesError::InvalidHexChar)
        ));
    }

    #[test]
    fn nibbles_are_most_significant_first() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xa7;
        bytes[31] = 0x3c;
        let d = Digest::new(bytes);
        assert_eq!(d.nibble(0), 0xa);
        assert_eq!(d.nibble(1), 0x7);
        assert_eq!(d.nibble(62), 0x3);
        assert_eq!(d.nibble(63), 0xc);
    }
}
