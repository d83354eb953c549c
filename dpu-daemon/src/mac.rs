//! MAC address parsing and formatting.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address: {0}")]
pub struct InvalidMac(pub String);

/// A 6-byte Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Build from a raw byte slice, as carried on the wire.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InvalidMac> {
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| InvalidMac(format!("expected 6 bytes, got {}", bytes.len())))?;
        Ok(Self(octets))
    }
}

impl FromStr for MacAddress {
    type Err = InvalidMac;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut count = 0;

        for part in s.split(separator) {
            if count == 6 || part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(InvalidMac(s.to_string()));
            }
            octets[count] = u8::from_str_radix(part, 16).map_err(|_| InvalidMac(s.to_string()))?;
            count += 1;
        }

        if count != 6 {
            return Err(InvalidMac(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_and_dash() {
        let a: MacAddress = "AA:bb:cc:dd:ee:01".parse().unwrap();
        let b: MacAddress = "aa-bb-cc-dd-ee-01".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "aa:bb:cc:dd:ee", "aa:bb:cc:dd:ee:ff:00", "zz:bb:cc:dd:ee:ff", "aab:b:cc:dd:ee:ff"] {
            assert!(bad.parse::<MacAddress>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_parse_rejects_sign_prefix() {
        for bad in ["+a:bb:cc:dd:ee:ff", "aa:bb:cc:dd:ee:+f", "-a-bb-cc-dd-ee-ff"] {
            assert!(bad.parse::<MacAddress>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_from_slice() {
        let mac = MacAddress::from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]).unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:02");
        assert!(MacAddress::from_slice(&[1, 2, 3]).is_err());
    }
}
