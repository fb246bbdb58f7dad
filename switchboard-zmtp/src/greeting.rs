use crate::codec::ZmtpError;
use bytes::{BufMut, BytesMut};

/// ZMTP Greeting is always exactly 64 bytes
pub const GREETING_SIZE: usize = 64;

const SIGNATURE_HEAD: u8 = 0xFF;
const SIGNATURE_TAIL: u8 = 0x7F;

/// Security mechanisms named in a greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    Null,
    Plain,
    Curve,
    Unknown(String),
}

/// Parsed greeting information
#[derive(Debug, Clone)]
pub struct ZmtpGreeting {
    pub major: u8,
    pub minor: u8,
    pub mechanism: Mechanism,
    pub as_server: bool,
}

impl ZmtpGreeting {
    /// Parse a 64-byte ZMTP greeting
    ///
    /// Layout (ZMTP 3.x):
    /// ```text
    /// [0]      0xFF
    /// [1..9]   Padding
    /// [9]      0x7F
    /// [10]     Major version
    /// [11]     Minor version
    /// [12..32] Mechanism (ASCII, null-padded)
    /// [32]     As-Server flag
    /// [33..64] Padding
    /// ```
    ///
    /// Any 3.x minor version is accepted.
    pub fn parse(src: &[u8]) -> Result<Self, ZmtpError> {
        if src.len() < GREETING_SIZE {
            return Err(ZmtpError::Protocol("short greeting"));
        }
        if src[0] != SIGNATURE_HEAD || src[9] != SIGNATURE_TAIL {
            return Err(ZmtpError::Protocol("bad greeting signature"));
        }
        if src[10] < 3 {
            return Err(ZmtpError::Protocol("peer speaks ZMTP older than 3.0"));
        }

        let mechanism = std::str::from_utf8(&src[12..32])
            .map_err(|_| ZmtpError::Protocol("mechanism is not ASCII"))?
            .trim_matches(char::from(0));
        let mechanism = match mechanism {
            "NULL" => Mechanism::Null,
            "PLAIN" => Mechanism::Plain,
            "CURVE" => Mechanism::Curve,
            other => Mechanism::Unknown(other.to_string()),
        };

        Ok(Self {
            major: src[10],
            minor: src[11],
            mechanism,
            as_server: (src[32] & 0x01) != 0,
        })
    }
}

/// Build our ZMTP 3.0 NULL greeting.
pub fn build_greeting(as_server: bool) -> Vec<u8> {
    let mut b = BytesMut::with_capacity(GREETING_SIZE);

    // Signature
    b.put_u8(SIGNATURE_HEAD);
    b.put_bytes(0, 8);
    b.put_u8(SIGNATURE_TAIL);

    // Version 3.0
    b.put_slice(&[0x03, 0x00]);

    // Mechanism, null-padded to 20 bytes
    b.put_slice(b"NULL");
    b.put_bytes(0, 16);

    b.put_u8(u8::from(as_server));
    b.put_bytes(0, 31);

    b.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_greeting_parses() {
        let raw = build_greeting(true);
        assert_eq!(raw.len(), GREETING_SIZE);

        let greeting = ZmtpGreeting::parse(&raw).unwrap();
        assert_eq!((greeting.major, greeting.minor), (3, 0));
        assert_eq!(greeting.mechanism, Mechanism::Null);
        assert!(greeting.as_server);
    }

    #[test]
    fn test_rejects_bad_signature_and_old_versions() {
        let mut raw = build_greeting(false);
        raw[9] = 0;
        assert!(ZmtpGreeting::parse(&raw).is_err());

        let mut raw = build_greeting(false);
        raw[10] = 2;
        assert!(ZmtpGreeting::parse(&raw).is_err());
    }

    #[test]
    fn test_other_mechanisms_are_reported() {
        let mut raw = build_greeting(false);
        raw[12..17].copy_from_slice(b"CURVE");
        assert_eq!(ZmtpGreeting::parse(&raw).unwrap().mechanism, Mechanism::Curve);
    }
}
