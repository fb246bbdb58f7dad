use bytes::{Buf, BufMut, Bytes, BytesMut};
use switchboard_core::error::SwitchboardError;
use switchboard_core::framed::FrameDecoder;
use thiserror::Error;

/// ZMTP frame flags
pub const FLAG_MORE: u8 = 0x01;
pub const FLAG_LONG: u8 = 0x02;
pub const FLAG_COMMAND: u8 = 0x04;

/// ZMTP protocol errors
#[derive(Debug, Error)]
pub enum ZmtpError {
    #[error("protocol violation: reserved bits set")]
    ReservedBits,

    #[error("protocol violation: frame of {0} bytes exceeds the limit")]
    SizeTooLarge(u64),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("unsupported security mechanism {0:?}")]
    Mechanism(String),

    #[error("incompatible peer socket type {peer} for local {local}")]
    Incompatible { local: String, peer: String },
}

impl From<ZmtpError> for SwitchboardError {
    fn from(err: ZmtpError) -> Self {
        Self::transport(err.to_string())
    }
}

/// A decoded ZMTP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpFrame {
    pub flags: u8,
    pub payload: Bytes,
}

impl ZmtpFrame {
    #[inline]
    pub const fn more(&self) -> bool {
        (self.flags & FLAG_MORE) != 0
    }

    #[inline]
    pub const fn is_command(&self) -> bool {
        (self.flags & FLAG_COMMAND) != 0
    }

    /// Name of a command frame (`READY`, `PING`, ...).
    pub fn command_name(&self) -> Option<&[u8]> {
        if !self.is_command() {
            return None;
        }
        let len = *self.payload.first()? as usize;
        self.payload.get(1..=len)
    }
}

/// Stateless ZMTP decoder.
///
/// Frames are only split off once complete; the framed stream keeps partial
/// input in its buffer between reads.
#[derive(Debug, Default, Clone)]
pub struct ZmtpDecoder {
    max_body: Option<usize>,
}

impl ZmtpDecoder {
    #[must_use]
    pub const fn new(max_body: Option<usize>) -> Self {
        Self { max_body }
    }
}

impl FrameDecoder for ZmtpDecoder {
    type Frame = ZmtpFrame;

    fn decode(&mut self, src: &mut BytesMut) -> switchboard_core::error::Result<Option<ZmtpFrame>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let flags = src[0];

        // Reserved bits must be zero (bits 3–7)
        if (flags & 0xF8) != 0 {
            return Err(ZmtpError::ReservedBits.into());
        }

        let is_long = (flags & FLAG_LONG) != 0;
        let header_len = if is_long { 9 } else { 2 };
        if src.len() < header_len {
            return Ok(None);
        }

        let body_len = if is_long {
            let mut len = &src[1..9];
            let size = len.get_u64();
            // MSB must be zero in ZMTP 3.x
            if size > 0x7FFF_FFFF_FFFF_FFFF {
                return Err(ZmtpError::SizeTooLarge(size).into());
            }
            size
        } else {
            u64::from(src[1])
        };

        if let Some(max) = self.max_body {
            if body_len > max as u64 {
                return Err(ZmtpError::SizeTooLarge(body_len).into());
            }
        }

        let Ok(body_len) = usize::try_from(body_len) else {
            return Err(ZmtpError::SizeTooLarge(body_len).into());
        };
        if src.len() - header_len < body_len {
            return Ok(None);
        }

        src.advance(header_len);
        let payload = src.split_to(body_len).freeze();
        Ok(Some(ZmtpFrame { flags, payload }))
    }
}

/// Encode a complete frame (header + body).
///
/// The LONG flag is derived from the body length; callers pass MORE and
/// COMMAND only.
pub fn encode_frame(flags: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len();
    let mut out = BytesMut::with_capacity(if len <= 255 { 2 } else { 9 } + len);

    if len <= 255 {
        out.put_u8(flags & !FLAG_LONG);
        out.put_u8(len as u8);
    } else {
        out.put_u8(flags | FLAG_LONG);
        out.put_u64(len as u64);
    }

    out.extend_from_slice(body);
    out.to_vec()
}

/// Build a command body: length-prefixed name followed by `data`.
pub fn build_command(name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + name.len() + data.len());
    body.push(name.len() as u8);
    body.extend_from_slice(name.as_bytes());
    body.extend_from_slice(data);
    body
}

/// ZMTP 3.0 subscription message: `0x01` followed by the prefix.
pub fn subscription(prefix: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + prefix.len());
    body.push(0x01);
    body.extend_from_slice(prefix);
    encode_frame(0, &body)
}

/// PONG reply for a PING command body, echoing its context.
///
/// PING layout: name, 2-byte TTL, context.
pub fn pong_for(ping: &Bytes) -> Vec<u8> {
    let context = ping.get(1 + 4 + 2..).unwrap_or_default();
    encode_frame(FLAG_COMMAND, &build_command("PONG", context))
}
