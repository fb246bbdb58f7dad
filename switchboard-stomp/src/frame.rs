//! STOMP 1.2 frames.
//!
//! ```text
//! COMMAND EOL
//! (header EOL)*
//! EOL
//! body NUL
//! ```
//!
//! EOL is `\n` or `\r\n`. Bare EOLs between frames are heart-beats and are
//! skipped. Header values are escaped (`\\`, `\n`, `\r`, `\c`) except in
//! `CONNECT` and `CONNECTED` frames.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use switchboard_core::error::SwitchboardError;
use switchboard_core::framed::FrameDecoder;
use thiserror::Error;

/// STOMP framing errors
#[derive(Debug, Error)]
pub enum StompError {
    #[error("frame header is not UTF-8")]
    NotUtf8,

    #[error("empty command line")]
    MissingCommand,

    #[error("header line without ':' ({0:?})")]
    MalformedHeader(String),

    #[error("undefined escape sequence in {0:?}")]
    BadEscape(String),

    #[error("invalid content-length {0:?}")]
    BadContentLength(String),

    #[error("body is not terminated by NUL")]
    MissingNul,
}

impl From<StompError> for SwitchboardError {
    fn from(err: StompError) -> Self {
        Self::transport(format!("STOMP: {err}"))
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    /// In wire order; repeated names are kept, the first one wins on lookup.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl StompFrame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body and its `content-length`.
    #[must_use]
    pub fn body(mut self, body: Bytes) -> Self {
        self.headers
            .push(("content-length".to_string(), body.len().to_string()));
        self.body = body;
        self
    }

    /// First value of header `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn escapes_headers(command: &str) -> bool {
        command != "CONNECT" && command != "CONNECTED"
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Vec<u8> {
        let escape = Self::escapes_headers(&self.command);
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');
        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

impl fmt::Display for StompFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} headers, {} body bytes)", self.command, self.headers.len(), self.body.len())
    }
}

/// Escape a header name or value.
pub fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_header`]. Undefined escapes are an error.
pub fn unescape_header(escaped: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::BadEscape(escaped.to_string())),
        }
    }
    Ok(out)
}

/// Incremental STOMP decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct StompDecoder;

impl FrameDecoder for StompDecoder {
    type Frame = StompFrame;

    fn decode(&mut self, src: &mut BytesMut) -> switchboard_core::error::Result<Option<StompFrame>> {
        let beats = src
            .iter()
            .take_while(|b| **b == b'\n' || **b == b'\r')
            .count();
        src.advance(beats);

        let Some((head_len, body_start)) = find_head_end(src) else {
            return Ok(None);
        };
        let (command, headers) = parse_head(&src[..head_len])?;

        let body_len = match lookup(&headers, "content-length") {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| StompError::BadContentLength(raw.to_string()))?;
                let frame_end = body_start
                    .checked_add(len)
                    .and_then(|n| n.checked_add(1))
                    .ok_or_else(|| StompError::BadContentLength(raw.to_string()))?;
                if src.len() < frame_end {
                    return Ok(None);
                }
                if src[body_start + len] != 0 {
                    return Err(StompError::MissingNul.into());
                }
                len
            }
            None => match src[body_start..].iter().position(|b| *b == 0) {
                Some(len) => len,
                None => return Ok(None),
            },
        };

        src.advance(body_start);
        let body = src.split_to(body_len).freeze();
        src.advance(1);

        Ok(Some(StompFrame {
            command,
            headers,
            body,
        }))
    }
}

fn lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Locate the blank line ending the headers.
///
/// Returns the length of the command + header section and the body offset.
fn find_head_end(src: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while let Some(offset) = src[i..].iter().position(|b| *b == b'\n') {
        let nl = i + offset;
        match src.get(nl + 1) {
            Some(b'\n') => return Some((nl, nl + 2)),
            Some(b'\r') if src.get(nl + 2) == Some(&b'\n') => return Some((nl, nl + 3)),
            None => return None,
            _ => i = nl + 1,
        }
    }
    None
}

fn parse_head(head: &[u8]) -> Result<(String, Vec<(String, String)>), StompError> {
    let head = std::str::from_utf8(head).map_err(|_| StompError::NotUtf8)?;
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let command = lines
        .next()
        .filter(|c| !c.is_empty())
        .ok_or(StompError::MissingCommand)?
        .to_string();
    let escaped = StompFrame::escapes_headers(&command);

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }
    Ok((command, headers))
}
