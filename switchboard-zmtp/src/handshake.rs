//! ZMTP handshake, completed before any payload is exchanged.
//!
//! Both peers send their greeting and READY command without waiting for the
//! other side, then validate what they receive:
//! 1. Greeting: ZMTP 3.x, NULL mechanism
//! 2. READY: mandatory `Socket-Type` compatible with ours, optional `Identity`
//!
//! Bytes the peer sent after its READY stay in the framed stream's buffer.

use crate::codec::{build_command, encode_frame, ZmtpDecoder, ZmtpError, FLAG_COMMAND};
use crate::greeting::{build_greeting, Mechanism, ZmtpGreeting, GREETING_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use compio::io::{AsyncRead, AsyncWrite};
use std::time::Duration;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::framed::FramedStream;
use switchboard_core::socket_type::SocketType;
use tracing::debug;

/// READY bodies larger than this are rejected.
const MAX_READY_SIZE: usize = 512;

/// Result of a successful handshake
#[derive(Debug)]
pub struct HandshakeResult {
    pub peer_identity: Option<Bytes>,
    pub peer_socket_type: SocketType,
}

/// Run the handshake, bounded by `limit` (zero disables the bound).
///
/// Failures surface as `Connection` errors.
pub async fn perform_handshake_with_timeout<S>(
    framed: &mut FramedStream<S, ZmtpDecoder>,
    local: SocketType,
    identity: Option<&[u8]>,
    as_server: bool,
    limit: Duration,
) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = perform_handshake(framed, local, identity, as_server);
    let result = if limit.is_zero() {
        handshake.await
    } else {
        match compio::time::timeout(limit, handshake).await {
            Ok(result) => result,
            Err(_) => {
                return Err(SwitchboardError::connection(format!(
                    "ZMTP handshake timed out after {limit:?}"
                )))
            }
        }
    };
    result.map_err(SwitchboardError::into_connection)
}

/// Exchange greetings and READY commands on `framed`.
pub async fn perform_handshake<S>(
    framed: &mut FramedStream<S, ZmtpDecoder>,
    local: SocketType,
    identity: Option<&[u8]>,
    as_server: bool,
) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(socket_type = %local, "[HANDSHAKE] Starting");

    framed.write_all(build_greeting(as_server)).await?;
    let raw = framed.read_exact(GREETING_SIZE).await?;
    let greeting = ZmtpGreeting::parse(&raw)?;
    if greeting.mechanism != Mechanism::Null {
        return Err(ZmtpError::Mechanism(format!("{:?}", greeting.mechanism)).into());
    }
    debug!(major = greeting.major, minor = greeting.minor, "[HANDSHAKE] Greeting exchanged");

    let ready = build_ready(local.as_str(), identity);
    framed
        .write_all(encode_frame(FLAG_COMMAND, &ready))
        .await?;

    let frame = framed
        .read_frame()
        .await?
        .ok_or_else(|| SwitchboardError::transport("peer closed during handshake"))?;
    if frame.command_name() != Some(&b"READY"[..]) {
        return Err(ZmtpError::Protocol("expected READY command").into());
    }
    if frame.payload.len() > MAX_READY_SIZE {
        return Err(ZmtpError::Protocol("READY command too large").into());
    }

    let result = parse_ready(&frame.payload)?;
    if !local.is_compatible(result.peer_socket_type) {
        return Err(ZmtpError::Incompatible {
            local: local.to_string(),
            peer: result.peer_socket_type.to_string(),
        }
        .into());
    }

    debug!(peer = %result.peer_socket_type, "[HANDSHAKE] Complete");
    Ok(result)
}

/// Build a READY command body.
///
/// Properties: `Socket-Type` (mandatory), `Identity` (optional), each as a
/// 1-byte name length, the name, a 4-byte BE value length and the value.
pub fn build_ready(socket_type: &str, identity: Option<&[u8]>) -> Vec<u8> {
    let mut props = BytesMut::new();
    put_property(&mut props, "Socket-Type", socket_type.as_bytes());
    if let Some(id) = identity {
        put_property(&mut props, "Identity", id);
    }
    build_command("READY", &props)
}

#[inline]
fn put_property(dst: &mut BytesMut, name: &str, value: &[u8]) {
    dst.put_u8(name.len() as u8);
    dst.put_slice(name.as_bytes());
    dst.put_u32(value.len() as u32);
    dst.put_slice(value);
}

/// Parse a READY command body (name included).
pub fn parse_ready(body: &Bytes) -> std::result::Result<HandshakeResult, ZmtpError> {
    if body.len() < 6 || body[0] != 5 || &body[1..6] != b"READY" {
        return Err(ZmtpError::Protocol("malformed READY command"));
    }

    let mut offset = 6;
    let mut socket_type = None;
    let mut identity = None;

    while offset < body.len() {
        let key_len = body[offset] as usize;
        offset += 1;
        let key_end = offset + key_len;
        if key_end + 4 > body.len() {
            return Err(ZmtpError::Protocol("truncated READY property"));
        }
        let key = &body[offset..key_end];

        let value_len = u32::from_be_bytes([
            body[key_end],
            body[key_end + 1],
            body[key_end + 2],
            body[key_end + 3],
        ]) as usize;
        let value_start = key_end + 4;
        let value_end = value_start + value_len;
        if value_end > body.len() {
            return Err(ZmtpError::Protocol("truncated READY property"));
        }
        offset = value_end;

        // Property names are case-insensitive
        if key.eq_ignore_ascii_case(b"Socket-Type") {
            let name = std::str::from_utf8(&body[value_start..value_end])
                .map_err(|_| ZmtpError::Protocol("socket type is not ASCII"))?;
            socket_type = Some(
                name.parse::<SocketType>()
                    .map_err(|_| ZmtpError::Protocol("unknown peer socket type"))?,
            );
        } else if key.eq_ignore_ascii_case(b"Identity") {
            identity = Some(body.slice(value_start..value_end));
        }
    }

    Ok(HandshakeResult {
        peer_identity: identity,
        peer_socket_type: socket_type.ok_or(ZmtpError::Protocol("READY without Socket-Type"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use compio::net::{TcpListener, TcpStream};
    use switchboard_core::options::TransportOptions;

    #[test]
    fn test_ready_round_trip() {
        let body = Bytes::from(build_ready("DEALER", Some(&b"worker-1"[..])));
        let parsed = parse_ready(&body).unwrap();
        assert_eq!(parsed.peer_socket_type, SocketType::Dealer);
        assert_eq!(parsed.peer_identity.as_deref(), Some(&b"worker-1"[..]));
    }

    #[test]
    fn test_ready_without_socket_type() {
        let body = Bytes::from(build_command("READY", &[]));
        assert!(parse_ready(&body).is_err());
    }

    #[test]
    fn test_truncated_property() {
        let mut body = build_ready("PUSH", None);
        body.truncate(body.len() - 2);
        assert!(parse_ready(&Bytes::from(body)).is_err());
    }

    async fn framed_pair() -> (
        FramedStream<TcpStream, ZmtpDecoder>,
        FramedStream<TcpStream, ZmtpDecoder>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = futures::join!(TcpStream::connect(addr), listener.accept());
        let opts = TransportOptions::default();
        (
            FramedStream::new(client.unwrap(), ZmtpDecoder::default(), &opts),
            FramedStream::new(accepted.unwrap().0, ZmtpDecoder::default(), &opts),
        )
    }

    #[compio::test]
    async fn test_handshake_between_compatible_peers() {
        let (mut push, mut pull) = framed_pair().await;
        let (a, b) = futures::join!(
            perform_handshake(&mut push, SocketType::Push, Some(&b"p"[..]), false),
            perform_handshake(&mut pull, SocketType::Pull, None, true),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.peer_socket_type, SocketType::Pull);
        assert_eq!(b.peer_socket_type, SocketType::Push);
        assert_eq!(b.peer_identity.as_deref(), Some(&b"p"[..]));
    }

    #[compio::test]
    async fn test_incompatible_peers_fail_as_connection_errors() {
        let (mut push, mut other) = framed_pair().await;
        let limit = Duration::from_secs(5);
        let (a, b) = futures::join!(
            perform_handshake_with_timeout(&mut push, SocketType::Push, None, false, limit),
            perform_handshake_with_timeout(&mut other, SocketType::Push, None, true, limit),
        );
        assert!(a.unwrap_err().is_connection_error());
        assert!(b.unwrap_err().is_connection_error());
    }

    #[compio::test]
    async fn test_silent_peer_times_out() {
        let (mut client, _silent) = framed_pair().await;
        let err = perform_handshake_with_timeout(
            &mut client,
            SocketType::Pair,
            None,
            false,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(err.is_connection_error());
    }
}
