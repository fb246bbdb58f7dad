//! STOMP backend against an in-test broker.
//!
//! The broker accepts one connection, answers `CONNECT`, pushes scripted
//! `MESSAGE`s after `SUBSCRIBE` and records every frame it receives.

use bytes::Bytes;
use compio::net::TcpListener;
use switchboard_core::cancel::cancel_pair;
use switchboard_core::destination::Destination;
use switchboard_core::error::SwitchboardError;
use switchboard_core::framed::FramedStream;
use switchboard_core::options::TransportOptions;
use switchboard_core::protocol::Protocol;
use switchboard_stomp::{StompDecoder, StompFrame, StompProtocol};

enum Reply {
    Connected,
    Refuse(&'static str),
}

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Serve one client until it disconnects; returns the frames it sent.
async fn serve(listener: TcpListener, reply: Reply, deliver: &[&'static [u8]]) -> Vec<StompFrame> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut framed = FramedStream::new(stream, StompDecoder, &TransportOptions::default());
    let mut seen = Vec::new();

    while let Some(frame) = framed.read_frame().await.ok().flatten() {
        seen.push(frame.clone());
        match frame.command.as_str() {
            "CONNECT" => match reply {
                Reply::Connected => {
                    let connected = StompFrame::new("CONNECTED")
                        .header("version", "1.2")
                        .header("server", "fake/1.0");
                    framed.write_all(connected.encode()).await.unwrap();
                }
                Reply::Refuse(message) => {
                    let error = StompFrame::new("ERROR").header("message", message);
                    framed.write_all(error.encode()).await.unwrap();
                    return seen;
                }
            },
            "SUBSCRIBE" => {
                let id = frame.get("id").unwrap_or_default().to_string();
                let destination = frame.get("destination").unwrap_or_default().to_string();
                for (n, body) in deliver.iter().copied().enumerate() {
                    let message = StompFrame::new("MESSAGE")
                        .header("subscription", id.as_str())
                        .header("message-id", n.to_string())
                        .header("destination", destination.as_str())
                        .body(Bytes::from_static(body));
                    framed.write_all(message.encode()).await.unwrap();
                }
                let error = StompFrame::new("ERROR").header("message", "shutting down");
                framed.write_all(error.encode()).await.unwrap();
            }
            "DISCONNECT" => return seen,
            _ => {}
        }
    }
    seen
}

#[compio::test]
async fn test_connect_carries_credentials_and_close_disconnects() {
    let (listener, port) = bind().await;
    let stomp = StompProtocol::new();
    stomp.init(&["guest".into(), "s3cret".into()]).unwrap();

    let (seen, ()) = futures::join!(serve(listener, Reply::Connected, &[]), async {
        let handle = stomp.dial("", "127.0.0.1", port).await.unwrap();
        assert_eq!(stomp.session_count(), 1);
        stomp.close(handle).await.unwrap();
        assert_eq!(stomp.session_count(), 0);
    });

    let connect = &seen[0];
    assert_eq!(connect.command, "CONNECT");
    assert_eq!(connect.get("accept-version"), Some("1.2"));
    assert_eq!(connect.get("host"), Some("127.0.0.1"));
    assert_eq!(connect.get("login"), Some("guest"));
    assert_eq!(connect.get("passcode"), Some("s3cret"));
    assert_eq!(seen.last().map(|f| f.command.as_str()), Some("DISCONNECT"));
}

#[compio::test]
async fn test_error_reply_fails_dial() {
    let (listener, port) = bind().await;
    let stomp = StompProtocol::new();
    stomp.init(&[]).unwrap();

    let (seen, result) = futures::join!(
        serve(listener, Reply::Refuse("bad credentials"), &[]),
        stomp.dial("", "127.0.0.1", port)
    );

    let err = result.unwrap_err();
    assert!(err.is_connection_error());
    assert!(err.to_string().contains("bad credentials"));
    assert_eq!(seen[0].get("login"), None, "anonymous CONNECT");
    assert_eq!(stomp.session_count(), 0);
}

#[compio::test]
async fn test_subscribe_delivers_bodies_until_broker_error() {
    let (listener, port) = bind().await;
    let stomp = StompProtocol::new();
    let deliver: [&'static [u8]; 3] = [b"first", b"with\0nul", b"third"];

    let (seen, (result, got)) = futures::join!(serve(listener, Reply::Connected, &deliver), async {
        let handle = stomp.dial("", "127.0.0.1", port).await.unwrap();
        let (tx, rx) = flume::unbounded();
        let (_cancel, signal) = cancel_pair();
        let result = stomp
            .recv_from(handle, &Destination::Topic("prices".into()), tx, signal)
            .await;
        stomp.close(handle).await.unwrap();
        (result, rx.drain().collect::<Vec<_>>())
    });

    assert!(matches!(result, Err(SwitchboardError::Transport(msg)) if msg.contains("shutting down")));
    assert_eq!(got, deliver);

    let subscribe = seen.iter().find(|f| f.command == "SUBSCRIBE").unwrap();
    assert_eq!(subscribe.get("destination"), Some("/topic/prices"));
    assert_eq!(subscribe.get("ack"), Some("auto"));
}

#[compio::test]
async fn test_send_loop_emits_send_frames() {
    let (listener, port) = bind().await;
    let stomp = StompProtocol::new();

    let (seen, result) = futures::join!(serve(listener, Reply::Connected, &[]), async {
        let handle = stomp.dial("", "127.0.0.1", port).await.unwrap();
        let (tx, rx) = flume::unbounded();
        for body in ["a", "b", "c"] {
            tx.send(Bytes::from(body)).unwrap();
        }
        drop(tx);
        let (_cancel, signal) = cancel_pair();
        let result = stomp
            .send_to(handle, &Destination::Queue("jobs".into()), rx, signal)
            .await;
        stomp.close(handle).await.unwrap();
        result
    });

    assert!(result.is_ok());
    let sends: Vec<&StompFrame> = seen.iter().filter(|f| f.command == "SEND").collect();
    assert_eq!(sends.len(), 3);
    for (frame, body) in sends.iter().zip(["a", "b", "c"]) {
        assert_eq!(frame.get("destination"), Some("jobs"));
        assert_eq!(frame.get("content-length"), Some("1"));
        assert_eq!(frame.body, body);
    }
}

#[compio::test]
async fn test_cancel_idle_subscription() {
    let (listener, port) = bind().await;
    let stomp = StompProtocol::new();

    // Broker stays silent after SUBSCRIBE until the client disconnects.
    let broker = async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = FramedStream::new(stream, StompDecoder, &TransportOptions::default());
        while let Some(frame) = framed.read_frame().await.ok().flatten() {
            match frame.command.as_str() {
                "CONNECT" => framed
                    .write_all(StompFrame::new("CONNECTED").header("version", "1.2").encode())
                    .await
                    .unwrap(),
                "DISCONNECT" => break,
                _ => {}
            }
        }
    };

    let ((), result) = futures::join!(broker, async {
        let handle = stomp.dial("", "127.0.0.1", port).await.unwrap();
        let (tx, _rx) = flume::unbounded();
        let (cancel, signal) = cancel_pair();
        let idle = Destination::Queue("idle".into());
        let (result, ()) = futures::join!(
            stomp.recv_from(handle, &idle, tx, signal),
            async move {
                compio::time::sleep(std::time::Duration::from_millis(30)).await;
                cancel.cancel();
            }
        );
        stomp.close(handle).await.unwrap();
        result
    });

    assert!(result.is_ok());
}
