//! End-to-end session behavior over the in-memory and TCP transports.

mod common;

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use edgelink::transport::{BoxedStream, Transport, memory};
use edgelink::{
    Error, Message, OutboundCache, PackageHeader, Session, SessionConfig, SessionState,
    TcpListenerTransport,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::{Instant, sleep, timeout};

use common::{Pair, WAIT, config, init_logging, next, reach};

fn body(msg: &Message) -> &[u8] {
    msg.content.as_bytes().map(|b| &b[..]).unwrap_or_default()
}

// ============================================================================
// Synchronous Requests
// ============================================================================

#[tokio::test]
async fn test_sync_round_trip() {
    let Pair {
        client,
        server,
        mut server_inbox,
        ..
    } = Pair::connect().await;

    let responder = tokio::spawn(async move {
        let request = next(&mut server_inbox).await;
        assert_eq!(request.id(), "a");
        assert!(request.is_sync());
        assert_eq!(body(&request), b"ping");

        let response = Message::with_id("b")
            .set_parent_id(request.id())
            .with_content("pong");
        server.send(response).await.expect("respond");
        server
    });

    let response = client
        .send_sync(Message::with_id("a").with_content("ping"), Duration::from_secs(1))
        .await
        .expect("response");

    assert_eq!(response.id(), "b");
    assert_eq!(response.parent_id(), "a");
    assert_eq!(body(&response), b"pong");
    assert_eq!(client.pending_sync(), 0);

    let server = responder.await.expect("responder");
    client.close().await.expect("close client");
    server.close().await.expect("close server");
}

#[tokio::test]
async fn test_sync_timeout() {
    let Pair {
        client,
        server: _server,
        ..
    } = Pair::connect().await;

    let started = Instant::now();
    let err = client
        .send_sync(Message::with_id("d"), Duration::from_millis(100))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(100), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "returned late: {elapsed:?}");
    assert!(!client.is_waiting("d"));

    let late = Message::with_id("late").set_parent_id("d");
    assert!(matches!(
        client.keeper().deliver_response(late),
        Err(Error::NoWaiter { .. })
    ));
}

#[tokio::test]
async fn test_interleaved_sync_calls() {
    let Pair {
        client,
        mut client_inbox,
        server,
        mut server_inbox,
        ..
    } = Pair::connect().await;

    let spawn_call = |id: &'static str| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_sync(Message::with_id(id), Duration::from_secs(2))
                .await
        })
    };
    let x = spawn_call("x");
    let y = spawn_call("y");

    let first = next(&mut server_inbox).await;
    let second = next(&mut server_inbox).await;
    let (request_x, request_y) = if first.id() == "x" {
        (first, second)
    } else {
        (second, first)
    };
    assert_eq!(request_y.id(), "y");

    server
        .send(Message::new_response(&request_y, "for y"))
        .await
        .expect("respond y");
    let response_y = timeout(WAIT, y)
        .await
        .expect("y in time")
        .expect("join y")
        .expect("y response");
    assert_eq!(response_y.parent_id(), "y");
    assert!(!x.is_finished());

    server
        .send(Message::new_response(&request_x, "for x"))
        .await
        .expect("respond x");
    let response_x = timeout(WAIT, x)
        .await
        .expect("x in time")
        .expect("join x")
        .expect("x response");
    assert_eq!(response_x.parent_id(), "x");
    assert_eq!(body(&response_x), b"for x");

    assert!(client_inbox.try_recv().is_none());
    assert_eq!(client.pending_sync(), 0);
}

#[tokio::test]
async fn test_uncorrelated_response_reaches_inbox() {
    let Pair {
        client: _client,
        mut client_inbox,
        server,
        ..
    } = Pair::connect().await;

    let stray = Message::new("nobody-waits").with_content("late");
    server.send(stray).await.expect("send");

    let received = next(&mut client_inbox).await;
    assert_eq!(received.parent_id(), "nobody-waits");
    assert_eq!(body(&received), b"late");
}

// ============================================================================
// Cache and Reconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_then_latest_wins_on_reconnect() {
    let Pair {
        client,
        server,
        listener,
        ..
    } = Pair::connect().await;

    let mut states = client.subscribe_state();
    server.close().await.expect("close server");
    timeout(WAIT, states.wait_for(|s| !s.is_connected()))
        .await
        .expect("client noticed")
        .expect("watch open");

    for value in ["v1", "v2"] {
        let update = Message::new("")
            .build_router("s", "g", "r", "o")
            .with_content(value);
        client.send(update).await.expect("send while down");
    }
    assert_eq!(client.cached_len().await, 1);

    let (restarted, mut inbox) = Session::builder(config())
        .transport(listener.clone())
        .start()
        .expect("restart server");

    let delivered = next(&mut inbox).await;
    assert_eq!(body(&delivered), b"v2");
    assert_eq!(delivered.fingerprint().to_string(), "r/o/s");

    assert!(timeout(Duration::from_millis(200), inbox.recv()).await.is_err());
    assert_eq!(client.cached_len().await, 0);

    restarted.close().await.expect("close");
    client.close().await.expect("close");
}

/// Stream whose reads never complete and whose writes fail.
struct BrokenPipe;

impl AsyncRead for BrokenPipe {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenPipe {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
struct BrokenPipeTransport {
    dials: AtomicUsize,
}

#[async_trait]
impl Transport for BrokenPipeTransport {
    async fn connect(&self) -> edgelink::Result<BoxedStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BrokenPipe))
    }

    fn peer(&self) -> String {
        "broken pipe".to_string()
    }
}

#[tokio::test]
async fn test_write_failure_caches_and_reports_success() {
    init_logging();
    let transport = Arc::new(BrokenPipeTransport::default());
    let (client, _inbox) = Session::builder(config().with_reconnect_period(Duration::from_secs(30)))
        .shared_transport(transport.clone())
        .start()
        .expect("start");
    reach(&client, SessionState::Connected).await;

    for value in ["v1", "v2"] {
        let update = Message::new("")
            .build_router("s", "g", "r", "o")
            .with_content(value);
        client.send(update).await.expect("write failure is not surfaced");
    }

    assert_eq!(client.cached_len().await, 1);
    reach(&client, SessionState::Disconnected).await;
    assert_eq!(transport.dials.load(Ordering::SeqCst), 1);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_cache_drain_order_under_replacement() {
    let cache = OutboundCache::new(100);
    let keyed = |id: &str, resource: &str| {
        Message::with_id(id).build_router("edge", "g", resource, "update")
    };

    cache.save(keyed("m1", "f1")).await;
    cache.save(keyed("m2", "f2")).await;
    cache.save(keyed("m3", "f1")).await;
    cache.save(keyed("m4", "f3")).await;

    let mut drained = Vec::new();
    cache
        .drain(|msg| {
            drained.push(msg.id().to_string());
            async { Ok(()) }
        })
        .await
        .expect("drain");

    assert_eq!(drained, ["m2", "m3", "m4"]);
}

#[tokio::test]
async fn test_cached_messages_arrive_in_order_on_first_connect() {
    init_logging();
    let (connector, listener) = memory::channel(64 * 1024);
    let (client, _client_inbox) = Session::builder(config())
        .transport(connector)
        .start()
        .expect("client start");

    for (id, resource) in [("m1", "f1"), ("m2", "f2"), ("m3", "f1"), ("m4", "f3")] {
        let msg = Message::with_id(id).build_router("edge", "g", resource, "update");
        client.send(msg).await.expect("send");
    }

    let (server, mut inbox) = Session::builder(config())
        .transport(listener)
        .start()
        .expect("server start");

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(next(&mut inbox).await.id().to_string());
    }
    assert_eq!(ids, ["m2", "m3", "m4"]);

    // Fresh traffic follows the drained backlog.
    reach(&client, SessionState::Connected).await;
    client
        .send(Message::with_id("fresh").build_router("edge", "g", "f9", "update"))
        .await
        .expect("send");
    assert_eq!(next(&mut inbox).await.id(), "fresh");

    server.close().await.expect("close");
    client.close().await.expect("close");
}

#[tokio::test]
async fn test_oversized_frame_forces_reconnect() {
    init_logging();
    let (connector, listener) = memory::channel(64 * 1024);
    let (client, _inbox) = Session::builder(config())
        .transport(connector)
        .start()
        .expect("client start");

    let mut raw = timeout(WAIT, listener.connect())
        .await
        .expect("dial in time")
        .expect("accept");
    reach(&client, SessionState::Connected).await;

    raw.write_all(&PackageHeader::message(0x8000_0000).pack())
        .await
        .expect("write header");

    let mut buf = [0u8; 1];
    let read = timeout(WAIT, raw.read(&mut buf))
        .await
        .expect("client hung up")
        .unwrap_or(0);
    assert_eq!(read, 0);

    let second = timeout(WAIT, listener.connect()).await.expect("redial in time");
    assert!(second.is_ok());

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_garbage_payload_is_dropped_not_fatal() {
    init_logging();
    let (connector, listener) = memory::channel(64 * 1024);
    let (client, mut inbox) = Session::builder(config())
        .transport(connector)
        .start()
        .expect("client start");

    let mut raw = timeout(WAIT, listener.connect())
        .await
        .expect("dial in time")
        .expect("accept");
    reach(&client, SessionState::Connected).await;

    // A frame whose payload is not a valid message.
    let junk = [0xff, 0xff, 0xff];
    raw.write_all(&PackageHeader::message(junk.len() as u32).pack())
        .await
        .expect("header");
    raw.write_all(&junk).await.expect("payload");

    // Followed by a valid one on the same connection.
    let payload = edgelink::protocol::translator::encode(&Message::with_id("ok")).expect("encode");
    raw.write_all(&PackageHeader::message(payload.len() as u32).pack())
        .await
        .expect("header");
    raw.write_all(&payload).await.expect("payload");

    assert_eq!(next(&mut inbox).await.id(), "ok");
    assert_eq!(client.state(), SessionState::Connected);

    client.close().await.expect("close");
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_concurrent_close_fails_pending_sync() {
    let Pair {
        client,
        server: _server,
        ..
    } = Pair::connect().await;

    let caller = client.clone();
    let pending = tokio::spawn(async move {
        caller
            .send_sync(Message::with_id("z"), Duration::from_secs(10))
            .await
    });
    timeout(WAIT, async {
        while !client.is_waiting("z") {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("request registered");

    let (first, second) = tokio::join!(client.close(), client.close());
    assert!(first.is_ok());
    assert!(second.is_ok());

    let outcome = timeout(WAIT, pending)
        .await
        .expect("woken in time")
        .expect("join");
    assert!(matches!(outcome, Err(Error::Closed)));
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(client.pending_sync(), 0);
}

#[tokio::test]
async fn test_send_blocked_in_write_fails_on_close() {
    init_logging();
    let (connector, listener) = memory::channel(16);
    let (client, _inbox) = Session::builder(config())
        .transport(connector)
        .start()
        .expect("start");

    // Accepts once and never reads.
    let accepted = tokio::spawn(async move { listener.connect().await.expect("accept") });
    reach(&client, SessionState::Connected).await;
    let _silent_peer = accepted.await.expect("join");

    let sender = client.clone();
    let blocked = tokio::spawn(async move {
        let big = Message::new("").with_content(vec![0u8; 4096]);
        sender.send(big).await
    });
    sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished());

    client.close().await.expect("close");

    let result = timeout(WAIT, blocked)
        .await
        .expect("send returned")
        .expect("join");
    assert!(matches!(result, Err(Error::Closed)));
    assert_eq!(client.cached_len().await, 0);
}

#[tokio::test]
async fn test_state_handler_sees_lifecycle() {
    init_logging();
    let (connector, listener) = memory::channel(64 * 1024);
    let (server, _server_inbox) = Session::builder(config())
        .transport(listener)
        .start()
        .expect("server start");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let (client, _inbox) = Session::builder(config())
        .transport(connector)
        .on_state_change(move |state| recorder.lock().push(state))
        .start()
        .expect("client start");

    reach(&client, SessionState::Connected).await;
    client.close().await.expect("close");
    server.close().await.expect("close");

    let seen = seen.lock().clone();
    assert!(seen.contains(&SessionState::Dialing));
    assert!(seen.contains(&SessionState::Connected));
    assert_eq!(seen.last(), Some(&SessionState::Closed));
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test]
async fn test_keepalive_holds_read_timeout_off() {
    let Pair {
        server,
        mut server_inbox,
        client: _client,
        ..
    } = Pair::connect_with(
        config().with_read_timeout(Duration::from_millis(300)),
        config().with_keepalive_period(Duration::from_millis(50)),
    )
    .await;

    let mut states = server.subscribe_state();
    states.mark_unchanged();
    sleep(Duration::from_millis(700)).await;

    assert!(!states.has_changed().expect("watch open"));
    assert_eq!(server.state(), SessionState::Connected);
    assert!(server_inbox.try_recv().is_none());
}

#[tokio::test]
async fn test_application_message_on_keepalive_key_is_delivered() {
    let Pair {
        client: _client,
        mut client_inbox,
        server,
        ..
    } = Pair::connect().await;

    let lookalike = Message::new("")
        .build_router("app", "resource", "node", "keepalive")
        .with_content("not a ping");
    server.send(lookalike).await.expect("send");
    server
        .send(edgelink::session::keepalive_message())
        .await
        .expect("send ping");

    let received = next(&mut client_inbox).await;
    assert_eq!(received.source(), "app");
    assert_eq!(body(&received), b"not a ping");
    assert!(timeout(Duration::from_millis(200), client_inbox.recv()).await.is_err());
}

#[tokio::test]
async fn test_read_timeout_disconnects_silent_peer() {
    let Pair { server, client, .. } = Pair::connect_with(
        config().with_read_timeout(Duration::from_millis(100)),
        config(),
    )
    .await;

    let mut states = server.subscribe_state();
    timeout(WAIT, states.wait_for(|s| !s.is_connected()))
        .await
        .expect("silence detected")
        .expect("watch open");

    // Both sides come back on their own.
    reach(&client, SessionState::Connected).await;
    client.close().await.expect("close");
    server.close().await.expect("close");
}

// ============================================================================
// TCP
// ============================================================================

#[tokio::test]
async fn test_sync_round_trip_over_tcp() {
    init_logging();
    let listener = TcpListenerTransport::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let address = listener.local_addr().to_string();

    let (server, mut server_inbox) = Session::builder(config())
        .transport(listener)
        .start()
        .expect("server start");
    let (client, _client_inbox) =
        Session::builder(SessionConfig::new(address).with_reconnect_period(Duration::from_millis(50)))
            .start()
            .expect("client start");

    let responder = tokio::spawn({
        let server = server.clone();
        async move {
            let request = next(&mut server_inbox).await;
            server
                .send(Message::new_response(&request, serde_json::json!({"ok": true})))
                .await
                .expect("respond");
        }
    });

    let response = client
        .send_sync(
            Message::new("").build_router("edge", "g", "node", "query"),
            WAIT,
        )
        .await
        .expect("response");
    assert_eq!(body(&response), br#"{"ok":true}"#);
    assert_eq!(response.operation(), "response");

    responder.await.expect("responder");
    client.close().await.expect("close");
    server.close().await.expect("close");
}
