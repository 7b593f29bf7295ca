//! End-to-end tests against a scripted in-process daemon
//!
//! Each test binds a Unix socket in a temporary directory and plays the
//! daemon side of the protocol over the session's two connections. The
//! command transport always connects first, the event transport second, so
//! the script accepts them in that order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;

use rust_vici::{
    Error, Message, Packet, PacketType, Session, SessionConfig, Transport,
};

static TRACING: std::sync::Once = std::sync::Once::new();

// Client and scripted-daemon logs show up under RUST_LOG when a test fails
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct FakeDaemon {
    // Held so the socket directory outlives the test
    _dir: tempfile::TempDir,
    path: PathBuf,
    listener: UnixListener,
}

impl FakeDaemon {
    fn bind() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charon.vici");
        let listener = UnixListener::bind(&path).unwrap();
        Self {
            _dir: dir,
            path,
            listener,
        }
    }

    async fn accept(&self) -> Transport<UnixStream> {
        Transport::new(self.accept_raw().await)
    }

    async fn accept_raw(&self) -> UnixStream {
        self.listener.accept().await.unwrap().0
    }
}

async fn expect_request(transport: &mut Transport<UnixStream>, name: &str) -> Message {
    let packet = transport.receive().await.unwrap();
    assert_eq!(packet.packet_type, PacketType::CmdRequest);
    assert_eq!(packet.name.as_deref(), Some(name));
    packet.message.unwrap()
}

async fn expect_register(transport: &mut Transport<UnixStream>, name: &str) {
    let packet = transport.receive().await.unwrap();
    assert_eq!(packet.packet_type, PacketType::EventRegister);
    assert_eq!(packet.name.as_deref(), Some(name));
}

async fn expect_unregister(transport: &mut Transport<UnixStream>, name: &str) {
    let packet = transport.receive().await.unwrap();
    assert_eq!(packet.packet_type, PacketType::EventUnregister);
    assert_eq!(packet.name.as_deref(), Some(name));
}

#[tokio::test]
async fn test_request_round_trip() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let mut cmd = daemon.accept().await;
        let _evt = daemon.accept().await;

        expect_request(&mut cmd, "version").await;
        cmd.send(&Packet::response(
            Message::new().with("daemon", "charon").with("version", "6.0.2"),
        ))
        .await
        .unwrap();
    });

    let session = Session::connect(&path).await.unwrap();
    let version = session.version().await.unwrap();
    assert_eq!(version.get_str("daemon"), Some("charon"));
    assert_eq!(version.get_str("version"), Some("6.0.2"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unknown_command_leaves_session_usable() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let mut cmd = daemon.accept().await;
        let _evt = daemon.accept().await;

        expect_request(&mut cmd, "no-such").await;
        cmd.send(&Packet::command_unknown()).await.unwrap();

        expect_request(&mut cmd, "version").await;
        cmd.send(&Packet::response(Message::new().with("daemon", "charon")))
            .await
            .unwrap();
    });

    let session = Session::connect(&path).await.unwrap();

    let err = session.request("no-such", Message::new()).await.unwrap_err();
    assert!(matches!(err, Error::UnknownCommand(ref name) if name == "no-such"));
    assert!(err.is_recoverable());

    // The failure must not have latched anything
    let version = session.request("version", Message::new()).await.unwrap();
    assert_eq!(version.get_str("daemon"), Some("charon"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_daemon_reported_failure() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let mut cmd = daemon.accept().await;
        let _evt = daemon.accept().await;

        let request = expect_request(&mut cmd, "initiate").await;
        assert_eq!(request.get_str("child"), Some("net-net"));
        cmd.send(&Packet::response(
            Message::new()
                .with("success", "no")
                .with("errmsg", "peer not responding"),
        ))
        .await
        .unwrap();
    });

    let session = Session::connect(&path).await.unwrap();
    let err = session
        .initiate(Message::new().with("child", "net-net"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Command { .. }));
    assert!(err.is_recoverable());
    server.await.unwrap();
}

/// A streamed command yields its events to the caller while the event
/// listener keeps delivering unrelated events from the other transport.
#[tokio::test]
async fn test_streamed_command_with_independent_events() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let (event_seen_tx, event_seen_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let mut cmd = daemon.accept().await;
        let mut evt = daemon.accept().await;

        // Global subscription on the event transport
        expect_register(&mut evt, "ike-updown").await;
        evt.send(&Packet::confirm()).await.unwrap();

        // Streamed exchange on the command transport
        expect_register(&mut cmd, "list-sa").await;
        cmd.send(&Packet::confirm()).await.unwrap();
        expect_request(&mut cmd, "list-sas").await;

        cmd.send(&Packet::event("list-sa", Message::new().with("ike", "gw-a")))
            .await
            .unwrap();

        // With the streamed command still unterminated, deliver an
        // unrelated event on the event transport and wait until the
        // consumer has seen it.
        evt.send(&Packet::event("ike-updown", Message::new().with("up", "yes")))
            .await
            .unwrap();
        event_seen_rx.await.unwrap();

        cmd.send(&Packet::event("list-sa", Message::new().with("ike", "gw-b")))
            .await
            .unwrap();
        cmd.send(&Packet::response(Message::new())).await.unwrap();

        expect_unregister(&mut cmd, "list-sa").await;
        cmd.send(&Packet::confirm()).await.unwrap();
    });

    let session = Arc::new(Session::connect(&path).await.unwrap());
    session.subscribe(&["ike-updown"]).await.unwrap();

    let streaming = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.list_sas(Message::new()).await })
    };

    // Blocks until the daemon delivers the unrelated event, which it only
    // does once the streamed command is mid-flight
    let event = session.next_event().await.unwrap();
    assert_eq!(event.name, "ike-updown");
    assert_eq!(event.message.get_str("up"), Some("yes"));
    event_seen_tx.send(()).unwrap();

    let sas = streaming.await.unwrap().unwrap();
    assert_eq!(sas.len(), 2);
    assert_eq!(sas[0].get_str("ike"), Some("gw-a"));
    assert_eq!(sas[1].get_str("ike"), Some("gw-b"));
    server.await.unwrap();
}

/// Concurrent requests appear on the socket as complete, never interleaved,
/// request/response cycles.
#[tokio::test]
async fn test_concurrent_requests_serialized() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let mut cmd = daemon.accept().await;
        let _evt = daemon.accept().await;

        // Reading one complete request at a time; interleaved frames would
        // fail the decode or the type assertion
        for _ in 0..12 {
            let packet = cmd.receive().await.unwrap();
            assert_eq!(packet.packet_type, PacketType::CmdRequest);
            let name = packet.name.unwrap();
            cmd.send(&Packet::response(Message::new().with("echo", name)))
                .await
                .unwrap();
        }
    });

    let session = Arc::new(Session::connect(&path).await.unwrap());
    let mut tasks = Vec::new();
    for i in 0..12 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            let name = format!("cmd-{i}");
            let reply = session.request(&name, Message::new()).await.unwrap();
            assert_eq!(reply.get_str("echo"), Some(name.as_str()));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    server.await.unwrap();
}

/// An oversized frame from the peer is a fatal protocol error: it latches
/// the session and fails every subsequent call, including event delivery.
#[tokio::test]
async fn test_framing_overflow_latches_session() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let mut cmd = daemon.accept_raw().await;
        let _evt = daemon.accept_raw().await;

        // Consume the request frame, then announce a 16 MiB reply
        let mut transport = Transport::new(&mut cmd);
        transport.receive().await.unwrap();
        cmd.write_all(&[0x00, 0xff, 0xff, 0xff]).await.unwrap();
        cmd.flush().await.unwrap();

        // Keep the sockets open until the client has latched
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let session = Session::connect(&path).await.unwrap();

    let err = session.stats().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    // The latched error replays without touching the daemon
    let err = session.request("version", Message::new()).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    let err = session.next_event().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    server.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_unknown_event_then_recover() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let _cmd = daemon.accept().await;
        let mut evt = daemon.accept().await;

        expect_register(&mut evt, "bogus").await;
        evt.send(&Packet::event_unknown()).await.unwrap();

        expect_register(&mut evt, "log").await;
        evt.send(&Packet::confirm()).await.unwrap();
        evt.send(&Packet::event("log", Message::new().with("msg", "hello")))
            .await
            .unwrap();
    });

    let session = Session::connect(&path).await.unwrap();

    let err = session.subscribe(&["bogus"]).await.unwrap_err();
    assert!(matches!(err, Error::UnknownEvent(ref name) if name == "bogus"));
    assert!(err.is_recoverable());

    session.subscribe(&["log"]).await.unwrap();
    let event = session.next_event().await.unwrap();
    assert_eq!(event.name, "log");
    assert_eq!(event.message.get_str("msg"), Some("hello"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_bounded_event_buffer_reports_lost_events() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let _cmd = daemon.accept().await;
        let mut evt = daemon.accept().await;

        for i in 0..5 {
            evt.send(&Packet::event("log", Message::new().with("seq", i.to_string())))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let config = SessionConfig::new(&path).with_event_buffer(2);
    let session = Session::with_config(config).await.unwrap();

    // Give the reader loop time to drain the socket and overflow the buffer
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = session.next_event().await.unwrap_err();
    assert!(matches!(err, Error::LostEvents(3)));
    assert!(err.is_recoverable());

    // The two newest events survived
    let event = session.next_event().await.unwrap();
    assert_eq!(event.message.get_str("seq"), Some("3"));
    let event = session.next_event().await.unwrap();
    assert_eq!(event.message.get_str("seq"), Some("4"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_close_fails_pending_and_subsequent_calls() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let mut cmd = daemon.accept().await;
        let mut evt = daemon.accept().await;

        // The pending request arrives but is never answered; once the
        // client closes, both sockets must report end-of-stream here
        let packet = cmd.receive().await.unwrap();
        assert_eq!(packet.name.as_deref(), Some("version"));
        assert!(cmd.receive().await.is_err());
        assert!(evt.receive().await.is_err());
    });

    let session = Arc::new(Session::connect(&path).await.unwrap());

    let pending_event = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.next_event().await })
    };
    let pending_request = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.request("version", Message::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    session.close().await;
    assert!(session.is_closed());

    let err = pending_event.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::SessionClosed));
    let err = pending_request.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::SessionClosed));

    let err = session.stats().await.unwrap_err();
    assert!(matches!(err, Error::SessionClosed));

    // Closing again is a no-op
    session.close().await;

    // The session is still alive in this Arc, so the daemon-side EOFs can
    // only have come from the explicit close
    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_failure() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let err = Session::connect(dir.path().join("missing.vici"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

/// A daemon hangup on the event transport invalidates the whole session.
#[tokio::test]
async fn test_event_transport_hangup_invalidates_session() {
    let daemon = FakeDaemon::bind();
    let path = daemon.path.clone();

    let server = tokio::spawn(async move {
        let _cmd = daemon.accept().await;
        let evt = daemon.accept().await;
        drop(evt);
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let session = Session::connect(&path).await.unwrap();

    let err = session.next_event().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    // The command side reports the same latched fault
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = session.request("version", Message::new()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    server.await.unwrap();
}
