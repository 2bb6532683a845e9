#![allow(clippy::unwrap_used)]
// Integration tests for `CommandChannel` against the stub camera.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;

use skycam_api::{
    CommandChannel, CommandRequest, CommandResponse, CommandSettings, Dialect, Error,
    ResponseStatus,
};
use skycam_testkit::{DEFAULT_SERIAL, StubDialect, StubReply, TelnetStub};

// ── Helpers ─────────────────────────────────────────────────────────

fn settings(port: u16, dialect: Dialect, timeout: Duration) -> CommandSettings {
    CommandSettings {
        host: "127.0.0.1".into(),
        port,
        username: "admin".into(),
        password: SecretString::from(String::new()),
        timeout,
        dialect,
    }
}

async fn setup(dialect: StubDialect) -> (TelnetStub, CommandChannel) {
    let stub = TelnetStub::start(dialect).await.unwrap();
    let wire = match dialect {
        StubDialect::Line => Dialect::Line,
        StubDialect::InSight => Dialect::InSight,
    };
    let channel = CommandChannel::new(settings(stub.port(), wire, Duration::from_secs(2)));
    channel.connect().await.unwrap();
    (stub, channel)
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_in_sight_login_reads_serial_number() {
    let stub = TelnetStub::start(StubDialect::InSight).await.unwrap();
    let channel = CommandChannel::new(settings(
        stub.port(),
        Dialect::InSight,
        Duration::from_secs(2),
    ));

    let info = channel.connect().await.unwrap();

    assert_eq!(info.serial_number.as_deref(), Some(DEFAULT_SERIAL));
    assert!(info.banner.contains("In-Sight"), "banner: {}", info.banner);
    assert_eq!(stub.received(), vec!["GI".to_owned()]);
    assert_eq!(channel.info().await, Some(info));
}

#[tokio::test]
async fn test_rejected_login_is_authentication_error() {
    let stub = TelnetStub::start(StubDialect::Line).await.unwrap();
    stub.reject_logins(true);
    let channel = CommandChannel::new(settings(stub.port(), Dialect::Line, Duration::from_secs(2)));

    let result = channel.connect().await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
    assert!(!channel.is_connected().await);
}

#[tokio::test]
async fn test_in_sight_requires_in_sight_banner() {
    let stub = TelnetStub::start(StubDialect::InSight).await.unwrap();
    stub.set_banner("Welcome to some other device");
    let channel = CommandChannel::new(settings(
        stub.port(),
        Dialect::InSight,
        Duration::from_secs(2),
    ));

    let result = channel.connect().await;

    assert!(matches!(result, Err(Error::Connect { .. })), "got: {result:?}");
}

#[tokio::test]
async fn test_connect_refused() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let channel = CommandChannel::new(settings(port, Dialect::Line, Duration::from_secs(1)));

    let err = channel.connect().await.unwrap_err();

    assert!(err.is_connection(), "got: {err:?}");
}

#[tokio::test]
async fn test_send_before_connect() {
    let channel = CommandChannel::new(settings(1, Dialect::Line, Duration::from_secs(1)));

    let result = channel.send(&CommandRequest::capture()).await;

    assert!(matches!(result, Err(Error::NotConnected)), "got: {result:?}");
    channel.close().await;
    channel.close().await;
}

// ── Request / response ──────────────────────────────────────────────

#[tokio::test]
async fn test_set_exposure_then_status() {
    let (stub, channel) = setup(StubDialect::Line).await;

    let set = channel.send(&CommandRequest::set_exposure(120.0)).await.unwrap();
    let status = channel.send(&CommandRequest::get_status()).await.unwrap();

    assert_eq!(set, CommandResponse::ok("120"));
    assert_eq!(status, CommandResponse::ok("EXPOSURE=120 GAIN=0"));
    assert_eq!(
        stub.received(),
        vec!["SET EXPOSURE 120".to_owned(), "GET STATUS".to_owned()]
    );
}

#[tokio::test]
async fn test_err_reply_is_not_an_error() {
    let (stub, channel) = setup(StubDialect::Line).await;
    stub.reply("SET GAIN", StubReply::line("ERR invalid"));

    let response = channel.send(&CommandRequest::set_gain(50.0)).await.unwrap();

    assert_eq!(response, CommandResponse::error("invalid"));
}

#[tokio::test]
async fn test_malformed_reply_is_protocol_error() {
    let (stub, channel) = setup(StubDialect::Line).await;
    stub.reply_times("GET STATUS", StubReply::line("WHAT?"), 1);

    let result = channel.send(&CommandRequest::get_status()).await;
    match result {
        Err(Error::Protocol { raw }) => assert_eq!(raw, "WHAT?"),
        other => panic!("expected protocol error, got: {other:?}"),
    }

    // The channel stays usable on the same session.
    let next = channel.send(&CommandRequest::get_gain()).await.unwrap();
    assert_eq!(next, CommandResponse::ok("0"));
    assert_eq!(stub.logins(), 1);
}

#[tokio::test]
async fn test_in_sight_native_commands() {
    let (stub, channel) = setup(StubDialect::InSight).await;

    let set = channel.send(&CommandRequest::set_gain(50.0)).await.unwrap();
    let read = channel.send(&CommandRequest::get_gain()).await.unwrap();
    let unknown = channel.send(&CommandRequest::new("XYZ")).await.unwrap();

    assert_eq!(set, CommandResponse::ok(""));
    assert_eq!(read, CommandResponse::ok("50"));
    assert_eq!(unknown.status, ResponseStatus::Error);
    assert!(stub.received().contains(&"SIB005 50".to_owned()));
}

#[tokio::test]
async fn test_invalid_native_command_is_rejected_locally() {
    let (stub, channel) = setup(StubDialect::InSight).await;

    let result = channel.send(&CommandRequest::new("GVA5")).await;

    assert!(matches!(result, Err(Error::InvalidCommand(_))), "got: {result:?}");
    assert_eq!(stub.received(), vec!["GI".to_owned()]);
}

#[tokio::test]
async fn test_concurrent_callers_get_their_own_replies() {
    let (_stub, channel) = setup(StubDialect::Line).await;
    let channel = Arc::new(channel);

    let mut handles = Vec::new();
    for gain in 0..16_u32 {
        let channel = Arc::clone(&channel);
        handles.push(tokio::spawn(async move {
            let response = channel
                .send(&CommandRequest::set_gain(f64::from(gain)))
                .await
                .unwrap();
            (gain, response)
        }));
    }

    for handle in handles {
        let (gain, response) = handle.await.unwrap();
        assert_eq!(response, CommandResponse::ok(gain.to_string()));
    }
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnects_once_after_camera_drops_connection() {
    let (stub, channel) = setup(StubDialect::Line).await;
    stub.drop_connections();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = channel.send(&CommandRequest::get_status()).await.unwrap();

    assert!(response.is_ok());
    assert_eq!(stub.logins(), 2);
}

#[tokio::test]
async fn test_second_failure_surfaces_connection_error() {
    let (stub, channel) = setup(StubDialect::Line).await;
    stub.reply("CAPTURE", StubReply::Hangup);

    let result = channel.send(&CommandRequest::capture()).await;

    assert!(matches!(result, Err(Error::Connect { .. })), "got: {result:?}");
    assert_eq!(stub.logins(), 2);
}

#[tokio::test]
async fn test_late_reply_is_not_delivered_to_next_caller() {
    let stub = TelnetStub::start(StubDialect::Line).await.unwrap();
    let channel = CommandChannel::new(settings(
        stub.port(),
        Dialect::Line,
        Duration::from_millis(300),
    ));
    channel.connect().await.unwrap();
    stub.reply_times(
        "GET STATUS",
        StubReply::delayed(Duration::from_millis(600), "OK LATE"),
        1,
    );

    let timed_out = channel.send(&CommandRequest::get_status()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let next = channel.send(&CommandRequest::set_gain(5.0)).await.unwrap();

    assert_eq!(timed_out, CommandResponse::timeout());
    assert_eq!(next, CommandResponse::ok("5"));
}
