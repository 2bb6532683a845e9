#![allow(clippy::unwrap_used)]
// Integration tests for `RetrievalChannel` against the stub FTP server.

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;

use skycam_api::{Error, FrameLocator, RetrievalChannel, RetrievalSettings};
use skycam_testkit::{FtpStub, frame_bytes};

// ── Helpers ─────────────────────────────────────────────────────────

fn settings(port: u16, locator: FrameLocator) -> RetrievalSettings {
    RetrievalSettings {
        host: "127.0.0.1".into(),
        port,
        username: "admin".into(),
        password: SecretString::from(String::new()),
        timeout: Duration::from_secs(2),
        locator,
        delete_after_fetch: false,
        session_max_age: None,
    }
}

async fn setup(locator: FrameLocator) -> (FtpStub, RetrievalChannel) {
    let stub = FtpStub::start().await.unwrap();
    let channel = RetrievalChannel::new(settings(stub.port(), locator));
    channel.connect().await.unwrap();
    (stub, channel)
}

// ── Fetching ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_latest_downloads_new_frame_once() {
    let (stub, channel) = setup(FrameLocator::default()).await;
    stub.put("image.bmp", frame_bytes(1));

    let first = channel.fetch_latest().await.unwrap().unwrap();
    let again = channel.fetch_latest().await.unwrap();

    assert_eq!(first.name, "image.bmp");
    assert_eq!(first.bytes.as_ref(), frame_bytes(1).as_slice());
    assert!(first.modified.is_some());
    assert_eq!(again, None);
    assert_eq!(stub.retrievals(), 1);
}

#[tokio::test]
async fn test_missing_file_is_no_frame() {
    let (_stub, channel) = setup(FrameLocator::default()).await;

    assert_eq!(channel.fetch_latest().await.unwrap(), None);
}

#[tokio::test]
async fn test_overwritten_file_is_new_frame() {
    let (stub, channel) = setup(FrameLocator::default()).await;
    stub.put("image.bmp", frame_bytes(1));
    channel.fetch_latest().await.unwrap().unwrap();

    stub.put("image.bmp", frame_bytes(2));
    let second = channel.fetch_latest().await.unwrap().unwrap();

    assert_eq!(second.bytes.as_ref(), frame_bytes(2).as_slice());
}

#[tokio::test]
async fn test_without_mtime_bytes_decide_staleness() {
    let (stub, channel) = setup(FrameLocator::default()).await;
    stub.report_mtime(false);
    stub.put("image.bmp", frame_bytes(1));

    let first = channel.fetch_latest().await.unwrap().unwrap();
    let stale = channel.fetch_latest().await.unwrap();
    stub.put("image.bmp", frame_bytes(2));
    let fresh = channel.fetch_latest().await.unwrap();

    assert_eq!(first.modified, None);
    assert_eq!(stale, None);
    assert!(fresh.is_some());
    // Without mtime every poll downloads.
    assert_eq!(stub.retrievals(), 3);
}

#[tokio::test]
async fn test_directory_locator_picks_greatest_name() {
    let locator = FrameLocator::Directory {
        path: "/images".into(),
        extension: "bmp".into(),
    };
    let (stub, channel) = setup(locator).await;
    stub.put("images/img_0001.bmp", frame_bytes(1));
    stub.put("images/img_0003.bmp", frame_bytes(3));
    stub.put("images/img_0002.bmp", frame_bytes(2));
    stub.put("images/notes.txt", b"not an image".to_vec());

    let frame = channel.fetch_latest().await.unwrap().unwrap();

    assert_eq!(frame.name, "img_0003.bmp");
    assert_eq!(frame.bytes.as_ref(), frame_bytes(3).as_slice());
}

#[tokio::test]
async fn test_empty_directory_is_no_frame() {
    let locator = FrameLocator::Directory {
        path: "images".into(),
        extension: "bmp".into(),
    };
    let (_stub, channel) = setup(locator).await;

    assert_eq!(channel.fetch_latest().await.unwrap(), None);
}

#[tokio::test]
async fn test_delete_after_fetch_removes_file() {
    let stub = FtpStub::start().await.unwrap();
    let mut settings = settings(stub.port(), FrameLocator::default());
    settings.delete_after_fetch = true;
    let channel = RetrievalChannel::new(settings);
    channel.connect().await.unwrap();
    stub.put("image.bmp", frame_bytes(1));

    channel.fetch_latest().await.unwrap().unwrap();

    assert!(!stub.contains("image.bmp"));
    assert_eq!(channel.fetch_latest().await.unwrap(), None);
}

#[tokio::test]
async fn test_file_written_after_delete_is_new_despite_same_fingerprint() {
    let stub = FtpStub::start().await.unwrap();
    let mut settings = settings(stub.port(), FrameLocator::default());
    settings.delete_after_fetch = true;
    let channel = RetrievalChannel::new(settings);
    channel.connect().await.unwrap();
    // Same size and same MDTM second as the previous capture.
    stub.put("clock.bmp", frame_bytes(0));
    stub.put_with_mtime_of("image.bmp", frame_bytes(1), "clock.bmp");

    let first = channel.fetch_latest().await.unwrap().unwrap();
    assert!(!stub.contains("image.bmp"));

    stub.put_with_mtime_of("image.bmp", frame_bytes(2), "clock.bmp");
    let second = channel.fetch_latest().await.unwrap().unwrap();

    assert_eq!(first.bytes.as_ref(), frame_bytes(1).as_slice());
    assert_eq!(second.bytes.as_ref(), frame_bytes(2).as_slice());
    assert!(!stub.contains("image.bmp"));
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test]
async fn test_incomplete_transfer_is_reported_and_retried() {
    let (stub, channel) = setup(FrameLocator::default()).await;
    stub.put("image.bmp", frame_bytes(1));
    stub.truncate_next_transfers(1);

    let result = channel.fetch_latest().await;
    match result {
        Err(Error::IncompleteTransfer {
            expected, received, ..
        }) => {
            assert_eq!(expected, 64);
            assert_eq!(received, 32);
        }
        other => panic!("expected incomplete transfer, got: {other:?}"),
    }

    // Fingerprint was not advanced: the same file is fetched again.
    let frame = channel.fetch_latest().await.unwrap().unwrap();
    assert_eq!(frame.bytes.len(), 64);
}

#[tokio::test]
async fn test_rejected_login() {
    let stub = FtpStub::start().await.unwrap();
    let mut settings = settings(stub.port(), FrameLocator::default());
    settings.password = SecretString::from("wrong".to_owned());
    let channel = RetrievalChannel::new(settings);

    let result = channel.connect().await;

    assert!(matches!(result, Err(Error::Authentication { .. })), "got: {result:?}");
}

#[tokio::test]
async fn test_fetch_requires_connect() {
    let stub = FtpStub::start().await.unwrap();
    let channel = RetrievalChannel::new(settings(stub.port(), FrameLocator::default()));

    assert!(matches!(channel.fetch_latest().await, Err(Error::NotConnected)));
    channel.close().await;
    channel.close().await;
}

#[tokio::test]
async fn test_reconnects_after_connection_drop() {
    let (stub, channel) = setup(FrameLocator::default()).await;
    stub.put("image.bmp", frame_bytes(1));
    stub.drop_connections();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frame = channel.fetch_latest().await.unwrap();

    assert!(frame.is_some());
    assert_eq!(stub.logins(), 2);
}

#[tokio::test]
async fn test_ping_and_session_rotation() {
    let stub = FtpStub::start().await.unwrap();
    let mut settings = settings(stub.port(), FrameLocator::default());
    settings.session_max_age = Some(Duration::from_millis(100));
    let channel = RetrievalChannel::new(settings);
    channel.connect().await.unwrap();

    channel.ping().await.unwrap();
    assert_eq!(stub.logins(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(channel.try_ping().await.unwrap());
    assert_eq!(stub.logins(), 2);
    assert!(stub.commands().iter().any(|c| c == "QUIT"));
}

#[tokio::test]
async fn test_reconnect_keeps_last_fingerprint() {
    let (stub, channel) = setup(FrameLocator::default()).await;
    stub.put("image.bmp", frame_bytes(1));
    channel.fetch_latest().await.unwrap().unwrap();

    channel.reconnect().await.unwrap();

    assert_eq!(channel.fetch_latest().await.unwrap(), None);
    assert_eq!(stub.logins(), 2);
}
