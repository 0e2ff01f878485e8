use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use mlagdl::error::MlagError;
use mlagdl::transfer::{PageFetcher, TransferController};

struct OkFetcher {
    body: Vec<u8>,
}

impl PageFetcher for OkFetcher {
    fn fetch(&self, _url: &str) -> Result<Box<dyn Read + Send>, MlagError> {
        Ok(Box::new(Cursor::new(self.body.clone())))
    }
}

struct FailingFetcher;

impl PageFetcher for FailingFetcher {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, MlagError> {
        Err(MlagError::Transfer {
            url: url.to_string(),
            cause: "connection refused".to_string(),
        })
    }
}

/// Emits one byte roughly every 10ms, forever.
struct TricklingRead;

impl Read for TricklingRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(Duration::from_millis(10));
        buf[0] = 0xAB;
        Ok(1)
    }
}

struct TricklingFetcher;

impl PageFetcher for TricklingFetcher {
    fn fetch(&self, _url: &str) -> Result<Box<dyn Read + Send>, MlagError> {
        Ok(Box::new(TricklingRead))
    }
}

/// Sends one chunk, then goes silent for much longer than any test stall window.
struct StallingRead {
    sent_first: bool,
}

impl Read for StallingRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.sent_first {
            self.sent_first = true;
            buf[0] = 0x01;
            return Ok(1);
        }
        thread::sleep(Duration::from_secs(30));
        Ok(0)
    }
}

struct StallingFetcher;

impl PageFetcher for StallingFetcher {
    fn fetch(&self, _url: &str) -> Result<Box<dyn Read + Send>, MlagError> {
        Ok(Box::new(StallingRead { sent_first: false }))
    }
}

fn dest_in(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
}

#[test]
fn successful_transfer_writes_complete_file() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_in(&temp, "00.jpg");
    let controller = TransferController::new();

    controller
        .run(&OkFetcher { body: b"page data".to_vec() }, "http://example.test/p.jpg", &dest)
        .unwrap();

    assert!(controller.settled());
    assert!(controller.responded());
    assert_eq!(std::fs::read(dest.as_std_path()).unwrap(), b"page data");
}

#[test]
fn fetch_failure_leaves_no_file() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_in(&temp, "00.jpg");
    let controller = TransferController::new();

    let err = controller
        .run(&FailingFetcher, "http://example.test/p.jpg", &dest)
        .unwrap_err();

    assert_matches!(err, MlagError::Transfer { .. });
    assert!(controller.settled());
    assert!(!controller.responded());
    assert!(!dest.as_std_path().exists());
}

#[test]
fn cancel_before_response_fails_with_reason() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_in(&temp, "00.jpg");
    let controller = TransferController::new();

    controller.canceller().cancel("caller gave up");
    let err = controller
        .run(&OkFetcher { body: b"data".to_vec() }, "http://example.test/p.jpg", &dest)
        .unwrap_err();

    assert_matches!(err, MlagError::Transfer { cause, .. } if cause == "caller gave up");
    assert!(!controller.responded());
    assert!(!dest.as_std_path().exists());
}

#[test]
fn cancel_mid_stream_deletes_partial_file() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_in(&temp, "00.jpg");
    let controller = Arc::new(TransferController::new());
    let canceller = controller.canceller();

    let runner = {
        let controller = Arc::clone(&controller);
        let dest = dest.clone();
        thread::spawn(move || controller.run(&TricklingFetcher, "http://example.test/p.jpg", &dest))
    };

    thread::sleep(Duration::from_millis(150));
    canceller.cancel("stop now");
    let err = runner.join().unwrap().unwrap_err();

    assert_matches!(err, MlagError::Transfer { cause, .. } if cause == "stop now");
    assert!(controller.responded());
    assert!(controller.settled());
    assert!(!dest.as_std_path().exists());
}

#[test]
fn stalled_transfer_times_out_and_cleans_up() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_in(&temp, "00.jpg");
    let controller = TransferController::with_stall_timeout(Duration::from_millis(200));

    let err = controller
        .run(&StallingFetcher, "http://example.test/p.jpg", &dest)
        .unwrap_err();

    assert_matches!(err, MlagError::Transfer { cause, .. } if cause == "transfer stalled");
    assert!(controller.responded());
    assert!(!dest.as_std_path().exists());
}

#[test]
fn cancel_after_settlement_is_a_noop() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_in(&temp, "00.jpg");
    let controller = TransferController::new();
    let canceller = controller.canceller();

    controller
        .run(&OkFetcher { body: b"data".to_vec() }, "http://example.test/p.jpg", &dest)
        .unwrap();

    canceller.cancel("too late");
    assert!(dest.as_std_path().exists());
}
