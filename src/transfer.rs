use std::cmp;
use std::fs::File;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use reqwest::blocking::Client;
use tracing::debug;

use crate::error::MlagError;

/// Idle window after which a streaming transfer is considered stalled.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CHUNK_SIZE: usize = 16 * 1024;

/// Fetches one remote page as a byte stream.
pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, MlagError>;
}

/// [`PageFetcher`] over a blocking HTTP client. Non-2xx responses are
/// reported as transfer failures; status semantics beyond that are left to
/// the caller.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, MlagError> {
        let client = Client::builder()
            .user_agent(concat!("mlagdl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| MlagError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, MlagError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| MlagError::Transfer {
                url: url.to_string(),
                cause: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(MlagError::Transfer {
                url: url.to_string(),
                cause: format!("status {}", response.status()),
            });
        }
        Ok(Box::new(response))
    }
}

#[derive(Default)]
struct TransferState {
    cancelled: AtomicBool,
    responded: AtomicBool,
    settled: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Cancellation handle for an in-flight transfer. Cloneable and callable
/// from any thread; calling it after settlement is a no-op.
#[derive(Clone)]
pub struct TransferCanceller {
    state: Arc<TransferState>,
}

impl TransferCanceller {
    pub fn cancel(&self, reason: impl Into<String>) {
        if self.state.settled.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self
            .state
            .reason
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        drop(slot);
        self.state.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Streams one remote resource to a destination file and settles exactly once.
///
/// The destination file exists and is complete if and only if [`run`] returns
/// `Ok`. Cancellation after a response has begun streaming closes and deletes
/// the partial file before the failure is returned.
///
/// [`run`]: TransferController::run
pub struct TransferController {
    state: Arc<TransferState>,
    stall_timeout: Duration,
}

impl Default for TransferController {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferController {
    pub fn new() -> Self {
        Self::with_stall_timeout(DEFAULT_STALL_TIMEOUT)
    }

    pub fn with_stall_timeout(stall_timeout: Duration) -> Self {
        Self {
            state: Arc::new(TransferState::default()),
            stall_timeout,
        }
    }

    pub fn canceller(&self) -> TransferCanceller {
        TransferCanceller {
            state: Arc::clone(&self.state),
        }
    }

    /// Whether a response had begun streaming before settlement.
    pub fn responded(&self) -> bool {
        self.state.responded.load(Ordering::SeqCst)
    }

    pub fn settled(&self) -> bool {
        self.state.settled.load(Ordering::SeqCst)
    }

    /// Streams `url` to `dest`. Blocks until the transfer settles: completes,
    /// fails, is cancelled, or stalls past the idle window.
    ///
    /// After a cancel or stall settlement the detached reader thread may
    /// remain blocked in a read on the abandoned body until the underlying
    /// transport yields (up to the transport's own timeout); it exits as soon
    /// as that read returns, without touching the destination.
    pub fn run<F: PageFetcher + ?Sized>(
        &self,
        fetcher: &F,
        url: &str,
        dest: &Utf8Path,
    ) -> Result<(), MlagError> {
        let result = self.stream(fetcher, url, dest);
        self.state.settled.store(true, Ordering::SeqCst);
        result
    }

    fn stream<F: PageFetcher + ?Sized>(
        &self,
        fetcher: &F,
        url: &str,
        dest: &Utf8Path,
    ) -> Result<(), MlagError> {
        if self.is_cancelled() {
            return Err(self.cancel_error(url));
        }

        let body = fetcher.fetch(url)?;
        self.state.responded.store(true, Ordering::SeqCst);

        if self.is_cancelled() {
            // Response arrived but no byte was written; nothing to delete.
            return Err(self.cancel_error(url));
        }

        let mut file = File::create(dest.as_std_path()).map_err(|err| MlagError::Transfer {
            url: url.to_string(),
            cause: format!("create {dest}: {err}"),
        })?;

        // The reader thread owns the body; it exits once the channel closes.
        let (tx, rx) = mpsc::channel::<std::io::Result<Vec<u8>>>();
        thread::spawn(move || {
            let mut body = body;
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                match body.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
        });

        let poll = cmp::min(Duration::from_millis(100), self.stall_timeout);
        let mut last_chunk = Instant::now();
        loop {
            if self.is_cancelled() {
                return Err(self.teardown(file, url, dest, self.cancel_reason()));
            }
            match rx.recv_timeout(poll) {
                Ok(Ok(chunk)) => {
                    if let Err(err) = file.write_all(&chunk) {
                        return Err(self.teardown(file, url, dest, format!("write {dest}: {err}")));
                    }
                    last_chunk = Instant::now();
                }
                Ok(Err(err)) => {
                    return Err(self.teardown(file, url, dest, err.to_string()));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if last_chunk.elapsed() >= self.stall_timeout {
                        return Err(self.teardown(file, url, dest, "transfer stalled".to_string()));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Err(err) = file.flush() {
            return Err(self.teardown(file, url, dest, format!("flush {dest}: {err}")));
        }
        debug!(url, dest = %dest, "transfer complete");
        Ok(())
    }

    /// Closes the file handle before deleting it, so the destination is never
    /// observable as present-but-partial once the failure is returned.
    fn teardown(&self, file: File, url: &str, dest: &Utf8Path, cause: String) -> MlagError {
        drop(file);
        let _ = std::fs::remove_file(dest.as_std_path());
        debug!(url, dest = %dest, cause, "transfer torn down");
        MlagError::Transfer {
            url: url.to_string(),
            cause,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    fn cancel_reason(&self) -> String {
        self.state
            .reason
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
            .unwrap_or_else(|| "transfer cancelled".to_string())
    }

    fn cancel_error(&self, url: &str) -> MlagError {
        MlagError::Transfer {
            url: url.to_string(),
            cause: self.cancel_reason(),
        }
    }
}
