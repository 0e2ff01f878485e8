use std::fmt;
use std::fs;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::archive::{self, MlagOptions};
use crate::domain::ChapterMeta;
use crate::error::MlagError;
use crate::events::{ChapterArgs, DownloadEvent, DownloadSink, PageArgs};
use crate::transfer::{PageFetcher, TransferCanceller, TransferController};

/// Page extensions kept from the remote URL; anything else falls back to jpg.
const KNOWN_PAGE_EXTENSIONS: [&str; 2] = ["jpg", "png"];
const DEFAULT_PAGE_EXTENSION: &str = "jpg";

const ABORT_REASON: &str = "download aborted";

/// Where a downloader sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    WaitingToStart,
    Started,
    WaitingToAbort,
    Finished,
}

/// Outcome of a `start` or `abort` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    NotDone,
}

/// Page-file deletion policy applied after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearFilesOptions {
    pub on_error: bool,
    pub on_finish: bool,
}

impl Default for ClearFilesOptions {
    fn default() -> Self {
        Self {
            on_error: true,
            on_finish: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub max_retry_count: Option<u32>,
    pub clear_files: ClearFilesOptions,
    pub mlag: Option<MlagOptions>,
}

struct Inner {
    state: DownloadState,
    retry_count: u32,
    max_retry_count: u32,
    current: Option<TransferCanceller>,
    // Bumped at every run exit so an abort() waiter always wakes, even when
    // the run slipped past its last checkpoint and finished or failed.
    run_generation: u64,
    run_aborted: bool,
}

enum RunExit {
    Finished,
    Aborted,
}

enum RunError {
    Aborted,
    Failed(MlagError),
}

/// Drives the sequential download of one chapter: per-page transfers with a
/// shared retry budget, lifecycle notifications, cooperative abort, cleanup
/// and optional archive packaging.
///
/// `start` runs on the calling thread; `abort` may be called from any other
/// thread and returns once the run has exited.
pub struct ChapterDownloader<F: PageFetcher> {
    meta: ChapterMeta,
    dir_download: Utf8PathBuf,
    fetcher: Arc<F>,
    sinks: Vec<Arc<dyn DownloadSink>>,
    default_start_options: StartOptions,
    inner: Mutex<Inner>,
    run_exited: Condvar,
}

impl<F: PageFetcher> fmt::Debug for ChapterDownloader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChapterDownloader")
            .field("meta", &self.meta)
            .field("dir_download", &self.dir_download)
            .finish_non_exhaustive()
    }
}

impl<F: PageFetcher> ChapterDownloader<F> {
    pub fn new(
        meta: ChapterMeta,
        dir_download: impl Into<Utf8PathBuf>,
        fetcher: Arc<F>,
        sinks: Vec<Arc<dyn DownloadSink>>,
        default_start_options: StartOptions,
    ) -> Self {
        Self {
            meta,
            dir_download: dir_download.into(),
            fetcher,
            sinks,
            default_start_options,
            inner: Mutex::new(Inner {
                state: DownloadState::WaitingToStart,
                retry_count: 0,
                max_retry_count: 0,
                current: None,
                run_generation: 0,
                run_aborted: false,
            }),
            run_exited: Condvar::new(),
        }
    }

    pub fn meta(&self) -> &ChapterMeta {
        &self.meta
    }

    pub fn dir_download(&self) -> &Utf8Path {
        &self.dir_download
    }

    pub fn state(&self) -> DownloadState {
        self.lock().state
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub fn max_retry_count(&self) -> u32 {
        self.lock().max_retry_count
    }

    /// Local destination for the page at `index` (0-based): two-digit
    /// zero-padded name for the first ten pages, raw index thereafter, with
    /// the URL's extension when recognized.
    pub fn page_path(&self, index: usize) -> Utf8PathBuf {
        let url = &self.meta.page_urls[index];
        let ext = Utf8Path::new(url.rsplit('/').next().unwrap_or(url))
            .extension()
            .filter(|ext| KNOWN_PAGE_EXTENSIONS.contains(ext))
            .unwrap_or(DEFAULT_PAGE_EXTENSION);
        let name = if index < 10 {
            format!("0{index}.{ext}")
        } else {
            format!("{index}.{ext}")
        };
        self.dir_download.join(name)
    }

    /// Runs the whole chapter. Returns `Ok(Done)` once every page succeeded
    /// and cleanup/packaging ran, `Ok(NotDone)` when the run was a no-op
    /// (already in progress or aborting) or was aborted, and the propagated
    /// failure otherwise. Failed and aborted runs return the downloader to
    /// `WaitingToStart` so the chapter may be retried from scratch.
    pub fn start(&self, opts: Option<&StartOptions>) -> Result<Action, MlagError> {
        let options = opts.unwrap_or(&self.default_start_options).clone();

        {
            let mut inner = self.lock();
            if !matches!(
                inner.state,
                DownloadState::WaitingToStart | DownloadState::Finished
            ) {
                return Ok(Action::NotDone);
            }
            inner.retry_count = 0;
            inner.max_retry_count = options.max_retry_count.unwrap_or(0);
            inner.state = DownloadState::Started;
        }

        let exit = self.run(&options);

        let mut inner = self.lock();
        inner.retry_count = 0;
        inner.current = None;
        inner.run_aborted = matches!(exit, Ok(RunExit::Aborted));
        inner.run_generation += 1;
        let result = match exit {
            Ok(RunExit::Finished) => {
                inner.state = DownloadState::Finished;
                Ok(Action::Done)
            }
            Ok(RunExit::Aborted) => {
                inner.state = DownloadState::WaitingToStart;
                Ok(Action::NotDone)
            }
            Err(err) => {
                inner.state = DownloadState::WaitingToStart;
                Err(err)
            }
        };
        drop(inner);
        self.run_exited.notify_all();
        result
    }

    /// Requests cancellation of an in-progress run. Returns `NotDone`
    /// immediately unless the downloader is `Started`; otherwise blocks until
    /// the run has exited. Returns `Done` once the chapter-aborted
    /// notification has fired, and `NotDone` when the run had already passed
    /// its last abort checkpoint and finished or failed anyway.
    pub fn abort(&self) -> Action {
        let mut inner = self.lock();
        if inner.state != DownloadState::Started {
            return Action::NotDone;
        }
        inner.state = DownloadState::WaitingToAbort;
        if let Some(canceller) = inner.current.clone() {
            canceller.cancel(ABORT_REASON);
        }
        let generation = inner.run_generation;
        while inner.run_generation == generation {
            inner = self
                .run_exited
                .wait(inner)
                .unwrap_or_else(|poison| poison.into_inner());
        }
        if inner.run_aborted {
            Action::Done
        } else {
            Action::NotDone
        }
    }

    fn run(&self, options: &StartOptions) -> Result<RunExit, MlagError> {
        let args = self.chapter_args();
        self.emit(&DownloadEvent::ChapterStarted(args.clone()));

        match self.run_inner(options) {
            Ok(()) => {
                self.emit(&DownloadEvent::ChapterFinished(args));
                Ok(RunExit::Finished)
            }
            Err(RunError::Aborted) => {
                debug!(chapter = self.meta.chapter, "chapter download aborted");
                self.emit(&DownloadEvent::ChapterAborted(args));
                Ok(RunExit::Aborted)
            }
            Err(RunError::Failed(err)) => {
                if options.clear_files.on_error {
                    self.clear_files();
                }
                self.emit(&DownloadEvent::ChapterError {
                    args,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn run_inner(&self, options: &StartOptions) -> Result<(), RunError> {
        for index in 0..self.meta.page_count() {
            if self.lock().state == DownloadState::WaitingToAbort {
                return Err(RunError::Aborted);
            }
            self.download_page(index)?;
        }

        if let Some(mlag) = &options.mlag {
            let pages: Vec<Utf8PathBuf> = (0..self.meta.page_count())
                .map(|index| self.page_path(index))
                .collect();
            archive::create(&self.meta, &pages, mlag).map_err(RunError::Failed)?;
        }
        if options.clear_files.on_finish {
            self.clear_files();
        }
        Ok(())
    }

    fn download_page(&self, index: usize) -> Result<(), RunError> {
        let path = self.page_path(index);
        let url = &self.meta.page_urls[index];
        let args = self.page_args(index, path.clone());

        loop {
            self.emit(&DownloadEvent::PageStarted(args.clone()));

            let transfer = TransferController::new();
            {
                let mut inner = self.lock();
                if inner.state == DownloadState::WaitingToAbort {
                    return Err(RunError::Aborted);
                }
                inner.current = Some(transfer.canceller());
            }

            let result = transfer.run(self.fetcher.as_ref(), url, &path);
            self.lock().current = None;

            match result {
                Ok(()) => {
                    self.emit(&DownloadEvent::PageFinished(args));
                    return Ok(());
                }
                Err(err) => {
                    // A failure observed while aborting is the abort itself,
                    // never a retry candidate.
                    let (aborting, retry_count, max_retry_count) = {
                        let inner = self.lock();
                        (
                            inner.state == DownloadState::WaitingToAbort,
                            inner.retry_count,
                            inner.max_retry_count,
                        )
                    };
                    if aborting {
                        return Err(RunError::Aborted);
                    }
                    if retry_count < max_retry_count {
                        let retry_count = retry_count + 1;
                        self.lock().retry_count = retry_count;
                        warn!(
                            page = args.page,
                            retry_count, max_retry_count, "page download restarted"
                        );
                        self.emit(&DownloadEvent::PageRestarted {
                            args: args.clone(),
                            error: err.to_string(),
                            retry_count,
                            max_retry_count,
                        });
                        continue;
                    }
                    self.emit(&DownloadEvent::PageError {
                        args,
                        error: err.to_string(),
                    });
                    return Err(RunError::Failed(err));
                }
            }
        }
    }

    /// Best-effort removal of every page file; individual failures are ignored.
    fn clear_files(&self) {
        for index in 0..self.meta.page_count() {
            let _ = fs::remove_file(self.page_path(index).as_std_path());
        }
    }

    fn chapter_args(&self) -> ChapterArgs {
        ChapterArgs {
            manga: self.meta.manga.name.clone(),
            path: self.dir_download.clone(),
            page_count: self.meta.page_count(),
            source: self.meta.website.clone(),
            chapter: self.meta.chapter,
        }
    }

    fn page_args(&self, index: usize, path: Utf8PathBuf) -> PageArgs {
        PageArgs {
            manga: self.meta.manga.name.clone(),
            path,
            page_count: self.meta.page_count(),
            source: self.meta.website.clone(),
            chapter: self.meta.chapter,
            page: index + 1,
        }
    }

    fn emit(&self, event: &DownloadEvent) {
        for sink in &self.sinks {
            sink.event(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Manga;
    use crate::events::NullSink;
    use std::io::Read;

    struct NeverFetcher;

    impl PageFetcher for NeverFetcher {
        fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, MlagError> {
            Err(MlagError::Transfer {
                url: url.to_string(),
                cause: "unreachable".to_string(),
            })
        }
    }

    fn downloader(page_urls: Vec<String>) -> ChapterDownloader<NeverFetcher> {
        ChapterDownloader::new(
            ChapterMeta {
                website: "Example".to_string(),
                url: "http://example.test".to_string(),
                chapter: 900,
                manga: Manga::new("One Piece"),
                page_urls,
            },
            "/downloads",
            Arc::new(NeverFetcher),
            vec![Arc::new(NullSink)],
            StartOptions::default(),
        )
    }

    #[test]
    fn page_paths_zero_pad_first_ten() {
        let urls: Vec<String> = (0..12)
            .map(|i| format!("http://example.test/{i}.png"))
            .collect();
        let dl = downloader(urls);
        assert_eq!(dl.page_path(0), Utf8PathBuf::from("/downloads/00.png"));
        assert_eq!(dl.page_path(9), Utf8PathBuf::from("/downloads/09.png"));
        assert_eq!(dl.page_path(10), Utf8PathBuf::from("/downloads/10.png"));
        assert_eq!(dl.page_path(11), Utf8PathBuf::from("/downloads/11.png"));
    }

    #[test]
    fn unknown_extensions_fall_back_to_jpg() {
        let dl = downloader(vec![
            "http://example.test/page.webp".to_string(),
            "http://example.test/page".to_string(),
            "http://example.test/page.jpg".to_string(),
        ]);
        assert_eq!(dl.page_path(0), Utf8PathBuf::from("/downloads/00.jpg"));
        assert_eq!(dl.page_path(1), Utf8PathBuf::from("/downloads/01.jpg"));
        assert_eq!(dl.page_path(2), Utf8PathBuf::from("/downloads/02.jpg"));
    }

    #[test]
    fn fresh_downloader_waits_to_start() {
        let dl = downloader(Vec::new());
        assert_eq!(dl.state(), DownloadState::WaitingToStart);
        assert_eq!(dl.abort(), Action::NotDone);
    }
}
