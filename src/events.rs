use camino::Utf8PathBuf;

/// Payload shared by every chapter-level notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterArgs {
    pub manga: String,
    pub path: Utf8PathBuf,
    pub page_count: usize,
    pub source: String,
    pub chapter: u32,
}

/// Payload shared by every page-level notification. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageArgs {
    pub manga: String,
    pub path: Utf8PathBuf,
    pub page_count: usize,
    pub source: String,
    pub chapter: u32,
    pub page: usize,
}

/// Lifecycle notifications emitted by a [`ChapterDownloader`](crate::chapter::ChapterDownloader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    ChapterStarted(ChapterArgs),
    ChapterFinished(ChapterArgs),
    ChapterAborted(ChapterArgs),
    ChapterError { args: ChapterArgs, error: String },
    PageStarted(PageArgs),
    PageFinished(PageArgs),
    PageError { args: PageArgs, error: String },
    PageRestarted {
        args: PageArgs,
        error: String,
        retry_count: u32,
        max_retry_count: u32,
    },
}

/// Listener for download lifecycle notifications.
///
/// Sinks are invoked synchronously from the run loop, in registration order.
pub trait DownloadSink: Send + Sync {
    fn event(&self, event: &DownloadEvent);
}

/// Sink that drops every event.
pub struct NullSink;

impl DownloadSink for NullSink {
    fn event(&self, _event: &DownloadEvent) {}
}
