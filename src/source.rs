use std::error::Error;
use std::sync::Arc;

use camino::Utf8Path;
use tracing::debug;

use crate::chapter::{ChapterDownloader, StartOptions};
use crate::domain::{ChapterMeta, Manga};
use crate::error::MlagError;
use crate::events::DownloadSink;
use crate::transfer::{HttpPageFetcher, PageFetcher};

/// Error type produced by source adapters; the core wraps it uniformly.
pub type SourceResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Required capabilities of a pluggable source adapter.
pub trait MangaSource: Send + Sync {
    fn website(&self) -> &str;
    fn url(&self) -> &str;
    fn mangas(&self) -> Vec<Manga>;
    fn manga(&self, key: &str) -> Option<Manga>;
    fn last_chapter(&self, manga: &Manga) -> SourceResult<u32>;
    fn page_count(&self, manga: &Manga, chapter: u32) -> SourceResult<u32>;
    fn page_urls(&self, manga: &Manga, chapter: u32) -> SourceResult<Vec<String>>;
    fn chapter_available(&self, manga: &Manga, chapter: u32) -> SourceResult<bool>;
}

/// Optional capability: listing the chapters available in a numeric range.
pub trait ChapterRange: MangaSource {
    fn chapters_available(&self, manga: &Manga, from: u32, to: u32) -> SourceResult<Vec<u32>>;
}

/// Front door over one source adapter: resolves manga keys, dispatches
/// capability calls (wrapping every adapter failure into a uniform source
/// error), probes the optional range capability at construction, and builds
/// [`ChapterDownloader`]s once page URLs are known.
pub struct SourceCore<S, F = HttpPageFetcher> {
    source: Arc<S>,
    fetcher: Arc<F>,
    ranges: Option<Arc<dyn ChapterRange>>,
    sinks: Vec<Arc<dyn DownloadSink>>,
    default_start_options: StartOptions,
}

impl<S, F> SourceCore<S, F>
where
    S: MangaSource + 'static,
    F: PageFetcher,
{
    pub fn new(source: S, fetcher: F) -> Self {
        Self {
            source: Arc::new(source),
            fetcher: Arc::new(fetcher),
            ranges: None,
            sinks: Vec::new(),
            default_start_options: StartOptions::default(),
        }
    }

    pub fn with_chapter_ranges(source: S, fetcher: F) -> Self
    where
        S: ChapterRange,
    {
        let source = Arc::new(source);
        Self {
            ranges: Some(source.clone() as Arc<dyn ChapterRange>),
            source,
            fetcher: Arc::new(fetcher),
            sinks: Vec::new(),
            default_start_options: StartOptions::default(),
        }
    }

    pub fn website(&self) -> &str {
        self.source.website()
    }

    pub fn url(&self) -> &str {
        self.source.url()
    }

    /// Registers a listener shared with every downloader this core creates.
    pub fn add_download_sink(&mut self, sink: Arc<dyn DownloadSink>) -> &mut Self {
        self.sinks.push(sink);
        self
    }

    /// Start options used by downloaders when `start` is called without any.
    pub fn set_default_start_options(&mut self, options: StartOptions) -> &mut Self {
        self.default_start_options = options;
        self
    }

    /// Whether the plugged-in source implements [`ChapterRange`].
    pub fn supports_chapter_ranges(&self) -> bool {
        self.ranges.is_some()
    }

    /// The source's full manga catalogue.
    pub fn mangas(&self) -> Vec<Manga> {
        self.source.mangas()
    }

    pub fn manga(&self, key: &str) -> Result<Manga, MlagError> {
        self.source
            .manga(key)
            .ok_or_else(|| MlagError::UnknownManga(key.to_string()))
    }

    pub fn last_chapter(&self, manga: &Manga) -> Result<u32, MlagError> {
        self.wrap(self.source.last_chapter(manga))
    }

    pub fn page_count(&self, manga: &Manga, chapter: u32) -> Result<u32, MlagError> {
        self.wrap(self.source.page_count(manga, chapter))
    }

    pub fn page_urls(&self, manga: &Manga, chapter: u32) -> Result<Vec<String>, MlagError> {
        self.wrap(self.source.page_urls(manga, chapter))
    }

    pub fn chapter_available(&self, manga: &Manga, chapter: u32) -> Result<bool, MlagError> {
        self.wrap(self.source.chapter_available(manga, chapter))
    }

    pub fn chapters_available(
        &self,
        manga: &Manga,
        from: u32,
        to: u32,
    ) -> Result<Vec<u32>, MlagError> {
        let ranges = self.ranges.as_ref().ok_or_else(|| MlagError::MissingCapability {
            website: self.source.website().to_string(),
            capability: "chapters_available",
        })?;
        self.wrap(ranges.chapters_available(manga, from, to))
    }

    /// Validates preconditions, queries the source for page URLs, and builds a
    /// downloader for `(manga, chapter)` writing into `dir_download`.
    ///
    /// The destination must exist and be a directory, and the chapter must be
    /// available on the source; failures here are raised before any download
    /// state exists.
    pub fn create_chapter_downloader(
        &self,
        manga: &Manga,
        chapter: u32,
        dir_download: &Utf8Path,
    ) -> Result<ChapterDownloader<F>, MlagError> {
        let std_dir = dir_download.as_std_path();
        if std_dir.exists() {
            if !std_dir.is_dir() {
                return Err(MlagError::NotADirectory(dir_download.to_path_buf()));
            }
        } else {
            return Err(MlagError::MissingDownloadDir(dir_download.to_path_buf()));
        }

        if !self.chapter_available(manga, chapter)? {
            return Err(MlagError::ChapterUnavailable {
                website: self.source.website().to_string(),
                chapter,
            });
        }

        let page_urls = self.page_urls(manga, chapter)?;
        debug!(
            website = self.source.website(),
            manga = %manga,
            chapter,
            pages = page_urls.len(),
            "chapter downloader created"
        );

        Ok(ChapterDownloader::new(
            ChapterMeta {
                website: self.source.website().to_string(),
                url: self.source.url().to_string(),
                chapter,
                manga: manga.clone(),
                page_urls,
            },
            dir_download.to_path_buf(),
            Arc::clone(&self.fetcher),
            self.sinks.clone(),
            self.default_start_options.clone(),
        ))
    }

    /// Key-based convenience over [`create_chapter_downloader`].
    ///
    /// [`create_chapter_downloader`]: SourceCore::create_chapter_downloader
    pub fn create_chapter_downloader_by_key(
        &self,
        manga_key: &str,
        chapter: u32,
        dir_download: &Utf8Path,
    ) -> Result<ChapterDownloader<F>, MlagError> {
        let manga = self.manga(manga_key)?;
        self.create_chapter_downloader(&manga, chapter, dir_download)
    }

    fn wrap<T>(&self, result: SourceResult<T>) -> Result<T, MlagError> {
        result.map_err(|cause| MlagError::Source {
            website: self.source.website().to_string(),
            url: self.source.url().to_string(),
            cause: cause.to_string(),
        })
    }
}
