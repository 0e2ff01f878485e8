use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MlagError {
    #[error("the manga key '{0}' doesn't exist in this source")]
    UnknownManga(String),

    #[error("the source {website} doesn't implement `{capability}`")]
    MissingCapability {
        website: String,
        capability: &'static str,
    },

    #[error("source {website} ({url}) failed: {cause}")]
    Source {
        website: String,
        url: String,
        cause: String,
    },

    #[error("chapter {chapter} is not available on {website}")]
    ChapterUnavailable { website: String, chapter: u32 },

    #[error("the directory '{0}' doesn't exist")]
    MissingDownloadDir(Utf8PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(Utf8PathBuf),

    #[error("http client error: {0}")]
    Http(String),

    #[error("transfer of {url} failed: {cause}")]
    Transfer { url: String, cause: String },

    #[error("folder {0} doesn't exist")]
    MissingParentDir(Utf8PathBuf),

    #[error("{0} is not a mlag file")]
    NotMlag(Utf8PathBuf),

    #[error("{path} mlag file is corrupted: {cause}")]
    CorruptedMlag { path: Utf8PathBuf, cause: String },

    #[error("archive error at {path}: {cause}")]
    Archive { path: Utf8PathBuf, cause: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
