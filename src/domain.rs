use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A manga as the source adapter knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Manga {
    pub name: String,
}

impl Manga {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Manga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Everything a chapter download needs to know about its chapter.
/// Immutable once a downloader is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMeta {
    pub website: String,
    pub url: String,
    pub chapter: u32,
    pub manga: Manga,
    pub page_urls: Vec<String>,
}

impl ChapterMeta {
    pub fn page_count(&self) -> usize {
        self.page_urls.len()
    }
}

/// Collision handling when an archive path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Reuse the computed path as-is, replacing any existing file.
    Override,
    /// Append `(1)`, `(2)`, ... before the extension until a free name is found.
    #[default]
    Rename,
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePolicy::Override => write!(f, "override"),
            WritePolicy::Rename => write!(f, "rename"),
        }
    }
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "override" => Ok(WritePolicy::Override),
            "rename" => Ok(WritePolicy::Rename),
            other => Err(format!("unknown write policy: {other}")),
        }
    }
}
