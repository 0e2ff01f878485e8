use std::fs::{self, File};
use std::io::{self, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::read::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::domain::{ChapterMeta, Manga, WritePolicy};
use crate::error::MlagError;

/// Format version written into every manifest.
pub const MANIFEST_VERSION: &str = "0.0.1";

pub const MLAG_EXTENSION: &str = "mlag";

const MANIFEST_NAME: &str = "manifest.json";
const PAGES_PREFIX: &str = "pages";

/// Manifest record stored as `manifest.json` inside a `.mlag` archive.
///
/// Every field is required on read; a manifest that parses but is missing a
/// field marks the archive as corrupted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub website: String,
    pub url: String,
    pub manga: Manga,
    pub chapter: u32,
    #[serde(rename = "download-date")]
    pub download_date: String,
    #[serde(rename = "pageCount")]
    pub page_count: usize,
    pub version: String,
}

/// Where and how to write an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlagOptions {
    pub path: Utf8PathBuf,
    pub write_policy: WritePolicy,
}

impl MlagOptions {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_policy: WritePolicy::default(),
        }
    }

    pub fn with_policy(path: impl Into<Utf8PathBuf>, write_policy: WritePolicy) -> Self {
        Self {
            path: path.into(),
            write_policy,
        }
    }
}

/// Computes the archive path for `meta` at `target`.
///
/// `target` may be an existing file, an existing directory (the base filename
/// is then synthesized as `lowercase(website)-lowercase(manga)-chapter`), or a
/// not-yet-existing file whose parent directory exists. The `.mlag` extension
/// is appended when absent. Under [`WritePolicy::Rename`] a numeric suffix
/// `(1)`, `(2)`, ... is inserted before the extension until a free name is
/// found; [`WritePolicy::Override`] returns the computed path verbatim.
pub fn resolve_mlag_path(
    meta: &ChapterMeta,
    target: &Utf8Path,
    policy: WritePolicy,
) -> Result<Utf8PathBuf, MlagError> {
    if target.as_std_path().exists() {
        let base = if target.as_std_path().is_dir() {
            let name = format!(
                "{}-{}-{}",
                meta.website.to_lowercase(),
                meta.manga.name.to_lowercase(),
                meta.chapter
            );
            target.join(name)
        } else {
            target.to_path_buf()
        };
        return Ok(match policy {
            WritePolicy::Override => with_mlag_extension(&base),
            WritePolicy::Rename => next_free_path(&base),
        });
    }

    match target.parent() {
        Some(parent) if parent.as_str().is_empty() || parent.as_std_path().exists() => {
            Ok(match policy {
                WritePolicy::Override => with_mlag_extension(target),
                WritePolicy::Rename => next_free_path(target),
            })
        }
        Some(parent) => Err(MlagError::MissingParentDir(parent.to_path_buf())),
        None => Err(MlagError::MissingParentDir(target.to_path_buf())),
    }
}

fn has_mlag_extension(path: &Utf8Path) -> bool {
    path.extension() == Some(MLAG_EXTENSION)
}

fn with_mlag_extension(path: &Utf8Path) -> Utf8PathBuf {
    if has_mlag_extension(path) {
        path.to_path_buf()
    } else {
        Utf8PathBuf::from(format!("{path}.{MLAG_EXTENSION}"))
    }
}

fn next_free_path(base: &Utf8Path) -> Utf8PathBuf {
    let stem = if has_mlag_extension(base) {
        base.with_extension("")
    } else {
        base.to_path_buf()
    };
    let mut candidate = Utf8PathBuf::from(format!("{stem}.{MLAG_EXTENSION}"));
    let mut suffix = 1u32;
    while candidate.as_std_path().exists() {
        candidate = Utf8PathBuf::from(format!("{stem}({suffix}).{MLAG_EXTENSION}"));
        suffix += 1;
    }
    candidate
}

/// Bundles `page_paths` and a freshly built manifest into a single archive at
/// the path resolved from `opts`. Returns the path actually written. The page
/// files themselves are never mutated.
pub fn create(
    meta: &ChapterMeta,
    page_paths: &[Utf8PathBuf],
    opts: &MlagOptions,
) -> Result<Utf8PathBuf, MlagError> {
    let resolved = resolve_mlag_path(meta, &opts.path, opts.write_policy)?;
    let manifest = build_manifest(meta, page_paths.len(), today());

    let file = File::create(resolved.as_std_path())
        .map_err(|err| MlagError::Filesystem(format!("create {resolved}: {err}")))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    let archive_err = |err: zip::result::ZipError| MlagError::Archive {
        path: resolved.clone(),
        cause: err.to_string(),
    };

    writer
        .start_file(MANIFEST_NAME, options)
        .map_err(archive_err)?;
    let manifest_json = serde_json::to_vec_pretty(&manifest)
        .map_err(|err| MlagError::Filesystem(err.to_string()))?;
    writer
        .write_all(&manifest_json)
        .map_err(|err| MlagError::Filesystem(err.to_string()))?;

    writer
        .add_directory(PAGES_PREFIX, options)
        .map_err(archive_err)?;
    for page in page_paths {
        let name = page
            .file_name()
            .ok_or_else(|| MlagError::Filesystem(format!("invalid page path {page}")))?;
        writer
            .start_file(format!("{PAGES_PREFIX}/{name}"), options)
            .map_err(archive_err)?;
        let mut source = File::open(page.as_std_path())
            .map_err(|err| MlagError::Filesystem(format!("open {page}: {err}")))?;
        io::copy(&mut source, &mut writer)
            .map_err(|err| MlagError::Filesystem(format!("bundle {page}: {err}")))?;
    }

    writer.finish().map_err(archive_err)?;
    debug!(path = %resolved, pages = page_paths.len(), "mlag archive written");
    Ok(resolved)
}

/// Reads the manifest back out of an archive.
///
/// Fails with [`MlagError::NotMlag`] when the container or its manifest entry
/// cannot be read as JSON at all, and with [`MlagError::CorruptedMlag`] when
/// the JSON parses but a required field is absent.
pub fn open(path: &Utf8Path) -> Result<Manifest, MlagError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| MlagError::Filesystem(format!("open {path}: {err}")))?;
    let mut archive =
        ZipArchive::new(file).map_err(|_| MlagError::NotMlag(path.to_path_buf()))?;

    let mut raw = String::new();
    archive
        .by_name(MANIFEST_NAME)
        .map_err(|_| MlagError::NotMlag(path.to_path_buf()))?
        .read_to_string(&mut raw)
        .map_err(|_| MlagError::NotMlag(path.to_path_buf()))?;

    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|_| MlagError::NotMlag(path.to_path_buf()))?;
    serde_json::from_value(value).map_err(|err| MlagError::CorruptedMlag {
        path: path.to_path_buf(),
        cause: err.to_string(),
    })
}

/// Unpacks every entry into `target_dir`, guarding against entry paths that
/// escape it. Returns the number of files extracted.
pub fn extract(path: &Utf8Path, target_dir: &Utf8Path) -> Result<usize, MlagError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| MlagError::Filesystem(format!("open {path}: {err}")))?;
    let mut archive =
        ZipArchive::new(file).map_err(|_| MlagError::NotMlag(path.to_path_buf()))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| MlagError::Archive {
            path: path.to_path_buf(),
            cause: err.to_string(),
        })?;
        let entry_path = match entry.enclosed_name() {
            Some(name) => target_dir.as_std_path().join(name),
            None => {
                return Err(MlagError::Archive {
                    path: path.to_path_buf(),
                    cause: "zip entry path traversal detected".to_string(),
                });
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| MlagError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| MlagError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            File::create(&entry_path).map_err(|err| MlagError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| MlagError::Filesystem(err.to_string()))?;
        extracted += 1;
    }
    Ok(extracted)
}

fn build_manifest(meta: &ChapterMeta, page_count: usize, download_date: String) -> Manifest {
    Manifest {
        website: meta.website.clone(),
        url: meta.url.clone(),
        manga: meta.manga.clone(),
        chapter: meta.chapter,
        download_date,
        page_count,
        version: MANIFEST_VERSION.to_string(),
    }
}

pub(crate) fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
