//! Sequential manga chapter downloader producing portable `.mlag` archives.
//!
//! A [`source::SourceCore`] fronts a pluggable [`source::MangaSource`]
//! adapter and builds one [`chapter::ChapterDownloader`] per chapter, which
//! streams pages to disk through [`transfer::TransferController`]s and can
//! package the result into a `.mlag` archive via [`archive`].

pub mod archive;
pub mod chapter;
pub mod domain;
pub mod error;
pub mod events;
pub mod output;
pub mod source;
pub mod transfer;
