//! Lumina's thumbnail generation and caching subsystem.
//!
//! The embedding application hands [`Thumbnailer::new_batch`] the files a device
//! scan discovered and listens on [`Thumbnailer::subscribe`] for thumbnails as
//! they become available. Everything in between (source-priority extraction, a
//! fair worker pool, the on-disk caches and the sqlite index) lives here.

mod cache;
mod config;
mod error;
mod event;
mod file;
mod thumbnail;

pub use cache::{cleanup_cache, optimize, CacheIndexRow, CacheKey, OptimizeStats, ThumbnailIndex};
pub use config::ThumbnailerConfig;
pub use error::FileIOError;
pub use event::{BatchStats, ThumbnailEvent};
pub use file::{DeviceId, FileKind, FileReference};
pub use thumbnail::{
	actor::Thumbnailer, BatchId, CacheDirs, QualityMode, THUMBNAIL_CACHE_DIR_NAME,
};
