use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
	cache::{DiskCache, ThumbnailIndex},
	file::FileReference,
};

pub mod actor;
mod extract;
mod pool;

pub const THUMBNAIL_CACHE_DIR_NAME: &str = "thumbnails";

/// Size bound of the shared freedesktop cache's normal tier; its large tier
/// allows up to 256px, which our artifacts already fit.
pub(crate) const FDO_NORMAL_MAX_PX: u32 = 128;

/// The box every thumbnail is fitted into.
pub(crate) const TARGET_WIDTH: u32 = 160;
pub(crate) const TARGET_HEIGHT: u32 = 120;

/// Embedded thumbnails from camera raw formats commonly carry letterbox bands;
/// camera-written video sidecars carry taller ones.
pub(crate) const PHOTO_LETTERBOX_MARGIN: u32 = 8;
pub(crate) const VIDEO_LETTERBOX_MARGIN: u32 = 15;

/// Identifies one scan-batch across every request, result and event.
pub type BatchId = Uuid;

/// Resize filter trade-off: `Fast` while a device scan is still streaming
/// files in, `High` for the final pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityMode {
	Fast,
	High,
}

/// The temporary working directories established for one batch, reported to
/// the caller right after batch creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDirs {
	pub photo_dir: PathBuf,
	pub video_dir: PathBuf,
}

/// One unit of work for the pool: a file plus its generation parameters.
/// Consumed exactly once by exactly one worker.
#[derive(Debug, Clone)]
pub(crate) struct ThumbnailRequest {
	pub batch: BatchId,
	pub file: FileReference,
	/// Same-named sidecar thumbnail file, resolved by the manager before
	/// dispatch; short-circuits extraction from the primary file.
	pub sidecar: Option<PathBuf>,
	pub quality: QualityMode,
	pub write_fdo: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum ThumbnailOutcome {
	Generated {
		png: Vec<u8>,
		artifact_name: String,
	},
	/// The absence marker: extraction failed at every fallback level.
	Failed,
}

#[derive(Debug, Clone)]
pub(crate) struct ThumbnailResult {
	pub batch: BatchId,
	pub file: FileReference,
	pub outcome: ThumbnailOutcome,
	pub orientation_unknown: bool,
}

/// The cache tiers and the index, shared between the workers (store writes)
/// and the manager (index rows, bypass reads).
pub(crate) struct Caches {
	pub app: DiskCache,
	pub fdo_normal: DiskCache,
	pub fdo_large: DiskCache,
	pub index: ThumbnailIndex,
}

#[derive(Error, Debug)]
pub(crate) enum ThumbnailerError {
	#[error("failed to encode png: {0}")]
	PngEncoding(#[from] png::EncodingError),
	#[error("timed out while generating thumbnail: {}", .0.display())]
	TimedOut(Box<std::path::Path>),
}
