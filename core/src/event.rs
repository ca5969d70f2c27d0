use serde::{Deserialize, Serialize};

use crate::{
	file::FileReference,
	thumbnail::{BatchId, CacheDirs},
};

/// Per-batch completion counters, reported with
/// [`ThumbnailEvent::BatchFinished`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
	/// Thumbnails freshly extracted by a worker.
	pub generated: u64,
	/// Requests answered straight from the cache index + store.
	pub from_cache: u64,
	/// Requests that ended in the absence marker, fresh or remembered.
	pub failed: u64,
}

/// Everything the subsystem tells the outside world, delivered over a
/// `tokio::sync::broadcast` channel obtained from
/// [`Thumbnailer::subscribe`](crate::Thumbnailer::subscribe).
#[derive(Debug, Clone)]
pub enum ThumbnailEvent {
	/// The temporary working directories for a new batch are in place.
	CacheDirs { batch: BatchId, dirs: CacheDirs },
	/// One file's thumbnail, or `None` when extraction failed at every
	/// fallback level (the caller renders a placeholder).
	Thumbnail {
		batch: BatchId,
		file: FileReference,
		thumbnail: Option<Vec<u8>>,
	},
	/// Every dispatched request of the batch has been accounted for.
	BatchFinished { batch: BatchId, stats: BatchStats },
}
