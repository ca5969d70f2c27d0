use std::{path::PathBuf, time::Duration};

use tracing::error;

const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Knobs for one [`Thumbnailer`](crate::Thumbnailer) instance.
#[derive(Debug, Clone)]
pub struct ThumbnailerConfig {
	/// Where the cache index sqlite file lives.
	pub data_dir: PathBuf,
	/// Base directory of the application-private thumbnail cache.
	pub cache_dir: PathBuf,
	/// Worker count; defaults to the machine's available parallelism.
	pub workers: usize,
	/// How long a single extraction may run before it is written off as failed.
	pub extraction_timeout: Duration,
	/// Also write artifacts into the shared freedesktop cache tiers.
	pub populate_fdo_cache: bool,
}

impl ThumbnailerConfig {
	#[must_use]
	pub fn new(data_dir: PathBuf, cache_dir: PathBuf) -> Self {
		let workers = std::thread::available_parallelism().map_or_else(
			|e| {
				error!("Failed to get available parallelism: {e:#?}");
				4
			},
			std::num::NonZeroUsize::get,
		);

		Self {
			data_dir,
			cache_dir,
			workers,
			extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
			populate_fdo_cache: false,
		}
	}

	#[must_use]
	pub fn with_workers(mut self, workers: usize) -> Self {
		self.workers = workers.max(1);
		self
	}

	#[must_use]
	pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
		self.extraction_timeout = timeout;
		self
	}

	#[must_use]
	pub fn with_fdo_cache(mut self, populate: bool) -> Self {
		self.populate_fdo_cache = populate;
		self
	}
}
