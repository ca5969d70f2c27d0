use crate::file::FileReference;

mod index;
mod maintenance;
mod store;

pub use index::{CacheIndexRow, ThumbnailIndex};
pub use maintenance::{cleanup_cache, optimize, OptimizeStats};
pub(crate) use store::{encode_artifact, ArtifactMeta, DiskCache};

/// Content-addressed identifier for a cache artifact: the md5 digest of the
/// file's normalized URI, rendered as 32 hex characters. Two files with the
/// same normalized URI collide on purpose; that is a cache hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
	#[must_use]
	pub fn new(file: &FileReference) -> Self {
		Self::from_uri(&file.uri())
	}

	#[must_use]
	pub fn from_uri(uri: &str) -> Self {
		Self(format!("{:x}", md5::compute(uri.as_bytes())))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// The on-disk file name of the artifact this key addresses.
	#[must_use]
	pub fn artifact_name(&self) -> String {
		format!("{}.png", self.0)
	}
}
