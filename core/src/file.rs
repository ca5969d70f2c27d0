use std::path::PathBuf;

use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Matches Python's `urllib.parse.quote` with `safe='/'`, which is what desktop
/// thumbnail managers feed into the cache key digest.
const URI_PATH_SET: &AsciiSet = &NON_ALPHANUMERIC
	.remove(b'/')
	.remove(b'-')
	.remove(b'_')
	.remove(b'.')
	.remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
	Photo,
	Video,
}

/// Where a scanned file lives. The camera port is deliberately not part of the
/// identity: it changes every time the same physical camera is replugged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceId {
	Filesystem,
	Camera { model: String },
}

/// Identity of one source file to thumbnail, produced by the scanning side.
/// Immutable; lives for the duration of a single batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
	pub path: PathBuf,
	pub device: DeviceId,
	pub size: u64,
	pub mtime: i64,
	pub kind: FileKind,
}

impl FileReference {
	/// The normalized URI the cache key digest is computed over.
	///
	/// `file://<url-encoded-absolute-path>` for filesystem sources and
	/// `gphoto2://<url-encoded "<model>/<path>">` for camera sources. The
	/// whole model-plus-path string is encoded as one unit, and an absolute
	/// camera path keeps its leading slash, doubling the separator. Existing
	/// caches were keyed over exactly these bytes.
	#[must_use]
	pub fn uri(&self) -> String {
		match &self.device {
			DeviceId::Filesystem => format!(
				"file://{}",
				percent_encode(self.path.to_string_lossy().as_bytes(), URI_PATH_SET)
			),
			DeviceId::Camera { model } => {
				let path = format!("{model}/{}", self.path.to_string_lossy());

				format!(
					"gphoto2://{}",
					percent_encode(path.as_bytes(), URI_PATH_SET)
				)
			}
		}
	}
}
