use std::{
	fs,
	io::{Cursor, Write},
	path::{Path, PathBuf},
};

use image::DynamicImage;
use tracing::{trace, warn};

use crate::{cache::CacheKey, error::FileIOError};

/// PNG tEXt keywords carrying the validation metadata, so staleness can be
/// checked without consulting a side index.
const THUMB_URI_KEY: &str = "Thumb::URI";
const THUMB_MTIME_KEY: &str = "Thumb::MTime";
const THUMB_SIZE_KEY: &str = "Thumb::Size";

/// Validation metadata embedded into every artifact at encode time.
pub(crate) struct ArtifactMeta {
	pub uri: String,
	pub mtime: i64,
	pub size: u64,
}

/// Losslessly encodes a thumbnail, embedding `meta` as tEXt chunks.
pub(crate) fn encode_artifact(
	image: &DynamicImage,
	meta: &ArtifactMeta,
) -> Result<Vec<u8>, png::EncodingError> {
	let rgba = image.to_rgba8();
	let (width, height) = rgba.dimensions();

	let mut out = Vec::new();
	let mut encoder = png::Encoder::new(&mut out, width, height);
	encoder.set_color(png::ColorType::Rgba);
	encoder.set_depth(png::BitDepth::Eight);
	encoder.add_text_chunk(THUMB_URI_KEY.to_string(), meta.uri.clone())?;
	encoder.add_text_chunk(THUMB_MTIME_KEY.to_string(), meta.mtime.to_string())?;
	encoder.add_text_chunk(THUMB_SIZE_KEY.to_string(), meta.size.to_string())?;

	let mut writer = encoder.write_header()?;
	writer.write_image_data(&rgba)?;
	writer.finish()?;

	Ok(out)
}

/// One physical cache tier: a flat directory of `<md5-of-uri>.png` artifacts.
///
/// A tier whose directory cannot be created degrades to a no-op: every `put`
/// and `get` reports absence and nothing is ever raised to the caller. That
/// state is logged once here, at construction.
pub(crate) struct DiskCache {
	dir: PathBuf,
	valid: bool,
}

impl DiskCache {
	pub fn new(dir: PathBuf) -> Self {
		let valid = match fs::create_dir_all(&dir) {
			Ok(()) => {
				restrict_dir_permissions(&dir);
				true
			}
			Err(e) => {
				warn!(
					"Thumbnail cache tier at {} is unavailable, operating without it: {e}",
					dir.display()
				);
				false
			}
		};

		Self { dir, valid }
	}

	/// A tier that was configured off: behaves exactly like an unavailable one,
	/// minus the warning.
	pub fn disabled() -> Self {
		Self {
			dir: PathBuf::new(),
			valid: false,
		}
	}

	/// Atomically stores already-encoded artifact bytes: write to a uniquely
	/// named temp file in the target directory, rename into place, restrict
	/// permissions. Readers never observe a partial artifact.
	pub fn put_bytes(&self, key: &CacheKey, bytes: &[u8]) -> Option<String> {
		if !self.valid {
			return None;
		}

		let name = key.artifact_name();
		let target = self.dir.join(&name);

		let write = || -> Result<(), FileIOError> {
			let mut tmp = tempfile::Builder::new()
				.prefix(".")
				.suffix(".tmp")
				.tempfile_in(&self.dir)
				.map_err(|e| FileIOError::from((&self.dir, e)))?;

			tmp.write_all(bytes)
				.map_err(|e| FileIOError::from((tmp.path(), e)))?;

			tmp.persist(&target)
				.map_err(|e| FileIOError::from((&target, e.error)))?;

			restrict_file_permissions(&target);

			Ok(())
		};

		match write() {
			Ok(()) => {
				trace!("Stored thumbnail artifact {}", target.display());
				Some(name)
			}
			Err(e) => {
				warn!("Failed to store thumbnail artifact: {e}");
				None
			}
		}
	}

	pub fn put(
		&self,
		key: &CacheKey,
		image: &DynamicImage,
		meta: &ArtifactMeta,
	) -> Option<String> {
		if !self.valid {
			return None;
		}

		match encode_artifact(image, meta) {
			Ok(bytes) => self.put_bytes(key, &bytes),
			Err(e) => {
				warn!("Failed to encode thumbnail artifact: {e}");
				None
			}
		}
	}

	/// Fetches the artifact for `key`, returning it only when its embedded
	/// mtime/size metadata still matches the source file. Stale or unreadable
	/// artifacts are reported as absent.
	pub fn get(&self, key: &CacheKey, mtime: i64, size: u64) -> Option<Vec<u8>> {
		if !self.valid {
			return None;
		}

		let bytes = fs::read(self.dir.join(key.artifact_name())).ok()?;

		artifact_matches(&bytes, mtime, size).then_some(bytes)
	}
}

fn artifact_matches(bytes: &[u8], mtime: i64, size: u64) -> bool {
	let Ok(reader) = png::Decoder::new(Cursor::new(bytes)).read_info() else {
		return false;
	};

	let mut mtime_matches = false;
	let mut size_matches = false;

	for chunk in &reader.info().uncompressed_latin1_text {
		match chunk.keyword.as_str() {
			THUMB_MTIME_KEY => mtime_matches = chunk.text == mtime.to_string(),
			THUMB_SIZE_KEY => size_matches = chunk.text == size.to_string(),
			_ => {}
		}
	}

	mtime_matches && size_matches
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) {
	use std::os::unix::fs::PermissionsExt;

	if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
		warn!(
			"Failed to restrict thumbnail cache directory permissions on {}: {e}",
			dir.display()
		);
	}
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
	use std::os::unix::fs::PermissionsExt;

	if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
		warn!(
			"Failed to restrict thumbnail artifact permissions on {}: {e}",
			path.display()
		);
	}
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) {}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
	use super::*;

	fn meta() -> ArtifactMeta {
		ArtifactMeta {
			uri: "file:///media/card/DCIM/IMG_0001.JPG".to_string(),
			mtime: 1_700_000_000,
			size: 4096,
		}
	}

	fn sample_key() -> CacheKey {
		CacheKey::from_uri("file:///media/card/DCIM/IMG_0001.JPG")
	}

	#[test]
	fn put_then_get_roundtrips() {
		let dir = tempfile::tempdir().unwrap();
		let cache = DiskCache::new(dir.path().join("normal"));

		let key = sample_key();
		let image = DynamicImage::new_rgb8(160, 120);

		let name = cache.put(&key, &image, &meta()).unwrap();
		assert_eq!(name, key.artifact_name());

		let bytes = cache.get(&key, 1_700_000_000, 4096).unwrap();
		assert_eq!(&bytes[1..4], b"PNG");
	}

	#[test]
	fn stale_mtime_or_size_is_a_miss() {
		let dir = tempfile::tempdir().unwrap();
		let cache = DiskCache::new(dir.path().join("normal"));

		let key = sample_key();
		cache
			.put(&key, &DynamicImage::new_rgb8(160, 120), &meta())
			.unwrap();

		assert!(cache.get(&key, 1_700_000_001, 4096).is_none());
		assert!(cache.get(&key, 1_700_000_000, 4097).is_none());
		assert!(cache.get(&key, 1_700_000_000, 4096).is_some());
	}

	#[test]
	fn uncreatable_directory_degrades_to_noops() {
		let dir = tempfile::tempdir().unwrap();
		let blocker = dir.path().join("occupied");
		fs::write(&blocker, b"not a directory").unwrap();

		let cache = DiskCache::new(blocker.join("normal"));

		let key = sample_key();
		assert!(cache
			.put(&key, &DynamicImage::new_rgb8(160, 120), &meta())
			.is_none());
		assert!(cache.get(&key, 1_700_000_000, 4096).is_none());
	}

	#[test]
	fn no_temp_files_remain_after_put() {
		let dir = tempfile::tempdir().unwrap();
		let cache = DiskCache::new(dir.path().join("normal"));

		let key = sample_key();
		cache
			.put(&key, &DynamicImage::new_rgb8(160, 120), &meta())
			.unwrap();

		let entries = fs::read_dir(dir.path().join("normal"))
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().to_string())
			.collect::<Vec<_>>();
		assert_eq!(entries, vec![key.artifact_name()]);
	}

	#[cfg(unix)]
	#[test]
	fn artifacts_are_owner_only() {
		use std::os::unix::fs::PermissionsExt;

		let dir = tempfile::tempdir().unwrap();
		let cache = DiskCache::new(dir.path().join("normal"));

		let key = sample_key();
		cache
			.put(&key, &DynamicImage::new_rgb8(160, 120), &meta())
			.unwrap();

		let mode = fs::metadata(dir.path().join("normal").join(key.artifact_name()))
			.unwrap()
			.permissions()
			.mode();
		assert_eq!(mode & 0o777, 0o600);
	}

	#[test]
	fn readers_never_observe_a_partial_artifact() {
		use std::sync::{
			atomic::{AtomicBool, Ordering},
			Arc,
		};

		let dir = tempfile::tempdir().unwrap();
		let cache = DiskCache::new(dir.path().join("normal"));

		let key = sample_key();
		let target = dir.path().join("normal").join(key.artifact_name());

		let done = Arc::new(AtomicBool::new(false));
		let reader = std::thread::spawn({
			let done = Arc::clone(&done);
			move || {
				let mut observed = 0_u32;
				while !done.load(Ordering::Relaxed) {
					// Absent before the first put is fine; anything read back
					// must be a complete, fully decodable artifact
					let Ok(bytes) = fs::read(&target) else {
						continue;
					};

					let mut decoder = png::Decoder::new(Cursor::new(bytes.as_slice()))
						.read_info()
						.expect("observed an artifact with a torn header");
					let mut pixels = vec![0; decoder.output_buffer_size()];
					decoder
						.next_frame(&mut pixels)
						.expect("observed a truncated artifact");

					observed += 1;
				}
				observed
			}
		});

		// Rewrite the same artifact with varying content while the reader polls
		for i in 0..100_u32 {
			cache
				.put(&key, &DynamicImage::new_rgb8(120 + i, 120), &meta())
				.unwrap();
		}

		done.store(true, Ordering::Relaxed);
		assert!(reader.join().unwrap() > 0);
	}

	#[test]
	fn corrupt_artifact_is_a_miss() {
		let dir = tempfile::tempdir().unwrap();
		let cache = DiskCache::new(dir.path().join("normal"));

		let key = sample_key();
		fs::write(
			dir.path().join("normal").join(key.artifact_name()),
			b"garbage",
		)
		.unwrap();

		assert!(cache.get(&key, 1_700_000_000, 4096).is_none());
	}
}
