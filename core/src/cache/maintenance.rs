use std::{
	collections::HashSet,
	fs,
	path::Path,
	time::{Duration, SystemTime},
};

use tracing::{debug, warn};

use super::ThumbnailIndex;

const SECONDS_PER_DAY: u64 = 60 * 60 * 24;

/// Counters reported by [`optimize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
	/// Index rows whose artifact no longer exists on disk.
	pub rows_removed: u64,
	/// Artifacts on disk the index no longer knows about.
	pub artifacts_removed: u64,
	/// Database file shrinkage from the final vacuum, in bytes.
	pub db_bytes_reclaimed: u64,
}

/// Removes artifacts in `tier_dir` that have not been accessed for `days`
/// days, along with their index rows. Returns how many were removed.
pub fn cleanup_cache(tier_dir: &Path, index: &ThumbnailIndex, days: u64) -> u64 {
	let cutoff = SystemTime::now() - Duration::from_secs(SECONDS_PER_DAY * days);

	let Ok(entries) = fs::read_dir(tier_dir) else {
		return 0;
	};

	let mut removed = Vec::new();
	for entry in entries.flatten() {
		let path = entry.path();
		let stale = entry
			.metadata()
			.and_then(|meta| meta.accessed())
			.is_ok_and(|accessed| accessed < cutoff);

		if path.is_file() && stale && fs::remove_file(&path).is_ok() {
			removed.push(entry.file_name().to_string_lossy().to_string());
		}
	}

	if !removed.is_empty() {
		index.purge(&removed);
		debug!(
			"Deleted {} thumbnail artifacts not accessed for {days} or more days",
			removed.len()
		);
	}

	removed.len() as u64
}

/// Reconciles the index against `tier_dir` in both directions, then compacts
/// the database: rows whose artifact is gone are purged, and artifacts the
/// index does not know about are deleted.
pub fn optimize(tier_dir: &Path, index: &ThumbnailIndex) -> OptimizeStats {
	let indexed = index.artifact_names().into_iter().collect::<HashSet<_>>();

	let on_disk = fs::read_dir(tier_dir)
		.map(|entries| {
			entries
				.flatten()
				.filter(|entry| entry.path().is_file())
				.map(|entry| entry.file_name().to_string_lossy().to_string())
				.collect::<HashSet<_>>()
		})
		.unwrap_or_default();

	let orphaned_rows = indexed.difference(&on_disk).cloned().collect::<Vec<_>>();
	if !orphaned_rows.is_empty() {
		index.purge(&orphaned_rows);
	}

	let mut artifacts_removed = 0;
	for name in on_disk.difference(&indexed) {
		match fs::remove_file(tier_dir.join(name)) {
			Ok(()) => artifacts_removed += 1,
			Err(e) => warn!("Failed to remove unindexed thumbnail artifact {name}: {e}"),
		}
	}

	let size_before = index.db_size();
	index.vacuum();

	OptimizeStats {
		rows_removed: orphaned_rows.len() as u64,
		artifacts_removed,
		db_bytes_reclaimed: size_before.saturating_sub(index.db_size()),
	}
}
