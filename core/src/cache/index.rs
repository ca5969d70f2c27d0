use std::{
	fs,
	path::{Path, PathBuf},
};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::file::FileReference;

const INDEX_FILE_NAME: &str = "thumbnail_cache.sqlite";

/// SQLite limits host parameters per statement; stay comfortably below it
/// when building bulk `IN (...)` deletes.
const PURGE_CHUNK_SIZE: usize = 900;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS thumbnails (
	uri TEXT NOT NULL,
	mtime INTEGER NOT NULL,
	size INTEGER NOT NULL,
	md5_name TEXT NOT NULL,
	orientation_unknown INTEGER NOT NULL,
	failure INTEGER NOT NULL,
	PRIMARY KEY (uri, mtime, size)
);
CREATE INDEX IF NOT EXISTS md5_name_idx ON thumbnails (md5_name);
";

/// What the index remembers about one (uri, mtime, size) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheIndexRow {
	pub artifact_name: String,
	pub orientation_unknown: bool,
	pub failed: bool,
}

/// Persistent record of which files already went through a generation attempt,
/// so unchanged files are never probed or re-extracted on the next scan.
///
/// Connections are short-lived, opened per operation and never held across an
/// await point. If the store cannot be initialized the index runs degraded:
/// every lookup misses and every record/purge is a no-op — a stale hit is
/// worse than a redundant extraction.
pub struct ThumbnailIndex {
	db_path: PathBuf,
	valid: bool,
}

impl ThumbnailIndex {
	#[must_use]
	pub fn new(data_dir: &Path) -> Self {
		let db_path = data_dir.join(INDEX_FILE_NAME);

		let init = || -> Result<(), Box<dyn std::error::Error>> {
			fs::create_dir_all(data_dir)?;
			Connection::open(&db_path)?.execute_batch(SCHEMA)?;
			Ok(())
		};

		let valid = match init() {
			Ok(()) => true,
			Err(e) => {
				warn!(
					"Thumbnail cache index at {} is unavailable, every lookup will miss: {e}",
					db_path.display()
				);
				false
			}
		};

		Self { db_path, valid }
	}

	pub const fn is_valid(&self) -> bool {
		self.valid
	}

	/// Insert-or-replace on the full (uri, mtime, size) key, so re-scanning an
	/// unchanged file is idempotent and a changed file starts a fresh row.
	pub fn record(
		&self,
		file: &FileReference,
		artifact_name: &str,
		orientation_unknown: bool,
		failed: bool,
	) {
		let Some(conn) = self.connect() else { return };

		if let Err(e) = conn.execute(
			"INSERT OR REPLACE INTO thumbnails \
			 (uri, mtime, size, md5_name, orientation_unknown, failure) \
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
			params![
				file.uri(),
				file.mtime,
				file.size as i64,
				artifact_name,
				orientation_unknown,
				failed
			],
		) {
			warn!("Failed to record thumbnail cache index row: {e}");
		}
	}

	/// Exact-key lookup; a changed size or mtime is a miss by construction.
	#[must_use]
	pub fn lookup(&self, file: &FileReference) -> Option<CacheIndexRow> {
		let conn = self.connect()?;

		conn.query_row(
			"SELECT md5_name, orientation_unknown, failure FROM thumbnails \
			 WHERE uri = ?1 AND mtime = ?2 AND size = ?3",
			params![file.uri(), file.mtime, file.size as i64],
			|row| {
				Ok(CacheIndexRow {
					artifact_name: row.get(0)?,
					orientation_unknown: row.get(1)?,
					failed: row.get(2)?,
				})
			},
		)
		.optional()
		.unwrap_or_else(|e| {
			warn!("Failed to query thumbnail cache index: {e}");
			None
		})
	}

	/// Bulk-removes rows by artifact name, chunked to respect the parameter
	/// ceiling of a single delete statement.
	pub fn purge(&self, artifact_names: &[String]) {
		let Some(conn) = self.connect() else { return };

		for chunk in artifact_names.chunks(PURGE_CHUNK_SIZE) {
			let placeholders = vec!["?"; chunk.len()].join(", ");
			let sql = format!("DELETE FROM thumbnails WHERE md5_name IN ({placeholders})");

			match conn.execute(&sql, rusqlite::params_from_iter(chunk.iter())) {
				Ok(removed) => debug!("Purged {removed} thumbnail cache index rows"),
				Err(e) => warn!("Failed to purge thumbnail cache index rows: {e}"),
			}
		}
	}

	/// Every artifact name currently indexed, for reconciliation against the
	/// cache directory.
	#[must_use]
	pub fn artifact_names(&self) -> Vec<String> {
		let Some(conn) = self.connect() else {
			return Vec::new();
		};

		let names = || -> rusqlite::Result<Vec<String>> {
			let mut stmt = conn.prepare("SELECT md5_name FROM thumbnails")?;
			let rows = stmt.query_map([], |row| row.get(0))?;
			rows.collect()
		};

		names().unwrap_or_else(|e| {
			warn!("Failed to list thumbnail cache index rows: {e}");
			Vec::new()
		})
	}

	/// Rebuilds the database file, reclaiming the space freed by purges.
	pub fn vacuum(&self) {
		let Some(conn) = self.connect() else { return };

		if let Err(e) = conn.execute_batch("VACUUM") {
			warn!("Failed to vacuum the thumbnail cache index: {e}");
		}
	}

	/// Size of the database file in bytes.
	#[must_use]
	pub fn db_size(&self) -> u64 {
		if !self.valid {
			return 0;
		}

		fs::metadata(&self.db_path).map_or(0, |meta| meta.len())
	}

	/// Number of rows currently indexed.
	#[must_use]
	pub fn count(&self) -> u64 {
		let Some(conn) = self.connect() else { return 0 };

		conn.query_row("SELECT COUNT(*) FROM thumbnails", [], |row| {
			row.get::<_, i64>(0)
		})
		.map_or_else(
			|e| {
				warn!("Failed to count thumbnail cache index rows: {e}");
				0
			},
			|count| u64::try_from(count).unwrap_or_default(),
		)
	}

	fn connect(&self) -> Option<Connection> {
		if !self.valid {
			return None;
		}

		Connection::open(&self.db_path)
			.map_err(|e| warn!("Failed to open thumbnail cache index: {e}"))
			.ok()
	}
}
