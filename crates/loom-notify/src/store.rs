// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! On-disk store for event payloads that could not be delivered.
//!
//! Each payload is one `<event id>.json` file. Event ids are UUIDv7, so file
//! names sort oldest first. Writes go to a `.json.tmp` sibling and are renamed
//! into place, so a crash mid-write never leaves a truncated payload behind.
//! Stored payloads are sent again the next time a client starts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{NotifySdkError, Result};

const EXTENSION: &str = "json";
const TMP_EXTENSION: &str = "json.tmp";

/// A bounded directory of undelivered payloads.
#[derive(Debug)]
pub struct PayloadStore {
	dir: PathBuf,
	max_files: usize,
}

impl PayloadStore {
	/// Opens `dir`, creating it if needed. At most `max_files` payloads are
	/// kept; zero disables writing.
	pub fn open(dir: impl Into<PathBuf>, max_files: usize) -> Result<Self> {
		let dir = dir.into();
		fs::create_dir_all(&dir).map_err(|source| store_error(&dir, source))?;
		debug!(dir = %dir.display(), max_files, "Opened payload store");
		Ok(Self { dir, max_files })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Writes `payload` as `<stem>.json`, discarding the oldest payloads to
	/// stay within the limit. Returns the new file, or `None` when the store
	/// keeps nothing.
	pub fn write(&self, stem: &str, payload: &[u8]) -> Result<Option<PathBuf>> {
		if self.max_files == 0 {
			return Ok(None);
		}

		let mut pending = self.pending()?;
		while pending.len() >= self.max_files {
			let oldest = pending.remove(0);
			info!(path = %oldest.display(), "Payload store full, discarding oldest payload");
			self.remove(&oldest)?;
		}

		let path = self.dir.join(stem).with_extension(EXTENSION);
		let tmp_path = path.with_extension(TMP_EXTENSION);
		fs::write(&tmp_path, payload).map_err(|source| store_error(&tmp_path, source))?;
		fs::rename(&tmp_path, &path).map_err(|source| store_error(&path, source))?;

		debug!(path = %path.display(), bytes = payload.len(), "Persisted payload");
		Ok(Some(path))
	}

	/// Stored payload files, oldest first. Leftover temporary files are ignored.
	pub fn pending(&self) -> Result<Vec<PathBuf>> {
		let entries = fs::read_dir(&self.dir).map_err(|source| store_error(&self.dir, source))?;

		let mut files = Vec::new();
		for entry in entries {
			let path = entry.map_err(|source| store_error(&self.dir, source))?.path();
			if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
				files.push(path);
			}
		}
		files.sort();
		Ok(files)
	}

	pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
		fs::read(path).map_err(|source| store_error(path, source))
	}

	/// Removes a stored payload. A file that is already gone is not an error.
	pub fn remove(&self, path: &Path) -> Result<()> {
		match fs::remove_file(path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				warn!(path = %path.display(), "Stored payload already removed");
				Ok(())
			}
			Err(source) => Err(store_error(path, source)),
		}
	}
}

fn store_error(path: &Path, source: io::Error) -> NotifySdkError {
	NotifySdkError::Store {
		path: path.to_path_buf(),
		source,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn store(max_files: usize) -> (PayloadStore, TempDir) {
		let tmp = TempDir::new().unwrap();
		let store = PayloadStore::open(tmp.path().join("events"), max_files).unwrap();
		(store, tmp)
	}

	fn names(paths: &[PathBuf]) -> Vec<String> {
		paths
			.iter()
			.map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
			.collect()
	}

	#[test]
	fn open_creates_directory() {
		let (store, _tmp) = store(4);
		assert!(store.dir().is_dir());
		assert!(store.pending().unwrap().is_empty());
	}

	#[test]
	fn written_payloads_read_back_oldest_first() {
		let (store, _tmp) = store(4);
		store.write("0002", b"second").unwrap();
		let first = store.write("0001", b"first").unwrap().unwrap();

		let pending = store.pending().unwrap();
		assert_eq!(names(&pending), ["0001.json", "0002.json"]);
		assert_eq!(store.read(&first).unwrap(), b"first");
	}

	#[test]
	fn full_store_discards_oldest() {
		let (store, _tmp) = store(2);
		for stem in ["0001", "0002", "0003"] {
			store.write(stem, stem.as_bytes()).unwrap();
		}
		assert_eq!(names(&store.pending().unwrap()), ["0002.json", "0003.json"]);
	}

	#[test]
	fn zero_capacity_writes_nothing() {
		let (store, _tmp) = store(0);
		assert!(store.write("0001", b"dropped").unwrap().is_none());
		assert!(store.pending().unwrap().is_empty());
	}

	#[test]
	fn temporary_files_are_not_pending() {
		let (store, _tmp) = store(4);
		fs::write(store.dir().join("0001.json.tmp"), b"partial").unwrap();
		fs::write(store.dir().join("notes.txt"), b"unrelated").unwrap();
		assert!(store.pending().unwrap().is_empty());
	}

	#[test]
	fn remove_tolerates_missing_files() {
		let (store, _tmp) = store(4);
		let path = store.write("0001", b"x").unwrap().unwrap();
		store.remove(&path).unwrap();
		store.remove(&path).unwrap();
		assert!(store.pending().unwrap().is_empty());
	}

	#[test]
	fn open_fails_when_path_is_a_file() {
		let tmp = TempDir::new().unwrap();
		let file = tmp.path().join("taken");
		fs::write(&file, b"").unwrap();
		let err = PayloadStore::open(&file, 4).unwrap_err();
		assert!(matches!(err, NotifySdkError::Store { .. }));
	}
}
