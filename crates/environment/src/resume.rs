// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::{fs, path::PathBuf};

use sweep_core::naming::{parse_run_name, run_name};
use tracing::debug;

use crate::Result;

/// Per-run markers in the resume directory: written at dispatch,
/// cleared on completion. On resume they flag runs that died mid-air
/// and must be re-dispatched.
pub(crate) struct ResumeMarkers {
	dir: Option<PathBuf>,
}

impl ResumeMarkers {
	pub fn new(dir: Option<PathBuf>) -> Result<Self> {
		if let Some(dir) = &dir {
			fs::create_dir_all(dir)?;
		}
		Ok(Self {
			dir,
		})
	}

	pub fn disabled() -> Self {
		Self {
			dir: None,
		}
	}

	fn marker(&self, index: usize) -> Option<PathBuf> {
		self.dir.as_ref().map(|dir| dir.join(format!("{}.dispatched", run_name(index))))
	}

	pub fn dispatched(&self, index: usize) -> Result<()> {
		if let Some(path) = self.marker(index) {
			fs::write(path, b"")?;
		}
		Ok(())
	}

	pub fn completed(&self, index: usize) -> Result<()> {
		if let Some(path) = self.marker(index) {
			if path.exists() {
				fs::remove_file(path)?;
			}
		}
		Ok(())
	}

	/// Indices whose markers survived a crash: dispatched, never
	/// completed.
	pub fn stale(&self) -> Result<Vec<usize>> {
		let Some(dir) = &self.dir else {
			return Ok(Vec::new());
		};
		let mut stale = Vec::new();
		for entry in fs::read_dir(dir)? {
			let entry = entry?;
			let name = entry.file_name();
			let Some(name) = name.to_str() else {
				continue;
			};
			if let Some(run) = name.strip_suffix(".dispatched").and_then(parse_run_name) {
				stale.push(run);
			}
		}
		stale.sort_unstable();
		if !stale.is_empty() {
			debug!(count = stale.len(), "found stale dispatch markers");
		}
		Ok(stale)
	}
}
