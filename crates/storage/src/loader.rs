// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::path::PathBuf;

use sweep_core::{NodeLoader, NodeRecord};

use crate::archive::{Archive, ArchiveOptions};

/// Read-side hook handed to trajectories so natural naming can pull
/// missing subtrees out of the archive (auto-loading).
///
/// Opens a fresh connection per call; reads do not interfere with the
/// write wrappers.
pub struct ArchiveLoader {
	path: PathBuf,
	trajectory: String,
	options: ArchiveOptions,
}

impl ArchiveLoader {
	pub fn new(path: impl Into<PathBuf>, trajectory: impl Into<String>, options: ArchiveOptions) -> Self {
		Self {
			path: path.into(),
			trajectory: trajectory.into(),
			options,
		}
	}
}

impl NodeLoader for ArchiveLoader {
	fn load_subtree(&self, path: &str, with_data: bool) -> sweep_core::Result<Vec<NodeRecord>> {
		let archive =
			Archive::open(&self.path, self.options.clone()).map_err(sweep_core::Error::from)?;
		archive.load_subtree(&self.trajectory, path, with_data).map_err(Into::into)
	}
}
