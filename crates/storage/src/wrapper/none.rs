// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::path::{Path, PathBuf};

use sweep_core::NodeRecord;

use crate::{
	Result,
	archive::{Archive, ArchiveOptions, StoreMode},
	report::RunReport,
	service::StorageService,
};

/// The `none` wrapper: every call opens its own connection and relies
/// on the backend's file locking. Meant for single-worker runs.
pub struct DirectService {
	path: PathBuf,
	options: ArchiveOptions,
}

impl DirectService {
	pub fn new(path: &Path, options: ArchiveOptions) -> Self {
		Self {
			path: path.to_path_buf(),
			options,
		}
	}

	fn open(&self) -> Result<Archive> {
		Archive::open(&self.path, self.options.clone())
	}
}

impl StorageService for DirectService {
	fn store_records(&self, trajectory: &str, records: Vec<NodeRecord>) -> Result<()> {
		self.open()?.store_records(trajectory, &records, StoreMode::Append)
	}

	fn store_run_report(&self, trajectory: &str, report: RunReport) -> Result<()> {
		self.open()?.store_run_report(trajectory, &report)
	}

	fn flush(&self) -> Result<()> {
		Ok(())
	}
}
