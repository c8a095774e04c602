// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use parking_lot::Mutex;
use sweep_core::NodeRecord;

use crate::{
	Result,
	archive::{Archive, StoreMode},
	report::RunReport,
	service::StorageService,
};

/// The `lock` wrapper: one shared connection, a mutex held across each
/// store call. Simple, serializes all I/O.
pub struct LockService {
	archive: Mutex<Archive>,
}

impl LockService {
	pub fn new(archive: Archive) -> Self {
		Self {
			archive: Mutex::new(archive),
		}
	}
}

impl StorageService for LockService {
	fn store_records(&self, trajectory: &str, records: Vec<NodeRecord>) -> Result<()> {
		self.archive.lock().store_records(trajectory, &records, StoreMode::Append)
	}

	fn store_run_report(&self, trajectory: &str, report: RunReport) -> Result<()> {
		self.archive.lock().store_run_report(trajectory, &report)
	}

	fn flush(&self) -> Result<()> {
		Ok(())
	}
}
