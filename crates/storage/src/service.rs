// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use sweep_core::NodeRecord;

use crate::{Result, report::RunReport};

/// The storage interface workers speak, whatever wrapper sits behind
/// it. All implementations preserve append idempotence from the
/// caller's perspective.
pub trait StorageService: Send + Sync {
	/// Persist a batch of leaf records in append mode.
	fn store_records(&self, trajectory: &str, records: Vec<NodeRecord>) -> Result<()>;

	/// Update the `runs` overview row for one run.
	fn store_run_report(&self, trajectory: &str, report: RunReport) -> Result<()>;

	/// Drain queued writes and surface any deferred writer error.
	fn flush(&self) -> Result<()>;
}
