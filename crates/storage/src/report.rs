// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use serde::{Deserialize, Serialize};

/// State machine of a single run. Terminal states land in the `runs`
/// overview; only `Stored` results are visible afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
	Pending,
	Dispatched,
	Running,
	Stored,
	Failed,
	Cancelled,
}

impl RunStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			RunStatus::Pending => "pending",
			RunStatus::Dispatched => "dispatched",
			RunStatus::Running => "running",
			RunStatus::Stored => "stored",
			RunStatus::Failed => "failed",
			RunStatus::Cancelled => "cancelled",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"pending" => Some(RunStatus::Pending),
			"dispatched" => Some(RunStatus::Dispatched),
			"running" => Some(RunStatus::Running),
			"stored" => Some(RunStatus::Stored),
			"failed" => Some(RunStatus::Failed),
			"cancelled" => Some(RunStatus::Cancelled),
			_ => None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, RunStatus::Stored | RunStatus::Failed | RunStatus::Cancelled)
	}
}

/// One row of the `runs` overview table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
	pub index: usize,
	pub status: RunStatus,
	pub worker: String,
	pub started_at: u64,
	pub finished_at: u64,
	pub wall_time: f64,
	pub message: Option<String>,
}

impl RunReport {
	pub fn dispatched(index: usize, worker: impl Into<String>, started_at: u64) -> Self {
		Self {
			index,
			status: RunStatus::Dispatched,
			worker: worker.into(),
			started_at,
			finished_at: 0,
			wall_time: 0.0,
			message: None,
		}
	}
}

/// Summary row of the trajectory listing (`info` overview).
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryInfo {
	pub name: String,
	pub comment: Option<String>,
	pub created_at: u64,
	pub length: usize,
	pub expanded: bool,
}
