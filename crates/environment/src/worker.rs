// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Worker side of the scheduler: one run at a time, snapshot in, run
//! context through the user function, subtree out to storage.

use std::{
	panic::{AssertUnwindSafe, catch_unwind},
	sync::{Arc, atomic::AtomicBool},
	time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crossbeam_channel::{Receiver, Sender};
use sweep_core::{RunContext, Trajectory};
use sweep_storage::{RunReport, RunStatus, StorageService};
use tracing::{debug, error};

use crate::error::RunError;

/// User run function contract: a pinned run context in, any
/// sendable value out.
pub type RunResult<R> = std::result::Result<R, RunError>;

/// One dispatched run. `snapshot` is `None` when the worker was
/// frozen-input initialized and clones its own base.
pub(crate) struct Dispatch {
	pub index: usize,
	pub snapshot: Option<Box<Trajectory>>,
}

/// What a worker reports back to the producer.
pub(crate) struct WorkerOutcome<R> {
	pub index: usize,
	pub status: RunStatus,
	pub value: Option<R>,
	pub message: Option<String>,
	/// Storage errors are fatal for the experiment; the environment
	/// surfaces them after a graceful shutdown.
	pub fatal: Option<sweep_storage::Error>,
}

/// Everything a worker needs besides the dispatch itself.
pub(crate) struct WorkerShared<F> {
	pub function: F,
	pub trajectory_name: Arc<str>,
	pub cancel: Arc<AtomicBool>,
	pub timeout: Option<Duration>,
}

impl<F: Clone> Clone for WorkerShared<F> {
	fn clone(&self) -> Self {
		Self {
			function: self.function.clone(),
			trajectory_name: Arc::clone(&self.trajectory_name),
			cancel: Arc::clone(&self.cancel),
			timeout: self.timeout,
		}
	}
}

fn now_epoch() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Pooled worker loop: pull dispatches until the producer hangs up.
pub(crate) fn worker_loop<F, R>(
	worker_id: usize,
	dispatches: Receiver<Dispatch>,
	frozen: Option<Arc<Trajectory>>,
	shared: WorkerShared<F>,
	endpoint: Arc<dyn StorageService>,
	outcomes: Sender<WorkerOutcome<R>>,
) where
	F: Fn(&mut RunContext) -> RunResult<R>,
	R: Send + 'static,
{
	while let Ok(dispatch) = dispatches.recv() {
		let snapshot = match dispatch.snapshot {
			Some(snapshot) => *snapshot,
			None => frozen.as_ref().expect("frozen-input workers hold a base").as_ref().clone(),
		};
		let outcome = execute_run(worker_id, dispatch.index, snapshot, &shared, &endpoint);
		if outcomes.send(outcome).is_err() {
			break;
		}
	}
}

/// Execute one run: context, user function, persistence, report.
pub(crate) fn execute_run<F, R>(
	worker_id: usize,
	index: usize,
	snapshot: Trajectory,
	shared: &WorkerShared<F>,
	endpoint: &Arc<dyn StorageService>,
) -> WorkerOutcome<R>
where
	F: Fn(&mut RunContext) -> RunResult<R>,
{
	let worker_label = format!("worker-{}", worker_id);
	let started_at = now_epoch();
	let started = Instant::now();
	let deadline = shared.timeout.map(|timeout| started + timeout);

	let mut report = RunReport {
		index,
		status: RunStatus::Running,
		worker: worker_label,
		started_at,
		finished_at: 0,
		wall_time: 0.0,
		message: None,
	};
	if let Err(err) = endpoint.store_run_report(&shared.trajectory_name, report.clone()) {
		return fatal_outcome(index, err);
	}

	let mut context =
		match RunContext::new(snapshot, index, Arc::clone(&shared.cancel), deadline) {
			Ok(context) => context,
			Err(err) => {
				report.status = RunStatus::Failed;
				report.message = Some(err.to_string());
				return finish(report, started, None, shared, endpoint);
			}
		};

	let run = catch_unwind(AssertUnwindSafe(|| (shared.function)(&mut context)));

	let (status, value, message) = match run {
		Ok(Ok(value)) => {
			if context.deadline_exceeded() {
				(RunStatus::Failed, None, Some("timeout".to_string()))
			} else if context.should_stop() {
				(RunStatus::Cancelled, None, None)
			} else {
				(RunStatus::Stored, Some(value), None)
			}
		}
		Ok(Err(err)) => (RunStatus::Failed, None, Some(err.to_string())),
		Err(panic) => {
			let message = panic
				.downcast_ref::<&str>()
				.map(|s| s.to_string())
				.or_else(|| panic.downcast_ref::<String>().cloned())
				.unwrap_or_else(|| "run panicked".to_string());
			(RunStatus::Failed, None, Some(message))
		}
	};

	// Only a completed run flushes its subtree; failed and cancelled
	// runs discard their partial data.
	if status == RunStatus::Stored {
		let records = context.run_nodes();
		if let Err(err) = endpoint.store_records(&shared.trajectory_name, records) {
			return fatal_outcome(index, err);
		}
		debug!(index, "run subtree flushed");
	}

	report.status = status;
	report.message = message;
	finish(report, started, value, shared, endpoint)
}

fn finish<F, R>(
	mut report: RunReport,
	started: Instant,
	value: Option<R>,
	shared: &WorkerShared<F>,
	endpoint: &Arc<dyn StorageService>,
) -> WorkerOutcome<R> {
	report.finished_at = now_epoch();
	report.wall_time = started.elapsed().as_secs_f64();
	let index = report.index;
	let status = report.status;
	let message = report.message.clone();
	if status == RunStatus::Failed {
		error!(index, message = message.as_deref().unwrap_or(""), "run failed");
	}
	if let Err(err) = endpoint.store_run_report(&shared.trajectory_name, report) {
		return fatal_outcome(index, err);
	}
	WorkerOutcome {
		index,
		status,
		value,
		message,
		fatal: None,
	}
}

fn fatal_outcome<R>(index: usize, err: sweep_storage::Error) -> WorkerOutcome<R> {
	error!(index, error = %err, "storage failure during run");
	WorkerOutcome {
		index,
		status: RunStatus::Failed,
		value: None,
		message: Some(err.to_string()),
		fatal: Some(err),
	}
}
