// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! The environment: index producer, worker lifecycle, admission
//! control, post-processing loop and resume.

use std::{
	collections::{HashSet, VecDeque},
	fs,
	path::PathBuf,
	sync::{Arc, atomic::AtomicBool},
	thread,
	time::Duration,
};

use crossbeam_channel::{RecvTimeoutError, unbounded};
use indexmap::IndexMap;
use sweep_core::{ParamValue, RunContext, Trajectory};
use sweep_storage::{
	Archive, ArchiveLoader, ArchiveOptions, LoadPlan, RunReport, RunStatus, StorageService,
	StoreMode, WrappedStorage,
};
use tracing::{debug, info, instrument, warn};

use crate::{
	Error, Result,
	caps::AdmissionControl,
	config::{EnvironmentConfig, time_suffix},
	error::RunError,
	resume::ResumeMarkers,
	signal::StopFlag,
	worker::{Dispatch, RunResult, WorkerShared, execute_run, worker_loop},
};

/// Stable process exit code for a graceful (signal-initiated) exit
/// with cancelled runs.
pub const GRACEFUL_EXIT_CODE: i32 = 85;

/// A post-processing function may return a mapping to `expand` the
/// trajectory; the environment then re-enters the run phase.
pub type Expansion = IndexMap<String, Vec<ParamValue>>;
pub type PostProcResult = std::result::Result<Option<Expansion>, RunError>;

type NoPostProc<R> = fn(&mut Trajectory, &[(usize, R)]) -> PostProcResult;

/// What an experiment ended like.
#[derive(Debug)]
pub struct RunSummary<R> {
	/// Runs stored by this invocation.
	pub stored: usize,
	/// Runs found already stored when resuming.
	pub previously_stored: usize,
	pub failed: usize,
	pub cancelled: usize,
	/// `(run index, user return value)` in completion order.
	pub outcomes: Vec<(usize, R)>,
	/// A signal stopped the producer before the exploration finished.
	pub graceful_exit: bool,
}

impl<R> RunSummary<R> {
	fn empty() -> Self {
		Self {
			stored: 0,
			previously_stored: 0,
			failed: 0,
			cancelled: 0,
			outcomes: Vec::new(),
			graceful_exit: false,
		}
	}

	/// Exit code per the contract: 0 all stored, the distinguished
	/// graceful-exit code when runs were cancelled by a signal, 1 for
	/// any other failure.
	pub fn exit_code(&self) -> i32 {
		if self.graceful_exit {
			GRACEFUL_EXIT_CODE
		} else if self.failed > 0 || self.cancelled > 0 {
			1
		} else {
			0
		}
	}
}

/// Orchestrates one experiment: owns the trajectory, fans runs out to
/// workers, coordinates the archive.
pub struct Environment {
	config: EnvironmentConfig,
	trajectory: Trajectory,
	archive_path: PathBuf,
	resumed: bool,
}

impl std::fmt::Debug for Environment {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Environment")
			.field("config", &self.config)
			.field("archive_path", &self.archive_path)
			.field("resumed", &self.resumed)
			.finish()
	}
}

impl Environment {
	/// Validate the configuration, open or create the trajectory and
	/// wire it to its archive.
	pub fn new(config: EnvironmentConfig) -> Result<Self> {
		config.validate()?;
		let options = archive_options(&config);

		// A resumable environment picks up the existing trajectory
		// under the exact configured name.
		if config.resumable {
			let raw_name = config.trajectory_name.clone();
			let archive_path = config.archive_path(&raw_name);
			if archive_path.exists() {
				let archive = Archive::open(&archive_path, options.clone())?;
				match archive.load_trajectory(&raw_name, &LoadPlan::data()) {
					Ok(mut trajectory) => {
						// Expansion during post-processing and resume
						// do not compose.
						if trajectory.was_expanded() {
							return Err(Error::config(
								"cannot resume a trajectory that was expanded during post-processing",
							));
						}
						trajectory.set_loader(Arc::new(ArchiveLoader::new(
							&archive_path,
							raw_name,
							options,
						)));
						info!(trajectory = trajectory.name(), "resuming existing trajectory");
						return Ok(Self {
							config,
							trajectory,
							archive_path,
							resumed: true,
						});
					}
					Err(sweep_storage::Error::UnknownTrajectory { .. }) => {}
					Err(err) => return Err(err.into()),
				}
			}
		}

		let name = if config.add_time {
			let now = std::time::SystemTime::now()
				.duration_since(std::time::UNIX_EPOCH)
				.map(|d| d.as_secs())
				.unwrap_or(0);
			format!("{}{}", config.trajectory_name, time_suffix(now))
		} else {
			config.trajectory_name.clone()
		};

		let archive_path = config.archive_path(&name);
		if let Some(parent) = archive_path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent)?;
			}
		}

		let mut trajectory = Trajectory::new(&name);
		if let Some(comment) = &config.comment {
			trajectory.set_comment(comment.clone());
		}
		trajectory.set_loader(Arc::new(ArchiveLoader::new(&archive_path, name, options)));

		Ok(Self {
			config,
			trajectory,
			archive_path,
			resumed: false,
		})
	}

	pub fn trajectory(&self) -> &Trajectory {
		&self.trajectory
	}

	pub fn trajectory_mut(&mut self) -> &mut Trajectory {
		&mut self.trajectory
	}

	pub fn config(&self) -> &EnvironmentConfig {
		&self.config
	}

	pub fn archive_path(&self) -> &std::path::Path {
		&self.archive_path
	}

	/// Consume the environment, handing the trajectory back for
	/// analysis.
	pub fn into_trajectory(self) -> Trajectory {
		self.trajectory
	}

	/// Run the experiment: one call of `function` per point of the
	/// parameter space.
	pub fn run<F, R>(&mut self, function: F) -> Result<RunSummary<R>>
	where
		F: Fn(&mut RunContext) -> RunResult<R> + Clone + Send + 'static,
		R: Send + 'static,
	{
		self.execute(function, None::<NoPostProc<R>>)
	}

	/// Run with a post-processing function that may expand the
	/// exploration and re-enter the run phase.
	pub fn run_with_postprocessing<F, R, G>(&mut self, function: F, postproc: G) -> Result<RunSummary<R>>
	where
		F: Fn(&mut RunContext) -> RunResult<R> + Clone + Send + 'static,
		R: Send + 'static,
		G: FnMut(&mut Trajectory, &[(usize, R)]) -> PostProcResult,
	{
		self.execute(function, Some(postproc))
	}

	/// Bundle pre-processing, run choice and post-processing in one
	/// environment-managed call.
	pub fn pipeline<P, F, R, G>(&mut self, pipeline: P) -> Result<RunSummary<R>>
	where
		P: FnOnce(&mut Trajectory) -> (F, Option<G>),
		F: Fn(&mut RunContext) -> RunResult<R> + Clone + Send + 'static,
		R: Send + 'static,
		G: FnMut(&mut Trajectory, &[(usize, R)]) -> PostProcResult,
	{
		let (function, postproc) = pipeline(&mut self.trajectory);
		self.execute(function, postproc)
	}

	#[instrument(level = "debug", skip_all, fields(trajectory = %self.trajectory.name()))]
	fn execute<F, R, G>(&mut self, function: F, mut postproc: Option<G>) -> Result<RunSummary<R>>
	where
		F: Fn(&mut RunContext) -> RunResult<R> + Clone + Send + 'static,
		R: Send + 'static,
		G: FnMut(&mut Trajectory, &[(usize, R)]) -> PostProcResult,
	{
		self.trajectory.begin_run_phase()?;
		let options = archive_options(&self.config);
		let mut archive = Archive::open(&self.archive_path, options.clone())?;
		archive.store_trajectory(&self.trajectory, StoreMode::Init)?;

		let mut summary = RunSummary::empty();
		let total = self.trajectory.length();
		if total == 0 {
			// An empty exploration is a no-op; post-processing is not
			// called.
			archive.finalize(&self.trajectory)?;
			return Ok(summary);
		}

		let markers = if self.config.resumable {
			ResumeMarkers::new(self.config.resume_dir.clone())?
		} else {
			ResumeMarkers::disabled()
		};

		let mut pending: VecDeque<usize> = if self.resumed {
			let stored: HashSet<usize> =
				archive.stored_indices(self.trajectory.name())?.into_iter().collect();
			summary.previously_stored = stored.len();
			let stale = markers.stale()?;
			if !stale.is_empty() {
				info!(count = stale.len(), "re-dispatching runs that died mid-flight");
			}
			(0..total).filter(|index| !stored.contains(index)).collect()
		} else {
			(0..total).collect()
		};

		let worker_count = self.config.effective_worker_count();
		let wrapped = WrappedStorage::create(
			&self.archive_path,
			options.clone(),
			self.config.wrap_mode,
			worker_count,
		)?;
		let reporter = wrapped.endpoint(0);

		let stop = StopFlag::new();
		if self.config.graceful_exit {
			stop.install_handlers();
		}
		let cancel = Arc::new(AtomicBool::new(false));

		let shared = WorkerShared {
			function,
			trajectory_name: Arc::from(self.trajectory.name()),
			cancel: Arc::clone(&cancel),
			timeout: self.config.run_timeout,
		};

		let (outcome_tx, outcome_rx) = unbounded();
		let mut handles = Vec::new();

		// Pool mode: workers outlive runs and pull from one feed.
		// Frozen input pins the snapshot a worker clones per run.
		let frozen = (self.config.pool && self.config.freeze_input)
			.then(|| Arc::new(self.trajectory.clone()));
		let frozen_length = total;
		let dispatcher = if self.config.pool {
			let (dispatch_tx, dispatch_rx) = unbounded::<Dispatch>();
			for id in 0..worker_count {
				let dispatch_rx = dispatch_rx.clone();
				let shared = shared.clone();
				let endpoint = wrapped.endpoint(id);
				let outcome_tx = outcome_tx.clone();
				let frozen = frozen.clone();
				handles.push(
					thread::Builder::new()
						.name(format!("sweep-worker-{}", id))
						.spawn(move || {
							worker_loop(id, dispatch_rx, frozen, shared, endpoint, outcome_tx)
						})
						.expect("spawning a worker thread"),
				);
			}
			Some(dispatch_tx)
		} else {
			None
		};

		let mut admission = AdmissionControl::new(
			self.config.cpu_cap,
			self.config.mem_cap,
			self.config.swap_cap,
		);

		let mut in_flight: usize = 0;
		let mut batch_total = total;
		let mut last_logged_percent = 0usize;
		let mut immediate_done = false;
		let mut postproc_seen = 0usize;
		let mut fresh_id = 0usize;
		let mut fatal: Option<Error> = None;
		let mut postproc_failure: Option<RunError> = None;
		let mut failed_fast = false;

		loop {
			// Dispatch as long as a worker slot is free and the caps
			// admit another run. With nothing in flight one run is
			// always admitted, so caps cannot deadlock the experiment.
			while fatal.is_none()
				&& !stop.raised() && !pending.is_empty()
				&& in_flight < worker_count
				&& (in_flight == 0 || admission.allows())
			{
				let index = pending.pop_front().expect("pending is non-empty");
				markers.dispatched(index)?;
				reporter
					.store_run_report(
						self.trajectory.name(),
						RunReport::dispatched(index, "producer", now_epoch()),
					)
					.map_err(Error::from)?;

				// Frozen workers only cover the snapshot they froze;
				// indices born from expansion ship their own.
				let needs_snapshot =
					frozen.is_none() || index >= frozen_length;
				let snapshot = needs_snapshot.then(|| Box::new(self.trajectory.clone()));

				match &dispatcher {
					Some(dispatch_tx) => {
						if dispatch_tx
							.send(Dispatch {
								index,
								snapshot,
							})
							.is_err()
						{
							fatal = Some(Error::config("worker pool hung up"));
							break;
						}
					}
					None => {
						let id = fresh_id;
						fresh_id += 1;
						let shared = shared.clone();
						let endpoint = wrapped.endpoint(id);
						let outcome_tx = outcome_tx.clone();
						let snapshot =
							snapshot.expect("fresh workers always get a snapshot");
						handles.push(
							thread::Builder::new()
								.name(format!("sweep-run-{}", index))
								.spawn(move || {
									let outcome = execute_run(
										id,
										index,
										*snapshot,
										&shared,
										&endpoint,
									);
									let _ = outcome_tx.send(outcome);
								})
								.expect("spawning a run thread"),
						);
					}
				}
				in_flight += 1;
				debug!(index, in_flight, "run dispatched");
			}

			// Immediate mode: post-processing fires as soon as the
			// producer runs dry, while in-flight runs drain.
			if self.config.immediate_postproc
				&& pending.is_empty() && !immediate_done
				&& postproc.is_some() && fatal.is_none()
				&& postproc_failure.is_none()
				&& !stop.raised()
			{
				immediate_done = true;
				match self.invoke_postproc(
					&mut postproc,
					&summary.outcomes,
					&mut archive,
				) {
					Ok(Some(tail)) => {
						pending.extend(tail);
						batch_total = self.trajectory.length();
						immediate_done = false;
						postproc_seen = summary.outcomes.len();
						continue;
					}
					Ok(None) => {
						postproc_seen = summary.outcomes.len();
					}
					Err(PostProcOutcome::User(err)) => postproc_failure = Some(err),
					Err(PostProcOutcome::Internal(err)) => fatal = Some(err),
				}
			}

			if pending.is_empty() && in_flight == 0 {
				if fatal.is_none() && postproc_failure.is_none() && !stop.raised() {
					if postproc.is_some() {
						// Deferred mode, or an immediate call that has
						// not seen the final outcomes yet.
						let needs_call = !self.config.immediate_postproc
							|| summary.outcomes.len() > postproc_seen
							|| !immediate_done;
						if needs_call {
							match self.invoke_postproc(
								&mut postproc,
								&summary.outcomes,
								&mut archive,
							) {
								Ok(Some(tail)) => {
									pending.extend(tail);
									batch_total = self.trajectory.length();
									immediate_done = false;
									postproc_seen = summary.outcomes.len();
									continue;
								}
								Ok(None) => {}
								Err(PostProcOutcome::User(err)) => {
									postproc_failure = Some(err)
								}
								Err(PostProcOutcome::Internal(err)) => {
									fatal = Some(err)
								}
							}
						}
					}
				}
				break;
			}

			match outcome_rx.recv_timeout(Duration::from_millis(200)) {
				Ok(outcome) => {
					in_flight -= 1;
					markers.completed(outcome.index)?;
					if let Some(err) = outcome.fatal {
						warn!(index = outcome.index, "storage failure, shutting down gracefully");
						if fatal.is_none() {
							fatal = Some(err.into());
						}
						stop.raise();
					}
					match outcome.status {
						RunStatus::Stored => {
							summary.stored += 1;
							if let Some(value) = outcome.value {
								summary.outcomes.push((outcome.index, value));
							}
						}
						RunStatus::Failed => {
							summary.failed += 1;
							if self.config.fail_fast {
								warn!(index = outcome.index, "fail-fast: cancelling the experiment");
								failed_fast = true;
								stop.raise();
								cancel.store(true, std::sync::atomic::Ordering::Relaxed);
							}
						}
						RunStatus::Cancelled => summary.cancelled += 1,
						_ => {}
					}

					let done = summary.stored + summary.failed + summary.cancelled;
					let percent = done * 100 / batch_total.max(1);
					if percent / 5 > last_logged_percent / 5 {
						info!(done, total = batch_total, percent, "run phase progress");
						last_logged_percent = percent;
					}
					debug!(index = outcome.index, status = ?outcome.status, "run completed");
				}
				Err(RecvTimeoutError::Timeout) => {}
				Err(RecvTimeoutError::Disconnected) => break,
			}

			if (stop.raised() || fatal.is_some()) && in_flight == 0 {
				break;
			}
		}

		// A graceful exit cancels whatever was never dispatched.
		if stop.raised() || fatal.is_some() {
			summary.graceful_exit =
				fatal.is_none() && postproc_failure.is_none() && !failed_fast;
			for index in pending.drain(..) {
				summary.cancelled += 1;
				let report = RunReport {
					index,
					status: RunStatus::Cancelled,
					worker: String::new(),
					started_at: 0,
					finished_at: now_epoch(),
					wall_time: 0.0,
					message: Some("graceful exit".to_string()),
				};
				if let Err(err) = reporter.store_run_report(self.trajectory.name(), report) {
					warn!(index, error = %err, "could not record cancelled run");
				}
			}
		}

		drop(dispatcher);
		drop(outcome_tx);
		for handle in handles {
			let _ = handle.join();
		}
		// A deferred writer error still lets the archive finalize; store
		// what is storable, then surface it.
		let wrapper_result = wrapped.finalize();

		archive.store_trajectory(&self.trajectory, StoreMode::OverwriteNode)?;
		archive.finalize(&self.trajectory)?;
		wrapper_result?;

		if let Some(err) = fatal {
			return Err(err);
		}
		if let Some(err) = postproc_failure {
			return Err(Error::PostProcessing {
				reason: err.to_string(),
			});
		}

		info!(
			stored = summary.stored,
			failed = summary.failed,
			cancelled = summary.cancelled,
			"run phase finished"
		);
		Ok(summary)
	}

	/// Call the post-processing function on the main worker; an
	/// expansion persists the new ranges and returns the fresh tail of
	/// indices.
	fn invoke_postproc<R, G>(
		&mut self,
		postproc: &mut Option<G>,
		outcomes: &[(usize, R)],
		archive: &mut Archive,
	) -> std::result::Result<Option<std::ops::Range<usize>>, PostProcOutcome>
	where
		G: FnMut(&mut Trajectory, &[(usize, R)]) -> PostProcResult,
	{
		let g = postproc.as_mut().expect("caller checked the post-processing function");
		debug!(outcomes = outcomes.len(), "invoking post-processing");
		match g(&mut self.trajectory, outcomes) {
			Ok(Some(mapping)) => {
				let old_length = self.trajectory.length();
				self.trajectory
					.expand(mapping)
					.map_err(|err| PostProcOutcome::Internal(err.into()))?;
				let new_length = self.trajectory.length();
				info!(from = old_length, to = new_length, "post-processing expanded the exploration");
				// Persist the grown ranges before their runs exist.
				archive
					.store_trajectory(&self.trajectory, StoreMode::OverwriteNode)
					.map_err(|err| PostProcOutcome::Internal(err.into()))?;
				Ok(Some(old_length..new_length))
			}
			Ok(None) => Ok(None),
			Err(err) => Err(PostProcOutcome::User(err)),
		}
	}
}

enum PostProcOutcome {
	/// The user function failed; the experiment aborts but the archive
	/// is still finalized.
	User(RunError),
	/// Expansion or persistence failed.
	Internal(Error),
}

fn archive_options(config: &EnvironmentConfig) -> ArchiveOptions {
	ArchiveOptions {
		comment_dedup: config.comment_dedup,
		compression_level: config.storage_compression_level,
		overviews: config.overview_tables,
	}
}

fn now_epoch() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
