// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::thread;

use sweep_core::{Node, NodeRecord, ResultLeaf, Value};
use sweep_storage::{
	Archive, ArchiveOptions, LoadPlan, RunReport, RunStatus, StorageService, StoreMode, WrapMode,
	WrappedStorage,
};
use sweep_testing::line_trajectory;
use tempfile::TempDir;

fn init_archive(path: &std::path::Path) {
	let mut archive = Archive::open(path, ArchiveOptions::default()).unwrap();
	let traj = line_trajectory("wrapped", &[1.0, 2.0]);
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();
}

fn run_leaf(run: usize) -> NodeRecord {
	let mut leaf = ResultLeaf::new();
	leaf.assign_names(
		"z".to_string(),
		format!("results.runs.run_{:08}.z", run),
	);
	leaf.push(Value::Int(run as i64)).unwrap();
	NodeRecord::bare(Node::Result(leaf))
}

fn exercise(mode: WrapMode, workers: usize, runs_per_worker: usize) {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("wrapped.db");
	init_archive(&path);

	let wrapped =
		WrappedStorage::create(&path, ArchiveOptions::default(), mode, workers).unwrap();

	thread::scope(|scope| {
		for worker in 0..workers {
			let endpoint = wrapped.endpoint(worker);
			scope.spawn(move || {
				for slot in 0..runs_per_worker {
					let run = worker * runs_per_worker + slot;
					endpoint.store_records("wrapped", vec![run_leaf(run)]).unwrap();
					endpoint
						.store_run_report("wrapped", RunReport {
							index: run,
							status: RunStatus::Stored,
							worker: format!("worker-{}", worker),
							started_at: 0,
							finished_at: 0,
							wall_time: 0.0,
							message: None,
						})
						.unwrap();
				}
				endpoint.flush().unwrap();
			});
		}
	});

	wrapped.finalize().unwrap();

	let archive = Archive::open(&path, ArchiveOptions::default()).unwrap();
	let loaded = archive.load_trajectory("wrapped", &LoadPlan::data()).unwrap();
	for run in 0..workers * runs_per_worker {
		assert!(
			loaded.tree().contains(&format!("results.runs.run_{:08}.z", run)),
			"missing run {}",
			run
		);
	}
	assert_eq!(archive.stored_indices("wrapped").unwrap().len(), workers * runs_per_worker);
}

#[test]
fn test_lock_wrapper_parallel_stores() {
	exercise(WrapMode::Lock, 4, 8);
}

#[test]
fn test_queue_wrapper_parallel_stores() {
	exercise(WrapMode::Queue, 4, 8);
}

#[test]
fn test_pipe_wrapper_parallel_stores() {
	exercise(WrapMode::Pipe, 4, 8);
}

#[test]
fn test_none_wrapper_single_worker() {
	exercise(WrapMode::None, 1, 8);
}

#[test]
fn test_wrappers_preserve_idempotence() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("wrapped.db");
	init_archive(&path);

	let wrapped =
		WrappedStorage::create(&path, ArchiveOptions::default(), WrapMode::Queue, 1).unwrap();
	let endpoint = wrapped.endpoint(0);
	endpoint.store_records("wrapped", vec![run_leaf(0)]).unwrap();
	endpoint.store_records("wrapped", vec![run_leaf(0)]).unwrap();
	endpoint.flush().unwrap();
	wrapped.finalize().unwrap();

	let archive = Archive::open(&path, ArchiveOptions::default()).unwrap();
	let loaded = archive.load_trajectory("wrapped", &LoadPlan::data()).unwrap();
	assert!(loaded.tree().contains("results.runs.run_00000000.z"));
}
