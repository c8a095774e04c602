// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use indexmap::IndexMap;
use sweep_core::{ParamValue, cartesian_product};
use sweep_environment::{Environment, EnvironmentConfig};
use sweep_storage::{Archive, ArchiveOptions, LoadPlan, RunStatus, WrapMode};
use tempfile::TempDir;

fn config(dir: &TempDir, name: &str) -> EnvironmentConfig {
	let mut config = EnvironmentConfig::new(name);
	config.archive_filename = dir.path().join(format!("{}.db", name));
	config.worker_count = 2;
	config
}

fn explore_product(env: &mut Environment) {
	let traj = env.trajectory_mut();
	traj.add_parameter("x", 1.0).unwrap();
	traj.add_parameter("y", 1.0).unwrap();
	traj.explore(cartesian_product(vec![
		(
			"x".to_string(),
			[1.0, 2.0, 3.0, 4.0].iter().map(|&v| ParamValue::from(v)).collect(),
		),
		(
			"y".to_string(),
			[6.0, 7.0, 8.0].iter().map(|&v| ParamValue::from(v)).collect(),
		),
	]))
	.unwrap();
}

#[test]
fn test_cartesian_product_multiply() {
	let dir = TempDir::new().unwrap();
	let mut env = Environment::new(config(&dir, "multiply")).unwrap();
	explore_product(&mut env);

	let summary = env
		.run(|ctx| {
			let x = ctx.get_f64("x")?;
			let y = ctx.get_f64("y")?;
			ctx.add_result("z", x * y)?;
			Ok(x * y)
		})
		.unwrap();

	assert_eq!(summary.stored, 12);
	assert_eq!(summary.failed, 0);
	assert_eq!(summary.exit_code(), 0);
	assert_eq!(summary.outcomes.len(), 12);

	let archive = Archive::open(env.archive_path(), ArchiveOptions::default()).unwrap();
	let mut loaded = archive.load_trajectory("multiply", &LoadPlan::data()).unwrap();

	// Point 1 under the documented ordering: x = 1.0, y = 7.0.
	assert_eq!(
		loaded.get_value("results.runs.run_00000001.z").unwrap(),
		ParamValue::from(7.0)
	);
	assert_eq!(loaded.get_from_runs("z").len(), 12);
}

#[test]
fn test_empty_exploration_is_a_noop() {
	let dir = TempDir::new().unwrap();
	let mut env = Environment::new(config(&dir, "empty")).unwrap();
	env.trajectory_mut().add_parameter("x", 1.0).unwrap();

	let called = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
	let calls = called.clone();
	let summary = env
		.run(move |_ctx| {
			calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
			Ok(())
		})
		.unwrap();

	assert_eq!(summary.stored, 0);
	assert_eq!(summary.exit_code(), 0);
	assert_eq!(called.load(std::sync::atomic::Ordering::Relaxed), 0);
}

#[test]
fn test_failed_run_does_not_abort_experiment() {
	let dir = TempDir::new().unwrap();
	let mut env = Environment::new(config(&dir, "partial")).unwrap();
	explore_product(&mut env);

	let summary = env
		.run(|ctx| {
			if ctx.index() == 5 {
				return Err("boom".into());
			}
			let x = ctx.get_f64("x")?;
			ctx.add_result("z", x)?;
			Ok(())
		})
		.unwrap();

	assert_eq!(summary.failed, 1);
	assert_eq!(summary.stored, 11);
	assert_eq!(summary.exit_code(), 1);

	let archive = Archive::open(env.archive_path(), ArchiveOptions::default()).unwrap();
	let reports = archive.run_reports("partial").unwrap();
	let failed = reports.iter().find(|r| r.index == 5).unwrap();
	assert_eq!(failed.status, RunStatus::Failed);
	assert_eq!(failed.message.as_deref(), Some("boom"));
	assert!(!archive.stored_indices("partial").unwrap().contains(&5));
}

#[test]
fn test_panicking_run_is_recorded_as_failed() {
	let dir = TempDir::new().unwrap();
	let mut env = Environment::new(config(&dir, "panicky")).unwrap();
	explore_product(&mut env);

	let summary = env
		.run(|ctx| {
			if ctx.index() == 0 {
				panic!("numerical kernel exploded");
			}
			Ok(())
		})
		.unwrap();

	assert_eq!(summary.failed, 1);
	assert_eq!(summary.stored, 11);
}

#[test]
fn test_queue_wrapper_runs() {
	let dir = TempDir::new().unwrap();
	let mut cfg = config(&dir, "queued");
	cfg.wrap_mode = WrapMode::Queue;
	cfg.worker_count = 3;
	let mut env = Environment::new(cfg).unwrap();
	explore_product(&mut env);

	let summary = env
		.run(|ctx| {
			let x = ctx.get_f64("x")?;
			let y = ctx.get_f64("y")?;
			ctx.add_result("z", x + y)?;
			Ok(())
		})
		.unwrap();

	assert_eq!(summary.stored, 12);
	let archive = Archive::open(env.archive_path(), ArchiveOptions::default()).unwrap();
	assert_eq!(archive.stored_indices("queued").unwrap().len(), 12);
}

#[test]
fn test_fresh_worker_per_run() {
	let dir = TempDir::new().unwrap();
	let mut cfg = config(&dir, "fresh");
	cfg.pool = false;
	let mut env = Environment::new(cfg).unwrap();
	explore_product(&mut env);

	let summary = env
		.run(|ctx| {
			let x = ctx.get_f64("x")?;
			ctx.add_result("z", x)?;
			Ok(())
		})
		.unwrap();
	assert_eq!(summary.stored, 12);
}

#[test]
fn test_frozen_input_workers() {
	let dir = TempDir::new().unwrap();
	let mut cfg = config(&dir, "frozen");
	cfg.freeze_input = true;
	let mut env = Environment::new(cfg).unwrap();
	explore_product(&mut env);

	let summary = env
		.run(|ctx| {
			let x = ctx.get_f64("x")?;
			let y = ctx.get_f64("y")?;
			ctx.add_result("z", x * y)?;
			Ok(())
		})
		.unwrap();
	assert_eq!(summary.stored, 12);

	let archive = Archive::open(env.archive_path(), ArchiveOptions::default()).unwrap();
	let mut loaded = archive.load_trajectory("frozen", &LoadPlan::data()).unwrap();
	assert_eq!(
		loaded.get_value("results.runs.run_00000003.z").unwrap(),
		ParamValue::from(12.0)
	);
}

#[test]
fn test_run_timeout_records_failure() {
	let dir = TempDir::new().unwrap();
	let mut cfg = config(&dir, "slow");
	cfg.run_timeout = Some(std::time::Duration::from_millis(50));
	cfg.worker_count = 1;
	let mut env = Environment::new(cfg).unwrap();

	let traj = env.trajectory_mut();
	traj.add_parameter("x", 1.0).unwrap();
	let mut mapping = IndexMap::new();
	mapping.insert(
		"x".to_string(),
		vec![ParamValue::from(1.0), ParamValue::from(2.0)],
	);
	traj.explore(mapping).unwrap();

	let summary = env
		.run(|ctx| {
			if ctx.index() == 0 {
				std::thread::sleep(std::time::Duration::from_millis(120));
			}
			ctx.add_result("z", 1.0)?;
			Ok(())
		})
		.unwrap();

	assert_eq!(summary.failed, 1);
	assert_eq!(summary.stored, 1);

	let archive = Archive::open(env.archive_path(), ArchiveOptions::default()).unwrap();
	let reports = archive.run_reports("slow").unwrap();
	let timed_out = reports.iter().find(|r| r.index == 0).unwrap();
	assert_eq!(timed_out.message.as_deref(), Some("timeout"));
}

#[test]
fn test_set_bucketing_in_run_names() {
	let dir = TempDir::new().unwrap();
	let mut env = Environment::new(config(&dir, "buckets")).unwrap();

	let traj = env.trajectory_mut();
	traj.add_parameter("x", 1.0).unwrap();
	let mut mapping = IndexMap::new();
	mapping.insert(
		"x".to_string(),
		vec![ParamValue::from(1.0), ParamValue::from(2.0), ParamValue::from(3.0)],
	);
	traj.explore(mapping).unwrap();

	let summary = env
		.run(|ctx| {
			let x = ctx.get_f64("x")?;
			ctx.add_result("runs.$set.$.z", x)?;
			Ok(())
		})
		.unwrap();
	assert_eq!(summary.stored, 3);

	let archive = Archive::open(env.archive_path(), ArchiveOptions::default()).unwrap();
	let loaded = archive.load_trajectory("buckets", &LoadPlan::data()).unwrap();
	assert!(loaded.tree().contains("results.runs.run_set_00000.run_00000000.z"));
	assert!(loaded.tree().contains("results.runs.run_set_00000.run_00000002.z"));
}

#[test]
fn test_add_time_appends_timestamp() {
	let dir = TempDir::new().unwrap();
	let mut cfg = config(&dir, "stamped");
	cfg.archive_filename = dir.path().to_path_buf();
	cfg.add_time = true;
	let env = Environment::new(cfg).unwrap();

	let name = env.trajectory().name().to_string();
	assert!(name.starts_with("stamped_"));
	// _YYYY_MM_DD_HHhMMmSSs
	assert_eq!(name.len(), "stamped".len() + 21);
	assert!(name.ends_with('s'));
}

#[test]
fn test_preset_must_be_consumed() {
	let dir = TempDir::new().unwrap();
	let mut env = Environment::new(config(&dir, "presets")).unwrap();

	let traj = env.trajectory_mut();
	traj.preset("never_added", 1.0).unwrap();
	traj.add_parameter("x", 1.0).unwrap();
	let mut mapping = IndexMap::new();
	mapping.insert("x".to_string(), vec![ParamValue::from(1.0)]);
	traj.explore(mapping).unwrap();

	let err = env.run(|_ctx| Ok(())).unwrap_err();
	assert!(err.to_string().contains("never_added"));
}
