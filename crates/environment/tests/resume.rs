// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use indexmap::IndexMap;
use sweep_core::ParamValue;
use sweep_environment::{Environment, EnvironmentConfig, Expansion};
use sweep_storage::{Archive, ArchiveOptions};
use tempfile::TempDir;

fn config(dir: &TempDir, name: &str) -> EnvironmentConfig {
	let mut config = EnvironmentConfig::new(name);
	config.archive_filename = dir.path().join(format!("{}.db", name));
	config.worker_count = 2;
	config.resumable = true;
	config.resume_dir = Some(dir.path().join("resume"));
	config
}

fn explore_points(env: &mut Environment, count: usize) {
	let traj = env.trajectory_mut();
	traj.add_parameter("x", 0.0).unwrap();
	let mut mapping = IndexMap::new();
	mapping.insert(
		"x".to_string(),
		(0..count).map(|i| ParamValue::from(i as f64)).collect::<Vec<_>>(),
	);
	traj.explore(mapping).unwrap();
}

#[test]
fn test_resume_dispatches_only_missing_indices() {
	let dir = TempDir::new().unwrap();

	// First attempt: everything from index 37 on "crashes".
	let mut env = Environment::new(config(&dir, "resumed")).unwrap();
	explore_points(&mut env, 100);
	let summary = env
		.run(|ctx| {
			if ctx.index() >= 37 {
				return Err("simulated crash".into());
			}
			let x = ctx.get_f64("x")?;
			ctx.add_result("z", x)?;
			Ok(())
		})
		.unwrap();
	assert_eq!(summary.stored, 37);
	drop(env);

	// Second attempt resumes and completes exactly the missing 63.
	let mut env = Environment::new(config(&dir, "resumed")).unwrap();
	let summary = env
		.run(|ctx| {
			let x = ctx.get_f64("x")?;
			ctx.add_result("z", x)?;
			Ok(())
		})
		.unwrap();

	assert_eq!(summary.previously_stored, 37);
	assert_eq!(summary.stored, 63);

	let archive = Archive::open(env.archive_path(), ArchiveOptions::default()).unwrap();
	assert_eq!(archive.stored_indices("resumed").unwrap().len(), 100);
}

#[test]
fn test_resumed_trajectory_keeps_parameters() {
	let dir = TempDir::new().unwrap();

	let mut env = Environment::new(config(&dir, "kept")).unwrap();
	explore_points(&mut env, 5);
	env.trajectory_mut().add_parameter("config.seed", 7i64).unwrap();
	env.run(|ctx| {
		let x = ctx.get_f64("x")?;
		ctx.add_result("z", x)?;
		Ok(())
	})
	.unwrap();
	drop(env);

	let mut env = Environment::new(config(&dir, "kept")).unwrap();
	assert_eq!(env.trajectory().length(), 5);
	assert_eq!(
		env.trajectory_mut().get_value("config.seed").unwrap(),
		ParamValue::from(7i64)
	);
}

#[test]
fn test_expanded_trajectory_cannot_resume() {
	let dir = TempDir::new().unwrap();

	let mut env = Environment::new(config(&dir, "grown")).unwrap();
	explore_points(&mut env, 3);
	env.run_with_postprocessing(
		|ctx| {
			let x = ctx.get_f64("x")?;
			ctx.add_result("z", x)?;
			Ok(())
		},
		|_traj, outcomes| {
			if outcomes.len() > 3 {
				return Ok(None);
			}
			let mut tail: Expansion = IndexMap::new();
			tail.insert("x".to_string(), vec![ParamValue::from(99.0)]);
			Ok(Some(tail))
		},
	)
	.unwrap();
	drop(env);

	let err = Environment::new(config(&dir, "grown")).unwrap_err();
	assert!(err.to_string().contains("expanded"));
}

#[test]
fn test_fresh_resumable_environment_starts_clean() {
	let dir = TempDir::new().unwrap();
	let mut env = Environment::new(config(&dir, "first")).unwrap();
	explore_points(&mut env, 2);
	let summary = env
		.run(|ctx| {
			let x = ctx.get_f64("x")?;
			ctx.add_result("z", x)?;
			Ok(())
		})
		.unwrap();
	assert_eq!(summary.previously_stored, 0);
	assert_eq!(summary.stored, 2);
}
