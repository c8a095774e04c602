// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Canned trajectories and temp archives for tests across the
//! workspace.

use std::path::PathBuf;

use indexmap::IndexMap;
use sweep_core::{ParamValue, Trajectory, cartesian_product};
use tempfile::TempDir;

/// A temp directory plus an archive path inside it. Keep the guard
/// alive for the duration of the test.
pub fn temp_archive(name: &str) -> (TempDir, PathBuf) {
	let dir = TempDir::new().expect("creating a temp dir");
	let path = dir.path().join(format!("{}.db", name));
	(dir, path)
}

/// The standard fixture: `x` and `y` explored over a 2x2 product, a
/// commented `x`, and a `config.seed`.
pub fn sample_trajectory(name: &str) -> Trajectory {
	let mut traj = Trajectory::new(name);
	traj.set_comment("roundtrip fixture");
	traj.add_parameter("x", 1.0).unwrap().set_comment("x axis");
	traj.add_parameter("y", 1.0).unwrap();
	traj.add_parameter("config.seed", 42i64).unwrap();
	traj.explore(cartesian_product(vec![
		(
			"x".to_string(),
			vec![ParamValue::from(1.0), ParamValue::from(2.0)],
		),
		(
			"y".to_string(),
			vec![ParamValue::from(6.0), ParamValue::from(7.0)],
		),
	]))
	.unwrap();
	traj
}

/// A single parameter explored over the given values.
pub fn line_trajectory(name: &str, values: &[f64]) -> Trajectory {
	let mut traj = Trajectory::new(name);
	traj.add_parameter("x", 0.0).unwrap();
	let mut mapping = IndexMap::new();
	mapping.insert(
		"x".to_string(),
		values.iter().map(|&v| ParamValue::from(v)).collect::<Vec<_>>(),
	);
	traj.explore(mapping).unwrap();
	traj
}
