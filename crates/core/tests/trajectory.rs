// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use indexmap::IndexMap;
use sweep_core::{Error, ParamValue, Trajectory, Value};

fn explored_xy() -> Trajectory {
	let mut traj = Trajectory::new("integration");
	traj.add_parameter("x", 1.0).unwrap();
	traj.add_parameter("y", 1.0).unwrap();
	let mut mapping = IndexMap::new();
	mapping.insert(
		"x".to_string(),
		vec![ParamValue::from(1.0), ParamValue::from(2.0), ParamValue::from(3.0)],
	);
	mapping.insert(
		"y".to_string(),
		vec![ParamValue::from(6.0), ParamValue::from(7.0), ParamValue::from(8.0)],
	);
	traj.explore(mapping).unwrap();
	traj
}

#[test]
fn test_branch_typing_is_enforced() {
	let mut traj = Trajectory::new("branches");

	let err = traj.add_parameter("results.x", 1.0).unwrap_err();
	assert!(matches!(err, Error::BranchType { .. }));

	let err = traj.add_result("parameters.z", 1.0).unwrap_err();
	assert!(matches!(err, Error::BranchType { .. }));

	// Derived parameters take Parameter leaves like `parameters` does.
	traj.add_parameter("derived_parameters.scaled", 2.0).unwrap();
}

#[test]
fn test_wildcard_outside_run_uses_run_all() {
	let mut traj = Trajectory::new("wildcards");
	traj.add_result("runs.$.summary", 1.0).unwrap();
	assert!(traj.tree().contains("results.runs.run_ALL.summary"));

	let err = traj.add_result("runs.$set.summary", 1.0).unwrap_err();
	assert!(matches!(err, Error::WildcardOutsideRun { .. }));
}

#[test]
fn test_reads_honor_the_pin() {
	let mut traj = explored_xy();
	assert_eq!(traj.get_f64("x").unwrap(), 1.0);

	traj.pin(2).unwrap();
	assert_eq!(traj.get_f64("x").unwrap(), 3.0);
	assert_eq!(traj.get_f64("y").unwrap(), 8.0);

	traj.unpin();
	assert_eq!(traj.get_f64("x").unwrap(), 1.0);
}

#[test]
fn test_reading_locks_the_parameter() {
	let mut traj = explored_xy();
	let _ = traj.get_value("x").unwrap();
	assert!(traj.parameter("x").unwrap().is_locked());

	let err = traj.parameter_mut("x").unwrap().set(9.0).unwrap_err();
	assert!(matches!(err, Error::ParameterLocked { .. }));
}

#[test]
fn test_get_or_falls_back_on_missing() {
	let mut traj = explored_xy();
	let value = traj.get_or("parameters.missing", 5.0).unwrap();
	assert_eq!(value, ParamValue::from(5.0));

	// Present leaves win over the fallback.
	let value = traj.get_or("x", 5.0).unwrap();
	assert_eq!(value, ParamValue::from(1.0));
}

#[test]
fn test_get_from_runs_collects_per_run_values() {
	let mut traj = explored_xy();
	for k in 0..3 {
		traj.pin(k).unwrap();
		let x = traj.get_f64("x").unwrap();
		traj.add_result("z", x * 10.0).unwrap();
	}
	traj.unpin();

	let by_run = traj.get_from_runs("z");
	assert_eq!(by_run.len(), 3);
	assert_eq!(by_run[&0], ParamValue::from(10.0));
	assert_eq!(by_run[&2], ParamValue::from(30.0));
}

#[test]
fn test_links_resolve_transparently() {
	let mut traj = explored_xy();
	traj.add_link("results.shortcuts", "best_x", "parameters.x").unwrap();

	let id = traj.find("results.shortcuts.best_x").unwrap();
	assert_eq!(traj.tree().node(id).full_name(), "parameters.x");
}

#[test]
fn test_annotations_round_trip_in_memory() {
	let mut traj = explored_xy();
	traj.annotations_mut("parameters.x").unwrap().set("unit", "meters");

	let annotations = traj.annotations("parameters.x").unwrap();
	assert_eq!(
		annotations.get("unit"),
		Some(&serde_json::Value::String("meters".to_string()))
	);
}

#[test]
fn test_remove_items_only_touches_memory() {
	let mut traj = explored_xy();
	traj.add_result("scratch", 0.0).unwrap();
	traj.remove_items(&["results.scratch"], false).unwrap();
	assert!(!traj.tree().contains("results.scratch"));
}

#[test]
fn test_preset_overrides_on_add() {
	let mut traj = Trajectory::new("presets");
	traj.preset("x", 99.0).unwrap();
	traj.add_parameter("x", 1.0).unwrap();
	assert_eq!(traj.get_f64("x").unwrap(), 99.0);

	// Nothing left pending once consumed.
	traj.begin_run_phase().unwrap();
}

#[test]
fn test_run_view_hides_other_runs() {
	let mut traj = explored_xy();
	for k in 0..2 {
		traj.pin(k).unwrap();
		traj.add_result("z", k as f64).unwrap();
	}

	traj.pin(0).unwrap();
	let err = traj.find_in_memory("results.runs.run_00000001.z").unwrap_err();
	assert!(matches!(err, Error::NotFound { .. }));

	let id = traj.find_in_memory("results.z").unwrap();
	assert_eq!(
		traj.tree().node(id).full_name(),
		"results.runs.run_00000000.z"
	);
}

#[test]
fn test_value_equality_is_exact() {
	assert_ne!(Value::Int(1), Value::Uint(1));
	assert_eq!(
		ParamValue::from(Value::float_array([1.0, 2.0])),
		ParamValue::from(Value::float_array([1.0, 2.0]))
	);
}
