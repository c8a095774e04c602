// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use indexmap::IndexMap;
use sweep_core::{MergePolicy, NodeRecord, ParamValue, Parameter, ResultLeaf, Trajectory, Value};
use sweep_storage::{Archive, ArchiveOptions, LoadMode, LoadPlan, StoreMode};
use sweep_testing::sample_trajectory;
use tempfile::TempDir;

fn archive(dir: &TempDir) -> Archive {
	Archive::open(&dir.path().join("experiment.db"), ArchiveOptions::default()).unwrap()
}

#[test]
fn test_store_load_roundtrip() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);

	let traj = sample_trajectory("sample");
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();

	let mut loaded = archive.load_trajectory("sample", &LoadPlan::data()).unwrap();
	assert_eq!(loaded.comment(), Some("roundtrip fixture"));
	assert_eq!(loaded.length(), 4);
	assert_eq!(loaded.explored_names(), ["parameters.x", "parameters.y"]);

	let x = loaded.parameter("x").unwrap();
	assert_eq!(x.comment(), Some("x axis"));
	assert_eq!(x.range().unwrap().len(), 4);
	assert_eq!(
		loaded.get_value("config.seed").unwrap(),
		ParamValue::from(42i64)
	);
}

#[test]
fn test_store_is_idempotent() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);

	let traj = sample_trajectory("sample");
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();
	archive.store_trajectory(&traj, StoreMode::Append).unwrap();

	let loaded = archive.load_trajectory("sample", &LoadPlan::data()).unwrap();
	assert_eq!(loaded.length(), 4);
}

#[test]
fn test_append_conflict_without_overwrite() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);

	let mut traj = Trajectory::new("conflict");
	traj.add_parameter("x", 1.0).unwrap();
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();

	// Mutate the persisted leaf in memory, then re-store.
	traj.parameter_mut("x").unwrap().unlock();
	traj.parameter_mut("x").unwrap().set(2.0).unwrap();
	let err = archive.store_trajectory(&traj, StoreMode::Append).unwrap_err();
	assert!(matches!(err, sweep_storage::Error::StoreConflict { .. }));

	// An explicit overwrite replaces the node.
	archive.store_trajectory(&traj, StoreMode::OverwriteNode).unwrap();
	let mut loaded = archive.load_trajectory("conflict", &LoadPlan::data()).unwrap();
	assert_eq!(loaded.get_value("x").unwrap(), ParamValue::from(2.0));
}

#[test]
fn test_skeleton_load_keeps_structure_without_data() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);

	archive.store_trajectory(&sample_trajectory("sample"), StoreMode::Init).unwrap();

	let mut loaded = archive.load_trajectory("sample", &LoadPlan::skeleton()).unwrap();
	assert!(loaded.tree().contains("parameters.x"));
	let x = loaded.parameter("x").unwrap();
	assert!(x.is_empty());
}

#[test]
fn test_partial_plan_skips_branches() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);
	archive.store_trajectory(&sample_trajectory("sample"), StoreMode::Init).unwrap();

	let plan = LoadPlan {
		config: LoadMode::Nothing,
		parameters: LoadMode::Data,
		derived_parameters: LoadMode::Nothing,
		results: LoadMode::Nothing,
	};
	let loaded = archive.load_trajectory("sample", &plan).unwrap();
	assert!(loaded.tree().contains("parameters.x"));
	assert!(!loaded.tree().contains("config.seed"));
}

#[test]
fn test_array_range_pool_roundtrip() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);

	let a = ParamValue::from(Value::float_array([1.0, 2.0, 3.0]));
	let b = ParamValue::from(Value::float_array([4.0, 5.0, 6.0]));

	let mut traj = Trajectory::new("arrays");
	traj.add_parameter("kernel", Value::float_array([0.0, 0.0, 0.0])).unwrap();
	let mut mapping = IndexMap::new();
	mapping.insert(
		"kernel".to_string(),
		vec![a.clone(), b.clone(), a.clone(), a.clone(), b.clone()],
	);
	traj.explore(mapping).unwrap();
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();

	let mut loaded = archive.load_trajectory("arrays", &LoadPlan::data()).unwrap();
	let range = loaded.parameter("kernel").unwrap().range().unwrap().to_vec();
	assert_eq!(range, vec![a.clone(), b.clone(), a.clone(), a, b]);
}

#[test]
fn test_compressed_payloads_roundtrip() {
	let dir = TempDir::new().unwrap();
	let options = ArchiveOptions {
		compression_level: 6,
		..Default::default()
	};
	let mut archive =
		Archive::open(&dir.path().join("packed.db"), options.clone()).unwrap();

	let mut traj = Trajectory::new("packed");
	traj.add_parameter("wave", Value::float_array((0..512).map(|i| i as f64 * 0.25)))
		.unwrap();
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();

	let archive = Archive::open(&dir.path().join("packed.db"), options).unwrap();
	let mut loaded = archive.load_trajectory("packed", &LoadPlan::data()).unwrap();
	let wave = loaded.get_value("wave").unwrap();
	assert_eq!(
		wave,
		ParamValue::from(Value::float_array((0..512).map(|i| i as f64 * 0.25)))
	);
}

#[test]
fn test_delete_item_removes_subtree() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);
	archive.store_trajectory(&sample_trajectory("sample"), StoreMode::Init).unwrap();

	let removed = archive.delete_item("sample", "parameters").unwrap();
	assert!(removed >= 2);

	let loaded = archive.load_trajectory("sample", &LoadPlan::data()).unwrap();
	assert!(!loaded.tree().contains("parameters.x"));
	assert!(loaded.tree().contains("config.seed"));
}

#[test]
fn test_run_records_store_and_merge() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);
	let mut traj = sample_trajectory("sample");
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();

	// Simulate a completed run adding one result.
	traj.begin_run_phase().unwrap();
	traj.pin(1).unwrap();
	traj.add_result("z", 7.0).unwrap();
	let id = traj.find_in_memory("results.runs.run_00000001.z").unwrap();
	let record = NodeRecord::bare(traj.tree().node(id).clone());
	traj.unpin();

	archive.store_records("sample", &[record], StoreMode::Append).unwrap();

	let mut loaded = archive.load_trajectory("sample", &LoadPlan::data()).unwrap();
	assert_eq!(
		loaded.get_value("results.runs.run_00000001.z").unwrap(),
		ParamValue::from(7.0)
	);
}

#[test]
fn test_merged_trajectory_roundtrips() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);

	let mut own = sample_trajectory("sample");

	let mut mapping = IndexMap::new();
	mapping.insert(
		"x".to_string(),
		vec![ParamValue::from(9.0), ParamValue::from(1.0)],
	);
	mapping.insert(
		"y".to_string(),
		vec![ParamValue::from(9.0), ParamValue::from(6.0)],
	);
	let mut other = sample_trajectory("sample");
	other.rename("other");
	other.explore(mapping).unwrap();

	own.merge(&other, MergePolicy::DiscardEqual, None).unwrap();
	assert_eq!(own.length(), 5);

	archive.store_trajectory(&own, StoreMode::Init).unwrap();
	let loaded = archive.load_trajectory("sample", &LoadPlan::data()).unwrap();
	assert_eq!(loaded.length(), 5);
}

#[test]
fn test_result_leaf_items_roundtrip() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);

	let mut traj = Trajectory::new("bags");
	let leaf = ResultLeaf::new().with_comment("statistics");
	let bag = traj.add_result_leaf("stats", leaf).unwrap();
	bag.push(Value::float(0.5)).unwrap();
	bag.push_named("count", Value::Int(12)).unwrap();
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();

	let mut loaded = archive.load_trajectory("bags", &LoadPlan::data()).unwrap();
	let stats = loaded.result("stats").unwrap();
	assert_eq!(stats.get().unwrap(), &ParamValue::from(0.5));
	assert_eq!(stats.get_named("count").unwrap(), &ParamValue::from(Value::Int(12)));
	assert_eq!(stats.comment(), Some("statistics"));
}

#[test]
fn test_pickle_parameter_roundtrip() {
	let dir = TempDir::new().unwrap();
	let mut archive = archive(&dir);

	let mut traj = Trajectory::new("opaque");
	let blob = ParamValue::opaque(&vec![(1u8, 2u8), (3u8, 4u8)]).unwrap();
	traj.add_parameter_leaf("blob", Parameter::pickle(), Some(blob.clone())).unwrap();
	archive.store_trajectory(&traj, StoreMode::Init).unwrap();

	let mut loaded = archive.load_trajectory("opaque", &LoadPlan::data()).unwrap();
	let value = loaded.get_value("blob").unwrap();
	assert_eq!(value, blob);
	let pairs: Vec<(u8, u8)> = value.decode_opaque().unwrap();
	assert_eq!(pairs, vec![(1, 2), (3, 4)]);
}
