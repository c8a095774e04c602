// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::{
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Instant,
};

use crate::{
	ParamValue, Result, ResultLeaf, Trajectory,
	leaf::Parameter,
	naming::{parse_run_name, run_name},
	tree::NodeRecord,
};

/// The per-run view handed to the user function: a trajectory snapshot
/// pinned to one point of the parameter space.
///
/// Explored parameters advertise `range[k]` through the normal read
/// path; additions are rewritten under the per-run subtree; adding
/// parameters or config fails.
pub struct RunContext {
	trajectory: Trajectory,
	index: usize,
	cancelled: Arc<AtomicBool>,
	deadline: Option<Instant>,
}

impl RunContext {
	pub fn new(
		mut snapshot: Trajectory,
		index: usize,
		cancelled: Arc<AtomicBool>,
		deadline: Option<Instant>,
	) -> Result<Self> {
		snapshot.begin_run_phase()?;
		snapshot.pin(index)?;
		Ok(Self {
			trajectory: snapshot,
			index,
			cancelled,
			deadline,
		})
	}

	pub fn index(&self) -> usize {
		self.index
	}

	pub fn run_name(&self) -> String {
		run_name(self.index)
	}

	/// Cooperative cancellation: true once the environment asked for a
	/// graceful stop or the per-run deadline passed.
	pub fn should_stop(&self) -> bool {
		if self.cancelled.load(Ordering::Relaxed) {
			return true;
		}
		self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
	}

	pub fn deadline_exceeded(&self) -> bool {
		self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
	}

	// --- reads -------------------------------------------------------

	pub fn get_value(&mut self, path: &str) -> Result<ParamValue> {
		self.trajectory.get_value(path)
	}

	pub fn get_f64(&mut self, path: &str) -> Result<f64> {
		self.trajectory.get_f64(path)
	}

	pub fn get_or(&mut self, path: &str, default: impl Into<ParamValue>) -> Result<ParamValue> {
		self.trajectory.get_or(path, default)
	}

	// --- additions ---------------------------------------------------

	pub fn add_result(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<&mut ResultLeaf> {
		self.trajectory.add_result(name, value)
	}

	pub fn add_result_leaf(&mut self, name: &str, leaf: ResultLeaf) -> Result<&mut ResultLeaf> {
		self.trajectory.add_result_leaf(name, leaf)
	}

	/// Derived parameters may still be added during a run; they land
	/// under the per-run subtree like results.
	pub fn add_derived_parameter(
		&mut self,
		name: &str,
		value: impl Into<ParamValue>,
	) -> Result<&mut Parameter> {
		let value = value.into();
		let name = if name.split('.').next() == Some("derived_parameters") {
			name.to_string()
		} else {
			format!("derived_parameters.{}", name)
		};
		let leaf = Parameter::fitting(&value);
		self.trajectory.add_parameter_leaf(&name, leaf, Some(value))
	}

	/// The underlying pinned trajectory, for read-mostly inspection.
	pub fn trajectory(&self) -> &Trajectory {
		&self.trajectory
	}

	pub fn trajectory_mut(&mut self) -> &mut Trajectory {
		&mut self.trajectory
	}

	/// Collect the leaves this run produced, for persistence at run
	/// completion.
	pub fn run_nodes(&self) -> Vec<NodeRecord> {
		let tree = self.trajectory.tree();
		tree.iter_leaves(tree.root())
			.into_iter()
			.filter(|&id| {
				tree.node(id)
					.full_name()
					.split('.')
					.any(|segment| parse_run_name(segment) == Some(self.index))
			})
			.map(|id| NodeRecord {
				node: tree.node(id).clone(),
				annotations: tree.annotations(id).cloned(),
			})
			.collect()
	}

	pub fn into_trajectory(self) -> Trajectory {
		self.trajectory
	}
}

#[cfg(test)]
mod tests {
	use indexmap::IndexMap;

	use super::*;
	use crate::Error;

	fn context() -> RunContext {
		let mut traj = Trajectory::new("ctx-test");
		traj.add_parameter("x", 1.0).unwrap();
		let mut mapping = IndexMap::new();
		mapping.insert(
			"x".to_string(),
			vec![ParamValue::from(1.0), ParamValue::from(2.0), ParamValue::from(3.0)],
		);
		traj.explore(mapping).unwrap();
		RunContext::new(traj, 1, Arc::new(AtomicBool::new(false)), None).unwrap()
	}

	#[test]
	fn test_explored_parameter_advertises_range_value() {
		let mut ctx = context();
		assert_eq!(ctx.get_f64("x").unwrap(), 2.0);
	}

	#[test]
	fn test_results_land_under_run_subtree() {
		let mut ctx = context();
		ctx.add_result("z", 4.0).unwrap();
		assert!(ctx.trajectory().tree().contains("results.runs.run_00000001.z"));
	}

	#[test]
	fn test_adding_parameters_is_rejected() {
		let mut ctx = context();
		let err = ctx.trajectory_mut().add_parameter("late", 1.0).unwrap_err();
		assert!(matches!(err, Error::Frozen { .. }));
	}

	#[test]
	fn test_run_nodes_collects_own_run_only() {
		let mut ctx = context();
		ctx.add_result("z", 4.0).unwrap();
		ctx.add_derived_parameter("scaled", 8.0).unwrap();

		let records = ctx.run_nodes();
		let names: Vec<&str> = records.iter().map(|r| r.node.full_name()).collect();
		assert_eq!(names, vec![
			"derived_parameters.runs.run_00000001.scaled",
			"results.runs.run_00000001.z"
		]);
	}
}
