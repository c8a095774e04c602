// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Merging one trajectory into another: same parameter schema, point
//! comparison over the explored space, per-run subtree adoption.

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::{
	Error, Result,
	leaf::ParamValue,
	naming::{parse_run_name, run_name, run_set_name},
	trajectory::{Branch, Trajectory},
	tree::Node,
};

/// What to do with a point of `other` that equals a point of `self`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
	/// Keep both points; the duplicate gets a fresh index.
	KeepBoth,
	/// Keep the point of `self`, drop the duplicate.
	KeepSelf,
	/// Keep the parameter point of `self` but adopt the per-run
	/// results of `other` for it.
	KeepOther,
	/// Synonym of `KeepSelf` in effect: duplicates are discarded.
	DiscardEqual,
}

/// Outcome of a merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
	pub appended: usize,
	pub skipped: usize,
	pub replaced: usize,
	pub new_length: usize,
}

impl Trajectory {
	/// Merge `other` into `self`. Both trajectories must carry the same
	/// parameter schema and explored set.
	#[instrument(level = "debug", skip(self, other), fields(own = %self.name(), other = %other.name()))]
	pub fn merge(
		&mut self,
		other: &Trajectory,
		policy: MergePolicy,
		trial_parameter: Option<&str>,
	) -> Result<MergeReport> {
		self.check_same_schema(other)?;

		let own_rows = self.explored_rows();
		let other_rows = other_explored_rows(other, &self.explored)?;

		let mut seen: HashMap<Vec<ParamValue>, usize> = HashMap::new();
		for (index, row) in own_rows.iter().enumerate() {
			seen.entry(row.clone()).or_insert(index);
		}

		let mut report = MergeReport {
			new_length: self.length,
			..Default::default()
		};

		for (j, row) in other_rows.iter().enumerate() {
			match seen.get(row) {
				Some(&existing) => match policy {
					MergePolicy::KeepBoth => {
						let target = self.append_point(other, row, j)?;
						debug!(from = j, to = target, "kept duplicate point");
						report.appended += 1;
					}
					MergePolicy::KeepSelf | MergePolicy::DiscardEqual => {
						report.skipped += 1;
					}
					MergePolicy::KeepOther => {
						self.replace_run_results(other, j, existing)?;
						report.replaced += 1;
					}
				},
				None => {
					self.append_point(other, row, j)?;
					report.appended += 1;
				}
			}
		}

		report.new_length = self.length;

		if let Some(name) = trial_parameter {
			self.renumber_trial_parameter(name)?;
		}

		Ok(report)
	}

	fn check_same_schema(&mut self, other: &Trajectory) -> Result<()> {
		if self.explored.is_empty() || other.explored.is_empty() {
			return Err(Error::InconsistentExpansion {
				name: self.name().to_string(),
				reason: "merge needs two explored trajectories".to_string(),
			});
		}

		let own = parameter_schema(self);
		let theirs = parameter_schema(other);
		for (name, variant) in &own {
			match theirs.get(name) {
				Some(other_variant) if other_variant == variant => {}
				Some(_) => {
					return Err(Error::InconsistentExpansion {
						name: name.clone(),
						reason: "parameter variant differs between trajectories".to_string(),
					});
				}
				None => {
					return Err(Error::InconsistentExpansion {
						name: name.clone(),
						reason: "missing in the other trajectory".to_string(),
					});
				}
			}
		}
		for name in theirs.keys() {
			if !own.contains_key(name) {
				return Err(Error::InconsistentExpansion {
					name: name.clone(),
					reason: "missing in this trajectory".to_string(),
				});
			}
		}

		let mut own_explored = self.explored.clone();
		let mut other_explored = other.explored.clone();
		own_explored.sort();
		other_explored.sort();
		if own_explored != other_explored {
			return Err(Error::InconsistentExpansion {
				name: self.name().to_string(),
				reason: "explored parameter sets differ".to_string(),
			});
		}
		Ok(())
	}

	/// Rows of explored values, one per run index, column order
	/// following `self.explored`.
	fn explored_rows(&self) -> Vec<Vec<ParamValue>> {
		let columns: Vec<&[ParamValue]> = self
			.explored
			.iter()
			.map(|name| {
				let id = self.tree.get(name).expect("explored names stay resolvable");
				self.tree
					.node(id)
					.as_parameter()
					.expect("explored names are parameters")
					.range()
					.expect("explored parameters have ranges")
			})
			.collect();
		(0..self.length).map(|k| columns.iter().map(|column| column[k].clone()).collect()).collect()
	}

	/// Append one parameter point of `other` and adopt its per-run
	/// subtrees; returns the new index.
	fn append_point(&mut self, other: &Trajectory, row: &[ParamValue], from: usize) -> Result<usize> {
		let target = self.length;
		let explored = self.explored.clone();
		for (column, name) in explored.iter().enumerate() {
			let id = self.tree.get(name).expect("explored names stay resolvable");
			let parameter =
				self.tree.node_mut(id).as_parameter_mut().expect("explored names are parameters");
			let was_locked = parameter.is_locked();
			parameter.unlock();
			let result = parameter.extend_range(vec![row[column].clone()]);
			if was_locked {
				parameter.lock();
			}
			result?;
		}
		self.length += 1;
		self.adopt_run_nodes(other, from, target)?;
		Ok(target)
	}

	/// Swap the per-run results of run `target` for the ones of
	/// `other`'s run `from`.
	fn replace_run_results(&mut self, other: &Trajectory, from: usize, target: usize) -> Result<()> {
		for branch in [Branch::Results, Branch::DerivedParameters] {
			// Plain and bucketed placements of the run subtree.
			let candidates = [
				format!("{}.runs.{}", branch.as_str(), run_name(target)),
				format!("{}.runs.{}.{}", branch.as_str(), run_set_name(target), run_name(target)),
			];
			for path in candidates {
				if self.tree.contains(&path) {
					self.tree.remove(&path, true)?;
				}
			}
		}
		self.adopt_run_nodes(other, from, target)?;
		Ok(())
	}

	/// Copy the leaves of `other`'s run `from` in as run `target`,
	/// rewriting run and bucket segments.
	fn adopt_run_nodes(&mut self, other: &Trajectory, from: usize, target: usize) -> Result<usize> {
		let mut adopted = 0;
		for id in other.tree.iter_leaves(other.tree.root()) {
			let node = other.tree.node(id);
			let full = node.full_name();
			let in_run = full.split('.').any(|s| parse_run_name(s) == Some(from));
			if !in_run {
				continue;
			}
			let branch = full.split('.').next().and_then(Branch::parse);
			if !matches!(branch, Some(Branch::Results | Branch::DerivedParameters)) {
				continue;
			}

			let new_path: Vec<String> = full
				.split('.')
				.map(|segment| {
					if parse_run_name(segment) == Some(from) {
						run_name(target)
					} else if segment.starts_with("run_set_") {
						run_set_name(target)
					} else {
						segment.to_string()
					}
				})
				.collect();
			let new_path = new_path.join(".");
			if self.tree.contains(&new_path) {
				continue;
			}

			match node {
				Node::Parameter(p) => {
					self.tree.insert_parameter(&new_path, p.clone())?;
				}
				Node::Result(r) => {
					self.tree.insert_result(&new_path, r.clone())?;
				}
				Node::Group(_) => {}
			}
			adopted += 1;
		}
		Ok(adopted)
	}

	/// Renumber a designated integer parameter 0..N-1 across the merged
	/// range.
	fn renumber_trial_parameter(&mut self, name: &str) -> Result<()> {
		let length = self.length;
		let id = self.find(name)?;
		let full = self.tree.node(id).full_name().to_string();
		let parameter = self.tree.node_mut(id).as_parameter_mut().ok_or_else(|| Error::BranchType {
			branch: full.clone(),
			kind: "parameter",
		})?;
		let was_locked = parameter.is_locked();
		parameter.unlock();
		let result =
			parameter.set_range((0..length).map(|i| ParamValue::from(i as i64)).collect());
		if was_locked {
			parameter.lock();
		}
		result?;
		if !self.explored.contains(&full) {
			self.explored.push(full);
		}
		Ok(())
	}
}

fn parameter_schema(traj: &Trajectory) -> HashMap<String, crate::leaf::ParameterVariant> {
	let mut schema = HashMap::new();
	if let Some(id) = traj.tree.get(Branch::Parameters.as_str()) {
		for leaf in traj.tree.iter_leaves(id) {
			if let Node::Parameter(p) = traj.tree.node(leaf) {
				schema.insert(p.full_name().to_string(), p.variant());
			}
		}
	}
	schema
}

/// Rows of `other` in the column order of `own_explored`.
fn other_explored_rows(other: &Trajectory, own_explored: &[String]) -> Result<Vec<Vec<ParamValue>>> {
	let mut columns: Vec<&[ParamValue]> = Vec::with_capacity(own_explored.len());
	for name in own_explored {
		let id = other.tree.get(name).ok_or_else(|| Error::InconsistentExpansion {
			name: name.clone(),
			reason: "missing in the other trajectory".to_string(),
		})?;
		let range = other
			.tree
			.node(id)
			.as_parameter()
			.and_then(|p| p.range())
			.ok_or_else(|| Error::InconsistentExpansion {
				name: name.clone(),
				reason: "is not explored in the other trajectory".to_string(),
			})?;
		columns.push(range);
	}
	Ok((0..other.length).map(|k| columns.iter().map(|column| column[k].clone()).collect()).collect())
}

#[cfg(test)]
mod tests {
	use indexmap::IndexMap;

	use super::*;

	fn explored(values: &[(f64, f64)]) -> Trajectory {
		let mut traj = Trajectory::new("merge-test");
		traj.add_parameter("x", 0.0).unwrap();
		traj.add_parameter("y", 0.0).unwrap();
		let mut mapping = IndexMap::new();
		mapping.insert("x".to_string(), values.iter().map(|&(x, _)| ParamValue::from(x)).collect());
		mapping.insert("y".to_string(), values.iter().map(|&(_, y)| ParamValue::from(y)).collect());
		traj.explore(mapping).unwrap();
		traj
	}

	fn with_result(mut traj: Trajectory, run: usize, value: f64) -> Trajectory {
		traj.pin(run).unwrap();
		traj.add_result("z", value).unwrap();
		traj.unpin();
		traj
	}

	#[test]
	fn test_merge_appends_new_points() {
		let mut own = explored(&[(1.0, 1.0), (2.0, 2.0)]);
		let other = explored(&[(3.0, 3.0)]);

		let report = own.merge(&other, MergePolicy::KeepBoth, None).unwrap();
		assert_eq!(report.appended, 1);
		assert_eq!(own.length(), 3);
	}

	#[test]
	fn test_merge_discards_equal_points() {
		let mut own = explored(&[(1.0, 1.0), (2.0, 2.0)]);
		let other = explored(&[(2.0, 2.0), (4.0, 4.0)]);

		let report = own.merge(&other, MergePolicy::DiscardEqual, None).unwrap();
		assert_eq!(report.appended, 1);
		assert_eq!(report.skipped, 1);
		assert_eq!(own.length(), 3);
	}

	#[test]
	fn test_merge_adopts_run_results_under_new_index() {
		let mut own = explored(&[(1.0, 1.0)]);
		let other = with_result(explored(&[(9.0, 9.0)]), 0, 81.0);

		own.merge(&other, MergePolicy::KeepBoth, None).unwrap();
		assert_eq!(own.length(), 2);
		assert!(own.tree().contains("results.runs.run_00000001.z"));
	}

	#[test]
	fn test_merge_keep_other_replaces_results() {
		let mut own = with_result(explored(&[(1.0, 1.0)]), 0, 1.0);
		let other = with_result(explored(&[(1.0, 1.0)]), 0, 42.0);

		let report = own.merge(&other, MergePolicy::KeepOther, None).unwrap();
		assert_eq!(report.replaced, 1);
		assert_eq!(own.length(), 1);

		let value = own.get_value("results.runs.run_00000000.z").unwrap();
		assert_eq!(value, ParamValue::from(42.0));
	}

	#[test]
	fn test_merge_schema_mismatch_fails() {
		let mut own = explored(&[(1.0, 1.0)]);
		let mut other = Trajectory::new("other");
		other.add_parameter("x", 0.0).unwrap();
		let mut mapping = IndexMap::new();
		mapping.insert("x".to_string(), vec![ParamValue::from(1.0)]);
		other.explore(mapping).unwrap();

		assert!(own.merge(&other, MergePolicy::KeepBoth, None).is_err());
	}

	#[test]
	fn test_trial_parameter_renumbered() {
		let mut own = explored(&[(1.0, 1.0), (2.0, 2.0)]);
		own.add_parameter("trial", 0i64).unwrap();
		let other = explored(&[(3.0, 3.0)]);

		// `other` has no trial parameter; schemas must match, so add it.
		let mut other = other;
		other.add_parameter("trial", 0i64).unwrap();

		own.merge(&other, MergePolicy::KeepBoth, Some("trial")).unwrap();
		let range = own.parameter("trial").unwrap().range().unwrap().to_vec();
		assert_eq!(range, vec![
			ParamValue::from(0i64),
			ParamValue::from(1i64),
			ParamValue::from(2i64)
		]);
	}
}
