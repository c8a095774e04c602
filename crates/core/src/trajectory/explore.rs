// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Exploration: installing ranges, expanding them, and querying the
//! explored parameter space.

use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::{
	Error, Result,
	leaf::ParamValue,
	naming::parse_run_name,
	trajectory::{Branch, Trajectory},
	tree::Node,
};

/// How `expand` treats explored parameters missing from the mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpansionPolicy {
	/// Every explored parameter must appear in the mapping.
	Strict,
	/// Missing parameters repeat their default value over the new tail.
	ExtendWithDefault,
}

/// Build the full cartesian product of the given axes.
///
/// Enumeration is odometer order: the **last** axis cycles fastest. For
/// `[("x", [1,2,3,4]), ("y", [6,7,8])]` point 1 is `(x=1, y=7)`. The
/// order is deterministic and part of the contract.
pub fn cartesian_product(
	axes: Vec<(String, Vec<ParamValue>)>,
) -> IndexMap<String, Vec<ParamValue>> {
	let total: usize = axes.iter().map(|(_, values)| values.len()).product();
	let mut out: IndexMap<String, Vec<ParamValue>> =
		axes.iter().map(|(name, _)| (name.clone(), Vec::with_capacity(total))).collect();

	if total == 0 {
		return out;
	}

	for point in 0..total {
		let mut remainder = point;
		// Decompose right to left so the last axis cycles fastest.
		let mut coordinates = vec![0usize; axes.len()];
		for (slot, (_, values)) in axes.iter().enumerate().rev() {
			coordinates[slot] = remainder % values.len();
			remainder /= values.len();
		}
		for (slot, (name, values)) in axes.iter().enumerate() {
			out[name.as_str()].push(values[coordinates[slot]].clone());
		}
	}
	out
}

impl Trajectory {
	/// Install exploration ranges. All sequences must share one
	/// length `M`, which becomes the trajectory length `N`.
	#[instrument(level = "debug", skip(self, mapping), fields(trajectory = %self.name()))]
	pub fn explore(&mut self, mapping: IndexMap<String, Vec<ParamValue>>) -> Result<()> {
		if self.in_run_phase() {
			return Err(Error::Frozen {
				branch: Branch::Parameters.as_str().to_string(),
			});
		}
		let resolved = self.resolve_exploration(&mapping)?;
		let new_length = Self::common_length(&mapping)?;

		// Re-exploring is fine as long as no other explored parameter
		// is left behind with a range of a different length.
		if self.length > 0 && new_length != self.length {
			for name in &self.explored {
				if !resolved.iter().any(|(_, full)| full == name) {
					return Err(Error::AlreadyExplored {
						name: name.clone(),
					});
				}
			}
		}

		for (key, full) in &resolved {
			let values = mapping.get(key).expect("resolved from mapping").clone();
			let id = self.tree.get(full).expect("resolved to a node");
			self.tree
				.node_mut(id)
				.as_parameter_mut()
				.expect("resolved to a parameter")
				.set_range(values)?;
			if !self.explored.contains(full) {
				self.explored.push(full.clone());
			}
		}
		self.length = new_length;
		debug!(length = self.length, explored = self.explored.len(), "exploration installed");
		Ok(())
	}

	/// Append to existing ranges. Strict policy: the mapping must cover
	/// exactly the explored set.
	pub fn expand(&mut self, mapping: IndexMap<String, Vec<ParamValue>>) -> Result<()> {
		self.expand_with(mapping, ExpansionPolicy::Strict)
	}

	#[instrument(level = "debug", skip(self, mapping), fields(trajectory = %self.name()))]
	pub fn expand_with(
		&mut self,
		mapping: IndexMap<String, Vec<ParamValue>>,
		policy: ExpansionPolicy,
	) -> Result<()> {
		if self.length == 0 {
			// Expanding an unexplored trajectory is a plain exploration.
			let run_phase = self.in_run_phase();
			if run_phase {
				// `explore` refuses during the run phase; expansion is
				// the sanctioned way to grow from post-processing.
				self.run_phase_off_guard(|traj| traj.explore(mapping))?;
				self.mark_expanded();
				return Ok(());
			}
			self.explore(mapping)?;
			self.mark_expanded();
			return Ok(());
		}

		let resolved = self.resolve_exploration(&mapping)?;
		let tail_length = Self::common_length(&mapping)?;

		for (_, full) in &resolved {
			if !self.explored.contains(full) {
				return Err(Error::InconsistentExpansion {
					name: full.clone(),
					reason: "is not explored".to_string(),
				});
			}
		}
		let missing: Vec<String> = self
			.explored
			.iter()
			.filter(|name| !resolved.iter().any(|(_, full)| &full == name))
			.cloned()
			.collect();
		if policy == ExpansionPolicy::Strict {
			if let Some(name) = missing.first() {
				return Err(Error::InconsistentExpansion {
					name: name.clone(),
					reason: "missing from expansion".to_string(),
				});
			}
		}

		for (key, full) in &resolved {
			let tail = mapping.get(key).expect("resolved from mapping").clone();
			let id = self.tree.get(full).expect("resolved to a node");
			let parameter =
				self.tree.node_mut(id).as_parameter_mut().expect("resolved to a parameter");
			// Expansion appends to ranges consumers have read already;
			// the lock protects values, not growth.
			let was_locked = parameter.is_locked();
			parameter.unlock();
			let result = parameter.extend_range(tail);
			if was_locked {
				parameter.lock();
			}
			result?;
		}

		for name in &missing {
			let id = self.tree.get(name).expect("explored names stay resolvable");
			let parameter =
				self.tree.node_mut(id).as_parameter_mut().expect("explored names are parameters");
			let default = parameter.peek().cloned().ok_or_else(|| Error::InconsistentExpansion {
				name: name.clone(),
				reason: "has no default to extend with".to_string(),
			})?;
			let was_locked = parameter.is_locked();
			parameter.unlock();
			let result = parameter.extend_range(vec![default; tail_length]);
			if was_locked {
				parameter.lock();
			}
			result?;
		}

		self.length += tail_length;
		self.mark_expanded();
		debug!(length = self.length, added = tail_length, "exploration expanded");
		Ok(())
	}

	fn run_phase_off_guard<F: FnOnce(&mut Self) -> Result<()>>(&mut self, f: F) -> Result<()> {
		let was = self.in_run_phase();
		self.set_run_phase(false);
		let result = f(self);
		self.set_run_phase(was);
		result
	}

	pub(crate) fn set_run_phase(&mut self, on: bool) {
		self.run_phase = on;
	}

	/// Resolve mapping keys to explored-parameter full names.
	fn resolve_exploration(
		&mut self,
		mapping: &IndexMap<String, Vec<ParamValue>>,
	) -> Result<Vec<(String, String)>> {
		let mut resolved = Vec::with_capacity(mapping.len());
		for key in mapping.keys() {
			let id = self.find(key)?;
			let node = self.tree.node(id);
			let full = node.full_name().to_string();
			if node.as_parameter().is_none() || !full.starts_with(Branch::Parameters.as_str()) {
				return Err(Error::BranchType {
					branch: full,
					kind: "explored parameter",
				});
			}
			resolved.push((key.clone(), full));
		}
		Ok(resolved)
	}

	fn common_length(mapping: &IndexMap<String, Vec<ParamValue>>) -> Result<usize> {
		let mut iter = mapping.iter();
		let (_, first) = iter.next().ok_or_else(|| Error::InvalidName {
			name: String::new(),
			reason: "empty exploration mapping".to_string(),
		})?;
		for (name, values) in iter {
			if values.len() != first.len() {
				return Err(Error::RangeLengthMismatch {
					name: name.clone(),
					expected: first.len(),
					actual: values.len(),
				});
			}
		}
		Ok(first.len())
	}

	/// Run indices whose parameter values satisfy the predicate.
	///
	/// A named parameter without a range never yields an index. The
	/// scan is lazy and costs O(N * k) overall.
	pub fn find_indices<F>(&mut self, names: &[&str], predicate: F) -> Result<impl Iterator<Item = usize>>
	where
		F: Fn(&[ParamValue]) -> bool,
	{
		let mut columns: Vec<Vec<ParamValue>> = Vec::with_capacity(names.len());
		let mut unexplored = false;
		for name in names {
			let id = self.find(name)?;
			let parameter = self.tree.node(id).as_parameter().ok_or_else(|| Error::BranchType {
				branch: name.to_string(),
				kind: "parameter",
			})?;
			match parameter.range() {
				Some(range) => columns.push(range.to_vec()),
				None => unexplored = true,
			}
		}

		let length = if unexplored { 0 } else { self.length };
		Ok((0..length).filter(move |&k| {
			let row: Vec<ParamValue> = columns.iter().map(|column| column[k].clone()).collect();
			predicate(&row)
		}))
	}

	/// Map run index to the leaf named `name` inside each per-run
	/// subtree, scanning `results` and `derived_parameters`.
	pub fn get_from_runs(&self, name: &str) -> IndexMap<usize, ParamValue> {
		let last = name.rsplit('.').next().unwrap_or(name);
		let mut found: IndexMap<usize, ParamValue> = IndexMap::new();

		let mut hits: Vec<(usize, String, ParamValue)> = Vec::new();
		for &id in self.tree.terminals(last) {
			let node = self.tree.node(id);
			let full = node.full_name();
			let Some(run) = full.split('.').find_map(parse_run_name) else {
				continue;
			};
			let value = match node {
				Node::Result(r) => match r.single_item().or_else(|| r.get().ok()) {
					Some(value) => value.clone(),
					None => continue,
				},
				Node::Parameter(p) => match p.peek() {
					Some(value) => value.clone(),
					None => continue,
				},
				Node::Group(_) => continue,
			};
			hits.push((run, full.to_string(), value));
		}

		hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
		for (run, _, value) in hits {
			found.entry(run).or_insert(value);
		}
		found
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Value;

	fn axes(pairs: &[(&str, &[f64])]) -> Vec<(String, Vec<ParamValue>)> {
		pairs.iter()
			.map(|(name, values)| {
				(name.to_string(), values.iter().map(|&v| ParamValue::from(v)).collect())
			})
			.collect()
	}

	#[test]
	fn test_cartesian_product_last_axis_fastest() {
		let product = cartesian_product(axes(&[
			("x", &[1.0, 2.0, 3.0, 4.0]),
			("y", &[6.0, 7.0, 8.0]),
		]));

		assert_eq!(product["x"].len(), 12);
		assert_eq!(product["y"].len(), 12);
		// Point 1: x still at its first value, y advanced once.
		assert_eq!(product["x"][1], ParamValue::from(1.0));
		assert_eq!(product["y"][1], ParamValue::from(7.0));
		// Point 3: x advances after y wrapped.
		assert_eq!(product["x"][3], ParamValue::from(2.0));
		assert_eq!(product["y"][3], ParamValue::from(6.0));
	}

	fn sample() -> Trajectory {
		let mut traj = Trajectory::new("test");
		traj.add_parameter("x", 1.0).unwrap();
		traj.add_parameter("y", 1.0).unwrap();
		traj
	}

	#[test]
	fn test_explore_sets_length() {
		let mut traj = sample();
		traj.explore(cartesian_product(axes(&[
			("x", &[1.0, 2.0]),
			("y", &[6.0, 7.0, 8.0]),
		])))
		.unwrap();
		assert_eq!(traj.length(), 6);
		assert_eq!(traj.explored_names(), ["parameters.x", "parameters.y"]);
	}

	#[test]
	fn test_explore_rejects_unequal_lengths() {
		let mut traj = sample();
		let mut mapping = IndexMap::new();
		mapping.insert("x".to_string(), vec![ParamValue::from(1.0)]);
		mapping.insert("y".to_string(), vec![ParamValue::from(1.0), ParamValue::from(2.0)]);
		assert!(matches!(traj.explore(mapping), Err(Error::RangeLengthMismatch { .. })));
	}

	#[test]
	fn test_explore_left_behind_parameter_fails() {
		let mut traj = sample();
		let mut mapping = IndexMap::new();
		mapping.insert("x".to_string(), vec![ParamValue::from(1.0), ParamValue::from(2.0)]);
		mapping.insert("y".to_string(), vec![ParamValue::from(6.0), ParamValue::from(7.0)]);
		traj.explore(mapping).unwrap();

		let mut partial = IndexMap::new();
		partial.insert("x".to_string(), vec![ParamValue::from(9.0)]);
		assert!(matches!(traj.explore(partial), Err(Error::AlreadyExplored { .. })));
	}

	#[test]
	fn test_expand_appends_and_preserves_prefix() {
		let mut traj = sample();
		let mut mapping = IndexMap::new();
		mapping.insert("x".to_string(), vec![ParamValue::from(1.0), ParamValue::from(2.0)]);
		mapping.insert("y".to_string(), vec![ParamValue::from(6.0), ParamValue::from(7.0)]);
		traj.explore(mapping).unwrap();

		let mut tail = IndexMap::new();
		tail.insert("x".to_string(), vec![ParamValue::from(3.0)]);
		tail.insert("y".to_string(), vec![ParamValue::from(8.0)]);
		traj.expand(tail).unwrap();

		assert_eq!(traj.length(), 3);
		let range = traj.parameter("x").unwrap().range().unwrap().to_vec();
		assert_eq!(range[..2], [ParamValue::from(1.0), ParamValue::from(2.0)]);
		assert_eq!(range[2], ParamValue::from(3.0));
		assert!(traj.was_expanded());
	}

	#[test]
	fn test_expand_strict_rejects_partial_mapping() {
		let mut traj = sample();
		let mut mapping = IndexMap::new();
		mapping.insert("x".to_string(), vec![ParamValue::from(1.0)]);
		mapping.insert("y".to_string(), vec![ParamValue::from(6.0)]);
		traj.explore(mapping).unwrap();

		let mut tail = IndexMap::new();
		tail.insert("x".to_string(), vec![ParamValue::from(2.0)]);
		assert!(matches!(
			traj.expand(tail),
			Err(Error::InconsistentExpansion { .. })
		));
	}

	#[test]
	fn test_expand_default_policy_fills_missing() {
		let mut traj = sample();
		let mut mapping = IndexMap::new();
		mapping.insert("x".to_string(), vec![ParamValue::from(1.0)]);
		mapping.insert("y".to_string(), vec![ParamValue::from(6.0)]);
		traj.explore(mapping).unwrap();

		let mut tail = IndexMap::new();
		tail.insert("x".to_string(), vec![ParamValue::from(2.0), ParamValue::from(3.0)]);
		traj.expand_with(tail, ExpansionPolicy::ExtendWithDefault).unwrap();

		assert_eq!(traj.length(), 3);
		let y = traj.parameter("y").unwrap().range().unwrap().to_vec();
		assert_eq!(y[1..], [ParamValue::from(1.0), ParamValue::from(1.0)]);
	}

	#[test]
	fn test_find_indices_product() {
		let mut traj = sample();
		traj.explore(cartesian_product(axes(&[
			("x", &[1.0, 2.0, 3.0, 4.0]),
			("y", &[6.0, 7.0, 8.0]),
		])))
		.unwrap();

		let indices: Vec<usize> = traj
			.find_indices(&["x", "y"], |row| {
				let x = row[0].as_value().unwrap().as_f64().unwrap();
				let y = row[1].as_value().unwrap().as_f64().unwrap();
				x == 2.0 || y == 8.0
			})
			.unwrap()
			.collect();

		// Last axis fastest: x == 2 covers 3..=5, y == 8 covers 2, 5, 8, 11.
		assert_eq!(indices, vec![2, 3, 4, 5, 8, 11]);
	}

	#[test]
	fn test_find_indices_unexplored_parameter_yields_nothing() {
		let mut traj = sample();
		let mut mapping = IndexMap::new();
		mapping.insert("x".to_string(), vec![ParamValue::from(1.0), ParamValue::from(2.0)]);
		traj.explore(mapping).unwrap();

		let indices: Vec<usize> = traj.find_indices(&["x", "y"], |_| true).unwrap().collect();
		assert!(indices.is_empty());
	}
}
