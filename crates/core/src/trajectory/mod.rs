// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! The trajectory: root of the tree, owner of the four reserved branches
//! and of the exploration length.

pub use explore::{ExpansionPolicy, cartesian_product};
pub use merge::{MergePolicy, MergeReport};

mod explore;
mod merge;

use std::{
	sync::Arc,
	time::{SystemTime, UNIX_EPOCH},
};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
	Error, Result,
	leaf::{ParamValue, Parameter, ResultLeaf},
	naming::{RUNS_GROUP, expand_wildcards, is_run_segment, run_name},
	resolve::{ResolveOptions, resolve},
	tree::{Annotations, Node, NodeId, NodeRecord, Tree},
};

/// The four reserved top-level branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Branch {
	Config,
	Parameters,
	DerivedParameters,
	Results,
}

impl Branch {
	pub const ALL: [Branch; 4] = [
		Branch::Config,
		Branch::Parameters,
		Branch::DerivedParameters,
		Branch::Results,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Branch::Config => "config",
			Branch::Parameters => "parameters",
			Branch::DerivedParameters => "derived_parameters",
			Branch::Results => "results",
		}
	}

	pub fn parse(segment: &str) -> Option<Self> {
		match segment {
			"config" => Some(Branch::Config),
			"parameters" => Some(Branch::Parameters),
			"derived_parameters" => Some(Branch::DerivedParameters),
			"results" => Some(Branch::Results),
			_ => None,
		}
	}

	/// Branches holding Parameter leaves.
	pub fn holds_parameters(&self) -> bool {
		!matches!(self, Branch::Results)
	}
}

/// Hook through which a trajectory pulls missing nodes out of an archive.
/// Implemented by the storage service.
pub trait NodeLoader: Send + Sync {
	/// Load the subtree rooted at `path`, skeleton or with data.
	/// Returns an empty vector when the archive knows nothing there.
	fn load_subtree(&self, path: &str, with_data: bool) -> Result<Vec<NodeRecord>>;
}

/// The root tree container plus its identity in the archive.
#[derive(Clone)]
pub struct Trajectory {
	name: String,
	comment: Option<String>,
	created_at: u64,
	pub(crate) tree: Tree,
	// Exploration length N; all ranges share it.
	pub(crate) length: usize,
	// Full names of explored parameters, in exploration order.
	pub(crate) explored: Vec<String>,
	// Pinned run index, `None` for the default view.
	idx: Option<usize>,
	presets: IndexMap<String, ParamValue>,
	loader: Option<Arc<dyn NodeLoader>>,
	auto_load_data: bool,
	run_phase: bool,
	pub(crate) expanded: bool,
}

impl std::fmt::Debug for Trajectory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Trajectory")
			.field("name", &self.name)
			.field("length", &self.length)
			.field("explored", &self.explored)
			.field("idx", &self.idx)
			.finish_non_exhaustive()
	}
}

impl Trajectory {
	pub fn new(name: impl Into<String>) -> Self {
		let mut tree = Tree::new();
		for branch in Branch::ALL {
			tree.ensure_group(branch.as_str()).expect("reserved branch names are valid");
		}
		Self {
			name: name.into(),
			comment: None,
			created_at: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
			tree,
			length: 0,
			explored: Vec::new(),
			idx: None,
			presets: IndexMap::new(),
			loader: None,
			auto_load_data: true,
			run_phase: false,
			expanded: false,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Environment support: rename when `add_time` appends a timestamp.
	pub fn rename(&mut self, name: impl Into<String>) {
		self.name = name.into();
	}

	pub fn comment(&self) -> Option<&str> {
		self.comment.as_deref()
	}

	pub fn set_comment(&mut self, comment: impl Into<String>) {
		self.comment = Some(comment.into());
	}

	pub fn created_at(&self) -> u64 {
		self.created_at
	}

	/// Storage support: restore identity fields when reopening a
	/// trajectory from an archive.
	pub fn restore_metadata(&mut self, created_at: u64, length: usize, expanded: bool) {
		self.created_at = created_at;
		self.length = length;
		self.expanded = expanded;
	}

	/// Storage support: restore the explored set in exploration order.
	pub fn restore_explored(&mut self, names: Vec<String>) {
		self.explored = names;
	}

	/// Exploration length N.
	pub fn length(&self) -> usize {
		self.length
	}

	pub fn is_explored(&self) -> bool {
		!self.explored.is_empty()
	}

	/// Full names of explored parameters, in exploration order.
	pub fn explored_names(&self) -> &[String] {
		&self.explored
	}

	pub fn was_expanded(&self) -> bool {
		self.expanded
	}

	pub(crate) fn mark_expanded(&mut self) {
		self.expanded = true;
	}

	pub fn tree(&self) -> &Tree {
		&self.tree
	}

	pub fn set_loader(&mut self, loader: Arc<dyn NodeLoader>) {
		self.loader = Some(loader);
	}

	/// Whether auto-loading pulls data or only skeletons.
	pub fn set_auto_load_data(&mut self, with_data: bool) {
		self.auto_load_data = with_data;
	}

	// --- pinning -----------------------------------------------------

	/// Pin the trajectory to run `k`: explored parameters advertise
	/// `range[k]`, other run subtrees become invisible.
	pub fn pin(&mut self, index: usize) -> Result<()> {
		if index >= self.length {
			return Err(Error::NotFound {
				path: format!("run index {} of {}", index, self.length),
			});
		}
		self.idx = Some(index);
		Ok(())
	}

	/// Restore the default view.
	pub fn unpin(&mut self) {
		self.idx = None;
	}

	pub fn run_index(&self) -> Option<usize> {
		self.idx
	}

	/// Canonical name of the pinned run, if any.
	pub fn current_run_name(&self) -> Option<String> {
		self.idx.map(run_name)
	}

	// --- run phase gate ----------------------------------------------

	/// Freeze `parameters` and `config` and check presets were all
	/// consumed. Called by the environment when the run phase starts.
	pub fn begin_run_phase(&mut self) -> Result<()> {
		if let Some(name) = self.presets.keys().next() {
			return Err(Error::PresetNotConsumed {
				name: name.clone(),
			});
		}
		self.run_phase = true;
		Ok(())
	}

	pub fn in_run_phase(&self) -> bool {
		self.run_phase
	}

	fn check_branch_open(&self, branch: Branch) -> Result<()> {
		if self.run_phase && matches!(branch, Branch::Parameters | Branch::Config) {
			return Err(Error::Frozen {
				branch: branch.as_str().to_string(),
			});
		}
		Ok(())
	}

	// --- names -------------------------------------------------------

	/// Normalize a user-supplied name into a full path: substitute
	/// wildcards, prepend the default branch, and splice the run
	/// subtree in while pinned.
	fn full_path(&self, raw: &str, default_branch: Branch) -> Result<(Branch, String)> {
		let expanded = expand_wildcards(raw, self.idx)?;
		let mut segments: Vec<String> = expanded.split('.').map(str::to_string).collect();

		let branch = match Branch::parse(&segments[0]) {
			Some(branch) => branch,
			None => {
				segments.insert(0, default_branch.as_str().to_string());
				default_branch
			}
		};

		// Data added during a run without an explicit run segment goes
		// under the canonical per-run subtree. Applies to results
		// and derived parameters; config and parameters never splice.
		if let Some(index) = self.idx {
			let has_run_segment = segments.iter().any(|s| is_run_segment(s));
			let spliced = matches!(branch, Branch::Results | Branch::DerivedParameters);
			if !has_run_segment && spliced {
				segments.insert(1, RUNS_GROUP.to_string());
				segments.insert(2, run_name(index));
			}
		}

		Ok((branch, segments.join(".")))
	}

	// --- additions ---------------------------------------------------

	/// Add a parameter with a default value, picking the fitting variant.
	pub fn add_parameter(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<&mut Parameter> {
		let value = value.into();
		let leaf = Parameter::fitting(&value);
		self.add_parameter_leaf(name, leaf, Some(value))
	}

	/// Add a pre-built parameter leaf; `value` installs the default.
	pub fn add_parameter_leaf(
		&mut self,
		name: &str,
		leaf: Parameter,
		value: Option<ParamValue>,
	) -> Result<&mut Parameter> {
		let (branch, path) = self.full_path(name, Branch::Parameters)?;
		if !branch.holds_parameters() {
			return Err(Error::BranchType {
				branch: branch.as_str().to_string(),
				kind: "parameter",
			});
		}
		self.check_branch_open(branch)?;

		let id = self.tree.insert_parameter(&path, leaf)?;
		if let Some(value) = value {
			self.tree
				.node_mut(id)
				.as_parameter_mut()
				.expect("just inserted a parameter")
				.set(value)?;
		}

		// A matching preset overrides the default right after addition.
		if let Some(preset) = self.presets.shift_remove(&path) {
			debug!(parameter = %path, "applying preset");
			self.tree
				.node_mut(id)
				.as_parameter_mut()
				.expect("just inserted a parameter")
				.set(preset)?;
		}

		Ok(self.tree.node_mut(id).as_parameter_mut().expect("just inserted a parameter"))
	}

	/// Add a result leaf and push a first item.
	pub fn add_result(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<&mut ResultLeaf> {
		let leaf = self.add_result_leaf(name, ResultLeaf::new())?;
		leaf.push(value)?;
		Ok(leaf)
	}

	/// Add a pre-built result leaf.
	pub fn add_result_leaf(&mut self, name: &str, leaf: ResultLeaf) -> Result<&mut ResultLeaf> {
		let (branch, path) = self.full_path(name, Branch::Results)?;
		if branch.holds_parameters() {
			return Err(Error::BranchType {
				branch: branch.as_str().to_string(),
				kind: "result",
			});
		}

		let id = self.tree.insert_result(&path, leaf)?;
		Ok(self.tree.node_mut(id).as_result_mut().expect("just inserted a result"))
	}

	/// Add a group node explicitly (intermediates come for free).
	pub fn add_group(&mut self, name: &str) -> Result<NodeId> {
		let expanded = expand_wildcards(name, self.idx)?;
		self.tree.ensure_group(&expanded)
	}

	/// Install a link; the target is resolved with natural naming first.
	pub fn add_link(&mut self, owner: &str, link_name: &str, target: &str) -> Result<()> {
		let target_id = self.find(target)?;
		let target_path = self.tree.node(target_id).full_name().to_string();
		let (_, owner_path) = self.full_path(owner, Branch::Results)?;
		self.tree.insert_link(&owner_path, link_name, &target_path)
	}

	/// Storage support: reinstall a link from archive rows, target path
	/// taken verbatim.
	pub fn restore_link(&mut self, owner: &str, link_name: &str, target: &str) -> Result<()> {
		self.tree.insert_link(owner, link_name, target)
	}

	/// Record a deferred default override. Applied when the parameter is
	/// added; if it already exists the override applies immediately.
	pub fn preset(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<()> {
		let (_, path) = self.full_path(name, Branch::Parameters)?;
		if let Some(id) = self.tree.get(&path) {
			return self
				.tree
				.node_mut(id)
				.as_parameter_mut()
				.ok_or_else(|| Error::BranchType {
					branch: path.clone(),
					kind: "parameter",
				})?
				.set(value.into());
		}
		self.presets.insert(path, value.into());
		Ok(())
	}

	// --- lookup ------------------------------------------------------

	/// Resolve with default options: shortcuts on, auto-load on.
	pub fn find(&mut self, path: &str) -> Result<NodeId> {
		self.find_with(path, ResolveOptions {
			pinned: self.idx,
			..Default::default()
		})
	}

	/// Resolve with explicit options, consulting the archive on a miss.
	pub fn find_with(&mut self, path: &str, mut options: ResolveOptions) -> Result<NodeId> {
		options.pinned = self.idx;
		match resolve(&self.tree, self.tree.root(), path, options) {
			Err(Error::NotFound { .. }) if self.loader.is_some() => {
				self.auto_load(path)?;
				resolve(&self.tree, self.tree.root(), path, options)
			}
			other => other,
		}
	}

	/// Resolve without touching the archive.
	pub fn find_in_memory(&self, path: &str) -> Result<NodeId> {
		resolve(&self.tree, self.tree.root(), path, ResolveOptions {
			pinned: self.idx,
			..Default::default()
		})
	}

	fn auto_load(&mut self, path: &str) -> Result<()> {
		let loader = self.loader.clone().expect("caller checked the loader");
		debug!(%path, "auto-loading from archive");
		let records = loader.load_subtree(path, self.auto_load_data)?;
		self.splice(records, false)
	}

	/// Splice loaded nodes into the tree. With `overwrite`, existing
	/// leaves are replaced; otherwise present nodes stay untouched
	/// (hollow skeleton leaves always give way to data).
	pub fn splice(&mut self, mut records: Vec<NodeRecord>, overwrite: bool) -> Result<()> {
		// Parents first so that group comments land on fresh groups.
		records.sort_by_key(|record| record.node.full_name().split('.').count());
		for record in records {
			let NodeRecord {
				node,
				annotations,
			} = record;
			let path = node.full_name().to_string();
			match node {
				Node::Group(g) => {
					let id = self.tree.ensure_group(&path)?;
					if let (Some(comment), Node::Group(target)) =
						(g.comment(), self.tree.node_mut(id))
					{
						if target.comment().is_none() {
							target.set_comment(comment.to_string());
						}
					}
				}
				Node::Parameter(p) => {
					if self.tree.contains(&path) {
						// A skeleton leaf gives way to loaded data.
						let hollow = self
							.tree
							.get(&path)
							.map(|id| match self.tree.node(id) {
								Node::Parameter(existing) => existing.is_empty(),
								_ => false,
							})
							.unwrap_or(false);
						if overwrite || (hollow && !p.is_empty()) {
							self.tree.remove(&path, true)?;
						} else {
							continue;
						}
					}
					self.tree.insert_parameter(&path, p)?;
				}
				Node::Result(r) => {
					if self.tree.contains(&path) {
						let hollow = self
							.tree
							.get(&path)
							.map(|id| match self.tree.node(id) {
								Node::Result(existing) => existing.is_empty(),
								_ => false,
							})
							.unwrap_or(false);
						if overwrite || (hollow && !r.is_empty()) {
							self.tree.remove(&path, true)?;
						} else {
							continue;
						}
					}
					self.tree.insert_result(&path, r)?;
				}
			}
			if let Some(annotations) = annotations {
				if let Some(id) = self.tree.get(&path) {
					let target = self.tree.annotations_mut(id);
					if target.is_empty() {
						*target = annotations;
					}
				}
			}
		}
		Ok(())
	}

	/// Typed accessor: the parameter at `path`.
	pub fn parameter(&mut self, path: &str) -> Result<&Parameter> {
		let id = self.find(path)?;
		self.tree.node(id).as_parameter().ok_or_else(|| Error::BranchType {
			branch: path.to_string(),
			kind: "parameter",
		})
	}

	/// Typed accessor: mutable parameter, for re-configuration before
	/// the run phase.
	pub fn parameter_mut(&mut self, path: &str) -> Result<&mut Parameter> {
		let id = self.find(path)?;
		let branch = Branch::parse(self.tree.node(id).full_name().split('.').next().unwrap_or(""));
		if let Some(branch) = branch {
			self.check_branch_open(branch)?;
		}
		self.tree.node_mut(id).as_parameter_mut().ok_or_else(|| Error::BranchType {
			branch: path.to_string(),
			kind: "parameter",
		})
	}

	/// Typed accessor: the result leaf at `path`.
	pub fn result(&mut self, path: &str) -> Result<&ResultLeaf> {
		let id = self.find(path)?;
		self.tree.node(id).as_result().ok_or_else(|| Error::BranchType {
			branch: path.to_string(),
			kind: "result",
		})
	}

	/// The normal data read: resolves, honors the pin, locks parameters
	/// (fast access semantics).
	pub fn get_value(&mut self, path: &str) -> Result<ParamValue> {
		let idx = self.idx;
		let id = self.find(path)?;
		match self.tree.node(id) {
			Node::Parameter(p) => match idx {
				Some(k) => Ok(p.value_at(k)?.clone()),
				None => Ok(p.value()?.clone()),
			},
			Node::Result(r) => match r.single_item() {
				Some(value) => Ok(value.clone()),
				None => r.get().cloned(),
			},
			Node::Group(g) => Err(Error::NotFound {
				path: g.full_name().to_string(),
			}),
		}
	}

	/// `get_value` with a fallback instead of `NotFound`.
	pub fn get_or(&mut self, path: &str, default: impl Into<ParamValue>) -> Result<ParamValue> {
		match self.get_value(path) {
			Err(Error::NotFound { .. }) => Ok(default.into()),
			other => other,
		}
	}

	/// Convenience for numeric run functions.
	pub fn get_f64(&mut self, path: &str) -> Result<f64> {
		let value = self.get_value(path)?;
		value.as_value().and_then(|v| v.as_f64()).ok_or_else(|| Error::TypeMismatch {
			name: path.to_string(),
			expected: "FLOAT".to_string(),
			actual: value.kind_repr(),
		})
	}

	// --- annotations -------------------------------------------------

	pub fn annotations_mut(&mut self, path: &str) -> Result<&mut Annotations> {
		let id = self.find(path)?;
		Ok(self.tree.annotations_mut(id))
	}

	pub fn annotations(&self, path: &str) -> Option<&Annotations> {
		let id = self.find_in_memory(path).ok()?;
		self.tree.annotations(id)
	}

	// --- removal -----------------------------------------------------

	/// Remove nodes from memory only; the archive is untouched.
	pub fn remove_items(&mut self, paths: &[&str], recursive: bool) -> Result<()> {
		for path in paths {
			let id = self.find_in_memory(path)?;
			let full = self.tree.node(id).full_name().to_string();
			self.tree.remove(&full, recursive)?;
		}
		Ok(())
	}
}
