// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! The trajectory tree: an arena of groups and leaves addressed by id,
//! with links kept in a side table so ownership stays strictly
//! hierarchical.

pub use annotations::{ANNOTATION_SOFT_CAP, Annotations};

mod annotations;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
	Error, Result,
	leaf::{Parameter, ParameterVariant, ResultLeaf},
	naming::check_segment,
};

/// Arena slot handle. Stable for the lifetime of the tree; removed nodes
/// leave tombstones behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
	fn index(self) -> usize {
		self.0 as usize
	}
}

/// Node kind as stored in archive metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
	Group,
	ScalarParameter,
	ArrayParameter,
	PickleParameter,
	Result,
	Link,
}

impl NodeKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			NodeKind::Group => "group",
			NodeKind::ScalarParameter => "scalar-parameter",
			NodeKind::ArrayParameter => "array-parameter",
			NodeKind::PickleParameter => "pickle-parameter",
			NodeKind::Result => "result",
			NodeKind::Link => "link",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"group" => Some(NodeKind::Group),
			"scalar-parameter" => Some(NodeKind::ScalarParameter),
			"array-parameter" => Some(NodeKind::ArrayParameter),
			"pickle-parameter" => Some(NodeKind::PickleParameter),
			"result" => Some(NodeKind::Result),
			"link" => Some(NodeKind::Link),
			_ => None,
		}
	}

	pub fn is_leaf(&self) -> bool {
		matches!(
			self,
			NodeKind::ScalarParameter
				| NodeKind::ArrayParameter | NodeKind::PickleParameter
				| NodeKind::Result
		)
	}
}

/// A node together with its annotations, as it travels between the
/// tree and the storage service.
#[derive(Clone, Debug)]
pub struct NodeRecord {
	pub node: Node,
	pub annotations: Option<Annotations>,
}

impl NodeRecord {
	pub fn bare(node: Node) -> Self {
		Self {
			node,
			annotations: None,
		}
	}
}

/// A named child slot of a group: either an owned node or a link into
/// another part of the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Child {
	Owned(NodeId),
	Link,
}

/// A non-terminal node. Groups have no data of their own.
#[derive(Clone, Debug)]
pub struct Group {
	name: String,
	full_name: String,
	comment: Option<String>,
	children: IndexMap<String, Child>,
}

impl Group {
	fn new(name: String, full_name: String) -> Self {
		Self {
			name,
			full_name,
			comment: None,
			children: IndexMap::new(),
		}
	}

	/// Storage support: rebuild a group shell from an archive row.
	pub fn restored(full_name: impl Into<String>, comment: Option<String>) -> Self {
		let full_name = full_name.into();
		let name = full_name.rsplit('.').next().unwrap_or("").to_string();
		Self {
			name,
			full_name,
			comment,
			children: IndexMap::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn full_name(&self) -> &str {
		&self.full_name
	}

	pub fn comment(&self) -> Option<&str> {
		self.comment.as_deref()
	}

	pub fn set_comment(&mut self, comment: impl Into<String>) {
		self.comment = Some(comment.into());
	}

	pub fn child_names(&self) -> impl Iterator<Item = &str> {
		self.children.keys().map(String::as_str)
	}

	pub fn has_child(&self, name: &str) -> bool {
		self.children.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.children.len()
	}

	pub fn is_empty(&self) -> bool {
		self.children.is_empty()
	}
}

/// A tree node: a group or one of the two leaf variants.
#[derive(Clone, Debug)]
pub enum Node {
	Group(Group),
	Parameter(Parameter),
	Result(ResultLeaf),
}

impl Node {
	pub fn kind(&self) -> NodeKind {
		match self {
			Node::Group(_) => NodeKind::Group,
			Node::Parameter(p) => match p.variant() {
				ParameterVariant::Scalar => NodeKind::ScalarParameter,
				ParameterVariant::Array => NodeKind::ArrayParameter,
				ParameterVariant::Pickle => NodeKind::PickleParameter,
			},
			Node::Result(_) => NodeKind::Result,
		}
	}

	pub fn name(&self) -> &str {
		match self {
			Node::Group(g) => g.name(),
			Node::Parameter(p) => p.name(),
			Node::Result(r) => r.name(),
		}
	}

	pub fn full_name(&self) -> &str {
		match self {
			Node::Group(g) => g.full_name(),
			Node::Parameter(p) => p.full_name(),
			Node::Result(r) => r.full_name(),
		}
	}

	pub fn comment(&self) -> Option<&str> {
		match self {
			Node::Group(g) => g.comment(),
			Node::Parameter(p) => p.comment(),
			Node::Result(r) => r.comment(),
		}
	}

	pub fn as_group(&self) -> Option<&Group> {
		match self {
			Node::Group(g) => Some(g),
			_ => None,
		}
	}

	pub fn as_parameter(&self) -> Option<&Parameter> {
		match self {
			Node::Parameter(p) => Some(p),
			_ => None,
		}
	}

	pub fn as_parameter_mut(&mut self) -> Option<&mut Parameter> {
		match self {
			Node::Parameter(p) => Some(p),
			_ => None,
		}
	}

	pub fn as_result(&self) -> Option<&ResultLeaf> {
		match self {
			Node::Result(r) => Some(r),
			_ => None,
		}
	}

	pub fn as_result_mut(&mut self) -> Option<&mut ResultLeaf> {
		match self {
			Node::Result(r) => Some(r),
			_ => None,
		}
	}
}

/// The arena. Slot 0 is the unnamed root group; every other node is
/// reachable from it through exactly one chain of owned children.
#[derive(Clone, Debug)]
pub struct Tree {
	arena: Vec<Option<Node>>,
	by_path: HashMap<String, NodeId>,
	// (owner, link name) -> target full path; never owning.
	links: HashMap<(NodeId, String), String>,
	// leaf short name -> ids, for backwards search.
	terminals: HashMap<String, Vec<NodeId>>,
	// annotations live beside the arena so leaves stay lean.
	annotations: HashMap<NodeId, Annotations>,
}

impl Tree {
	pub fn new() -> Self {
		let root = Group::new(String::new(), String::new());
		Self {
			arena: vec![Some(Node::Group(root))],
			by_path: HashMap::new(),
			links: HashMap::new(),
			terminals: HashMap::new(),
			annotations: HashMap::new(),
		}
	}

	pub fn root(&self) -> NodeId {
		NodeId(0)
	}

	pub fn node(&self, id: NodeId) -> &Node {
		self.arena[id.index()].as_ref().expect("node slot is live")
	}

	pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
		self.arena[id.index()].as_mut().expect("node slot is live")
	}

	pub fn contains(&self, path: &str) -> bool {
		path.is_empty() || self.by_path.contains_key(path)
	}

	/// Direct path lookup; does not follow links.
	pub fn get(&self, path: &str) -> Option<NodeId> {
		if path.is_empty() {
			return Some(self.root());
		}
		self.by_path.get(path).copied()
	}

	fn group(&self, id: NodeId) -> &Group {
		match self.node(id) {
			Node::Group(g) => g,
			_ => panic!("node is not a group"),
		}
	}

	fn group_mut(&mut self, id: NodeId) -> &mut Group {
		match self.node_mut(id) {
			Node::Group(g) => g,
			_ => panic!("node is not a group"),
		}
	}

	fn child_full_name(&self, parent: NodeId, name: &str) -> String {
		let parent_name = self.group(parent).full_name();
		if parent_name.is_empty() {
			name.to_string()
		} else {
			format!("{}.{}", parent_name, name)
		}
	}

	/// Resolve a named child of a group, following one link hop.
	pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
		match self.node(parent) {
			Node::Group(g) => match g.children.get(name)? {
				Child::Owned(id) => Some(*id),
				Child::Link => {
					let target = self.links.get(&(parent, name.to_string()))?;
					self.get(target)
				}
			},
			_ => None,
		}
	}

	/// Child entry without link resolution; `None` for leaves.
	pub fn child_entry(&self, parent: NodeId, name: &str) -> Option<Child> {
		self.node(parent).as_group()?.children.get(name).copied()
	}

	/// Create all missing intermediate groups along a dotted path and
	/// return the final group.
	pub fn ensure_group(&mut self, path: &str) -> Result<NodeId> {
		if path.is_empty() {
			return Ok(self.root());
		}
		let mut current = self.root();
		for segment in path.split('.') {
			check_segment(segment)?;
			current = match self.child_entry(current, segment) {
				Some(Child::Owned(id)) => match self.node(id) {
					Node::Group(_) => id,
					_ => {
						return Err(Error::NameCollision {
							parent: self.group(current).full_name().to_string(),
							name: segment.to_string(),
						});
					}
				},
				Some(Child::Link) => {
					return Err(Error::NameCollision {
						parent: self.group(current).full_name().to_string(),
						name: segment.to_string(),
					});
				}
				None => {
					let full = self.child_full_name(current, segment);
					let node = Node::Group(Group::new(segment.to_string(), full.clone()));
					let id = self.push(node, full);
					self.group_mut(current).children.insert(segment.to_string(), Child::Owned(id));
					id
				}
			};
		}
		Ok(current)
	}

	fn push(&mut self, node: Node, full_name: String) -> NodeId {
		let id = NodeId(self.arena.len() as u32);
		self.arena.push(Some(node));
		self.by_path.insert(full_name, id);
		id
	}

	fn split_path(path: &str) -> (&str, &str) {
		match path.rfind('.') {
			Some(pos) => (&path[..pos], &path[pos + 1..]),
			None => ("", path),
		}
	}

	/// Insert a parameter leaf at a dotted path, creating intermediate
	/// groups; sibling names must be unique.
	pub fn insert_parameter(&mut self, path: &str, mut leaf: Parameter) -> Result<NodeId> {
		let (parent_path, name) = Self::split_path(path);
		check_segment(name)?;
		let parent = self.ensure_group(parent_path)?;
		self.check_collision(parent, name)?;

		let full = self.child_full_name(parent, name);
		leaf.assign_names(name.to_string(), full.clone());
		let id = self.push(Node::Parameter(leaf), full);
		self.group_mut(parent).children.insert(name.to_string(), Child::Owned(id));
		self.terminals.entry(name.to_string()).or_default().push(id);
		Ok(id)
	}

	/// Insert a result leaf at a dotted path, creating intermediate
	/// groups; sibling names must be unique.
	pub fn insert_result(&mut self, path: &str, mut leaf: ResultLeaf) -> Result<NodeId> {
		let (parent_path, name) = Self::split_path(path);
		check_segment(name)?;
		let parent = self.ensure_group(parent_path)?;
		self.check_collision(parent, name)?;

		let full = self.child_full_name(parent, name);
		leaf.assign_names(name.to_string(), full.clone());
		let id = self.push(Node::Result(leaf), full);
		self.group_mut(parent).children.insert(name.to_string(), Child::Owned(id));
		self.terminals.entry(name.to_string()).or_default().push(id);
		Ok(id)
	}

	fn check_collision(&self, parent: NodeId, name: &str) -> Result<()> {
		if self.group(parent).has_child(name) {
			return Err(Error::NameCollision {
				parent: self.group(parent).full_name().to_string(),
				name: name.to_string(),
			});
		}
		Ok(())
	}

	/// Install a link from a group to a node elsewhere in the tree.
	pub fn insert_link(&mut self, owner_path: &str, link_name: &str, target_path: &str) -> Result<()> {
		check_segment(link_name)?;
		if !self.contains(target_path) {
			return Err(Error::NotFound {
				path: target_path.to_string(),
			});
		}
		let owner = self.ensure_group(owner_path)?;
		self.check_collision(owner, link_name)?;
		self.group_mut(owner).children.insert(link_name.to_string(), Child::Link);
		self.links.insert((owner, link_name.to_string()), target_path.to_string());
		Ok(())
	}

	pub fn link_target(&self, owner: NodeId, link_name: &str) -> Option<&str> {
		self.links.get(&(owner, link_name.to_string())).map(String::as_str)
	}

	/// Remove a child subtree from memory. Links into the removed
	/// subtree become dangling and resolve to nothing afterwards.
	pub fn remove(&mut self, path: &str, recursive: bool) -> Result<()> {
		let id = self.get(path).ok_or_else(|| Error::NotFound {
			path: path.to_string(),
		})?;
		if id == self.root() {
			return Err(Error::InvalidName {
				name: path.to_string(),
				reason: "cannot remove the root".to_string(),
			});
		}
		if let Node::Group(g) = self.node(id) {
			if !g.is_empty() && !recursive {
				return Err(Error::InvalidName {
					name: path.to_string(),
					reason: "group is not empty, removal needs recursive".to_string(),
				});
			}
		}

		let (parent_path, name) = Self::split_path(path);
		if let Some(parent) = self.get(parent_path) {
			self.group_mut(parent).children.shift_remove(name);
		}
		self.remove_subtree(id);
		Ok(())
	}

	fn remove_subtree(&mut self, id: NodeId) {
		let mut stack = vec![id];
		while let Some(current) = stack.pop() {
			if let Node::Group(g) = self.node(current) {
				for (name, child) in g.children.clone() {
					match child {
						Child::Owned(child_id) => stack.push(child_id),
						Child::Link => {
							self.links.remove(&(current, name));
						}
					}
				}
			}
			let node = self.arena[current.index()].take().expect("node slot is live");
			self.by_path.remove(node.full_name());
			self.annotations.remove(&current);
			if node.kind().is_leaf() {
				if let Some(ids) = self.terminals.get_mut(node.name()) {
					ids.retain(|&i| i != current);
				}
			}
		}
	}

	pub fn annotations(&self, id: NodeId) -> Option<&Annotations> {
		self.annotations.get(&id)
	}

	pub fn annotations_mut(&mut self, id: NodeId) -> &mut Annotations {
		self.annotations.entry(id).or_default()
	}

	/// Depth-first iteration in insertion order. Links are descended but
	/// a node already visited is not entered twice.
	pub fn iter_nodes(&self, start: NodeId, recursive: bool) -> Vec<NodeId> {
		let mut visited = HashSet::new();
		let mut out = Vec::new();
		self.dfs(start, recursive, &mut visited, &mut out);
		out
	}

	fn dfs(&self, id: NodeId, recursive: bool, visited: &mut HashSet<NodeId>, out: &mut Vec<NodeId>) {
		if !visited.insert(id) {
			return;
		}
		if let Node::Group(g) = self.node(id) {
			let names: Vec<String> = g.children.keys().cloned().collect();
			for name in names {
				if let Some(child) = self.child(id, &name) {
					if visited.contains(&child) {
						continue;
					}
					out.push(child);
					if recursive {
						self.dfs(child, recursive, visited, out);
					} else {
						visited.insert(child);
					}
				}
			}
		}
	}

	/// All leaves below `start`, DFS order.
	pub fn iter_leaves(&self, start: NodeId) -> Vec<NodeId> {
		self.iter_nodes(start, true).into_iter().filter(|&id| self.node(id).kind().is_leaf()).collect()
	}

	/// Leaf ids bearing a short name, for backwards search.
	pub fn terminals(&self, name: &str) -> &[NodeId] {
		self.terminals.get(name).map(Vec::as_slice).unwrap_or(&[])
	}

	/// All links in the tree as `(owner path, link name, target path)`.
	pub fn all_links(&self) -> Vec<(String, String, String)> {
		self.links
			.iter()
			.map(|((owner, name), target)| {
				(self.node(*owner).full_name().to_string(), name.clone(), target.clone())
			})
			.collect()
	}

	pub fn len(&self) -> usize {
		self.arena.iter().filter(|slot| slot.is_some()).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() <= 1
	}
}

impl Default for Tree {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Value;

	fn param(value: Value) -> Parameter {
		let mut p = Parameter::fitting(&value.clone().into());
		p.set(value).unwrap();
		p
	}

	#[test]
	fn test_ensure_group_creates_intermediates() {
		let mut tree = Tree::new();
		let id = tree.ensure_group("a.b.c").unwrap();
		assert_eq!(tree.node(id).full_name(), "a.b.c");
		assert!(tree.contains("a"));
		assert!(tree.contains("a.b"));
	}

	#[test]
	fn test_sibling_name_collision() {
		let mut tree = Tree::new();
		tree.insert_parameter("parameters.x", param(Value::Int(1))).unwrap();
		let err = tree.insert_parameter("parameters.x", param(Value::Int(2))).unwrap_err();
		assert!(matches!(err, Error::NameCollision { .. }));
	}

	#[test]
	fn test_leaf_blocks_group_extension() {
		let mut tree = Tree::new();
		tree.insert_parameter("parameters.x", param(Value::Int(1))).unwrap();
		let err = tree.ensure_group("parameters.x.y").unwrap_err();
		assert!(matches!(err, Error::NameCollision { .. }));
	}

	#[test]
	fn test_link_resolves_to_target() {
		let mut tree = Tree::new();
		let target = tree.insert_parameter("parameters.x", param(Value::Int(1))).unwrap();
		tree.insert_link("results.shortcuts", "x_link", "parameters.x").unwrap();

		let owner = tree.get("results.shortcuts").unwrap();
		assert_eq!(tree.child(owner, "x_link"), Some(target));
	}

	#[test]
	fn test_iteration_does_not_revisit_through_links() {
		let mut tree = Tree::new();
		tree.insert_parameter("parameters.x", param(Value::Int(1))).unwrap();
		// A link cycle: group a links back to the root of parameters.
		tree.insert_link("parameters.a", "loop", "parameters").unwrap();

		let nodes = tree.iter_nodes(tree.root(), true);
		let x = tree.get("parameters.x").unwrap();
		assert_eq!(nodes.iter().filter(|&&id| id == x).count(), 1);
	}

	#[test]
	fn test_remove_recursive_clears_index() {
		let mut tree = Tree::new();
		tree.insert_parameter("parameters.sub.x", param(Value::Int(1))).unwrap();
		tree.remove("parameters.sub", true).unwrap();

		assert!(!tree.contains("parameters.sub"));
		assert!(!tree.contains("parameters.sub.x"));
		assert!(tree.terminals("x").is_empty());
	}

	#[test]
	fn test_remove_nonempty_group_needs_recursive() {
		let mut tree = Tree::new();
		tree.insert_parameter("parameters.sub.x", param(Value::Int(1))).unwrap();
		assert!(tree.remove("parameters.sub", false).is_err());
	}
}
