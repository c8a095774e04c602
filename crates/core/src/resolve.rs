// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Natural-naming lookup: aliases, direct walks, breadth-first shortcut
//! search and backwards search over the terminal-name index.

use std::collections::{HashSet, VecDeque};

use crate::{
	Error, Result,
	naming::{RUN_ALL, parse_run_name, run_name},
	tree::{Node, NodeId, Tree},
};

/// Knobs of a single lookup.
#[derive(Clone, Copy, Debug)]
pub struct ResolveOptions {
	/// Allow gaps between tokens (breadth-first shortcut search).
	pub shortcuts: bool,
	/// Look the final token up in the terminal-name index and verify the
	/// preceding tokens walking upward.
	pub backwards: bool,
	/// Run index the trajectory is pinned to; nodes under other run
	/// subtrees are invisible.
	pub pinned: Option<usize>,
}

impl Default for ResolveOptions {
	fn default() -> Self {
		Self {
			shortcuts: true,
			backwards: false,
			pinned: None,
		}
	}
}

/// Expand one token through the alias table. Aliases are applied before
/// any search so that `par.x` cannot shortcut past `parameters`.
fn expand_alias(token: &str, pinned: Option<usize>) -> String {
	match token {
		"par" => "parameters".to_string(),
		"dpar" => "derived_parameters".to_string(),
		"conf" => "config".to_string(),
		"res" => "results".to_string(),
		"crun" => match pinned {
			Some(index) => run_name(index),
			None => RUN_ALL.to_string(),
		},
		other => {
			// r_7 and run_7 normalize to the canonical zero-padded name.
			for prefix in ["r_", "run_"] {
				if let Some(digits) = other.strip_prefix(prefix) {
					if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
						if let Ok(index) = digits.parse::<usize>() {
							return run_name(index);
						}
					}
				}
			}
			other.to_string()
		}
	}
}

fn tokenize(path: &str, pinned: Option<usize>) -> Vec<String> {
	path.split('.').filter(|t| !t.is_empty()).map(|t| expand_alias(t, pinned)).collect()
}

/// A run segment belonging to another run makes a subtree invisible
/// while the trajectory is pinned.
fn visible_segment(segment: &str, pinned: Option<usize>) -> bool {
	match (pinned, parse_run_name(segment)) {
		(Some(pin), Some(run)) => pin == run,
		_ => true,
	}
}

fn node_visible(tree: &Tree, id: NodeId, pinned: Option<usize>) -> bool {
	if pinned.is_none() {
		return true;
	}
	tree.node(id).full_name().split('.').all(|segment| visible_segment(segment, pinned))
}

/// Resolve `path` starting at `start` per the natural-naming contract.
pub fn resolve(tree: &Tree, start: NodeId, path: &str, options: ResolveOptions) -> Result<NodeId> {
	let tokens = tokenize(path, options.pinned);
	if tokens.is_empty() {
		return Ok(start);
	}

	if options.backwards {
		return resolve_backwards(tree, start, path, &tokens, options);
	}

	// Fast path: every token is a direct child in sequence.
	if let Some(id) = walk_direct(tree, start, &tokens) {
		if !node_visible(tree, id, options.pinned) {
			return Err(Error::NotFound {
				path: path.to_string(),
			});
		}
		return Ok(id);
	}

	if !options.shortcuts {
		return Err(Error::NotFound {
			path: path.to_string(),
		});
	}

	search_breadth_first(tree, start, path, &tokens, options)
}

fn walk_direct(tree: &Tree, start: NodeId, tokens: &[String]) -> Option<NodeId> {
	let mut current = start;
	for token in tokens {
		current = tree.child(current, token)?;
	}
	Some(current)
}

/// Breadth-first search matching all tokens in order with gaps allowed.
/// Completion depth is the BFS level; two distinct completions at the
/// minimal level fail with `NotUnique`.
fn search_breadth_first(
	tree: &Tree,
	start: NodeId,
	path: &str,
	tokens: &[String],
	options: ResolveOptions,
) -> Result<NodeId> {
	let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
	let mut visited: HashSet<(NodeId, usize)> = HashSet::new();
	queue.push_back((start, 0));
	visited.insert((start, 0));

	let mut candidates: HashSet<NodeId> = HashSet::new();

	while !queue.is_empty() && candidates.is_empty() {
		// One BFS level per iteration keeps completion depths comparable.
		for _ in 0..queue.len() {
			let (id, matched) = queue.pop_front().expect("level is non-empty");
			let group = match tree.node(id) {
				Node::Group(g) => g,
				_ => continue,
			};
			let names: Vec<String> = group.child_names().map(str::to_string).collect();
			for name in names {
				if !visible_segment(&name, options.pinned) {
					continue;
				}
				let Some(child) = tree.child(id, &name) else {
					continue;
				};
				let advanced = if name == tokens[matched] { matched + 1 } else { matched };
				if advanced == tokens.len() {
					candidates.insert(child);
					continue;
				}
				if visited.insert((child, advanced)) {
					queue.push_back((child, advanced));
				}
			}
		}
	}

	match candidates.len() {
		0 => Err(Error::NotFound {
			path: path.to_string(),
		}),
		1 => Ok(candidates.into_iter().next().expect("one candidate")),
		_ => {
			let mut names: Vec<String> =
				candidates.iter().map(|&id| tree.node(id).full_name().to_string()).collect();
			names.sort();
			Err(Error::NotUnique {
				path: path.to_string(),
				candidates: names,
			})
		}
	}
}

/// Backwards search: look the final token up in the terminal-name index,
/// then verify the preceding tokens appear in order on the path to the
/// root.
fn resolve_backwards(
	tree: &Tree,
	start: NodeId,
	path: &str,
	tokens: &[String],
	options: ResolveOptions,
) -> Result<NodeId> {
	let (last, prefix) = tokens.split_last().expect("tokens are non-empty");
	let start_prefix = tree.node(start).full_name().to_string();

	let mut matches: Vec<NodeId> = Vec::new();
	for &id in tree.terminals(last) {
		let full_name = tree.node(id).full_name();
		if !full_name.starts_with(&start_prefix) {
			continue;
		}
		if !node_visible(tree, id, options.pinned) {
			continue;
		}
		let segments: Vec<&str> = full_name.split('.').collect();
		// Drop the leaf segment itself; prefix tokens must appear in
		// order among the ancestors.
		let ancestors = &segments[..segments.len().saturating_sub(1)];
		let mut needle = prefix.iter();
		let mut current = needle.next();
		for segment in ancestors {
			match current {
				Some(token) if token == segment => current = needle.next(),
				_ => {}
			}
		}
		if current.is_none() {
			matches.push(id);
		}
	}

	match matches.len() {
		0 => Err(Error::NotFound {
			path: path.to_string(),
		}),
		1 => Ok(matches[0]),
		_ => {
			let mut names: Vec<String> =
				matches.iter().map(|&id| tree.node(id).full_name().to_string()).collect();
			names.sort();
			Err(Error::NotUnique {
				path: path.to_string(),
				candidates: names,
			})
		}
	}
}
