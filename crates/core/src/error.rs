// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

/// Errors raised by the trajectory container and its leaves.
///
/// Contract violations fail early at the call site; lookup misses on hot
/// paths are reported through `Option` returns where the API allows it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Two children of the same group may not share a name.
	#[error("name collision: `{name}` already exists under `{parent}`")]
	NameCollision { parent: String, name: String },

	/// A leaf of the wrong variant was added under a reserved branch.
	#[error("branch `{branch}` does not accept {kind} leaves")]
	BranchType { branch: String, kind: &'static str },

	/// A `$set` wildcard (or similar) needs a run index that is not there.
	#[error("wildcard `{token}` used outside a run")]
	WildcardOutsideRun { token: String },

	/// `parameters` and `config` are immutable once the run phase started.
	#[error("branch `{branch}` is frozen during the run phase")]
	Frozen { branch: String },

	/// A name is empty or contains a reserved token.
	#[error("invalid name `{name}`: {reason}")]
	InvalidName { name: String, reason: String },

	/// The parameter variant rejected a value or range element.
	#[error("type mismatch on `{name}`: expected {expected}, got {actual}")]
	TypeMismatch { name: String, expected: String, actual: String },

	/// Attempt to mutate a parameter after a consumer read its value.
	#[error("parameter `{name}` is locked")]
	ParameterLocked { name: String },

	/// A range does not match the trajectory-wide exploration length.
	#[error("range of `{name}` has length {actual}, expected {expected}")]
	RangeLengthMismatch { name: String, expected: usize, actual: usize },

	/// An expansion left out an already explored parameter.
	#[error("inconsistent expansion: `{name}` {reason}")]
	InconsistentExpansion { name: String, reason: String },

	/// `explore` was called where `expand` was intended.
	#[error("trajectory is already explored, parameter `{name}` is not part of the new exploration")]
	AlreadyExplored { name: String },

	/// A preset never matched an added parameter.
	#[error("preset for `{name}` was never consumed")]
	PresetNotConsumed { name: String },

	/// Natural-naming lookup found nothing.
	#[error("`{path}` not found")]
	NotFound { path: String },

	/// Natural-naming lookup matched more than one node at minimal depth.
	#[error("`{path}` is not unique, candidates: {candidates:?}")]
	NotUnique { path: String, candidates: Vec<String> },

	/// The archive backend failed while auto-loading.
	#[error("backend unavailable: {reason}")]
	Backend { reason: String },

	/// A leaf payload could not be encoded or decoded.
	#[error("serialization failed: {0}")]
	Serialization(#[from] postcard::Error),
}
