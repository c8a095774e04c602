// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

/// Errors of the archive service and its wrappers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The archive backend failed.
	#[error("archive backend: {0}")]
	Backend(#[from] rusqlite::Error),

	/// A persisted node differs from memory and overwrite was not
	/// requested.
	#[error("store conflict on `{path}`: persisted node differs from memory")]
	StoreConflict { path: String },

	/// The named trajectory is not in the archive.
	#[error("trajectory `{name}` not found in archive")]
	UnknownTrajectory { name: String },

	/// The archive was written by an incompatible schema version.
	#[error("archive schema version {found} is not supported (expected {expected})")]
	SchemaVersion { found: i64, expected: i64 },

	/// The writer behind a queue or pipe wrapper is gone.
	#[error("storage writer disconnected")]
	WriterDisconnected,

	/// A payload could not be encoded or decoded.
	#[error("payload codec: {0}")]
	Codec(#[from] postcard::Error),

	/// Annotation maps are stored as JSON.
	#[error("annotation codec: {0}")]
	Annotations(#[from] serde_json::Error),

	/// Compression of a payload blob failed.
	#[error("compression: {0}")]
	Compression(#[from] std::io::Error),

	/// Tree-level failure while splicing loaded nodes.
	#[error(transparent)]
	Core(#[from] sweep_core::Error),
}

impl From<Error> for sweep_core::Error {
	fn from(error: Error) -> Self {
		match error {
			Error::Core(inner) => inner,
			other => sweep_core::Error::Backend {
				reason: other.to_string(),
			},
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;
