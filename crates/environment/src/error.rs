// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

/// Errors of the execution environment.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Constructor input was invalid.
	#[error("configuration: {reason}")]
	Config { reason: String },

	/// Post-processing aborted the experiment.
	#[error("post-processing failed: {reason}")]
	PostProcessing { reason: String },

	/// Filesystem bookkeeping (resume markers, archive directory)
	/// failed.
	#[error("i/o: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Core(#[from] sweep_core::Error),

	/// Storage errors are not caught; the environment surfaces them
	/// after attempting a graceful shutdown.
	#[error(transparent)]
	Storage(#[from] sweep_storage::Error),
}

impl Error {
	pub fn config(reason: impl Into<String>) -> Self {
		Error::Config {
			reason: reason.into(),
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error type user run and post-processing functions may return.
pub type RunError = Box<dyn std::error::Error + Send + Sync + 'static>;
