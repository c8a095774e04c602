// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! The sweep execution environment: parameter-space fan-out across
//! parallel workers, cap-based admission, graceful exit, crash resume
//! and the post-processing loop.

pub use config::EnvironmentConfig;
pub use environment::{
	Environment, Expansion, GRACEFUL_EXIT_CODE, PostProcResult, RunSummary,
};
pub use error::{Error, Result, RunError};
pub use worker::RunResult;

mod caps;
mod config;
mod environment;
mod error;
mod resume;
mod signal;
mod worker;
