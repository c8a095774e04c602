// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Storage for sweep trajectories: a SQLite-backed archive service and
//! the wrappers that make it safe under parallel workers.

pub use archive::{Archive, ArchiveOptions, LoadMode, LoadPlan, StoreMode};
pub use error::{Error, Result};
pub use loader::ArchiveLoader;
pub use report::{RunReport, RunStatus, TrajectoryInfo};
pub use service::StorageService;
pub use wrapper::{DirectService, LockService, PipeHub, QueueWriter, WrapMode, WrappedStorage};

mod archive;
mod error;
mod loader;
mod report;
mod schema;
mod service;
mod wrapper;
