// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Four interchangeable wrappers that make the single-writer archive
//! safe under N parallel workers. Workers only ever see the
//! `StorageService` trait.

pub use lock::LockService;
pub use none::DirectService;
pub use pipe::PipeHub;
pub use queue::QueueWriter;

mod lock;
mod none;
mod pipe;
mod queue;

use std::{path::Path, sync::Arc};

use parking_lot::Mutex;
use sweep_core::NodeRecord;

use crate::{
	Error, Result,
	archive::{Archive, ArchiveOptions},
	report::RunReport,
	service::StorageService,
};

/// Strategy used to serialize multi-worker archive access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WrapMode {
	/// Direct access; single worker, or the backend's own locking.
	None,
	/// A mutex held across each store call.
	#[default]
	Lock,
	/// One dedicated writer thread consuming a FIFO.
	Queue,
	/// A paired stream per worker; FIFO per worker, none across.
	Pipe,
}

impl WrapMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			WrapMode::None => "none",
			WrapMode::Lock => "lock",
			WrapMode::Queue => "queue",
			WrapMode::Pipe => "pipe",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"none" => Some(WrapMode::None),
			"lock" => Some(WrapMode::Lock),
			"queue" => Some(WrapMode::Queue),
			"pipe" => Some(WrapMode::Pipe),
			_ => None,
		}
	}
}

/// Message consumed by the queue and pipe writer threads.
pub(crate) enum WriteRequest {
	Records {
		trajectory: String,
		records: Vec<NodeRecord>,
	},
	Report {
		trajectory: String,
		report: RunReport,
	},
	Flush(crossbeam_channel::Sender<()>),
}

pub(crate) fn apply_request(archive: &mut Archive, request: WriteRequest) -> Result<()> {
	match request {
		WriteRequest::Records {
			trajectory,
			records,
		} => archive.store_records(&trajectory, &records, crate::archive::StoreMode::Append),
		WriteRequest::Report {
			trajectory,
			report,
		} => archive.store_run_report(&trajectory, &report),
		WriteRequest::Flush(ack) => {
			let _ = ack.send(());
			Ok(())
		}
	}
}

/// First writer error wins; later ones are logged by the writer.
pub(crate) type SharedError = Arc<Mutex<Option<Error>>>;

pub(crate) fn take_error(slot: &SharedError) -> Result<()> {
	match slot.lock().take() {
		Some(error) => Err(error),
		None => Ok(()),
	}
}

/// A wrapped archive: per-worker service endpoints plus the writer
/// lifecycle.
pub struct WrappedStorage {
	endpoints: Vec<Arc<dyn StorageService>>,
	finalizer: Finalizer,
}

enum Finalizer {
	Inline,
	Queue(QueueWriter),
	Pipe(PipeHub),
}

impl WrappedStorage {
	/// Build the wrapper for `workers` parallel workers over the
	/// archive at `path`.
	pub fn create(
		path: &Path,
		options: ArchiveOptions,
		mode: WrapMode,
		workers: usize,
	) -> Result<Self> {
		let workers = workers.max(1);
		match mode {
			WrapMode::None => {
				let service: Arc<dyn StorageService> =
					Arc::new(DirectService::new(path, options));
				Ok(Self {
					endpoints: vec![service; workers],
					finalizer: Finalizer::Inline,
				})
			}
			WrapMode::Lock => {
				let archive = Archive::open(path, options)?;
				let service: Arc<dyn StorageService> = Arc::new(LockService::new(archive));
				Ok(Self {
					endpoints: vec![service; workers],
					finalizer: Finalizer::Inline,
				})
			}
			WrapMode::Queue => {
				let archive = Archive::open(path, options)?;
				let writer = QueueWriter::spawn(archive);
				let service: Arc<dyn StorageService> = Arc::new(writer.service());
				Ok(Self {
					endpoints: vec![service; workers],
					finalizer: Finalizer::Queue(writer),
				})
			}
			WrapMode::Pipe => {
				let archive = Archive::open(path, options)?;
				let hub = PipeHub::spawn(archive, workers);
				let endpoints = hub.services();
				Ok(Self {
					endpoints,
					finalizer: Finalizer::Pipe(hub),
				})
			}
		}
	}

	/// The service endpoint of worker `index`.
	pub fn endpoint(&self, index: usize) -> Arc<dyn StorageService> {
		Arc::clone(&self.endpoints[index % self.endpoints.len()])
	}

	/// Drain queues, stop writer threads and surface the first error.
	pub fn finalize(self) -> Result<()> {
		match self.finalizer {
			Finalizer::Inline => Ok(()),
			Finalizer::Queue(writer) => writer.shutdown(),
			Finalizer::Pipe(hub) => hub.shutdown(),
		}
	}
}
