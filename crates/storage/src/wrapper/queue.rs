// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use sweep_core::NodeRecord;
use tracing::error;

use crate::{
	Error, Result, archive::Archive, report::RunReport, service::StorageService,
	wrapper::{SharedError, WriteRequest, apply_request, take_error},
};

/// The `queue` wrapper: a dedicated writer thread owns the archive and
/// drains a FIFO. Workers never touch the file.
pub struct QueueWriter {
	sender: Sender<WriteRequest>,
	handle: JoinHandle<()>,
	first_error: SharedError,
}

impl QueueWriter {
	pub fn spawn(archive: Archive) -> Self {
		let (sender, receiver) = unbounded::<WriteRequest>();
		let first_error = SharedError::default();
		let writer_error = first_error.clone();
		let handle = std::thread::Builder::new()
			.name("sweep-storage-writer".to_string())
			.spawn(move || writer_loop(archive, receiver, writer_error))
			.expect("spawning the storage writer thread");
		Self {
			sender,
			handle,
			first_error,
		}
	}

	pub(crate) fn service(&self) -> QueueService {
		QueueService {
			sender: self.sender.clone(),
			first_error: self.first_error.clone(),
		}
	}

	/// Drop the feed, drain the queue, join the writer and surface its
	/// first error.
	pub fn shutdown(self) -> Result<()> {
		drop(self.sender);
		self.handle.join().map_err(|_| Error::WriterDisconnected)?;
		take_error(&self.first_error)
	}
}

fn writer_loop(mut archive: Archive, receiver: Receiver<WriteRequest>, first_error: SharedError) {
	for request in receiver {
		if let Err(err) = apply_request(&mut archive, request) {
			error!(error = %err, "storage writer failed to apply a request");
			let mut slot = first_error.lock();
			if slot.is_none() {
				*slot = Some(err);
			}
		}
	}
}

/// Worker-side endpoint of the queue wrapper.
pub struct QueueService {
	sender: Sender<WriteRequest>,
	first_error: SharedError,
}

impl StorageService for QueueService {
	fn store_records(&self, trajectory: &str, records: Vec<NodeRecord>) -> Result<()> {
		self.sender
			.send(WriteRequest::Records {
				trajectory: trajectory.to_string(),
				records,
			})
			.map_err(|_| Error::WriterDisconnected)
	}

	fn store_run_report(&self, trajectory: &str, report: RunReport) -> Result<()> {
		self.sender
			.send(WriteRequest::Report {
				trajectory: trajectory.to_string(),
				report,
			})
			.map_err(|_| Error::WriterDisconnected)
	}

	fn flush(&self) -> Result<()> {
		let (ack, done) = bounded(1);
		self.sender.send(WriteRequest::Flush(ack)).map_err(|_| Error::WriterDisconnected)?;
		done.recv().map_err(|_| Error::WriterDisconnected)?;
		take_error(&self.first_error)
	}
}
