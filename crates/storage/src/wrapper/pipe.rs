// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::{sync::Arc, thread::JoinHandle};

use crossbeam_channel::{Receiver, Select, Sender, bounded, unbounded};
use sweep_core::NodeRecord;
use tracing::error;

use crate::{
	Error, Result, archive::Archive, report::RunReport, service::StorageService,
	wrapper::{SharedError, WriteRequest, apply_request, take_error},
};

/// The `pipe` wrapper: one paired stream per worker, a single writer
/// thread multiplexing over them. FIFO per worker, no ordering across
/// workers.
pub struct PipeHub {
	senders: Vec<Sender<WriteRequest>>,
	handle: JoinHandle<()>,
	first_error: SharedError,
}

impl PipeHub {
	pub fn spawn(archive: Archive, workers: usize) -> Self {
		let mut senders = Vec::with_capacity(workers);
		let mut receivers = Vec::with_capacity(workers);
		for _ in 0..workers.max(1) {
			let (sender, receiver) = unbounded::<WriteRequest>();
			senders.push(sender);
			receivers.push(receiver);
		}
		let first_error = SharedError::default();
		let writer_error = first_error.clone();
		let handle = std::thread::Builder::new()
			.name("sweep-storage-pipes".to_string())
			.spawn(move || pipe_loop(archive, receivers, writer_error))
			.expect("spawning the storage pipe thread");
		Self {
			senders,
			handle,
			first_error,
		}
	}

	pub(crate) fn services(&self) -> Vec<Arc<dyn StorageService>> {
		self.senders
			.iter()
			.map(|sender| {
				Arc::new(PipeService {
					sender: sender.clone(),
					first_error: self.first_error.clone(),
				}) as Arc<dyn StorageService>
			})
			.collect()
	}

	pub fn shutdown(self) -> Result<()> {
		drop(self.senders);
		self.handle.join().map_err(|_| Error::WriterDisconnected)?;
		take_error(&self.first_error)
	}
}

fn pipe_loop(mut archive: Archive, mut receivers: Vec<Receiver<WriteRequest>>, first_error: SharedError) {
	while !receivers.is_empty() {
		let (index, received) = {
			let mut select = Select::new();
			for receiver in &receivers {
				select.recv(receiver);
			}
			let op = select.select();
			let index = op.index();
			(index, op.recv(&receivers[index]))
		};
		match received {
			Ok(request) => {
				if let Err(err) = apply_request(&mut archive, request) {
					error!(error = %err, "storage pipe failed to apply a request");
					let mut slot = first_error.lock();
					if slot.is_none() {
						*slot = Some(err);
					}
				}
			}
			Err(_) => {
				// This worker hung up; stop selecting on it.
				receivers.remove(index);
			}
		}
	}
}

/// Worker-side endpoint of its private pipe.
pub struct PipeService {
	sender: Sender<WriteRequest>,
	first_error: SharedError,
}

impl StorageService for PipeService {
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
