// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use tracing::warn;

/// Exit code of the hard kill on a second signal.
const HARD_EXIT_CODE: i32 = 130;

/// Cooperative stop flag. With `graceful_exit` it is wired to SIGINT
/// and SIGTERM: the first signal stops the producer, a second one
/// terminates the process.
pub struct StopFlag {
	flag: Arc<AtomicBool>,
}

impl StopFlag {
	pub fn new() -> Self {
		Self {
			flag: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Install the signal handlers. Safe to call once per process per
	/// flag; registration failures only disable graceful exit.
	pub fn install_handlers(&self) {
		use signal_hook::consts::{SIGINT, SIGTERM};

		for signal in [SIGINT, SIGTERM] {
			// Second signal: exit immediately with a non-zero code.
			if let Err(err) = signal_hook::flag::register_conditional_shutdown(
				signal,
				HARD_EXIT_CODE,
				Arc::clone(&self.flag),
			) {
				warn!(signal, error = %err, "could not register shutdown handler");
			}
			// First signal: raise the flag.
			if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&self.flag)) {
				warn!(signal, error = %err, "could not register graceful-exit handler");
			}
		}
	}

	pub fn raised(&self) -> bool {
		self.flag.load(Ordering::Relaxed)
	}

	/// Programmatic trigger, also used by `fail_fast`.
	pub fn raise(&self) {
		self.flag.store(true, Ordering::Relaxed);
	}

	pub fn shared(&self) -> Arc<AtomicBool> {
		Arc::clone(&self.flag)
	}
}

impl Default for StopFlag {
	fn default() -> Self {
		Self::new()
	}
}
