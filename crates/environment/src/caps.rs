// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::time::{Duration, Instant};

use sysinfo::System;
use tracing::trace;

/// Minimum interval between system refreshes; CPU usage needs two
/// samples spaced apart to mean anything.
const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Cap-based admission: CPU, resident memory and swap utilization each
/// get a fraction in (0, 1]; exceeding any of them pauses dispatch.
/// The caller keeps at least one run in flight regardless, so the
/// experiment cannot deadlock.
pub struct AdmissionControl {
	system: System,
	cpu_cap: f64,
	mem_cap: f64,
	swap_cap: f64,
	last_refresh: Instant,
	enabled: bool,
}

impl AdmissionControl {
	pub fn new(cpu_cap: f64, mem_cap: f64, swap_cap: f64) -> Self {
		// All caps at 1.0 means admission can never block.
		let enabled = cpu_cap < 1.0 || mem_cap < 1.0 || swap_cap < 1.0;
		let mut system = System::new();
		if enabled {
			system.refresh_cpu_usage();
			system.refresh_memory();
		}
		Self {
			system,
			cpu_cap,
			mem_cap,
			swap_cap,
			last_refresh: Instant::now(),
			enabled,
		}
	}

	/// Whether another run may be dispatched right now.
	pub fn allows(&mut self) -> bool {
		if !self.enabled {
			return true;
		}
		if self.last_refresh.elapsed() >= REFRESH_INTERVAL {
			self.system.refresh_cpu_usage();
			self.system.refresh_memory();
			self.last_refresh = Instant::now();
		}

		let cpu = self.system.global_cpu_usage() as f64 / 100.0;
		let mem = fraction(self.system.used_memory(), self.system.total_memory());
		let swap = fraction(self.system.used_swap(), self.system.total_swap());

		let allowed = cpu <= self.cpu_cap && mem <= self.mem_cap && swap <= self.swap_cap;
		if !allowed {
			trace!(cpu, mem, swap, "admission caps exceeded, holding dispatch");
		}
		allowed
	}
}

fn fraction(used: u64, total: u64) -> f64 {
	if total == 0 {
		return 0.0;
	}
	used as f64 / total as f64
}
