// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Canonical run names, wildcard substitution and name hygiene.

use crate::{Error, Result};

/// Width of the zero-padded decimal in a canonical run name.
pub const RUN_NAME_WIDTH: usize = 8;
/// Width of the zero-padded decimal in a run-set bucket name.
pub const RUN_SET_WIDTH: usize = 5;
/// Number of runs grouped into one `$set` bucket.
pub const RUNS_PER_SET: usize = 1000;
/// Placeholder run name used outside the run phase.
pub const RUN_ALL: &str = "run_ALL";
/// Group that collects per-run subtrees under `results` and
/// `derived_parameters`.
pub const RUNS_GROUP: &str = "runs";

/// Canonical name of run `k`: `run_XXXXXXXX`, zero padded.
pub fn run_name(index: usize) -> String {
	format!("run_{:08}", index)
}

/// Bucket name for run `k`: `run_set_XXXXX` with `XXXXX = k / 1000`.
pub fn run_set_name(index: usize) -> String {
	format!("run_set_{:05}", index / RUNS_PER_SET)
}

/// Parse a canonical run name back into its index.
pub fn parse_run_name(name: &str) -> Option<usize> {
	let digits = name.strip_prefix("run_")?;
	if digits.len() != RUN_NAME_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	digits.parse().ok()
}

/// True for canonical run names and the `run_ALL` placeholder.
pub fn is_run_segment(segment: &str) -> bool {
	segment == RUN_ALL || parse_run_name(segment).is_some()
}

/// Substitute `$` and `$set` tokens in a dotted name.
///
/// `$` becomes the canonical run name, or `run_ALL` outside a run. `$set`
/// needs a concrete index and fails outside a run.
pub fn expand_wildcards(name: &str, run_index: Option<usize>) -> Result<String> {
	let mut segments = Vec::new();
	for segment in name.split('.') {
		match segment {
			"$" => match run_index {
				Some(index) => segments.push(run_name(index)),
				None => segments.push(RUN_ALL.to_string()),
			},
			"$set" => match run_index {
				Some(index) => segments.push(run_set_name(index)),
				None => {
					return Err(Error::WildcardOutsideRun {
						token: "$set".to_string(),
					});
				}
			},
			other => segments.push(other.to_string()),
		}
	}
	Ok(segments.join("."))
}

/// Check a single name segment for hygiene: non-empty, no separator, no
/// unsubstituted wildcard remnants.
pub fn check_segment(segment: &str) -> Result<()> {
	if segment.is_empty() {
		return Err(Error::InvalidName {
			name: segment.to_string(),
			reason: "empty name segment".to_string(),
		});
	}
	if segment.contains('$') {
		return Err(Error::InvalidName {
			name: segment.to_string(),
			reason: "unsubstituted wildcard".to_string(),
		});
	}
	if segment.contains('/') || segment.contains('.') {
		return Err(Error::InvalidName {
			name: segment.to_string(),
			reason: "separator inside name segment".to_string(),
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_run_name_is_zero_padded() {
		assert_eq!(run_name(0), "run_00000000");
		assert_eq!(run_name(42), "run_00000042");
		assert_eq!(run_name(12345678), "run_12345678");
	}

	#[test]
	fn test_run_set_buckets_by_thousand() {
		assert_eq!(run_set_name(0), "run_set_00000");
		assert_eq!(run_set_name(999), "run_set_00000");
		assert_eq!(run_set_name(1000), "run_set_00001");
		assert_eq!(run_set_name(123_456), "run_set_00123");
	}

	#[test]
	fn test_parse_run_name_roundtrip() {
		assert_eq!(parse_run_name(&run_name(7)), Some(7));
		assert_eq!(parse_run_name("run_ALL"), None);
		assert_eq!(parse_run_name("run_123"), None);
		assert_eq!(parse_run_name("walk_00000007"), None);
	}

	#[test]
	fn test_expand_wildcards_in_run() {
		assert_eq!(expand_wildcards("runs.$.z", Some(3)).unwrap(), "runs.run_00000003.z");
		assert_eq!(
			expand_wildcards("runs.$set.$.z", Some(1500)).unwrap(),
			"runs.run_set_00001.run_00001500.z"
		);
	}

	#[test]
	fn test_expand_wildcards_outside_run() {
		assert_eq!(expand_wildcards("runs.$.z", None).unwrap(), "runs.run_ALL.z");
		assert!(matches!(
			expand_wildcards("runs.$set.z", None),
			Err(Error::WildcardOutsideRun { .. })
		));
	}
}
