// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Soft cap on the serialized size of a single annotation value; the
/// storage service warns above it.
pub const ANNOTATION_SOFT_CAP: usize = 1024;

/// Free-form small metadata attached to a node. Values are JSON scalars
/// or short strings, not bulk data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations(IndexMap<String, serde_json::Value>);

impl Annotations {
	pub fn new() -> Self {
		Self(IndexMap::new())
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
		self.0.insert(key.into(), value.into());
	}

	pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
		self.0.get(key)
	}

	pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
		self.0.shift_remove(key)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Keys whose serialized value exceeds the soft cap.
	pub fn oversized(&self) -> Vec<&str> {
		self.0.iter()
			.filter(|(_, v)| v.to_string().len() > ANNOTATION_SOFT_CAP)
			.map(|(k, _)| k.as_str())
			.collect()
	}
}
