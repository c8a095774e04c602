// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use indexmap::IndexMap;

use crate::{Error, Result, leaf::ParamValue};

/// A labeled bag of run outputs: an ordered mapping from short names to
/// data items. The first positional item is named after the leaf itself.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultLeaf {
	name: String,
	full_name: String,
	comment: Option<String>,
	items: IndexMap<String, ParamValue>,
	// Set by `empty()`: data released, identity retained.
	emptied: bool,
}

impl ResultLeaf {
	pub fn new() -> Self {
		Self {
			name: String::new(),
			full_name: String::new(),
			comment: None,
			items: IndexMap::new(),
			emptied: false,
		}
	}

	pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
		self.comment = Some(comment.into());
		self
	}

	/// Set short and full name. Called on insertion into a tree; also
	/// used by the storage service when rebuilding leaves.
	pub fn assign_names(&mut self, name: String, full_name: String) {
		self.name = name;
		self.full_name = full_name;
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn full_name(&self) -> &str {
		&self.full_name
	}

	pub fn comment(&self) -> Option<&str> {
		self.comment.as_deref()
	}

	pub fn set_comment(&mut self, comment: impl Into<String>) {
		self.comment = Some(comment.into());
	}

	/// Append a positional item. The first one is named after the leaf,
	/// later ones get a `_N` suffix.
	pub fn push(&mut self, value: impl Into<ParamValue>) -> Result<()> {
		let item_name = if self.items.is_empty() {
			self.name.clone()
		} else {
			format!("{}_{}", self.name, self.items.len())
		};
		self.push_named(item_name, value)
	}

	/// Append an item under an explicit short name.
	pub fn push_named(&mut self, item_name: impl Into<String>, value: impl Into<ParamValue>) -> Result<()> {
		let item_name = item_name.into();
		if self.items.contains_key(&item_name) {
			return Err(Error::NameCollision {
				parent: self.full_name.clone(),
				name: item_name,
			});
		}
		self.items.insert(item_name, value.into());
		self.emptied = false;
		Ok(())
	}

	/// The item bearing the leaf's own name.
	pub fn get(&self) -> Result<&ParamValue> {
		self.get_named(&self.name).ok_or_else(|| Error::NotFound {
			path: self.full_name.clone(),
		})
	}

	pub fn get_named(&self, item_name: &str) -> Option<&ParamValue> {
		self.items.get(item_name)
	}

	/// The sole item if it bears the leaf's name; used for fast access.
	pub fn single_item(&self) -> Option<&ParamValue> {
		if self.items.len() == 1 {
			return self.items.get(&self.name);
		}
		None
	}

	pub fn items(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
		self.items.iter().map(|(name, value)| (name.as_str(), value))
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Release data, retaining name and comment.
	pub fn empty(&mut self) {
		self.items.clear();
		self.emptied = true;
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn was_emptied(&self) -> bool {
		self.emptied
	}
}

impl Default for ResultLeaf {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Value;

	fn named(mut r: ResultLeaf, name: &str) -> ResultLeaf {
		r.assign_names(name.to_string(), format!("results.{}", name));
		r
	}

	#[test]
	fn test_first_item_takes_leaf_name() {
		let mut r = named(ResultLeaf::new(), "z");
		r.push(7.0).unwrap();
		r.push(8.0).unwrap();

		assert_eq!(r.get_named("z"), Some(&ParamValue::from(7.0)));
		assert_eq!(r.get_named("z_1"), Some(&ParamValue::from(8.0)));
	}

	#[test]
	fn test_duplicate_item_name_fails() {
		let mut r = named(ResultLeaf::new(), "z");
		r.push_named("a", Value::Int(1)).unwrap();
		assert!(matches!(
			r.push_named("a", Value::Int(2)),
			Err(Error::NameCollision { .. })
		));
	}

	#[test]
	fn test_single_item_requires_leaf_name() {
		let mut r = named(ResultLeaf::new(), "z");
		r.push_named("other", Value::Int(1)).unwrap();
		assert!(r.single_item().is_none());

		let mut r = named(ResultLeaf::new(), "z");
		r.push(Value::Int(1)).unwrap();
		assert!(r.single_item().is_some());
	}
}
