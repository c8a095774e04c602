// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::{
	Error, Result,
	value::{Value, ValueKind},
};

/// Mechanism identifier stored alongside opaque payloads.
pub const OPAQUE_MECHANISM: &str = "postcard/1";

/// Data carried by a parameter or result item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamValue {
	/// A typed scalar or homogeneous array.
	Typed(Value),
	/// An opaque serialized blob, escape hatch for anything else.
	Opaque(OpaqueValue),
}

impl ParamValue {
	pub fn kind_repr(&self) -> String {
		match self {
			ParamValue::Typed(v) => v.kind().to_string(),
			ParamValue::Opaque(o) => format!("OPAQUE({})", o.mechanism),
		}
	}

	pub fn short_repr(&self, max: usize) -> String {
		match self {
			ParamValue::Typed(v) => v.short_repr(max),
			ParamValue::Opaque(o) => format!("<{} bytes, {}>", o.bytes.len(), o.mechanism),
		}
	}

	pub fn as_value(&self) -> Option<&Value> {
		match self {
			ParamValue::Typed(v) => Some(v),
			ParamValue::Opaque(_) => None,
		}
	}

	/// Serialize an arbitrary value into an opaque payload.
	pub fn opaque<T: Serialize>(value: &T) -> Result<Self> {
		Ok(ParamValue::Opaque(OpaqueValue {
			bytes: postcard::to_stdvec(value)?,
			mechanism: OPAQUE_MECHANISM.to_string(),
		}))
	}

	/// Recover a value from an opaque payload.
	pub fn decode_opaque<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
		match self {
			ParamValue::Opaque(o) => Ok(postcard::from_bytes(&o.bytes)?),
			ParamValue::Typed(v) => Err(Error::TypeMismatch {
				name: String::new(),
				expected: format!("OPAQUE({})", OPAQUE_MECHANISM),
				actual: v.kind().to_string(),
			}),
		}
	}
}

impl From<Value> for ParamValue {
	fn from(v: Value) -> Self {
		ParamValue::Typed(v)
	}
}

impl From<bool> for ParamValue {
	fn from(v: bool) -> Self {
		ParamValue::Typed(Value::from(v))
	}
}

impl From<i32> for ParamValue {
	fn from(v: i32) -> Self {
		ParamValue::Typed(Value::from(v))
	}
}

impl From<i64> for ParamValue {
	fn from(v: i64) -> Self {
		ParamValue::Typed(Value::from(v))
	}
}

impl From<u64> for ParamValue {
	fn from(v: u64) -> Self {
		ParamValue::Typed(Value::from(v))
	}
}

impl From<f64> for ParamValue {
	fn from(v: f64) -> Self {
		ParamValue::Typed(Value::from(v))
	}
}

impl From<&str> for ParamValue {
	fn from(v: &str) -> Self {
		ParamValue::Typed(Value::from(v))
	}
}

impl From<String> for ParamValue {
	fn from(v: String) -> Self {
		ParamValue::Typed(Value::from(v))
	}
}

/// A serialized payload plus the identifier of the mechanism that wrote it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpaqueValue {
	pub bytes: Vec<u8>,
	pub mechanism: String,
}

/// The closed set of parameter variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterVariant {
	/// Single primitives: bool, int, uint, float, complex, text.
	Scalar,
	/// Homogeneous arrays; ranges are stored deduplicated.
	Array,
	/// Opaque serialized blobs.
	Pickle,
}

impl ParameterVariant {
	fn describe(&self) -> &'static str {
		match self {
			ParameterVariant::Scalar => "scalar value",
			ParameterVariant::Array => "homogeneous array",
			ParameterVariant::Pickle => "opaque blob",
		}
	}
}

/// A typed data cell with one default value and an optional exploration
/// range.
///
/// A parameter locks the first time a consumer reads its value; while
/// locked, neither the default nor the range may change.
#[derive(Debug)]
pub struct Parameter {
	name: String,
	full_name: String,
	comment: Option<String>,
	variant: ParameterVariant,
	// Fixed by the first assignment; range elements must match exactly.
	value_kind: Option<ValueKind>,
	default: Option<ParamValue>,
	range: Option<Vec<ParamValue>>,
	locked: AtomicBool,
	// Set by `empty()`: data released, identity retained.
	emptied: bool,
	emptied_range_len: Option<usize>,
}

impl Clone for Parameter {
	fn clone(&self) -> Self {
		Self {
			name: self.name.clone(),
			full_name: self.full_name.clone(),
			comment: self.comment.clone(),
			variant: self.variant,
			value_kind: self.value_kind,
			default: self.default.clone(),
			range: self.range.clone(),
			locked: AtomicBool::new(self.locked.load(Ordering::Relaxed)),
			emptied: self.emptied,
			emptied_range_len: self.emptied_range_len,
		}
	}
}

impl PartialEq for Parameter {
	fn eq(&self, other: &Self) -> bool {
		self.full_name == other.full_name
			&& self.variant == other.variant
			&& self.value_kind == other.value_kind
			&& self.default == other.default
			&& self.range == other.range
	}
}

impl Parameter {
	pub fn scalar() -> Self {
		Self::new(ParameterVariant::Scalar)
	}

	pub fn array() -> Self {
		Self::new(ParameterVariant::Array)
	}

	pub fn pickle() -> Self {
		Self::new(ParameterVariant::Pickle)
	}

	fn new(variant: ParameterVariant) -> Self {
		Self {
			name: String::new(),
			full_name: String::new(),
			comment: None,
			variant,
			value_kind: None,
			default: None,
			range: None,
			locked: AtomicBool::new(false),
			emptied: false,
			emptied_range_len: None,
		}
	}

	/// Pick the variant that naturally fits a value.
	pub fn fitting(value: &ParamValue) -> Self {
		match value {
			ParamValue::Typed(v) if v.kind().is_array() => Self::array(),
			ParamValue::Typed(_) => Self::scalar(),
			ParamValue::Opaque(_) => Self::pickle(),
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

	pub fn variant(&self) -> ParameterVariant {
		self.variant
	}

	pub fn value_kind(&self) -> Option<ValueKind> {
		self.value_kind
	}

	/// The supported-type predicate of this variant.
	pub fn supports(&self, value: &ParamValue) -> bool {
		match (self.variant, value) {
			(ParameterVariant::Scalar, ParamValue::Typed(v)) => {
				!v.kind().is_array() && self.kind_matches(v.kind())
			}
			(ParameterVariant::Array, ParamValue::Typed(v)) => {
				v.kind().is_array() && self.kind_matches(v.kind())
			}
			(ParameterVariant::Pickle, ParamValue::Opaque(_)) => true,
			_ => false,
		}
	}

	fn kind_matches(&self, kind: ValueKind) -> bool {
		self.value_kind.is_none_or(|fixed| fixed == kind)
	}

	fn check(&self, value: &ParamValue) -> Result<()> {
		if self.supports(value) {
			return Ok(());
		}
		Err(Error::TypeMismatch {
			name: self.full_name.clone(),
			expected: match self.value_kind {
				Some(kind) => kind.to_string(),
				None => self.variant.describe().to_string(),
			},
			actual: value.kind_repr(),
		})
	}

	fn check_unlocked(&self) -> Result<()> {
		if self.locked.load(Ordering::Acquire) {
			return Err(Error::ParameterLocked {
				name: self.full_name.clone(),
			});
		}
		Ok(())
	}

	/// Install the default value.
	///
	/// Changing the default clears any installed range, since range
	/// elements are typed against the default.
	pub fn set(&mut self, value: impl Into<ParamValue>) -> Result<()> {
		let value = value.into();
		self.check_unlocked()?;
		self.check(&value)?;
		if self.default.as_ref() != Some(&value) {
			self.range = None;
		}
		self.value_kind = match &value {
			ParamValue::Typed(v) => Some(v.kind()),
			ParamValue::Opaque(_) => None,
		};
		self.default = Some(value);
		self.emptied = false;
		self.emptied_range_len = None;
		Ok(())
	}

	/// Read the value, locking the parameter.
	pub fn value(&self) -> Result<&ParamValue> {
		let value = self.default.as_ref().ok_or_else(|| Error::NotFound {
			path: self.full_name.clone(),
		})?;
		self.locked.store(true, Ordering::Release);
		Ok(value)
	}

	/// Read the value at run `k`: the range element if explored, the
	/// default otherwise. Locks the parameter.
	pub fn value_at(&self, index: usize) -> Result<&ParamValue> {
		match &self.range {
			Some(range) => {
				let value = range.get(index).ok_or_else(|| Error::NotFound {
					path: format!("{}[{}]", self.full_name, index),
				})?;
				self.locked.store(true, Ordering::Release);
				Ok(value)
			}
			None => self.value(),
		}
	}

	/// Peek at the default without locking. User reads go through
	/// `value`; this is for storage and display code.
	pub fn peek(&self) -> Option<&ParamValue> {
		self.default.as_ref()
	}

	/// Install an exploration range. Length consistency against the
	/// trajectory is the caller's concern and checked one level up.
	pub fn set_range(&mut self, range: Vec<ParamValue>) -> Result<()> {
		self.check_unlocked()?;
		for value in &range {
			self.check(value)?;
		}
		self.range = Some(range);
		Ok(())
	}

	/// Append values to the installed range.
	pub fn extend_range(&mut self, tail: Vec<ParamValue>) -> Result<()> {
		for value in &tail {
			self.check(value)?;
		}
		match &mut self.range {
			Some(range) => range.extend(tail),
			None => self.range = Some(tail),
		}
		Ok(())
	}

	pub fn has_range(&self) -> bool {
		self.range.is_some()
	}

	pub fn range(&self) -> Option<&[ParamValue]> {
		self.range.as_deref()
	}

	pub fn range_len(&self) -> Option<usize> {
		self.range.as_ref().map(Vec::len).or(self.emptied_range_len)
	}

	pub fn is_locked(&self) -> bool {
		self.locked.load(Ordering::Acquire)
	}

	pub fn lock(&self) {
		self.locked.store(true, Ordering::Release);
	}

	pub fn unlock(&self) {
		self.locked.store(false, Ordering::Release);
	}

	/// Release heavy data, retaining identity: name, comment, variant,
	/// value kind and the length of a released range.
	pub fn empty(&mut self) {
		self.emptied_range_len = self.range.as_ref().map(Vec::len);
		self.default = None;
		self.range = None;
		self.emptied = true;
	}

	pub fn is_empty(&self) -> bool {
		self.default.is_none() && self.range.is_none()
	}

	pub fn was_emptied(&self) -> bool {
		self.emptied
	}

	/// Serialization hook used by the storage service.
	pub fn serialize_value(value: &ParamValue) -> Result<Vec<u8>> {
		Ok(postcard::to_stdvec(value)?)
	}

	/// Deserialization hook used by the storage service.
	pub fn deserialize_value(blob: &[u8]) -> Result<ParamValue> {
		Ok(postcard::from_bytes(blob)?)
	}

	/// Encode a range as a unique-value pool plus an index sequence.
	///
	/// The pool preserves first-occurrence order and
	/// `pool[indices[k]] == range[k]` for every `k`.
	pub fn encode_range(range: &[ParamValue]) -> (Vec<ParamValue>, Vec<u32>) {
		let mut pool: Vec<ParamValue> = Vec::new();
		let mut seen: std::collections::HashMap<ParamValue, u32> = std::collections::HashMap::new();
		let mut indices = Vec::with_capacity(range.len());

		for value in range {
			match seen.entry(value.clone()) {
				std::collections::hash_map::Entry::Occupied(entry) => indices.push(*entry.get()),
				std::collections::hash_map::Entry::Vacant(entry) => {
					let slot = pool.len() as u32;
					entry.insert(slot);
					pool.push(value.clone());
					indices.push(slot);
				}
			}
		}
		(pool, indices)
	}

	/// Reconstruct a range from its pool encoding.
	pub fn decode_range(pool: &[ParamValue], indices: &[u32]) -> Result<Vec<ParamValue>> {
		indices.iter()
			.map(|&slot| {
				pool.get(slot as usize).cloned().ok_or_else(|| Error::Backend {
					reason: format!("range index {} outside pool of {}", slot, pool.len()),
				})
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn named(mut p: Parameter, name: &str) -> Parameter {
		p.assign_names(name.to_string(), format!("parameters.{}", name));
		p
	}

	#[test]
	fn test_scalar_rejects_kind_change() {
		let mut p = named(Parameter::scalar(), "x");
		p.set(1.0).unwrap();
		let err = p.set(Value::Int(1)).unwrap_err();
		assert!(matches!(err, Error::TypeMismatch { .. }));
	}

	#[test]
	fn test_scalar_rejects_array() {
		let mut p = named(Parameter::scalar(), "x");
		let err = p.set(Value::float_array([1.0])).unwrap_err();
		assert!(matches!(err, Error::TypeMismatch { .. }));
	}

	#[test]
	fn test_read_locks_and_set_fails() {
		let mut p = named(Parameter::scalar(), "x");
		p.set(1.0).unwrap();
		let _ = p.value().unwrap();
		assert!(p.is_locked());
		assert!(matches!(p.set(2.0), Err(Error::ParameterLocked { .. })));

		p.unlock();
		p.set(2.0).unwrap();
	}

	#[test]
	fn test_changing_default_clears_range() {
		let mut p = named(Parameter::scalar(), "x");
		p.set(1.0).unwrap();
		p.set_range(vec![ParamValue::from(1.0), ParamValue::from(2.0)]).unwrap();
		p.set(3.0).unwrap();
		assert!(!p.has_range());
	}

	#[test]
	fn test_value_at_uses_range_then_default() {
		let mut p = named(Parameter::scalar(), "x");
		p.set(1.0).unwrap();
		assert_eq!(p.value_at(5).unwrap(), &ParamValue::from(1.0));

		p.unlock();
		p.set_range(vec![ParamValue::from(10.0), ParamValue::from(20.0)]).unwrap();
		assert_eq!(p.value_at(1).unwrap(), &ParamValue::from(20.0));
	}

	#[test]
	fn test_empty_retains_identity() {
		let mut p = named(Parameter::scalar(), "x");
		p.set(1.0).unwrap();
		p.set_range(vec![ParamValue::from(1.0), ParamValue::from(2.0)]).unwrap();
		p.empty();

		assert!(p.is_empty());
		assert_eq!(p.name(), "x");
		assert_eq!(p.value_kind(), Some(ValueKind::Float));
		assert_eq!(p.range_len(), Some(2));
	}

	#[test]
	fn test_range_pool_encoding_roundtrip() {
		let a = ParamValue::from(Value::float_array([1.0, 2.0]));
		let b = ParamValue::from(Value::float_array([3.0, 4.0]));
		let range = vec![a.clone(), b.clone(), a.clone(), a.clone(), b.clone()];

		let (pool, indices) = Parameter::encode_range(&range);
		assert_eq!(pool, vec![a, b]);
		assert_eq!(indices, vec![0, 1, 0, 0, 1]);

		let decoded = Parameter::decode_range(&pool, &indices).unwrap();
		assert_eq!(decoded, range);
	}

	#[test]
	fn test_opaque_roundtrip() {
		let value = ParamValue::opaque(&(1u32, "hello".to_string())).unwrap();
		let mut p = named(Parameter::pickle(), "blob");
		p.set(value.clone()).unwrap();

		let (n, s): (u32, String) = p.value().unwrap().decode_opaque().unwrap();
		assert_eq!((n, s.as_str()), (1, "hello"));
	}

	#[test]
	fn test_serialize_roundtrip() {
		let value = ParamValue::from(Value::complex(1.0, -2.0));
		let blob = Parameter::serialize_value(&value).unwrap();
		assert_eq!(Parameter::deserialize_value(&blob).unwrap(), value);
	}
}
