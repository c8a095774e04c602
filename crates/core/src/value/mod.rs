// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

pub use ordered_float::OrderedF64;

mod ordered_float;

use std::fmt::{Display, Formatter, Write};

use serde::{Deserialize, Serialize};

/// All value types a trajectory leaf can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
	/// A boolean: true or false.
	Bool,
	/// An 8-byte signed integer
	Int,
	/// An 8-byte unsigned integer
	Uint,
	/// An 8-byte floating point
	Float,
	/// A complex number, two 8-byte floating point components
	Complex,
	/// A UTF-8 encoded text.
	Text,
	/// A homogeneous boolean array
	BoolArray,
	/// A homogeneous signed integer array
	IntArray,
	/// A homogeneous unsigned integer array
	UintArray,
	/// A homogeneous floating point array
	FloatArray,
	/// A homogeneous text array
	TextArray,
}

impl ValueKind {
	pub fn is_array(&self) -> bool {
		matches!(
			self,
			ValueKind::BoolArray
				| ValueKind::IntArray | ValueKind::UintArray
				| ValueKind::FloatArray | ValueKind::TextArray
		)
	}
}

impl Display for ValueKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			ValueKind::Bool => f.write_str("BOOL"),
			ValueKind::Int => f.write_str("INT"),
			ValueKind::Uint => f.write_str("UINT"),
			ValueKind::Float => f.write_str("FLOAT"),
			ValueKind::Complex => f.write_str("COMPLEX"),
			ValueKind::Text => f.write_str("TEXT"),
			ValueKind::BoolArray => f.write_str("BOOL[]"),
			ValueKind::IntArray => f.write_str("INT[]"),
			ValueKind::UintArray => f.write_str("UINT[]"),
			ValueKind::FloatArray => f.write_str("FLOAT[]"),
			ValueKind::TextArray => f.write_str("TEXT[]"),
		}
	}
}

impl From<&Value> for ValueKind {
	fn from(value: &Value) -> Self {
		match value {
			Value::Bool(_) => ValueKind::Bool,
			Value::Int(_) => ValueKind::Int,
			Value::Uint(_) => ValueKind::Uint,
			Value::Float(_) => ValueKind::Float,
			Value::Complex { .. } => ValueKind::Complex,
			Value::Text(_) => ValueKind::Text,
			Value::BoolArray(_) => ValueKind::BoolArray,
			Value::IntArray(_) => ValueKind::IntArray,
			Value::UintArray(_) => ValueKind::UintArray,
			Value::FloatArray(_) => ValueKind::FloatArray,
			Value::TextArray(_) => ValueKind::TextArray,
		}
	}
}

/// A leaf value, represented as a native Rust type.
///
/// Equality is exact: kinds must match and every component must compare
/// equal, so `Int(1)` never equals `Float(1.0)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
	/// A boolean: true or false.
	Bool(bool),
	/// An 8-byte signed integer
	Int(i64),
	/// An 8-byte unsigned integer
	Uint(u64),
	/// An 8-byte floating point
	Float(OrderedF64),
	/// A complex number
	Complex { re: OrderedF64, im: OrderedF64 },
	/// A UTF-8 encoded text.
	Text(String),
	/// A homogeneous boolean array
	BoolArray(Vec<bool>),
	/// A homogeneous signed integer array
	IntArray(Vec<i64>),
	/// A homogeneous unsigned integer array
	UintArray(Vec<u64>),
	/// A homogeneous floating point array
	FloatArray(Vec<OrderedF64>),
	/// A homogeneous text array
	TextArray(Vec<String>),
}

impl Value {
	pub fn kind(&self) -> ValueKind {
		ValueKind::from(self)
	}

	pub fn float(v: impl Into<f64>) -> Self {
		Value::Float(OrderedF64::new(v.into()))
	}

	pub fn complex(re: f64, im: f64) -> Self {
		Value::Complex {
			re: OrderedF64::new(re),
			im: OrderedF64::new(im),
		}
	}

	pub fn float_array(values: impl IntoIterator<Item = f64>) -> Self {
		Value::FloatArray(values.into_iter().map(OrderedF64::new).collect())
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Float(v) => Some(v.get()),
			Value::Int(v) => Some(*v as f64),
			Value::Uint(v) => Some(*v as f64),
			_ => None,
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Value::Int(v) => Some(*v),
			Value::Uint(v) => i64::try_from(*v).ok(),
			_ => None,
		}
	}

	/// Value repr for overview tables, capped at `max` chars.
	pub fn short_repr(&self, max: usize) -> String {
		let full = self.to_string();
		if full.chars().count() <= max {
			return full;
		}
		let mut out: String = full.chars().take(max.saturating_sub(3)).collect();
		out.push_str("...");
		out
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		fn write_array<T: Display>(f: &mut Formatter<'_>, values: &[T]) -> std::fmt::Result {
			f.write_char('[')?;
			for (i, v) in values.iter().enumerate() {
				if i > 0 {
					f.write_str(", ")?;
				}
				Display::fmt(v, f)?;
			}
			f.write_char(']')
		}

		match self {
			Value::Bool(true) => f.write_str("true"),
			Value::Bool(false) => f.write_str("false"),
			Value::Int(value) => Display::fmt(value, f),
			Value::Uint(value) => Display::fmt(value, f),
			Value::Float(value) => Display::fmt(value, f),
			Value::Complex { re, im } => write!(f, "{}+{}i", re, im),
			Value::Text(value) => Display::fmt(value, f),
			Value::BoolArray(values) => write_array(f, values),
			Value::IntArray(values) => write_array(f, values),
			Value::UintArray(values) => write_array(f, values),
			Value::FloatArray(values) => write_array(f, values),
			Value::TextArray(values) => write_array(f, values),
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Int(v as i64)
	}
}

impl From<u64> for Value {
	fn from(v: u64) -> Self {
		Value::Uint(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::float(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Text(v.to_string())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Text(v)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_kind_mismatch_is_not_equal() {
		assert_ne!(Value::Int(1), Value::Uint(1));
		assert_ne!(Value::Int(1), Value::float(1.0));
	}

	#[test]
	fn test_array_equality_is_elementwise() {
		assert_eq!(Value::float_array([1.0, 2.0]), Value::float_array([1.0, 2.0]));
		assert_ne!(Value::float_array([1.0, 2.0]), Value::float_array([2.0, 1.0]));
		assert_ne!(Value::float_array([1.0]), Value::float_array([1.0, 1.0]));
	}

	#[test]
	fn test_short_repr_caps_length() {
		let long = Value::Text("x".repeat(100));
		let repr = long.short_repr(64);
		assert_eq!(repr.chars().count(), 64);
		assert!(repr.ends_with("..."));
	}
}
