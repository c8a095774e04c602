// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Core of the sweep toolkit: the trajectory tree, its typed leaves and
//! natural-naming lookup. Storage and scheduling live in their own
//! crates and speak to the tree through the types exported here.

pub use context::RunContext;
pub use error::Error;
pub use leaf::{OPAQUE_MECHANISM, OpaqueValue, ParamValue, Parameter, ParameterVariant, ResultLeaf};
pub use resolve::ResolveOptions;
pub use trajectory::{
	Branch, ExpansionPolicy, MergePolicy, MergeReport, NodeLoader, Trajectory, cartesian_product,
};
pub use tree::{
	ANNOTATION_SOFT_CAP, Annotations, Child, Group, Node, NodeId, NodeKind, NodeRecord, Tree,
};
pub use value::{OrderedF64, Value, ValueKind};

mod context;
mod error;
pub mod leaf;
pub mod naming;
mod resolve;
mod trajectory;
pub mod tree;
pub mod value;

pub type Result<T> = std::result::Result<T, Error>;
