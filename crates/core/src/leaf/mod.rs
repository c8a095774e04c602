// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

pub use parameter::{OPAQUE_MECHANISM, OpaqueValue, ParamValue, Parameter, ParameterVariant};
pub use result::ResultLeaf;

mod parameter;
mod result;
