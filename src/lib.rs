//! modlink: module link resolution for infrastructure layers.
//!
//! Discovers explicit, interpolated and automatic links between modules,
//! rewrites inputs into pointers at provider outputs, and computes a layered
//! execution order where every step can be provisioned in parallel.

pub mod cli;
pub mod core;

pub use crate::core::error::{ErrorKind, ResolutionError};
pub use crate::core::linker::{resolve, Linker};
pub use crate::core::types::{LinkResult, Module, ModuleSpec};
