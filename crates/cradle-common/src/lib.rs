//! # cradle-common
//!
//! Shared utilities and types for the Cradle runtime shim.
//!
//! This crate provides common functionality used across all Cradle crates:
//! - Container ID validation
//! - Standard filesystem paths for per-container state
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{CradleError, CradleResult};
pub use id::ContainerId;
pub use paths::CradlePaths;
