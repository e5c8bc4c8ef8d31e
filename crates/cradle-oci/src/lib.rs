//! # cradle-oci
//!
//! OCI (Open Container Initiative) specification types for Cradle.
//!
//! This crate provides Rust types for:
//! - The subset of the OCI Runtime Specification (config.json) the shim consumes
//! - The OCI state document reported by `cradle state`

#![warn(missing_docs)]

pub mod runtime;
pub mod state;

pub use runtime::Spec;
pub use state::{ContainerState, ContainerStatus};

/// OCI runtime specification version reported in state documents.
pub const OCI_VERSION: &str = "1.2.0";
