//! Core types and trait definitions for the Sprig workflow engine.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod branch;
pub mod error;
pub mod lifecycle;
pub mod permutation;
pub mod record;
pub mod store;

pub use error::{Error, Result};
