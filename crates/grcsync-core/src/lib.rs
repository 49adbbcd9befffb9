//! Core types and trait definitions for the GRC statement sync engine.
//!
//! This crate has no HTTP or database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod audit;
pub mod entity;
pub mod error;
pub mod job;
pub mod remote;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
