//! External source client for the GRC system's tabular REST API.
//!
//! [`GrcClient`] owns offset/limit pagination, exponential backoff for
//! transient failures and `Retry-After`-aware rate-limit waits. It implements
//! [`grcsync_core::remote::GrcSource`] by mapping raw table rows through a
//! configurable [`RemoteSchema`].

mod client;
mod config;
mod mapping;
mod retry;
mod source;

pub use client::{GrcClient, PageQuery};
pub use config::{RemoteSchema, SourceConfig};
pub use retry::RetryPolicy;
