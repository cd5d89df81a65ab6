//! # Polish Common Library
//!
//! Shared code for the Polish optimization services:
//! - Error type used across crates
//! - Configuration file and root folder resolution
//! - Progress event types streamed to clients
//! - Server-Sent Events helpers
//! - Card key credential handling and shared API types

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
