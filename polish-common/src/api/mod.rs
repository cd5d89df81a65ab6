//! API module for shared HTTP API functionality
//!
//! # Design Principle
//!
//! This module contains ONLY:
//! - Pure functions (no HTTP framework dependencies)
//! - Shared request/response types
//!
//! Each service wraps these with framework-specific extractors (Axum, etc.).

pub mod auth;
pub mod types;

pub use auth::{hash_card_key, sha256_hex, CardKeySet, CredentialError, OwnerId};
pub use types::{CardKeyQuery, ErrorBody, ErrorResponse};
