//! REST API client module for the Connectify backend.
//!
//! This module provides the `ApiClient`, the request pipeline every
//! outbound call goes through, along with typed helpers for the feed,
//! user and notification endpoints.
//!
//! Authentication is a short-lived bearer token plus a long-lived refresh
//! cookie; see `crate::auth::refresh` for how the two interact.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
