//! Connectify client session core.
//!
//! This crate owns everything about a signed-in Connectify session on the
//! client side:
//!
//! - `auth`: in-memory credential store, single-flight refresh, the durable
//!   profile store and the `SessionController` that ties them together
//! - `api`: the `ApiClient` request pipeline plus typed feed endpoints
//! - `realtime`: the notification channel bound to the signed-in user
//! - `models`: wire and domain types
//! - `config`: endpoint configuration
//! - `utils`: display helpers shared with front ends
//!
//! The access token only ever lives in memory. The long-lived refresh
//! credential is a cookie held by the HTTP client's cookie store.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod realtime;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{
    CredentialStore, ProfileStore, RefreshCoordinator, RefreshError, SessionController,
    SessionState,
};
pub use config::Config;
pub use models::{LoginPayload, NotificationEvent, NotificationKind, UserProfile};
