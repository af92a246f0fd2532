//! Authentication and session management.
//!
//! This module provides:
//! - `CredentialStore`: the in-memory slot holding the access token
//! - `RefreshCoordinator`: single-flight exchange of the refresh cookie for a new token
//! - `ProfileStore`: durable storage of the user profile (never the token)
//! - `SessionController`: login, logout, startup rehydration and session state
//!
//! Access tokens are never written to disk. After a restart the first
//! privileged call goes through refresh to obtain one.

pub mod credentials;
pub mod profile;
pub mod refresh;
pub mod session;

pub use credentials::CredentialStore;
pub use profile::ProfileStore;
pub use refresh::{RefreshCoordinator, RefreshError};
pub use session::{SessionController, SessionState};
