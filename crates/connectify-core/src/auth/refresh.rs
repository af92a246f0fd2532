//! Access token refresh.
//!
//! The backend keeps a long-lived refresh credential in an HTTP-only cookie.
//! `POST /auth/refresh` trades it for a new access token. The server may
//! rotate the cookie on every exchange, so two overlapping exchanges can
//! invalidate each other and log the user out. `RefreshCoordinator` makes
//! sure only one exchange is ever in flight and everyone waiting on a
//! refresh gets that exchange's outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::CredentialStore;

/// Refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh rejected with status {status}")]
    Rejected { status: u16 },

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("session ended while refreshing")]
    SessionEnded,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

type Exchange = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

enum Claim {
    /// Someone already refreshed past the caller's token
    Current(String),
    Wait { id: u64, exchange: Exchange },
}

pub struct RefreshCoordinator {
    client: Client,
    refresh_url: String,
    credentials: Arc<CredentialStore>,
    in_flight: Mutex<Option<(u64, Exchange)>>,
    started: AtomicU64,
}

impl RefreshCoordinator {
    /// `client` must be the same cookie-carrying client the pipeline uses,
    /// otherwise the refresh cookie is never sent.
    pub fn new(client: Client, api_base_url: &str, credentials: Arc<CredentialStore>) -> Self {
        Self {
            client,
            refresh_url: format!("{}{}", api_base_url.trim_end_matches('/'), REFRESH_PATH),
            credentials,
            in_flight: Mutex::new(None),
            started: AtomicU64::new(0),
        }
    }

    /// Exchange the refresh cookie for a new access token.
    ///
    /// Joins the in-flight exchange if there is one.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let claim = self.claim(None);
        self.settle(claim).await
    }

    /// Get a token newer than `sent_with`, the token a rejected call carried.
    ///
    /// Returns the stored token without a new exchange when another flow has
    /// already replaced `sent_with`.
    pub async fn refresh_after(&self, sent_with: Option<&str>) -> Result<String, RefreshError> {
        let claim = self.claim(Some(sent_with));
        self.settle(claim).await
    }

    /// Number of exchanges started by this coordinator
    pub fn exchanges_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    fn claim(&self, sent_with: Option<Option<&str>>) -> Claim {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(sent_with) = sent_with {
            if let Some(current) = self.credentials.get() {
                if sent_with != Some(current.as_str()) {
                    debug!("Token already replaced by another flow, skipping refresh");
                    return Claim::Current(current);
                }
            }
        }

        if let Some((id, exchange)) = slot.as_ref() {
            debug!(exchange_id = id, "Joining in-flight refresh");
            return Claim::Wait {
                id: *id,
                exchange: exchange.clone(),
            };
        }

        let id = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(exchange_id = id, "Starting token refresh");
        let exchange = Self::exchange(
            self.client.clone(),
            self.refresh_url.clone(),
            Arc::clone(&self.credentials),
            self.credentials.generation(),
        )
        .boxed()
        .shared();
        *slot = Some((id, exchange.clone()));
        Claim::Wait { id, exchange }
    }

    async fn settle(&self, claim: Claim) -> Result<String, RefreshError> {
        let (id, exchange) = match claim {
            Claim::Current(token) => return Ok(token),
            Claim::Wait { id, exchange } => (id, exchange),
        };

        let outcome = exchange.await;

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|(current, _)| *current == id).unwrap_or(false) {
            *slot = None;
        }
        outcome
    }

    async fn exchange(
        client: Client,
        url: String,
        credentials: Arc<CredentialStore>,
        generation: u64,
    ) -> Result<String, RefreshError> {
        let response = client
            .post(&url)
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Token refresh rejected");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        if body.access_token.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "empty accessToken".to_string(),
            ));
        }

        // A login or logout while the exchange ran wins over its result
        if !credentials.set_if_generation(generation, body.access_token.clone()) {
            return match credentials.get() {
                Some(current) => {
                    debug!("Token replaced during refresh, keeping the newer one");
                    Ok(current)
                }
                None => {
                    info!("Session ended during refresh, discarding new token");
                    Err(RefreshError::SessionEnded)
                }
            };
        }
        info!("Access token refreshed");
        Ok(body.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(base: &str, credentials: Arc<CredentialStore>) -> RefreshCoordinator {
        RefreshCoordinator::new(Client::new(), base, credentials)
    }

    #[tokio::test]
    async fn test_refresh_updates_store() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken": "tok-B"}"#)
            .expect(1)
            .create_async()
            .await;

        let credentials = Arc::new(CredentialStore::new());
        let refresher = coordinator(&server.url(), Arc::clone(&credentials));

        assert_eq!(refresher.refresh().await, Ok("tok-B".to_string()));
        assert_eq!(credentials.get().as_deref(), Some("tok-B"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_refresh_leaves_store_alone() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .create_async()
            .await;

        let credentials = Arc::new(CredentialStore::new());
        credentials.set("stale");
        let refresher = coordinator(&server.url(), Arc::clone(&credentials));

        assert_eq!(
            refresher.refresh().await,
            Err(RefreshError::Rejected { status: 401 })
        );
        assert_eq!(credentials.get().as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn test_malformed_refresh_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"token": "wrong-field"}"#)
            .create_async()
            .await;

        let credentials = Arc::new(CredentialStore::new());
        let refresher = coordinator(&server.url(), credentials);
        assert!(matches!(
            refresher.refresh().await,
            Err(RefreshError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_shares_one_exchange() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken": "tok-B"}"#)
            .expect(1)
            .create_async()
            .await;

        let credentials = Arc::new(CredentialStore::new());
        credentials.set("stale");
        let refresher = coordinator(&server.url(), credentials);

        let results = futures::future::join_all(
            (0..4).map(|_| refresher.refresh_after(Some("stale"))),
        )
        .await;

        for result in results {
            assert_eq!(result, Ok("tok-B".to_string()));
        }
        assert_eq!(refresher.exchanges_started(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_after_skips_when_already_replaced() {
        let server = mockito::Server::new_async().await;
        let credentials = Arc::new(CredentialStore::new());
        credentials.set("fresh");
        let refresher = coordinator(&server.url(), credentials);

        assert_eq!(
            refresher.refresh_after(Some("stale")).await,
            Ok("fresh".to_string())
        );
        assert_eq!(refresher.exchanges_started(), 0);
    }

    #[tokio::test]
    async fn test_failed_exchange_is_not_cached() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/auth/refresh")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let credentials = Arc::new(CredentialStore::new());
        let refresher = coordinator(&server.url(), credentials);
        assert!(refresher.refresh().await.is_err());
        failing.assert_async().await;
        failing.remove_async().await;

        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken": "tok-C"}"#)
            .create_async()
            .await;
        assert_eq!(refresher.refresh().await, Ok("tok-C".to_string()));
        assert_eq!(refresher.exchanges_started(), 2);
    }

    #[tokio::test]
    async fn test_refresh_finishing_after_logout_does_not_restore_token() {
        let mut server = mockito::Server::new_async().await;
        let credentials = Arc::new(CredentialStore::new());
        credentials.set("stale");

        // Logout lands while the server is answering the exchange
        let during = Arc::clone(&credentials);
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body_from_request(move |_| {
                during.clear();
                br#"{"accessToken": "tok-B"}"#.to_vec()
            })
            .create_async()
            .await;

        let refresher = coordinator(&server.url(), Arc::clone(&credentials));
        assert_eq!(refresher.refresh().await, Err(RefreshError::SessionEnded));
        assert_eq!(credentials.get(), None);
    }

    #[tokio::test]
    async fn test_refresh_yields_to_login_during_exchange() {
        let mut server = mockito::Server::new_async().await;
        let credentials = Arc::new(CredentialStore::new());
        credentials.set("stale");

        let during = Arc::clone(&credentials);
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body_from_request(move |_| {
                during.set("tok-login");
                br#"{"accessToken": "tok-B"}"#.to_vec()
            })
            .create_async()
            .await;

        let refresher = coordinator(&server.url(), Arc::clone(&credentials));
        assert_eq!(refresher.refresh().await, Ok("tok-login".to_string()));
        assert_eq!(credentials.get().as_deref(), Some("tok-login"));
    }
}
