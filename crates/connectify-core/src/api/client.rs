//! API client for communicating with the Connectify REST API.
//!
//! Every call goes through the same pipeline:
//!
//! 1. the current access token (if any) is attached as a bearer token
//! 2. a 401 response triggers one refresh through `RefreshCoordinator`
//!    and the call is re-issued once with the new token
//! 3. anything else, including a second 401, is returned as is

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::{CredentialStore, RefreshCoordinator};
use crate::models::{Comment, LoginPayload, NotificationEvent, Post, UserProfile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Also bounds how long logout can hang on an unreachable backend.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A single outbound call, kept around so it can be re-issued after a refresh.
#[derive(Debug, Clone)]
struct OutboundCall {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    /// Set when the call is re-issued after a refresh. A call with this set
    /// is never retried again.
    pending_retry: bool,
}

impl OutboundCall {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            pending_retry: false,
        }
    }

    fn with_body<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Unserializable request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    fn into_retry(self) -> Self {
        Self {
            pending_retry: true,
            ..self
        }
    }
}

/// API client for Connectify.
/// Clone is cheap - the reqwest client, token store and refresher are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Create a new API client with its own, empty credential store
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_credentials(base_url, Arc::new(CredentialStore::new()))
    }

    /// Create a client around an existing credential store
    pub fn with_credentials(base_url: &str, credentials: Arc<CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let refresher = Arc::new(RefreshCoordinator::new(
            client.clone(),
            &base_url,
            Arc::clone(&credentials),
        ));

        Ok(Self {
            client,
            base_url,
            credentials,
            refresher,
        })
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn refresher(&self) -> &Arc<RefreshCoordinator> {
        &self.refresher
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send one attempt of `call`, with `token` as bearer if present
    async fn dispatch(
        &self,
        call: &OutboundCall,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self.client.request(call.method.clone(), self.url(&call.path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(ref body) = call.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        debug!(
            method = %call.method,
            path = %call.path,
            status = %response.status(),
            retry = call.pending_retry,
            "API response received"
        );
        Ok(response)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Run a call through the pipeline
    async fn execute(&self, call: OutboundCall) -> Result<reqwest::Response, ApiError> {
        let sent_with = self.credentials.get();
        let response = self.dispatch(&call, sent_with.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || call.pending_retry {
            return Self::check_response(response).await;
        }

        let call = call.into_retry();
        let token = match self.refresher.refresh_after(sent_with.as_deref()).await {
            Ok(token) => token,
            Err(e) => {
                warn!(path = %call.path, error = %e, "Token refresh failed, giving up on call");
                return Err(ApiError::RefreshFailed(e));
            }
        };

        let response = self.dispatch(&call, Some(&token)).await?;
        Self::check_response(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "Failed to parse JSON from {}: {} ({})",
                path,
                e,
                ApiError::truncate_body(&text)
            ))
        })
    }

    // ===== Generic Verbs =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(OutboundCall::new(Method::GET, path)).await?;
        Self::parse(response, path).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let call = OutboundCall::new(Method::POST, path).with_body(body)?;
        let response = self.execute(call).await?;
        Self::parse(response, path).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let call = OutboundCall::new(Method::PUT, path).with_body(body)?;
        let response = self.execute(call).await?;
        Self::parse(response, path).await
    }

    /// Send a call whose response body is ignored
    pub async fn send(&self, method: Method, path: &str) -> Result<(), ApiError> {
        self.execute(OutboundCall::new(method, path)).await?;
        Ok(())
    }

    // ===== Auth Endpoints =====

    /// Password login.
    ///
    /// Bypasses the refresh path: a 401 here means bad credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginPayload> {
        let call = OutboundCall::new(Method::POST, "/auth/login").with_body(&serde_json::json!({
            "email": email,
            "password": password,
        }))?;

        let response = self
            .dispatch(&call, None)
            .await
            .context("Failed to send login request")?;
        let response = Self::check_response(response).await?;

        Ok(Self::parse(response, "/auth/login").await?)
    }

    /// Invalidate the refresh cookie server-side
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.send(Method::POST, "/auth/logout").await
    }

    /// Set a new password using an emailed reset token. Returns the server's message.
    pub async fn reset_password(&self, reset_token: &str, password: &str) -> Result<String> {
        let path = format!("/auth/reset-password/{}", urlencoding::encode(reset_token));
        let call = OutboundCall::new(Method::PUT, path.as_str())
            .with_body(&serde_json::json!({ "password": password }))?;
        let response = self.execute(call).await?;
        let text = response.text().await.context("Failed to read reset response")?;

        // The server answers with either a JSON string or plain text
        Ok(serde_json::from_str::<String>(&text).unwrap_or(text))
    }

    // ===== Notifications =====

    /// Fetch the full notification list, newest first
    pub async fn fetch_notifications(&self) -> Result<Vec<NotificationEvent>> {
        let mut events: Vec<NotificationEvent> = self
            .get("/notifications")
            .await
            .context("Failed to fetch notifications")?;
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }

    // ===== Posts =====

    pub async fn fetch_posts(&self) -> Result<Vec<Post>> {
        Ok(self.get("/posts").await.context("Failed to fetch posts")?)
    }

    /// Create a text post
    pub async fn create_post(&self, description: &str) -> Result<Post> {
        Ok(self
            .post("/posts", &serde_json::json!({ "description": description }))
            .await
            .context("Failed to create post")?)
    }

    /// Toggle the current user's like on a post
    pub async fn like_post(&self, post_id: &str) -> Result<()> {
        let path = format!("/posts/{}/like", urlencoding::encode(post_id));
        self.send(Method::PUT, &path)
            .await
            .with_context(|| format!("Failed to like post {}", post_id))?;
        Ok(())
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        let path = format!("/posts/{}", urlencoding::encode(post_id));
        self.send(Method::DELETE, &path)
            .await
            .with_context(|| format!("Failed to delete post {}", post_id))?;
        Ok(())
    }

    pub async fn fetch_comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        let path = format!("/posts/{}/comments", urlencoding::encode(post_id));
        Ok(self
            .get(&path)
            .await
            .with_context(|| format!("Failed to fetch comments for post {}", post_id))?)
    }

    pub async fn add_comment(&self, post_id: &str, text: &str) -> Result<Comment> {
        Ok(self
            .post("/comments", &serde_json::json!({ "postId": post_id, "text": text }))
            .await
            .context("Failed to post comment")?)
    }

    // ===== Users =====

    pub async fn fetch_user(&self, username: &str) -> Result<UserProfile> {
        let path = format!("/users/{}", urlencoding::encode(username));
        Ok(self
            .get(&path)
            .await
            .with_context(|| format!("Failed to fetch user {}", username))?)
    }

    pub async fn fetch_user_posts(&self, username: &str) -> Result<Vec<Post>> {
        let path = format!("/posts/profile/{}", urlencoding::encode(username));
        Ok(self
            .get(&path)
            .await
            .with_context(|| format!("Failed to fetch posts for {}", username))?)
    }

    /// Update the signed-in user's bio; returns the updated profile
    pub async fn update_profile(&self, bio: &str) -> Result<UserProfile> {
        Ok(self
            .put("/users/profile", &serde_json::json!({ "bio": bio }))
            .await
            .context("Failed to update profile")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RefreshError;
    use mockito::Matcher;

    async fn refresh_mock(server: &mut mockito::ServerGuard, token: &str, hits: usize) -> mockito::Mock {
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"accessToken": "{}"}}"#, token))
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_attaches_current_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/posts")
            .match_header("authorization", "Bearer tok-A")
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        let api = ApiClient::new(&server.url()).unwrap();
        api.credentials().set("tok-A");

        let posts = api.fetch_posts().await.unwrap();
        assert!(posts.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sends_unauthenticated_without_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/posts")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let api = ApiClient::new(&server.url()).unwrap();
        api.fetch_posts().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_retried_once() {
        let mut server = mockito::Server::new_async().await;
        let stale = server
            .mock("GET", "/notifications")
            .match_header("authorization", "Bearer tok-A")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/notifications")
            .match_header("authorization", "Bearer tok-B")
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;
        let refresh = refresh_mock(&mut server, "tok-B", 1).await;

        let api = ApiClient::new(&server.url()).unwrap();
        api.credentials().set("tok-A");

        let events = api.fetch_notifications().await.unwrap();
        assert!(events.is_empty());
        assert_eq!(api.credentials().get().as_deref(), Some("tok-B"));

        stale.assert_async().await;
        fresh.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_401_surfaces_unchanged() {
        let mut server = mockito::Server::new_async().await;
        let posts = server
            .mock("GET", "/posts")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        let refresh = refresh_mock(&mut server, "tok-B", 1).await;

        let api = ApiClient::new(&server.url()).unwrap();
        api.credentials().set("tok-A");

        let err = api.get::<Vec<Post>>("/posts").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));

        posts.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_surfaces_as_refresh_failed() {
        let mut server = mockito::Server::new_async().await;
        let posts = server
            .mock("GET", "/posts")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(403)
            .expect(1)
            .create_async()
            .await;

        let api = ApiClient::new(&server.url()).unwrap();
        api.credentials().set("tok-A");

        let err = api.get::<Vec<Post>>("/posts").await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::RefreshFailed(RefreshError::Rejected { status: 403 })
        ));
        assert!(err.ends_session());
        assert_eq!(api.credentials().get().as_deref(), Some("tok-A"));
        posts.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let stale = server
            .mock("GET", "/posts")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .expect(3)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/posts")
            .match_header("authorization", "Bearer tok-B")
            .with_status(200)
            .with_body("[]")
            .expect(3)
            .create_async()
            .await;
        let refresh = refresh_mock(&mut server, "tok-B", 1).await;

        let api = ApiClient::new(&server.url()).unwrap();
        api.credentials().set("stale");

        let results = futures::future::join_all((0..3).map(|_| api.fetch_posts())).await;
        for result in results {
            assert!(result.is_ok());
        }
        assert_eq!(api.refresher().exchanges_started(), 1);

        stale.assert_async().await;
        fresh.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_other_errors_pass_through_without_refresh() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/ghost")
            .with_status(404)
            .with_body("User not found")
            .create_async()
            .await;
        let refresh = refresh_mock(&mut server, "unused", 0).await;

        let api = ApiClient::new(&server.url()).unwrap();
        api.credentials().set("tok-A");

        let err = api.fetch_user("ghost").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::NotFound(body)) if body == "User not found"
        ));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_does_not_refresh_on_bad_password() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .match_body(Matcher::PartialJson(serde_json::json!({"email": "ann@example.com"})))
            .with_status(401)
            .with_body("Invalid credentials")
            .create_async()
            .await;
        let refresh = refresh_mock(&mut server, "unused", 0).await;

        let api = ApiClient::new(&server.url()).unwrap();
        let err = api.login("ann@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_retry_resends_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/comments")
            .match_header("authorization", "Bearer tok-A")
            .with_status(401)
            .create_async()
            .await;
        let retried = server
            .mock("POST", "/comments")
            .match_header("authorization", "Bearer tok-B")
            .match_body(Matcher::Json(serde_json::json!({"postId": "p1", "text": "nice"})))
            .with_status(201)
            .with_body(r#"{"_id": "c1", "user": {"_id": "u1", "username": "ann"}, "text": "nice"}"#)
            .expect(1)
            .create_async()
            .await;
        refresh_mock(&mut server, "tok-B", 1).await;

        let api = ApiClient::new(&server.url()).unwrap();
        api.credentials().set("tok-A");

        let comment = api.add_comment("p1", "nice").await.unwrap();
        assert_eq!(comment.id, "c1");
        retried.assert_async().await;
    }

    #[tokio::test]
    async fn test_reset_password_accepts_plain_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/auth/reset-password/abc123")
            .with_status(200)
            .with_body("\"Password has been reset.\"")
            .create_async()
            .await;

        let api = ApiClient::new(&server.url()).unwrap();
        let message = api.reset_password("abc123", "hunter2").await.unwrap();
        assert_eq!(message, "Password has been reset.");
    }

    const POST_JSON: &str = r#"{"_id": "p1", "user": {"_id": "u1", "username": "ann"},
                               "description": "hello", "likes": [],
                               "createdAt": "2024-05-01T10:00:00Z"}"#;

    fn signed_in(server: &mockito::ServerGuard) -> ApiClient {
        let api = ApiClient::new(&server.url()).unwrap();
        api.credentials().set("tok-A");
        api
    }

    #[tokio::test]
    async fn test_create_post() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/posts")
            .match_header("authorization", "Bearer tok-A")
            .match_body(Matcher::Json(serde_json::json!({ "description": "hello" })))
            .with_status(201)
            .with_body(POST_JSON)
            .expect(1)
            .create_async()
            .await;

        let post = signed_in(&server).create_post("hello").await.unwrap();
        assert_eq!(post.id, "p1");
        assert_eq!(post.author.username, "ann");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_like_post_escapes_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/posts/a%2Fb/like")
            .match_header("authorization", "Bearer tok-A")
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        signed_in(&server).like_post("a/b").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_post_refreshes_on_401() {
        let mut server = mockito::Server::new_async().await;
        let stale = server
            .mock("DELETE", "/posts/p1")
            .match_header("authorization", "Bearer tok-A")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("DELETE", "/posts/p1")
            .match_header("authorization", "Bearer tok-B")
            .with_status(200)
            .with_body("\"Post deleted\"")
            .expect(1)
            .create_async()
            .await;
        let refresh = refresh_mock(&mut server, "tok-B", 1).await;

        signed_in(&server).delete_post("p1").await.unwrap();
        stale.assert_async().await;
        fresh.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_post_forbidden() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/posts/p1")
            .with_status(403)
            .with_body("not your post")
            .create_async()
            .await;

        let err = signed_in(&server).delete_post("p1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_comments() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/posts/p%201/comments")
            .match_header("authorization", "Bearer tok-A")
            .with_status(200)
            .with_body(
                r#"[{"_id": "c1", "user": {"_id": "u2", "username": "bo"}, "text": "nice",
                     "createdAt": "2024-05-01T11:00:00Z"}]"#,
            )
            .expect(1)
            .create_async()
            .await;

        let comments = signed_in(&server).fetch_comments("p 1").await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author.username, "bo");
        assert_eq!(comments[0].text, "nice");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_user_posts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/posts/profile/ann%20b")
            .match_header("authorization", "Bearer tok-A")
            .with_status(200)
            .with_body(format!("[{}]", POST_JSON))
            .expect(1)
            .create_async()
            .await;

        let posts = signed_in(&server).fetch_user_posts("ann b").await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].description, "hello");
        mock.assert_async().await;
    }

    #[test]
    fn test_retry_flag_is_set_once() {
        let call = OutboundCall::new(Method::GET, "/posts");
        assert!(!call.pending_retry);
        let call = call.into_retry();
        assert!(call.pending_retry);
        assert_eq!(call.path, "/posts");
    }
}
