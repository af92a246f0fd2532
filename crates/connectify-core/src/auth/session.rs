//! Session controller.
//!
//! Owns the observable `SessionState` and drives the transitions between
//! logged out, restored (profile known, no token yet) and authenticated.
//! It also owns the realtime channel, so the channel's identity can never
//! drift from the session's: the channel is opened once a session is
//! authenticated and closed on logout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::{LoginPayload, NotificationEvent, UserProfile};
use crate::realtime::{ChannelConnector, RealtimeChannel};

use super::ProfileStore;

/// How long to wait for the realtime channel to connect.
/// The channel is optional, so login must not hang on it.
const CHANNEL_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Snapshot of the client session, published through a `watch` channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub profile: Option<UserProfile>,
    /// True once a token is known to work for this process
    pub authenticated: bool,
    /// True once startup rehydration has run
    pub loaded: bool,
    /// Newest first
    pub notifications: Vec<NotificationEvent>,
}

impl SessionState {
    pub fn user_id(&self) -> Option<&str> {
        self.profile.as_ref().map(|p| p.id.as_str())
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    fn logged_out() -> Self {
        Self {
            loaded: true,
            ..Self::default()
        }
    }
}

/// Put a pushed notification at the head of the list.
/// Returns false (and changes nothing) if the session isn't authenticated.
pub(crate) fn prepend_notification(
    state: &watch::Sender<SessionState>,
    event: NotificationEvent,
) -> bool {
    state.send_if_modified(|s| {
        if !s.authenticated {
            return false;
        }
        s.notifications.insert(0, event);
        true
    })
}

/// Replace the list with the server's copy.
/// Returns false (and changes nothing) if the session isn't authenticated.
pub(crate) fn replace_notifications(
    state: &watch::Sender<SessionState>,
    events: Vec<NotificationEvent>,
) -> bool {
    state.send_if_modified(|s| {
        if !s.authenticated {
            return false;
        }
        s.notifications = events;
        true
    })
}

pub struct SessionController {
    api: ApiClient,
    profiles: ProfileStore,
    connector: Arc<dyn ChannelConnector>,
    state: Arc<watch::Sender<SessionState>>,
    channel: Mutex<Option<RealtimeChannel>>,
    connect_timeout: Duration,
}

impl SessionController {
    pub fn new(api: ApiClient, profiles: ProfileStore, connector: Arc<dyn ChannelConnector>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            api,
            profiles,
            connector,
            state: Arc::new(state),
            channel: Mutex::new(None),
            connect_timeout: Duration::from_secs(CHANNEL_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Override the realtime connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Observe session changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().authenticated
    }

    // ===== Login / Logout =====

    /// Start a session from a login response.
    ///
    /// The token goes to the credential store; only the profile is persisted.
    pub async fn login(&self, payload: LoginPayload) -> Result<()> {
        let (profile, token) = payload.into_parts();
        self.api.credentials().set(token);

        if let Err(e) = self.profiles.save(&profile) {
            self.api.credentials().clear();
            return Err(e.context("Failed to persist profile during login"));
        }

        let user_id = profile.id.clone();
        self.state.send_modify(|s| {
            s.profile = Some(profile);
            s.authenticated = true;
            s.loaded = true;
            s.notifications.clear();
        });
        info!(user_id = %user_id, "Logged in");

        if let Err(e) = self.sync_notifications().await {
            warn!(error = %e, "Initial notification fetch failed");
        }

        if let Err(e) = self.open_channel(&user_id).await {
            warn!(error = %e, "Realtime channel unavailable");
        }
        Ok(())
    }

    /// Log in with email and password against `/auth/login`
    pub async fn login_with_password(&self, email: &str, password: &str) -> Result<()> {
        let payload = self.api.login(email, password).await?;
        self.login(payload).await
    }

    /// Log out. Local teardown happens even if the backend call fails.
    pub async fn logout(&self) {
        if let Err(e) = self.api.logout().await {
            warn!(error = %e, "Backend logout failed, clearing local session anyway");
        }
        self.end_session().await;
        info!("Logged out");
    }

    /// Drop all local session state without calling the backend.
    ///
    /// Used when the session is already gone server-side, e.g. after a
    /// failed refresh.
    pub async fn end_session(&self) {
        self.api.credentials().clear();
        if let Err(e) = self.profiles.clear() {
            warn!(error = %e, "Failed to remove stored profile");
        }
        // State first: a connect still in flight checks it before installing
        self.state.send_modify(|s| *s = SessionState::logged_out());
        self.close_channel().await;
    }

    // ===== Startup =====

    /// Rehydrate the profile saved by a previous run.
    ///
    /// No token survives a restart, so the session stays unauthenticated
    /// until `resume` (or any privileged call) gets one through refresh.
    pub fn restore_on_startup(&self) -> Option<UserProfile> {
        let profile = match self.profiles.load() {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Stored profile unreadable, starting logged out");
                if let Err(e) = self.profiles.clear() {
                    warn!(error = %e, "Failed to remove unreadable profile");
                }
                None
            }
        };

        debug!(has_profile = profile.is_some(), "Session restored");
        self.state.send_modify(|s| {
            s.profile = profile.clone();
            s.authenticated = false;
            s.loaded = true;
            s.notifications.clear();
        });
        profile
    }

    /// Confirm a restored session with a privileged call.
    ///
    /// Returns `Ok(true)` once authenticated, `Ok(false)` if there is no
    /// session to resume or the refresh cookie was rejected (the session is
    /// then ended locally).
    pub async fn resume(&self) -> Result<bool> {
        let user_id = self.state.borrow().user_id().map(str::to_string);
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        match self.api.fetch_notifications().await {
            Ok(events) => {
                self.state.send_modify(|s| {
                    s.authenticated = true;
                    s.notifications = events;
                });
                info!(user_id = %user_id, "Session resumed");
                if let Err(e) = self.open_channel(&user_id).await {
                    warn!(error = %e, "Realtime channel unavailable");
                }
                Ok(true)
            }
            Err(e) if ApiError::is_session_ended(&e) => {
                info!(error = %e, "Stored session expired, logging out locally");
                self.end_session().await;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ===== Profile / Notifications =====

    /// Update the bio; the returned profile replaces the stored one
    pub async fn update_profile(&self, bio: &str) -> Result<UserProfile> {
        let profile = self.api.update_profile(bio).await?;
        self.profiles
            .save(&profile)
            .context("Failed to persist updated profile")?;
        self.state.send_modify(|s| s.profile = Some(profile.clone()));
        Ok(profile)
    }

    /// Replace the notification list with the server's
    pub async fn sync_notifications(&self) -> Result<()> {
        let events = self.api.fetch_notifications().await?;
        debug!(count = events.len(), "Notifications synced");
        replace_notifications(&self.state, events);
        Ok(())
    }

    // ===== Realtime Channel =====

    async fn open_channel(&self, user_id: &str) -> Result<()> {
        {
            let mut slot = self.channel.lock().await;
            if let Some(existing) = slot.as_ref() {
                if existing.user_id() == user_id && existing.is_open() {
                    return Ok(());
                }
            }
            if let Some(stale) = slot.take() {
                stale.close();
            }
        }

        if !self.is_authenticated() {
            anyhow::bail!("Refusing to register on realtime channel before authentication");
        }

        // Connect without holding the slot so logout never waits on the network
        let link = tokio::time::timeout(self.connect_timeout, self.connector.connect())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Timed out connecting to realtime channel after {}s",
                    self.connect_timeout.as_secs_f32()
                )
            })??;

        let mut slot = self.channel.lock().await;
        let still_current = {
            let state = self.state.borrow();
            state.authenticated && state.user_id() == Some(user_id)
        };
        if !still_current {
            link.abort();
            anyhow::bail!("Session changed while connecting to realtime channel");
        }
        if let Some(existing) = slot.as_ref() {
            if existing.user_id() == user_id && existing.is_open() {
                debug!("Realtime channel opened concurrently, discarding duplicate link");
                link.abort();
                return Ok(());
            }
        }
        if let Some(stale) = slot.take() {
            stale.close();
        }

        let channel =
            RealtimeChannel::start(link, user_id, self.api.clone(), Arc::clone(&self.state)).await?;
        *slot = Some(channel);
        Ok(())
    }

    async fn close_channel(&self) {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close();
        }
    }

    /// Whether a realtime connection is currently live
    pub async fn channel_open(&self) -> bool {
        self.channel
            .lock()
            .await
            .as_ref()
            .map(RealtimeChannel::is_open)
            .unwrap_or(false)
    }
}
