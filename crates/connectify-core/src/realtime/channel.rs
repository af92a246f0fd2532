use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::auth::session::{prepend_notification, replace_notifications};
use crate::auth::SessionState;

use super::{ChannelLink, ClientFrame, ServerFrame};

/// A live notification connection bound to one user id.
///
/// Dropping the channel tears the connection down.
pub struct RealtimeChannel {
    user_id: String,
    outbound: mpsc::Sender<ClientFrame>,
    listener: JoinHandle<()>,
    transport: Vec<JoinHandle<()>>,
}

impl RealtimeChannel {
    /// Register `user_id` on the link and start applying pushes to `state`.
    ///
    /// Only call this once the session is authenticated.
    pub async fn start(
        link: ChannelLink,
        user_id: &str,
        api: ApiClient,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Result<Self> {
        let ChannelLink {
            outbound,
            inbound,
            tasks,
        } = link;

        outbound
            .send(ClientFrame::AddUser(user_id.to_string()))
            .await
            .context("Realtime channel closed before registration")?;
        info!(user_id, "Registered on realtime channel");

        let listener = tokio::spawn(Self::listen(inbound, api, state));

        Ok(Self {
            user_id: user_id.to_string(),
            outbound,
            listener,
            transport: tasks,
        })
    }

    async fn listen(
        mut inbound: mpsc::Receiver<ServerFrame>,
        api: ApiClient,
        state: Arc<watch::Sender<SessionState>>,
    ) {
        while let Some(frame) = inbound.recv().await {
            match frame {
                ServerFrame::GetNotification(push) => {
                    let event = push.into_event(Utc::now());
                    debug!(sender = %event.sender.name, kind = %event.kind, "Notification pushed");

                    if !prepend_notification(&state, event) {
                        debug!("Session no longer authenticated, dropping push");
                        continue;
                    }

                    // The push is only a hint; the server list is authoritative
                    match api.fetch_notifications().await {
                        Ok(events) => {
                            replace_notifications(&state, events);
                        }
                        Err(e) => warn!(error = %e, "Notification resync failed"),
                    }
                }
            }
        }
        debug!("Realtime channel inbound stream ended");
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// False once the server side or transport has gone away
    pub fn is_open(&self) -> bool {
        !self.listener.is_finished() && !self.outbound.is_closed()
    }

    pub fn close(self) {
        info!(user_id = %self.user_id, "Closing realtime channel");
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.listener.abort();
        for task in &self.transport {
            task.abort();
        }
    }
}
