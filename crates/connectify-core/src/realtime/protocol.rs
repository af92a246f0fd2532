use serde::{Deserialize, Serialize};

use crate::models::NotificationPush;

/// Frames sent to the notification server.
///
/// Encoded as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    /// Bind this connection to a user id
    #[serde(rename = "addUser")]
    AddUser(String),
}

/// Frames pushed by the notification server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    #[serde(rename = "getNotification")]
    GetNotification(NotificationPush),
}

impl ClientFrame {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
