use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the sender did.
///
/// The backend only names `like` and `comment` explicitly. Every other kind
/// string is a follow, so unrecognized kinds land in `Follow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

impl NotificationKind {
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "like" => NotificationKind::Like,
            "comment" => NotificationKind::Comment,
            // Fallback arm: anything else is a follow
            _ => NotificationKind::Follow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
        }
    }

    /// Predicate shown after the sender's name
    pub fn action(&self) -> &'static str {
        match self {
            NotificationKind::Like => "liked your post.",
            NotificationKind::Comment => "commented on your post.",
            NotificationKind::Follow => "started following you.",
        }
    }
}

impl From<String> for NotificationKind {
    fn from(kind: String) -> Self {
        Self::from_wire(&kind)
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSender {
    #[serde(alias = "_id", default)]
    pub id: String,
    #[serde(alias = "username", default)]
    pub name: String,
}

/// A notification as kept in session state, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub sender: NotificationSender,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl NotificationEvent {
    /// Human readable line, e.g. "Ann commented on your post."
    pub fn describe(&self) -> String {
        format!("{} {}", self.sender.name, self.kind.action())
    }
}

/// Payload of an inbound `getNotification` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPush {
    pub sender: NotificationSender,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
}

impl NotificationPush {
    /// Pushes carry no timestamp; stamp them on arrival
    pub fn into_event(self, received_at: DateTime<Utc>) -> NotificationEvent {
        NotificationEvent {
            sender: self.sender,
            kind: self.kind,
            timestamp: received_at,
            read: false,
        }
    }
}
