use std::fmt;

use serde::{Deserialize, Serialize};

/// The signed-in user's profile snapshot.
///
/// This is the only piece of session state written to disk, so it has no
/// token field. Anything the backend sends that isn't listed here (including
/// a token) is dropped on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(rename = "profilePicture", default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
}

impl UserProfile {
    /// Name to greet the user with, falling back to the handle
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// Response body of `POST /auth/login`: the profile plus an access token.
#[derive(Clone, Deserialize)]
pub struct LoginPayload {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub token: String,
}

impl LoginPayload {
    pub fn new(profile: UserProfile, token: impl Into<String>) -> Self {
        Self {
            profile,
            token: token.into(),
        }
    }

    /// Split into the persistable profile and the in-memory token
    pub fn into_parts(self) -> (UserProfile, String) {
        (self.profile, self.token)
    }
}

impl fmt::Debug for LoginPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginPayload")
            .field("profile", &self.profile)
            .field("token", &"<redacted>")
            .finish()
    }
}
