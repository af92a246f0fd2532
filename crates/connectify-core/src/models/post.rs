use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAuthor {
    #[serde(alias = "_id")]
    pub id: String,
    pub username: String,
    #[serde(rename = "profilePicture", default)]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(rename = "user")]
    pub author: PostAuthor,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
    /// User ids that liked the post
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(rename = "user")]
    pub author: PostAuthor,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}
