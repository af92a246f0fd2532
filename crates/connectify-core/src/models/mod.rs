//! Data models for Connectify entities.
//!
//! - `UserProfile`, `LoginPayload`: the signed-in user and the login response
//! - `NotificationEvent`, `NotificationKind`: like/comment/follow notifications
//! - `Post`, `Comment`: feed content returned by the post endpoints

pub mod notification;
pub mod post;
pub mod user;

pub use notification::{NotificationEvent, NotificationKind, NotificationPush, NotificationSender};
pub use post::{Comment, Post, PostAuthor};
pub use user::{LoginPayload, UserProfile};
