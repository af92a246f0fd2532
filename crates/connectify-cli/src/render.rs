//! Plain-text rendering of feed items and notifications.

use chrono::{DateTime, Utc};

use connectify_core::models::{Comment, NotificationEvent, Post, UserProfile};
use connectify_core::utils::{time_ago, truncate_string};

/// Maximum characters of a post body shown in the feed listing
const POST_PREVIEW_LENGTH: usize = 120;

pub fn format_notification(event: &NotificationEvent, now: DateTime<Utc>) -> String {
    let marker = if event.read { "     " } else { "[new]" };
    format!(
        "{} {} ({})",
        marker,
        event.describe(),
        time_ago(event.timestamp, now)
    )
}

pub fn format_post(post: &Post, viewer_id: Option<&str>, now: DateTime<Utc>) -> String {
    let age = post
        .created_at
        .map(|at| time_ago(at, now))
        .unwrap_or_else(|| "unknown".to_string());
    let liked = match viewer_id {
        Some(id) if post.is_liked_by(id) => ", liked",
        _ => "",
    };
    let likes = match post.like_count() {
        1 => "1 like".to_string(),
        n => format!("{} likes", n),
    };
    format!(
        "@{} ({}): {} [{}{}]",
        post.author.username,
        age,
        truncate_string(&post.description, POST_PREVIEW_LENGTH),
        likes,
        liked
    )
}

pub fn format_comment(comment: &Comment, now: DateTime<Utc>) -> String {
    let age = comment
        .created_at
        .map(|at| time_ago(at, now))
        .unwrap_or_else(|| "unknown".to_string());
    format!("  @{} ({}): {}", comment.author.username, age, comment.text)
}

pub fn format_profile(profile: &UserProfile) -> String {
    let mut out = format!(
        "{} (@{})\n{} followers, {} following",
        profile.display_name(),
        profile.username,
        profile.followers.len(),
        profile.following.len()
    );
    if let Some(bio) = profile.bio.as_deref().filter(|b| !b.trim().is_empty()) {
        out.push('\n');
        out.push_str(bio);
    }
    out
}

/// Notifications strictly newer than `watermark`, newest first.
/// Everything is new when there is no watermark yet.
pub fn newer_than(
    events: &[NotificationEvent],
    watermark: Option<DateTime<Utc>>,
) -> Vec<NotificationEvent> {
    events
        .iter()
        .filter(|n| watermark.map_or(true, |mark| n.timestamp > mark))
        .cloned()
        .collect()
}
