//! Connectify CLI - a terminal client for the Connectify social feed.
//!
//! Logs in, runs one command against the API and logs out again. The
//! `watch` command keeps the realtime channel open and prints notifications
//! as they arrive until interrupted.

mod render;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use connectify_core::realtime::WebSocketConnector;
use connectify_core::{ApiClient, ApiError, Config, ProfileStore, SessionController};

use render::{format_comment, format_notification, format_post, format_profile, newer_than};

const EMAIL_ENV: &str = "CONNECTIFY_EMAIL";
const PASSWORD_ENV: &str = "CONNECTIFY_PASSWORD";
const LOG_DIR_ENV: &str = "CONNECTIFY_LOG_DIR";

const USAGE: &str = "Usage: connectify <command>

Commands:
  feed              Show the latest posts
  post <text>       Publish a text post
  like <post-id>    Like or unlike a post
  delete <post-id>  Delete one of your posts
  comments <post-id>
                    Show the comments on a post
  comment <post-id> <text>
                    Comment on a post
  profile <username>
                    Show a user's profile and posts
  notifications     Show your notifications
  watch             Stream notifications until Ctrl-C
  bio <text>        Update your profile bio
  reset-password <token>
                    Set a new password with an emailed reset token

Environment:
  CONNECTIFY_API_URL, CONNECTIFY_REALTIME_URL, CONNECTIFY_EMAIL,
  CONNECTIFY_PASSWORD, CONNECTIFY_LOG_DIR, RUST_LOG";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, or to a daily file under `CONNECTIFY_LOG_DIR` when set.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "connectify.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

enum Command {
    /// Needs a logged-in session
    Session(SessionCommand),
    /// Works without logging in
    ResetPassword(String),
}

enum SessionCommand {
    Feed,
    Post(String),
    Like(String),
    Delete(String),
    Comments(String),
    Comment { post_id: String, text: String },
    Profile(String),
    Notifications,
    Watch,
    Bio(String),
}

fn parse_args(args: &[String]) -> Option<Command> {
    match args.first().map(String::as_str) {
        Some("feed") => Some(Command::Session(SessionCommand::Feed)),
        Some("post") if args.len() > 1 => {
            Some(Command::Session(SessionCommand::Post(args[1..].join(" "))))
        }
        Some("like") if args.len() == 2 => Some(Command::Session(SessionCommand::Like(args[1].clone()))),
        Some("delete") if args.len() == 2 => {
            Some(Command::Session(SessionCommand::Delete(args[1].clone())))
        }
        Some("comments") if args.len() == 2 => {
            Some(Command::Session(SessionCommand::Comments(args[1].clone())))
        }
        Some("comment") if args.len() > 2 => Some(Command::Session(SessionCommand::Comment {
            post_id: args[1].clone(),
            text: args[2..].join(" "),
        })),
        Some("profile") if args.len() == 2 => {
            Some(Command::Session(SessionCommand::Profile(args[1].clone())))
        }
        Some("notifications") => Some(Command::Session(SessionCommand::Notifications)),
        Some("watch") => Some(Command::Session(SessionCommand::Watch)),
        Some("bio") if args.len() > 1 => {
            Some(Command::Session(SessionCommand::Bio(args[1..].join(" "))))
        }
        Some("reset-password") if args.len() == 2 => Some(Command::ResetPassword(args[1].clone())),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    info!(api_url = %config.api_url, "Connectify CLI starting");

    let command = match command {
        Command::ResetPassword(token) => return reset_password(&config, &token).await,
        Command::Session(command) => command,
    };

    let api = ApiClient::new(&config.api_url)?;
    let session = SessionController::new(
        api,
        ProfileStore::new(config.data_dir()?),
        Arc::new(WebSocketConnector::new(config.realtime_url.clone())),
    );

    // Each run logs in fresh: the refresh cookie lives in this process's
    // cookie jar only, and the run ends with a logout.
    let email = login(&session, &config).await?;
    if config.last_email.as_deref() != Some(email.as_str()) {
        config.last_email = Some(email);
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    let result = run(&session, command).await;
    if let Err(ref e) = result {
        if ApiError::is_session_ended(e) {
            eprintln!("Your session has ended. Please log in again.");
        }
    }

    session.logout().await;
    result
}

async fn login(session: &SessionController, config: &Config) -> Result<String> {
    let email = match std::env::var(EMAIL_ENV).ok().or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {}: ", email))
            .context("Failed to read password")?,
    };

    session
        .login_with_password(&email, &password)
        .await
        .context("Login failed")?;

    if let Some(profile) = session.snapshot().profile {
        eprintln!("Logged in as @{}.", profile.username);
    }
    Ok(email)
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;

    eprint!("{}", label);
    io::stderr().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

async fn run(session: &SessionController, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Feed => {
            let viewer = session.snapshot().user_id().map(str::to_string);
            let posts = session.api().fetch_posts().await?;
            if posts.is_empty() {
                println!("No posts yet.");
            }
            let now = Utc::now();
            for post in &posts {
                println!("{}", format_post(post, viewer.as_deref(), now));
            }
        }
        SessionCommand::Post(text) => {
            let post = session.api().create_post(&text).await?;
            println!("Posted {}.", post.id);
        }
        SessionCommand::Like(post_id) => {
            session.api().like_post(&post_id).await?;
            println!("Toggled like on {}.", post_id);
        }
        SessionCommand::Delete(post_id) => {
            session.api().delete_post(&post_id).await?;
            println!("Deleted {}.", post_id);
        }
        SessionCommand::Comments(post_id) => {
            let comments = session.api().fetch_comments(&post_id).await?;
            if comments.is_empty() {
                println!("No comments yet.");
            }
            let now = Utc::now();
            for comment in &comments {
                println!("{}", format_comment(comment, now));
            }
        }
        SessionCommand::Comment { post_id, text } => {
            let comment = session.api().add_comment(&post_id, &text).await?;
            println!("{}", format_comment(&comment, Utc::now()));
        }
        SessionCommand::Profile(username) => {
            let profile = session.api().fetch_user(&username).await?;
            let posts = session.api().fetch_user_posts(&username).await?;
            println!("{}", format_profile(&profile));
            let viewer = session.snapshot().user_id().map(str::to_string);
            let now = Utc::now();
            for post in &posts {
                println!("{}", format_post(post, viewer.as_deref(), now));
            }
        }
        SessionCommand::Notifications => {
            let state = session.snapshot();
            if state.notifications.is_empty() {
                println!("No notifications.");
            }
            let now = Utc::now();
            for event in &state.notifications {
                println!("{}", format_notification(event, now));
            }
        }
        SessionCommand::Watch => watch(session).await?,
        SessionCommand::Bio(bio) => {
            let profile = session.update_profile(&bio).await?;
            println!("Bio updated: {}", profile.bio.unwrap_or_default());
        }
    }
    Ok(())
}

/// Print notifications as the session state changes, until Ctrl-C
async fn watch(session: &SessionController) -> Result<()> {
    if !session.channel_open().await {
        anyhow::bail!("Realtime channel is not available");
    }
    eprintln!("Watching for notifications (Ctrl-C to stop)...");

    let mut updates = session.subscribe();
    let mut watermark = updates
        .borrow_and_update()
        .notifications
        .iter()
        .map(|n| n.timestamp)
        .max();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if !state.authenticated {
                    break;
                }
                // The list may be capped server-side, so go by time, not length
                let now = Utc::now();
                let fresh = newer_than(&state.notifications, watermark);
                for event in &fresh {
                    println!("{}", format_notification(event, now));
                }
                if let Some(latest) = fresh.iter().map(|n| n.timestamp).max() {
                    watermark = Some(latest);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn reset_password(config: &Config, reset_token: &str) -> Result<()> {
    let password = rpassword::prompt_password("New password: ").context("Failed to read password")?;
    let confirm = rpassword::prompt_password("Confirm password: ").context("Failed to read password")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match.");
    }

    let api = ApiClient::new(&config.api_url)?;
    let message = api.reset_password(reset_token, &password).await?;
    println!("{} You may now log in.", message);
    Ok(())
}
