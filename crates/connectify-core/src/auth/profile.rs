use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::models::UserProfile;

/// Profile file name in the data directory
const PROFILE_FILE: &str = "profile.json";

/// Field names an older client used to persist alongside the profile.
const LEGACY_CREDENTIAL_FIELDS: &[&str] = &["token", "accessToken"];

/// Durable storage for the signed-in user's profile.
///
/// Only `UserProfile` is ever written, so the file can't carry a token.
pub struct ProfileStore {
    data_dir: PathBuf,
}

impl ProfileStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Load the stored profile, if any.
    ///
    /// A file written by an older client that still contains a credential
    /// field is rewritten without it before returning.
    pub fn load(&self) -> Result<Option<UserProfile>> {
        let path = self.profile_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path).context("Failed to read profile file")?;
        let raw: serde_json::Value =
            serde_json::from_str(&contents).context("Failed to parse profile file")?;

        let has_credential = raw
            .as_object()
            .map(|obj| LEGACY_CREDENTIAL_FIELDS.iter().any(|f| obj.contains_key(*f)))
            .unwrap_or(false);

        let profile: UserProfile =
            serde_json::from_value(raw).context("Profile file has unexpected shape")?;

        if has_credential {
            warn!(path = %path.display(), "Stored profile contained a credential, scrubbing");
            self.save(&profile)?;
        }

        Ok(Some(profile))
    }

    /// Save profile to disk
    pub fn save(&self, profile: &UserProfile) -> Result<()> {
        let path = self.profile_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(profile)?;
        std::fs::write(&path, contents).context("Failed to write profile file")?;
        debug!(user_id = %profile.id, "Profile saved");
        Ok(())
    }

    /// Remove the stored profile
    pub fn clear(&self) -> Result<()> {
        let path = self.profile_path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove profile file")?;
        }
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.profile_path()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn profile_path(&self) -> PathBuf {
        self.data_dir.join(PROFILE_FILE)
    }
}
