use anyhow::{Context, Result};
use dirs::home_dir;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::TokenSet;

/// Tokens persisted between runs in ~/.pentair.yml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(flatten)]
    pub tokens: TokenSet,
}

impl StoredSession {
    pub fn new(username: Option<&str>, tokens: &TokenSet) -> Self {
        Self {
            username: username.map(str::to_string),
            tokens: tokens.clone(),
        }
    }
}

/// Get the path to the token file (~/.pentair.yml)
pub fn default_path() -> Result<PathBuf> {
    let home = home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".pentair.yml"))
}

pub fn load(path: &Path) -> Result<StoredSession> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Not logged in. Please run 'pentair login' first."
        ));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file: {}", path.display()))?;

    let stored: StoredSession = serde_yaml::from_str(&content).map_err(|_| {
        anyhow::anyhow!("Token file is incomplete. Please run 'pentair login' again.")
    })?;

    debug!("Loaded tokens from {}", path.display());
    Ok(stored)
}

pub fn save(path: &Path, stored: &StoredSession) -> Result<()> {
    let content = serde_yaml::to_string(stored).context("Failed to serialize tokens")?;

    fs::write(path, content)
        .with_context(|| format!("Failed to write token file: {}", path.display()))?;

    debug!("Saved tokens to {}", path.display());
    Ok(())
}

/// Remove the token file (logout)
pub fn clear(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove token file: {}", path.display()))?;
        debug!("Token file cleared");
    } else {
        warn!("Token file does not exist, nothing to clear");
    }

    Ok(())
}
