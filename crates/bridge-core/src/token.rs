//! Session token pairing
//!
//! A single shared secret provisioned once per bridge session. Stored in the
//! user's local data dir and optionally exported to a configured file so
//! local clients can discover it. Good enough for localhost pairing; every
//! request is checked against it individually.

use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Placeholder used wherever a token would otherwise appear in logs/traces.
pub const MASKED: &str = "***";

/// Generate a fresh session token.
pub fn generate() -> String {
    // Two v4 UUIDs give 256 bits of randomness in plain hex.
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Default on-disk location for the persisted token.
pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("editor-bridge")
        .join("session.token")
}

/// Load the persisted token, creating one on first use.
pub fn load_or_create(path: &Path) -> Result<String> {
    if path.exists() {
        let token = std::fs::read_to_string(path)?.trim().to_string();
        if !token.is_empty() {
            debug!(path = %path.display(), "Loaded existing session token");
            return Ok(token);
        }
    }

    let token = generate();
    write_secret_file(path, &token)?;
    debug!(path = %path.display(), "Provisioned new session token");
    Ok(token)
}

/// Export the token to a discovery file (mode 0600).
pub fn export(path: &Path, token: &str) -> Result<()> {
    write_secret_file(path, token)?;
    debug!(path = %path.display(), "Exported session token");
    Ok(())
}

fn write_secret_file(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", token))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Re-apply perms even if the file existed already.
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            warn!(path = %path.display(), "Failed to restrict token file permissions: {}", e);
        }
    }

    Ok(())
}
