//! Pairing credentials persisted as `{token, user_id, mac_address}` JSON so
//! the push-link handshake only has to run once per hub.

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::poolsync::{Credentials, PairingResult};

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub mac_address: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl StoredCredentials {
    /// Credentials from a successful handshake, `None` otherwise.
    pub fn from_pairing(result: &PairingResult) -> Option<Self> {
        let token = result.password()?.to_owned();
        Some(Self {
            token: Some(token),
            user_id: Some(result.user_id.clone()),
            mac_address: result.mac_address().map(str::to_owned),
            saved_at: Some(Utc::now()),
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.token.clone(), self.user_id.clone())
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("token_len", &self.token.as_ref().map(String::len))
            .field("user_id", &self.user_id)
            .field("mac_address", &self.mac_address)
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

/// Read `path`. A missing file or one without a token yields `None`; an
/// unreadable one is logged and also yields `None`.
pub async fn load(path: &Path) -> Option<StoredCredentials> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "credentials_store: no stored credentials");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "credentials_store: failed to read file");
            return None;
        }
    };

    match serde_json::from_slice::<StoredCredentials>(&bytes) {
        Ok(stored) if stored.credentials().has_token() => Some(stored),
        Ok(_) => {
            warn!(path = %path.display(), "credentials_store: file has no token; ignoring");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "credentials_store: invalid JSON; ignoring");
            None
        }
    }
}

/// Write `stored` to `path`, creating parent directories. On unix the file
/// is made owner-only.
pub async fn save(path: &Path, stored: &StoredCredentials) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let content = serde_json::to_vec_pretty(stored).context("failed to encode credentials")?;
    fs::write(path, &content)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("failed to restrict {}", path.display()))?;
    }

    info!(path = %path.display(), "credentials_store: saved");
    Ok(())
}
