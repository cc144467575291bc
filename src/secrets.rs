//! Secrets file management.
//!
//! All long-lived secrets live in one TOML file: the session cookie
//! signing secret, the capability token signing secret, and one static key
//! per role. On first start the file is generated with random values and
//! 0600 permissions; existing secrets are never regenerated, though
//! missing role keys are filled in so upgrades that add roles keep
//! working.

use crate::auth::roles::Role;
use crate::auth::StaticKeys;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Length of generated secrets and keys, in alphanumeric characters.
const SECRET_LEN: usize = 48;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("failed to read secrets file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse secrets file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize secrets: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Contents of the secrets file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secrets {
    /// HMAC secret for the panel session cookie.
    pub session_secret: String,
    /// HMAC secret for capability token signatures.
    pub token_secret: String,
    /// Static keys by role name.
    #[serde(default)]
    pub keys: HashMap<String, String>,
}

impl Secrets {
    /// Load the secrets file, creating or completing it as needed.
    pub fn ensure(path: impl AsRef<Path>) -> Result<Self, SecretsError> {
        let path = path.as_ref();
        let mut secrets = if path.exists() {
            let body = std::fs::read_to_string(path)?;
            toml::from_str::<Secrets>(&body)?
        } else {
            info!(path = %path.display(), "generating new secrets file");
            Secrets {
                session_secret: random_secret(),
                token_secret: random_secret(),
                keys: HashMap::new(),
            }
        };

        let mut changed = !path.exists();
        for role in Role::ALL {
            if !secrets.keys.contains_key(role.name()) {
                secrets.keys.insert(role.name().to_string(), random_secret());
                changed = true;
            }
        }

        if changed {
            secrets.write(path)?;
        }
        Ok(secrets)
    }

    /// Static keys parsed into the verifier's shape. Unknown role names in
    /// the file are ignored.
    pub fn static_keys(&self) -> StaticKeys {
        let keys = self
            .keys
            .iter()
            .filter_map(|(name, key)| Role::parse(name).map(|role| (role, key.clone())))
            .collect();
        StaticKeys::new(keys)
    }

    fn write(&self, path: &Path) -> Result<(), SecretsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}
