//! Pluggable identity-provider exchange (OAuth-style).
//!
//! A provider turns an authorization code into a remote identity; the
//! admin-maintained mapping table turns that identity into a role. An
//! identity with no mapping is authenticated but unauthorized: the caller
//! learns who they are and receives no grants.

use crate::auth::roles::Role;
use crate::config::IdentityProviderConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// An authenticated external account.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
    /// Provider-scoped stable account id.
    pub id: String,
    /// Human-readable login name, lowercased.
    pub login: String,
}

/// Exchange an authorization code for a remote identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name used in mapping rows and session keys.
    fn name(&self) -> &str;

    /// URL the user agent should be sent to for authorization.
    fn authorize_url(&self) -> String;

    /// Redeem `code` at the provider and fetch the account identity.
    async fn exchange(&self, code: &str) -> Result<RemoteIdentity>;
}

/// Resolve an authenticated identity to a role via the mapping table.
///
/// Checked by stable id first, then by login, matching how admins tend to
/// enter mappings. `None` means authenticated-but-unauthorized.
pub async fn mapped_role(
    db: &Database,
    provider: &str,
    identity: &RemoteIdentity,
) -> Result<Option<Role>> {
    if let Some(role) = db.mappings().get(provider, &identity.id).await? {
        return Ok(Some(role));
    }
    Ok(db.mappings().get(provider, &identity.login).await?)
}

/// Twitch OAuth provider.
pub struct TwitchProvider {
    cfg: IdentityProviderConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct TwitchUsersResponse {
    data: Vec<TwitchUser>,
}

#[derive(Deserialize)]
struct TwitchUser {
    id: String,
    login: String,
}

impl TwitchProvider {
    pub fn new(cfg: IdentityProviderConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityProvider for TwitchProvider {
    fn name(&self) -> &str {
        "twitch"
    }

    fn authorize_url(&self) -> String {
        format!(
            "https://id.twitch.tv/oauth2/authorize?client_id={}&redirect_uri={}&response_type=code&scope=user:read:email",
            self.cfg.client_id, self.cfg.redirect_uri
        )
    }

    async fn exchange(&self, code: &str) -> Result<RemoteIdentity> {
        let token: TwitchTokenResponse = self
            .http
            .post("https://id.twitch.tv/oauth2/token")
            .form(&[
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.cfg.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::BadRequest(format!("token exchange failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::BadRequest(format!("token exchange failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::BadRequest(format!("token exchange failed: {e}")))?;

        let users: TwitchUsersResponse = self
            .http
            .get("https://api.twitch.tv/helix/users")
            .bearer_auth(&token.access_token)
            .header("Client-Id", &self.cfg.client_id)
            .send()
            .await
            .map_err(|e| Error::BadRequest(format!("user lookup failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::BadRequest(format!("user lookup failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::BadRequest(format!("user lookup failed: {e}")))?;

        let user = users
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::BadRequest("no user data".to_string()))?;

        Ok(RemoteIdentity {
            id: user.id,
            login: user.login.to_lowercase(),
        })
    }
}
