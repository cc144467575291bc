//! Capability resolver: computes a caller's effective permission set from
//! session grants, static keys, and registry-backed capability tokens.
//!
//! Every matching source is unioned and expanded through the role tree.
//! The deployment-wide disable switch is checked first and short-circuits
//! everything else.

use crate::auth::keys::StaticKeys;
use crate::auth::roles::{Role, RoleSet, RoleTree};
use crate::auth::token::{TokenError, TokenSigner};
use crate::db::Database;
use crate::error::Error;
use tracing::debug;

/// Per-session boolean grants, as set at panel login.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionGrants(pub RoleSet);

impl SessionGrants {
    pub fn none() -> Self {
        Self(RoleSet::EMPTY)
    }

    pub fn of(roles: &[Role]) -> Self {
        Self(RoleSet::of(roles))
    }
}

/// Resolves effective capabilities and enforces role requirements.
pub struct CapabilityResolver {
    tree: RoleTree,
    keys: StaticKeys,
    signer: TokenSigner,
    db: Database,
    enabled: bool,
}

impl CapabilityResolver {
    pub fn new(
        tree: RoleTree,
        keys: StaticKeys,
        signer: TokenSigner,
        db: Database,
        enabled: bool,
    ) -> Self {
        Self {
            tree,
            keys,
            signer,
            db,
            enabled,
        }
    }

    /// Whether authorization is enforced at all.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Verify a static key against one specific role (panel login path).
    pub fn verify_key(&self, role: Role, key: &str) -> bool {
        if !self.enabled {
            return true;
        }
        self.keys.verify(role, key)
    }

    /// Expand a set of granted roles through the role tree.
    pub fn expand(&self, roles: RoleSet) -> RoleSet {
        self.tree.expand_set(roles)
    }

    /// Require `role`; `Unauthorized` unless some credential source grants it.
    ///
    /// Sources are consulted in order (session, static keys, capability
    /// token) but all matches within a source are unioned before the check.
    /// A token that fails signature verification is treated as absent; an
    /// expired or revoked token is surfaced distinctly.
    pub async fn require(
        &self,
        role: Role,
        session: &SessionGrants,
        bearer: Option<&str>,
    ) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }

        let mut effective = self.tree.expand_set(session.0);
        if effective.contains(role) {
            return Ok(());
        }

        if let Some(key) = bearer {
            let matched: RoleSet = self.keys.matching_roles(key).collect();
            effective = effective.union(self.tree.expand_set(matched));
            if effective.contains(role) {
                return Ok(());
            }

            // Not a static key: try it as a capability token.
            return self.require_via_token(role, key).await;
        }

        debug!(role = %role, "no credential source granted role");
        Err(Error::Unauthorized)
    }

    /// Effective capability set for status/introspection endpoints. Token
    /// failures here degrade to "no grants" rather than erroring.
    pub async fn effective(
        &self,
        session: &SessionGrants,
        bearer: Option<&str>,
    ) -> RoleSet {
        if !self.enabled {
            return self.tree.expand_set(RoleSet::of(&Role::ALL));
        }

        let mut effective = self.tree.expand_set(session.0);
        if let Some(key) = bearer {
            let matched: RoleSet = self.keys.matching_roles(key).collect();
            effective = effective.union(self.tree.expand_set(matched));

            if let Ok(granted) = self.token_grants(key).await {
                effective = effective.union(granted);
            }
        }
        effective
    }

    async fn require_via_token(&self, role: Role, bearer: &str) -> Result<(), Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = match self.signer.verify(bearer, now) {
            Ok(claims) => claims,
            // Expired is distinguishable so the client can refresh.
            Err(TokenError::Expired) => return Err(Error::TokenExpired),
            // Malformed or forged: this source simply doesn't apply.
            Err(_) => return Err(Error::Unauthorized),
        };

        // The registry is the source of truth: the jti must exist and must
        // not be revoked. A token with no registry record fails closed.
        let record = self
            .db
            .tokens()
            .get(&claims.jti)
            .await?
            .ok_or(Error::Unauthorized)?;

        if record.revoked {
            return Err(Error::TokenRevoked);
        }
        if record.expires < now {
            return Err(Error::TokenExpired);
        }

        let granted: RoleSet = claims.roles.iter().filter_map(|n| Role::parse(n)).collect();
        if self.tree.expand_set(granted).contains(role) {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    async fn token_grants(&self, bearer: &str) -> Result<RoleSet, Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = self
            .signer
            .verify(bearer, now)
            .map_err(|_| Error::Unauthorized)?;
        let record = self
            .db
            .tokens()
            .get(&claims.jti)
            .await?
            .ok_or(Error::Unauthorized)?;
        if record.revoked || record.expires < now {
            return Err(Error::Unauthorized);
        }
        let granted: RoleSet = claims.roles.iter().filter_map(|n| Role::parse(n)).collect();
        Ok(self.tree.expand_set(granted))
    }
}
