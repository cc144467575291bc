//! Role model: a closed enumeration plus a precomputed expansion table.
//!
//! Granting a role implies a set of effective capabilities (admin implies
//! everything except overlay; overlay is a composite granting tts+pull).
//! The tree is static configuration validated once at startup, so a
//! malformed table fails fast instead of at request time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of roles known to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Mod,
    Tts,
    Push,
    Pull,
    Overlay,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Mod,
        Role::Tts,
        Role::Push,
        Role::Pull,
        Role::Overlay,
    ];

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Mod => "mod",
            Role::Tts => "tts",
            Role::Push => "push",
            Role::Pull => "pull",
            Role::Overlay => "overlay",
        }
    }

    /// Parse a role name (lowercase, exact).
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "mod" => Some(Role::Mod),
            "tts" => Some(Role::Tts),
            "push" => Some(Role::Push),
            "pull" => Some(Role::Pull),
            "overlay" => Some(Role::Overlay),
            _ => None,
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Role::Admin => 1 << 0,
            Role::Mod => 1 << 1,
            Role::Tts => 1 << 2,
            Role::Push => 1 << 3,
            Role::Pull => 1 << 4,
            Role::Overlay => 1 << 5,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A small set of roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleSet(u8);

impl RoleSet {
    pub const EMPTY: RoleSet = RoleSet(0);

    pub fn of(roles: &[Role]) -> Self {
        let mut set = RoleSet::EMPTY;
        for r in roles {
            set.insert(*r);
        }
        set
    }

    pub fn insert(&mut self, role: Role) {
        self.0 |= role.bit();
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn union(&self, other: RoleSet) -> RoleSet {
        RoleSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        Role::ALL.into_iter().filter(|r| self.contains(*r))
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut set = RoleSet::EMPTY;
        for r in iter {
            set.insert(r);
        }
        set
    }
}

/// Errors detected while validating the role tree at startup.
#[derive(Debug, thiserror::Error)]
pub enum RoleTreeError {
    #[error("role {0} expands to an empty set")]
    EmptyExpansion(Role),
    #[error("base role {0} does not grant itself")]
    MissingSelf(Role),
    #[error("role {0} expansion is not closed (expanding twice grows the set)")]
    NotClosed(Role),
}

/// Mapping from a granted role to the set of capabilities it implies.
#[derive(Debug, Clone)]
pub struct RoleTree {
    grants: [(Role, RoleSet); 6],
}

impl RoleTree {
    /// Build the standard tree and validate it.
    pub fn standard() -> Result<Self, RoleTreeError> {
        let tree = Self {
            grants: [
                (
                    Role::Admin,
                    RoleSet::of(&[Role::Admin, Role::Mod, Role::Tts, Role::Push, Role::Pull]),
                ),
                (Role::Mod, RoleSet::of(&[Role::Mod, Role::Tts])),
                (Role::Tts, RoleSet::of(&[Role::Tts])),
                (Role::Push, RoleSet::of(&[Role::Push])),
                (Role::Pull, RoleSet::of(&[Role::Pull])),
                // Composite: overlay grants playback capabilities without
                // carrying the overlay name itself.
                (Role::Overlay, RoleSet::of(&[Role::Tts, Role::Pull])),
            ],
        };
        tree.validate()?;
        Ok(tree)
    }

    /// Expand a single granted role to its effective capability set.
    pub fn expand(&self, role: Role) -> RoleSet {
        self.grants
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, set)| *set)
            .unwrap_or(RoleSet::EMPTY)
    }

    /// Expand a set of granted roles (union of per-role expansions).
    pub fn expand_set(&self, roles: RoleSet) -> RoleSet {
        roles
            .iter()
            .fold(RoleSet::EMPTY, |acc, r| acc.union(self.expand(r)))
    }

    /// Check the invariants: non-empty expansions, base roles grant
    /// themselves, and expansion is idempotent (the table is closed).
    fn validate(&self) -> Result<(), RoleTreeError> {
        for (role, set) in &self.grants {
            if set.is_empty() {
                return Err(RoleTreeError::EmptyExpansion(*role));
            }
            // Composite roles need not grant their own name.
            let composite = matches!(role, Role::Overlay);
            if !composite && !set.contains(*role) {
                return Err(RoleTreeError::MissingSelf(*role));
            }
            if self.expand_set(*set) != *set {
                return Err(RoleTreeError::NotClosed(*role));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_tree_validates() {
        RoleTree::standard().expect("standard tree is well-formed");
    }

    #[test]
    fn test_expansion_idempotent() {
        let tree = RoleTree::standard().unwrap();
        for role in Role::ALL {
            let once = tree.expand(role);
            let twice = tree.expand_set(once);
            assert_eq!(once, twice, "expanding {role} twice changed the set");
        }
    }

    #[test]
    fn test_admin_grants_everything_but_overlay() {
        let tree = RoleTree::standard().unwrap();
        let eff = tree.expand(Role::Admin);
        assert!(eff.contains(Role::Admin));
        assert!(eff.contains(Role::Mod));
        assert!(eff.contains(Role::Tts));
        assert!(eff.contains(Role::Push));
        assert!(eff.contains(Role::Pull));
        assert!(!eff.contains(Role::Overlay));
    }

    #[test]
    fn test_overlay_is_composite() {
        let tree = RoleTree::standard().unwrap();
        let eff = tree.expand(Role::Overlay);
        assert!(eff.contains(Role::Tts));
        assert!(eff.contains(Role::Pull));
        assert!(!eff.contains(Role::Overlay));
        assert!(!eff.contains(Role::Admin));
    }

    #[test]
    fn test_role_parse_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.name()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::parse("Admin"), None);
    }

    #[test]
    fn test_role_set_union() {
        let a = RoleSet::of(&[Role::Tts]);
        let b = RoleSet::of(&[Role::Pull]);
        let u = a.union(b);
        assert!(u.contains(Role::Tts));
        assert!(u.contains(Role::Pull));
        assert!(!u.contains(Role::Admin));
    }
}
