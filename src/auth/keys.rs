//! Static shared-secret keys, one per role.
//!
//! Keys are long-lived random strings from the secrets file. Comparison is
//! constant-time so a mismatch position cannot be measured.

use crate::auth::roles::Role;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Per-role static keys.
#[derive(Debug, Clone, Default)]
pub struct StaticKeys {
    keys: HashMap<Role, String>,
}

impl StaticKeys {
    pub fn new(keys: HashMap<Role, String>) -> Self {
        Self { keys }
    }

    /// Check whether `presented` matches the key bound to `role`.
    pub fn verify(&self, role: Role, presented: &str) -> bool {
        match self.keys.get(&role) {
            Some(expected) => constant_time_eq(expected, presented),
            None => false,
        }
    }

    /// All roles whose key matches `presented`.
    pub fn matching_roles<'a>(&'a self, presented: &'a str) -> impl Iterator<Item = Role> + 'a {
        self.keys
            .iter()
            .filter(move |(_, key)| constant_time_eq(key, presented))
            .map(move |(role, _)| *role)
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.keys.keys().copied()
    }
}

/// Constant-time string equality. Length difference short-circuits, which
/// leaks only the length, never content position.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> StaticKeys {
        let mut m = HashMap::new();
        m.insert(Role::Admin, "admin-key-secret".to_string());
        m.insert(Role::Tts, "tts-key-secret".to_string());
        StaticKeys::new(m)
    }

    #[test]
    fn test_verify_exact_match_only() {
        let k = keys();
        assert!(k.verify(Role::Admin, "admin-key-secret"));
        assert!(!k.verify(Role::Admin, "admin-key-secreX"));
        assert!(!k.verify(Role::Admin, "Xdmin-key-secret"));
        assert!(!k.verify(Role::Admin, ""));
        // Role without a configured key never verifies.
        assert!(!k.verify(Role::Pull, "admin-key-secret"));
    }

    #[test]
    fn test_matching_roles() {
        let k = keys();
        let matched: Vec<Role> = k.matching_roles("tts-key-secret").collect();
        assert_eq!(matched, vec![Role::Tts]);
        assert_eq!(k.matching_roles("nope").count(), 0);
    }
}
