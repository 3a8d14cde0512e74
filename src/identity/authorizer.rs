use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::profile::UserProfile;

/// Flattened privilege keys for O(log n) capability checks.
/// Always derived from a profile; never edited on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    /// Union of every privilege key across every application's module map.
    pub fn from_profile(profile: &UserProfile) -> Self {
        let keys = profile
            .applications
            .values()
            .flat_map(|modules| modules.values())
            .flat_map(|privs| privs.iter().cloned())
            .filter(|k| !k.trim().is_empty())
            .collect();
        Self(keys)
    }

    pub fn contains(&self, key: &str) -> bool { self.0.contains(key) }

    /// True when at least one of `keys` is present. An empty list is never satisfied.
    pub fn contains_any<'a, I: IntoIterator<Item = &'a str>>(&self, keys: I) -> bool {
        keys.into_iter().any(|k| self.contains(k))
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &str> { self.0.iter().map(String::as_str) }
}
