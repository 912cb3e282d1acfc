//! Connection profile lookup.

use std::collections::HashMap;

use crate::models::{ConnectionProfile, DEFAULT_PROFILE_NAME, Dialect};

/// Immutable set of connection profiles, keyed by dialect and name.
///
/// Every dialect always has a default profile, which may be unconfigured.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    defaults: HashMap<Dialect, ConnectionProfile>,
    named: HashMap<(Dialect, String), ConnectionProfile>,
    fallback: ConnectionProfile,
}

impl ProfileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, dialect: Dialect, profile: ConnectionProfile) -> Self {
        self.defaults.insert(dialect, profile);
        self
    }

    /// Add a named profile. The reserved `default` name is ignored.
    pub fn with_named(
        mut self,
        dialect: Dialect,
        name: impl Into<String>,
        profile: ConnectionProfile,
    ) -> Self {
        let name = name.into();
        if name != DEFAULT_PROFILE_NAME {
            self.named.insert((dialect, name), profile);
        }
        self
    }

    /// Profile for `(dialect, name)`, falling back to the dialect default
    /// when the name is absent or unknown.
    pub fn resolve(&self, dialect: Dialect, name: Option<&str>) -> &ConnectionProfile {
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            if let Some(profile) = self.named.get(&(dialect, name.to_string())) {
                return profile;
            }
        }
        self.defaults.get(&dialect).unwrap_or(&self.fallback)
    }

    /// Sorted profile names for a dialect, default first.
    pub fn names(&self, dialect: Dialect) -> Vec<String> {
        let mut names: Vec<String> = self
            .named
            .keys()
            .filter(|(d, _)| *d == dialect)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names.insert(0, DEFAULT_PROFILE_NAME.to_string());
        names
    }
}
