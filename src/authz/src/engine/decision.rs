//! Effective permission sets and grant/deny resolution

use crate::types::{Decision, RoleId};
use crate::wildcard::{self, WildcardMatcher};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// Every permission name a principal holds through its live roles
///
/// Each name remembers the first role (in role id order) that granted it, so
/// decisions can report `via_role` deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    grants: HashMap<String, RoleId>,

    /// Wildcards whose prefix does not end on a separator, longest prefix first
    irregular_wildcards: Vec<(String, RoleId)>,

    /// Earliest expiry among the associations that contributed
    valid_until: Option<DateTime<Utc>>,
}

impl EffectivePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name` as granted by `role`. The first role wins.
    pub fn insert(&mut self, name: impl Into<String>, role: impl Into<RoleId>) {
        self.grants.entry(name.into()).or_insert_with(|| role.into());
    }

    /// Shortens the validity of this set to `expires_at` if earlier
    pub fn note_expiry(&mut self, expires_at: DateTime<Utc>) {
        self.valid_until = Some(match self.valid_until {
            Some(current) => current.min(expires_at),
            None => expires_at,
        });
    }

    /// Indexes wildcards that [`WildcardMatcher::wildcards_granting`] cannot derive
    pub fn finish(mut self, matcher: &WildcardMatcher) -> Self {
        let mut irregular: Vec<(String, RoleId)> = self
            .grants
            .iter()
            .filter(|(name, _)| wildcard::is_wildcard(name) && !matcher.is_segment_aligned(name))
            .map(|(name, role)| (name.clone(), role.clone()))
            .collect();

        irregular.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        self.irregular_wildcards = irregular;
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.grants.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Held permission names, sorted
    pub fn names(&self) -> BTreeSet<String> {
        self.grants.keys().cloned().collect()
    }

    /// Role credited for `name`
    pub fn granted_by(&self, name: &str) -> Option<&RoleId> {
        self.grants.get(name)
    }

    /// Instant after which this set may include an elapsed grant
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    /// Decides whether `requested` is held
    ///
    /// 1. Exact membership wins over any wildcard.
    /// 2. Otherwise segment wildcards are probed most specific first
    ///    (`a:b:*`, `a:*`, `*`).
    /// 3. An irregular wildcard such as `a:b*` only wins if its prefix is
    ///    longer than the aligned hit's.
    pub fn decide(&self, requested: &str, matcher: &WildcardMatcher) -> Decision {
        if let Some(role) = self.grants.get(requested) {
            return Decision::grant(requested, role.clone());
        }

        let aligned = matcher
            .wildcards_granting(requested)
            .into_iter()
            .find_map(|candidate| {
                self.grants
                    .get(&candidate)
                    .map(|role| (candidate, role.clone()))
            });

        let irregular = self
            .irregular_wildcards
            .iter()
            .find(|(pattern, _)| matcher.matches(pattern, requested));

        match (aligned, irregular) {
            (Some((pattern, _)), Some((longer, role))) if longer.len() > pattern.len() => {
                Decision::grant(longer.clone(), role.clone())
            }
            (Some((pattern, role)), _) => Decision::grant(pattern, role),
            (None, Some((pattern, role))) => Decision::grant(pattern.clone(), role.clone()),
            (None, None) => Decision::deny(),
        }
    }
}
