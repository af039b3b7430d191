//! Wildcard permission matching
//!
//! A wildcard permission is any name ending in `*`. It grants every
//! permission that starts with the text before the `*`:
//!
//! - `user:*` grants `user:read` and `user:info:read`
//! - `*` grants everything
//!
//! The checker never scans its effective set with [`WildcardMatcher::matches`].
//! Instead it asks [`WildcardMatcher::wildcards_granting`] for the patterns that
//! could grant a requested permission and probes the set for each, most
//! specific first.
//!
//! # Example
//!
//! ```
//! use permtree_authz::wildcard::WildcardMatcher;
//!
//! let matcher = WildcardMatcher::default();
//! assert!(matcher.matches("user:*", "user:info:read"));
//! assert_eq!(
//!     matcher.wildcards_granting("user:info:read"),
//!     vec!["user:info:*", "user:*", "*"],
//! );
//! ```

use crate::error::{AuthzError, Result};

/// Default segment separator
pub const DEFAULT_SEPARATOR: char = ':';

/// Wildcard marker
pub const WILDCARD: char = '*';

/// Pattern granting every permission
pub const GLOBAL_WILDCARD: &str = "*";

/// Matches permission names against wildcard patterns
///
/// Matching is case-sensitive. Only the configured separator is treated as a
/// segment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WildcardMatcher {
    separator: char,
}

impl Default for WildcardMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl WildcardMatcher {
    /// Creates a matcher splitting segments on `separator`
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    /// Segment separator in use
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Whether `pattern` grants `requested`
    ///
    /// Exact equality always matches. A pattern ending in `*` matches any
    /// permission starting with the pattern minus its trailing `*`.
    pub fn matches(&self, pattern: &str, requested: &str) -> bool {
        if pattern == requested {
            return true;
        }

        match wildcard_prefix(pattern) {
            Some(prefix) => requested.starts_with(prefix),
            None => false,
        }
    }

    /// Wildcard patterns that would grant `requested`, most specific first
    ///
    /// `user:info:read` yields `user:info:*`, `user:*`, `*`. A name without a
    /// separator yields only `*`.
    pub fn wildcards_granting(&self, requested: &str) -> Vec<String> {
        let mut patterns: Vec<String> = requested
            .rmatch_indices(self.separator)
            .map(|(idx, sep)| format!("{}{}", &requested[..idx + sep.len()], WILDCARD))
            .collect();
        patterns.push(GLOBAL_WILDCARD.to_string());
        patterns
    }

    /// Whether a wildcard's prefix ends on a segment boundary
    ///
    /// `user:*` and `*` are aligned, `us*` is not. Only aligned wildcards are
    /// ever produced by [`Self::wildcards_granting`].
    pub fn is_segment_aligned(&self, pattern: &str) -> bool {
        match wildcard_prefix(pattern) {
            Some(prefix) => prefix.is_empty() || prefix.ends_with(self.separator),
            None => false,
        }
    }

    /// Validates a permission name
    ///
    /// Names must be non-empty, free of whitespace, have no empty segments,
    /// and may only contain `*` as their final character.
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(AuthzError::InvalidName("name cannot be empty".to_string()));
        }

        if name.chars().any(char::is_whitespace) {
            return Err(AuthzError::InvalidName(format!(
                "'{}' contains whitespace",
                name
            )));
        }

        if let Some(idx) = name.find(WILDCARD) {
            if idx != name.len() - WILDCARD.len_utf8() {
                return Err(AuthzError::InvalidName(format!(
                    "'{}': wildcard may only appear at the end",
                    name
                )));
            }
        }

        if name.split(self.separator).any(str::is_empty) {
            return Err(AuthzError::InvalidName(format!(
                "'{}' has an empty segment",
                name
            )));
        }

        Ok(())
    }
}

/// Text before the trailing `*`, or `None` if `pattern` is not a wildcard
pub fn wildcard_prefix(pattern: &str) -> Option<&str> {
    pattern.strip_suffix(WILDCARD)
}

/// Whether `name` is a wildcard pattern
pub fn is_wildcard(name: &str) -> bool {
    name.ends_with(WILDCARD)
}
