// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collection exclusion patterns.
//!
//! Patterns are regular expressions anchored at the start of the collection
//! name: `logs-` excludes `logs-2024` but not `app-logs-2024`. The built-in
//! set skips hidden/system collections and cluster housekeeping collections.
//! Extra patterns from configuration are appended, never replacing the
//! built-ins.

use crate::error::{ReplicationError, Result};
use regex::Regex;

/// Patterns that are always excluded.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    r"^\.",
    r"_ilm_history.*",
    r"_watcher_history.*",
    r"_security_audit_log.*",
];

/// Compiled exclusion patterns, evaluated once per discovery.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    patterns: Vec<Regex>,
}

impl ExclusionFilter {
    /// Compile exactly the given patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(&format!("^(?:{p})")).map_err(|e| {
                    ReplicationError::Config(format!("invalid exclusion pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Built-in patterns only.
    pub fn builtin() -> Result<Self> {
        Self::with_extra(&[])
    }

    /// Built-in patterns plus `extra`.
    pub fn with_extra(extra: &[String]) -> Result<Self> {
        Self::new(
            DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .copied()
                .chain(extra.iter().map(String::as_str)),
        )
    }

    /// True if `name` matches any pattern.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }

    pub fn should_replicate(&self, name: &str) -> bool {
        !self.is_excluded(name)
    }

    /// Keep only the names that should be replicated, preserving order.
    pub fn apply<I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        names.into_iter().filter(|n| self.should_replicate(n)).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
