//! Environment filtering for spawned shells.

use std::collections::HashSet;
use std::ffi::OsString;

/// Set of variable names withheld from spawned processes.
///
/// A pattern ending in `*` matches every name with that prefix; any other
/// pattern matches one name exactly.
#[derive(Debug, Clone, Default)]
pub struct EnvDenylist {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl EnvDenylist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            match pattern.strip_suffix('*') {
                Some(prefix) => list.prefixes.push(prefix.to_string()),
                None => {
                    list.exact.insert(pattern.to_string());
                }
            }
        }
        list
    }

    pub fn is_denied(&self, name: &str) -> bool {
        self.exact.contains(name) || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Returns `vars` without the denied entries, preserving order.
    pub fn filter<I>(&self, vars: I) -> Vec<(OsString, OsString)>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        vars.into_iter()
            .filter(|(name, _)| !self.is_denied(&name.to_string_lossy()))
            .collect()
    }

    /// Filters the daemon's own environment.
    pub fn filter_current(&self) -> Vec<(OsString, OsString)> {
        self.filter(std::env::vars_os())
    }
}
