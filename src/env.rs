/*!
 * Environment Collaborator
 * Read-only view of the parent process environment
 */

use std::collections::HashMap;

/// Read-only snapshot of this process's environment.
///
/// Key lookup follows the platform convention: case-insensitive on Windows,
/// case-sensitive everywhere else.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Snapshot the current process environment.
    pub fn current() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Whether key lookup ignores ASCII case on this platform.
    pub const fn case_insensitive() -> bool {
        cfg!(windows)
    }

    /// Look up a variable, honoring platform case-sensitivity.
    pub fn get(&self, key: &str) -> Option<&str> {
        if Self::case_insensitive() {
            self.vars
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        } else {
            self.vars.get(key).map(String::as_str)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Consume the snapshot into a plain map.
    pub fn into_vars(self) -> HashMap<String, String> {
        self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_sees_known_variable() {
        std::env::set_var("SUBSPAWN_ENV_TEST_VAR", "value");
        let env = Environment::current();
        assert_eq!(env.get("SUBSPAWN_ENV_TEST_VAR"), Some("value"));
        assert!(env.contains("SUBSPAWN_ENV_TEST_VAR"));
        assert!(!env.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unix_lookup_is_case_sensitive() {
        std::env::set_var("SUBSPAWN_CASE_VAR", "value");
        let env = Environment::current();
        assert!(!Environment::case_insensitive());
        assert_eq!(env.get("subspawn_case_var"), None);
    }
}
