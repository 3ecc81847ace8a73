//! The allow-list and deny-list: compiled-in and intentionally not run-time
//! configurable (see `SPEC_FULL.md` §6) — `.ecotest.toml` can tune scheduler
//! knobs but never these two sets.
//!
//! The allow-list names packages presumed to pass without execution (the
//! run treats them as pre-completed so their dependents can be admitted
//! immediately). The deny-list names packages that are never executed,
//! typically because a prior run showed they hang the sandbox outright
//! rather than merely failing — the crude proxy for cases the
//! `per_package_timeout` can't catch because the whole sandbox wedges, not
//! just the test process.
//!
//! Both lists are matched by package name, not id, since they are meant to
//! survive a package being re-released under a new version/id.

use std::collections::HashSet;

/// Packages presumed to pass without ever being scheduled. Empty by default;
/// an ecosystem maintainer extends this constant and rebuilds.
const ALLOW_LIST: &[&str] = &[];

/// Packages that must never be run, regardless of their place in the graph.
const DENY_LIST: &[&str] = &[];

/// A resolved allow/deny policy. Production code uses [`Policy::compiled`];
/// tests construct [`Policy::new`] directly to exercise specific scenarios
/// without touching the compiled-in constants.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    allow: HashSet<String>,
    deny: HashSet<String>,
}

impl Policy {
    pub fn new(allow: impl IntoIterator<Item = String>, deny: impl IntoIterator<Item = String>) -> Self {
        Self {
            allow: allow.into_iter().collect(),
            deny: deny.into_iter().collect(),
        }
    }

    /// The policy baked into this binary.
    pub fn compiled() -> Self {
        Self::new(
            ALLOW_LIST.iter().map(|s| s.to_string()),
            DENY_LIST.iter().map(|s| s.to_string()),
        )
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allow.contains(name)
    }

    pub fn is_denied(&self, name: &str) -> bool {
        self.deny.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_lists_are_disjoint() {
        let policy = Policy::compiled();
        for name in ALLOW_LIST {
            assert!(!policy.is_denied(name), "{name} is on both lists");
        }
    }

    #[test]
    fn empty_policy_rejects_and_allows_nothing() {
        let policy = Policy::default();
        assert!(!policy.is_allowed("anything"));
        assert!(!policy.is_denied("anything"));
    }

    #[test]
    fn custom_policy_matches_by_name() {
        let policy = Policy::new(["ok-crate".to_string()], ["hangs-forever".to_string()]);
        assert!(policy.is_allowed("ok-crate"));
        assert!(policy.is_denied("hangs-forever"));
        assert!(!policy.is_allowed("hangs-forever"));
    }
}
