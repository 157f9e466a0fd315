// src/engine/registry.rs

use std::collections::BTreeMap;

use tracing::debug;

use crate::chain::ChainId;
use crate::types::ExistingWorkPolicy;

/// What to do with a new submission, given the chains already registered
/// under its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No in-flight chain is in the way: forget terminal chains of the name
    /// and register the new one.
    Register,
    /// `Keep` with in-flight work: drop the submission.
    Reject,
    /// Cancel these in-flight chains and register once they are terminal.
    Replace { active: Vec<ChainId> },
    /// Register now, starting only after `after` succeeds.
    Append { after: ChainId },
}

/// Maps a unique chain name to the chains registered under it, oldest first.
///
/// Under `Replace`/`Keep` at most one of them is ever in flight; under
/// `Append` in-flight chains form a line, and the last one is the tail.
#[derive(Debug, Default)]
pub struct UniqueWorkRegistry {
    names: BTreeMap<String, Vec<ChainId>>,
}

impl UniqueWorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, id: ChainId) {
        debug!(name, chain = %id, "registering chain under name");
        self.names.entry(name.to_string()).or_default().push(id);
    }

    pub fn chains_of(&self, name: &str) -> &[ChainId] {
        self.names.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Most recently registered chain of `name`.
    pub fn tail(&self, name: &str) -> Option<ChainId> {
        self.chains_of(name).last().copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.chains_of(name).is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    /// Drop `id` from `name`; the name disappears with its last chain.
    pub fn remove(&mut self, name: &str, id: ChainId) {
        if let Some(ids) = self.names.get_mut(name) {
            ids.retain(|c| *c != id);
            if ids.is_empty() {
                self.names.remove(name);
            }
        }
    }

    /// Decide how `policy` applies to a new submission for `name`.
    pub fn resolve(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        is_terminal: impl Fn(ChainId) -> bool,
    ) -> Resolution {
        let active: Vec<ChainId> = self
            .chains_of(name)
            .iter()
            .copied()
            .filter(|id| !is_terminal(*id))
            .collect();

        match policy {
            ExistingWorkPolicy::Keep if !active.is_empty() => Resolution::Reject,
            ExistingWorkPolicy::Replace if !active.is_empty() => Resolution::Replace { active },
            ExistingWorkPolicy::Append => match self.tail(name) {
                Some(tail) if !is_terminal(tail) => Resolution::Append { after: tail },
                _ => Resolution::Register,
            },
            _ => Resolution::Register,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_always_registers() {
        let reg = UniqueWorkRegistry::new();
        for policy in [
            ExistingWorkPolicy::Replace,
            ExistingWorkPolicy::Keep,
            ExistingWorkPolicy::Append,
        ] {
            assert_eq!(reg.resolve("img", policy, |_| false), Resolution::Register);
        }
    }

    #[test]
    fn policies_against_active_chain() {
        let mut reg = UniqueWorkRegistry::new();
        reg.register("img", ChainId(1));

        assert_eq!(
            reg.resolve("img", ExistingWorkPolicy::Replace, |_| false),
            Resolution::Replace { active: vec![ChainId(1)] }
        );
        assert_eq!(
            reg.resolve("img", ExistingWorkPolicy::Keep, |_| false),
            Resolution::Reject
        );
        assert_eq!(
            reg.resolve("img", ExistingWorkPolicy::Append, |_| false),
            Resolution::Append { after: ChainId(1) }
        );
    }

    #[test]
    fn policies_against_terminal_chain() {
        let mut reg = UniqueWorkRegistry::new();
        reg.register("img", ChainId(1));

        for policy in [
            ExistingWorkPolicy::Replace,
            ExistingWorkPolicy::Keep,
            ExistingWorkPolicy::Append,
        ] {
            assert_eq!(reg.resolve("img", policy, |_| true), Resolution::Register);
        }
    }

    #[test]
    fn append_targets_the_latest_chain() {
        let mut reg = UniqueWorkRegistry::new();
        reg.register("img", ChainId(1));
        reg.register("img", ChainId(2));
        assert_eq!(
            reg.resolve("img", ExistingWorkPolicy::Append, |_| false),
            Resolution::Append { after: ChainId(2) }
        );

        reg.remove("img", ChainId(1));
        reg.remove("img", ChainId(2));
        assert!(!reg.contains("img"));
    }
}
