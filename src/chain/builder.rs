// src/chain/builder.rs

//! Assembling unit specs into a [`WorkChain`].
//!
//! Building only produces an in-memory chain; nothing is registered or
//! started until the chain is submitted to the engine.

use std::collections::BTreeSet;

use tracing::debug;

use crate::chain::unit::TaskUnit;
use crate::chain::work_chain::WorkChain;
use crate::data::Data;
use crate::errors::{Result, WorkchainError};
use crate::exec::BodyRegistry;
use crate::types::ExistingWorkPolicy;

/// Declarative description of one unit in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub kind: String,
    pub constraints: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub static_input: Option<Data>,
}

impl UnitSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            constraints: BTreeSet::new(),
            tags: BTreeSet::new(),
            static_input: None,
        }
    }

    pub fn constraint(mut self, predicate: impl Into<String>) -> Self {
        self.constraints.insert(predicate.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn input(mut self, data: Data) -> Self {
        self.static_input = Some(data);
        self
    }
}

/// Fluent builder mirroring a `begin(...).then(...).then(...)` chain.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    name: String,
    policy: ExistingWorkPolicy,
    specs: Vec<UnitSpec>,
}

impl ChainBuilder {
    pub fn new(name: impl Into<String>, policy: ExistingWorkPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            specs: Vec::new(),
        }
    }

    /// Append a unit that depends on the previous one.
    pub fn then(mut self, spec: UnitSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Append `count` units of the same spec.
    pub fn then_repeated(mut self, spec: UnitSpec, count: usize) -> Self {
        for _ in 0..count {
            self.specs.push(spec.clone());
        }
        self
    }

    pub fn build(self, bodies: &BodyRegistry) -> Result<WorkChain> {
        build_chain(self.name, self.policy, self.specs, bodies)
    }
}

/// Build a chain from an ordered list of unit specs.
///
/// Fails with [`WorkchainError::InvalidSpec`] when the list is empty, the name
/// is blank, or a kind has no registered body.
pub fn build_chain(
    name: impl Into<String>,
    policy: ExistingWorkPolicy,
    specs: Vec<UnitSpec>,
    bodies: &BodyRegistry,
) -> Result<WorkChain> {
    let name = name.into();

    if name.trim().is_empty() {
        return Err(WorkchainError::InvalidSpec(
            "chain name must not be empty".to_string(),
        ));
    }
    if specs.is_empty() {
        return Err(WorkchainError::InvalidSpec(format!(
            "chain '{name}' must contain at least one unit"
        )));
    }

    let mut units = Vec::with_capacity(specs.len());
    for (idx, spec) in specs.into_iter().enumerate() {
        if !bodies.contains(&spec.kind) {
            return Err(WorkchainError::InvalidSpec(format!(
                "chain '{}' unit #{} has unregistered kind '{}'",
                name, idx, spec.kind
            )));
        }
        units.push(TaskUnit::new(
            spec.kind,
            spec.static_input.unwrap_or_default(),
            spec.constraints,
            spec.tags,
        ));
    }

    debug!(chain = %name, %policy, units = units.len(), "built work chain");
    Ok(WorkChain::new(name, policy, units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::KEY_IMAGE_URI;
    use crate::exec::{BodyOutcome, UnitContext};

    fn registry() -> BodyRegistry {
        let mut reg = BodyRegistry::new();
        for kind in ["cleanup", "blur", "save"] {
            reg.register_fn(kind, |_ctx: &UnitContext| BodyOutcome::Success(Data::new()));
        }
        reg
    }

    #[test]
    fn builds_units_in_order_with_static_input_on_first_blur() {
        let chain = ChainBuilder::new("img", ExistingWorkPolicy::Replace)
            .then(UnitSpec::new("cleanup"))
            .then(UnitSpec::new("blur").input(Data::new().with(KEY_IMAGE_URI, "a.png")))
            .then(UnitSpec::new("blur"))
            .then(UnitSpec::new("save").constraint("requires_charging").tag("output"))
            .build(&registry())
            .unwrap();

        let kinds: Vec<_> = chain.units.iter().map(|u| u.kind.as_str()).collect();
        assert_eq!(kinds, vec!["cleanup", "blur", "blur", "save"]);
        assert_eq!(chain.units[1].static_input.get_str(KEY_IMAGE_URI), Some("a.png"));
        assert!(chain.units[2].static_input.is_empty());
        assert!(chain.units[3].constraints.contains("requires_charging"));
        assert!(chain.tags().contains("output"));
    }

    #[test]
    fn empty_spec_list_is_invalid() {
        let err = build_chain("img", ExistingWorkPolicy::Replace, vec![], &registry()).unwrap_err();
        assert!(matches!(err, WorkchainError::InvalidSpec(msg) if msg.contains("at least one unit")));
    }

    #[test]
    fn unknown_kind_is_invalid() {
        let err = build_chain(
            "img",
            ExistingWorkPolicy::Keep,
            vec![UnitSpec::new("cleanup"), UnitSpec::new("sharpen")],
            &registry(),
        )
        .unwrap_err();

        match err {
            WorkchainError::InvalidSpec(msg) => assert!(msg.contains("sharpen")),
            other => panic!("expected InvalidSpec, got {other:?}"),
        }
    }

    #[test]
    fn repeated_units_are_independent_copies() {
        let chain = ChainBuilder::new("img", ExistingWorkPolicy::Replace)
            .then_repeated(UnitSpec::new("blur"), 3)
            .build(&registry())
            .unwrap();
        assert_eq!(chain.units.len(), 3);
    }
}
