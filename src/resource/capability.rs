//! Capability Filter
//!
//! A resource type may declare operations the active driver cannot perform.
//! Each operation is backed by one or more driver operations; it is offered
//! only when the driver implements at least one of them. Nothing is cached:
//! the driver's operation set is consulted on every check.

use std::collections::BTreeSet;
use std::fmt;

use super::registry::ResourceDef;
use super::vocabulary::Vocabulary;
use crate::driver::Driver;
use crate::error::{CimiError, Result};

/// Operation a client can request on a resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Index,
    Show,
    Create,
    Delete,
    Action(String),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Self::Index => "index",
            Self::Show => "show",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Action(action) => action,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operation names offered for one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    pub fn contains(&self, operation: &str) -> bool {
        self.0.contains(operation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn supports(driver: &dyn Driver, operation: &str) -> bool {
    driver.operations().contains(operation)
}

/// Driver operations that can carry out a CIMI action, preferred first.
///
/// `restart` on a machine yields `restart_instance`, then every backend
/// alias (`reboot_instance`).
pub fn action_candidates(def: &ResourceDef, vocabulary: &Vocabulary, action: &str) -> Vec<String> {
    std::iter::once(action)
        .chain(vocabulary.backend_actions(action))
        .filter_map(|name| def.driver.action_method(name))
        .collect()
}

/// Driver operations any one of which enables `operation`
pub fn predicates(def: &ResourceDef, vocabulary: &Vocabulary, operation: &Operation) -> Vec<String> {
    let binding = &def.driver;
    match operation {
        Operation::Index => binding.list.iter().cloned().collect(),
        Operation::Show => binding
            .lookup
            .iter()
            .chain(binding.list.iter())
            .cloned()
            .collect(),
        Operation::Create => binding.create.iter().cloned().collect(),
        Operation::Delete => binding.delete.iter().cloned().collect(),
        Operation::Action(action) => action_candidates(def, vocabulary, action),
    }
}

/// First candidate the driver implements
pub fn first_supported(driver: &dyn Driver, candidates: &[String]) -> Option<String> {
    let operations = driver.operations();
    candidates
        .iter()
        .find(|method| operations.contains(method))
        .cloned()
}

/// Operations of `def` the driver can perform, its declared actions included
pub fn capabilities(def: &ResourceDef, vocabulary: &Vocabulary, driver: &dyn Driver) -> CapabilitySet {
    let operations = driver.operations();
    let declared = [
        Operation::Index,
        Operation::Show,
        Operation::Create,
        Operation::Delete,
    ]
    .into_iter()
    .chain(def.actions.iter().cloned().map(Operation::Action));

    CapabilitySet(
        declared
            .filter(|op| {
                predicates(def, vocabulary, op)
                    .iter()
                    .any(|method| operations.contains(method))
            })
            .map(|op| op.name().to_string())
            .collect(),
    )
}

/// Reject an operation the driver cannot perform, before anything is invoked
pub fn ensure(
    def: &ResourceDef,
    vocabulary: &Vocabulary,
    operation: &Operation,
    driver: &dyn Driver,
) -> Result<()> {
    let candidates = predicates(def, vocabulary, operation);
    if first_supported(driver, &candidates).is_some() {
        return Ok(());
    }

    tracing::debug!(
        "{} {} unsupported by driver {} (needs one of {:?})",
        def.name,
        operation,
        driver.name(),
        candidates
    );
    Err(CimiError::unsupported(&def.name, operation.name()))
}
