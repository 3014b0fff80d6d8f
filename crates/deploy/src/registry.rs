//! Declarative catalog of deployment units.

use std::collections::HashMap;

use crate::{ResolveError, Unit};

/// The set of units known to a run, in declaration order.
///
/// The registry only validates and stores units. Ordering is the resolver's job
/// and execution is the engine's.
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: Vec<Unit>,
    index: HashMap<String, usize>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from units, registering them in iteration order.
    pub fn from_units(units: impl IntoIterator<Item = Unit>) -> Result<Self, ResolveError> {
        let mut registry = Self::new();
        for unit in units {
            registry.register(unit)?;
        }
        Ok(registry)
    }

    /// Add a unit. Its declaration position is the current registry length.
    pub fn register(&mut self, unit: Unit) -> Result<(), ResolveError> {
        if !is_path_safe(&unit.name) {
            return Err(ResolveError::InvalidName(unit.name));
        }
        if self.index.contains_key(&unit.name) {
            return Err(ResolveError::DuplicateName(unit.name));
        }
        if unit.requirements().contains(unit.name.as_str()) {
            return Err(ResolveError::SelfDependency(unit.name));
        }

        tracing::trace!(unit = %unit.name, kind = unit.action.kind(), "Registered unit");
        self.index.insert(unit.name.clone(), self.units.len());
        self.units.push(unit);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Unit, ResolveError> {
        self.position(name)
            .map(|idx| &self.units[idx])
            .ok_or_else(|| ResolveError::UnknownUnit(name.to_string()))
    }

    /// Declaration position of a unit.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Units in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    pub(crate) fn by_position(&self, idx: usize) -> &Unit {
        &self.units[idx]
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Names double as file and directory names in the deployments directory.
pub(crate) fn is_path_safe(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.starts_with('.')
}
