//! Narrowing a registry down to the units an operator asked for.

use std::collections::BTreeSet;

use crate::{ResolveError, UnitRegistry};

/// A request for a subset of the registry.
///
/// An empty selection (no names, no tags) means "all units". Names and tags
/// combine: a unit is selected if it is named explicitly or carries any of the
/// requested tags. Dependencies are not expanded here, the resolver does that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    names: BTreeSet<String>,
    tags: BTreeSet<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::all().with_names(names)
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::all().with_tags(tags)
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn is_all(&self) -> bool {
        self.names.is_empty() && self.tags.is_empty()
    }

    /// Compute the requested unit names, in declaration order.
    ///
    /// Fails with [`ResolveError::UnknownUnit`] if an explicit name is not
    /// registered, and with [`ResolveError::EmptySelection`] if nothing matches.
    pub fn select(&self, registry: &UnitRegistry) -> Result<Vec<String>, ResolveError> {
        if let Some(missing) = self.names.iter().find(|name| !registry.contains(name)) {
            return Err(ResolveError::UnknownUnit(missing.clone()));
        }

        let selected: Vec<String> = registry
            .iter()
            .filter(|unit| {
                self.is_all()
                    || self.names.contains(&unit.name)
                    || !unit.tags.is_disjoint(&self.tags)
            })
            .map(|unit| unit.name.clone())
            .collect();

        if selected.is_empty() {
            return Err(ResolveError::EmptySelection);
        }

        tracing::debug!(
            names = ?self.names,
            tags = ?self.tags,
            selected = ?selected,
            "Selected units"
        );

        Ok(selected)
    }
}
