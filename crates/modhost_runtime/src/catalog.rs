//! Queryable catalog of every discovered type.
//!
//! The catalog is rebuilt wholesale after each discovery batch. Readers take
//! a cheap snapshot (`Arc` clone) under a read lock; the loader holds the
//! write lock only long enough to swap in the new snapshot.

use modhost_api::{TypeDescriptor, TypeTraits};
use parking_lot::RwLock;
use std::sync::Arc;

/// Structural allow/deny filter for catalog queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFilter {
    pub allow_abstract: bool,
    pub allow_value_types: bool,
    pub allow_sealed: bool,
    pub allow_nested: bool,
}

impl Default for TypeFilter {
    /// Concrete types of any shape.
    fn default() -> Self {
        Self {
            allow_abstract: false,
            allow_value_types: true,
            allow_sealed: true,
            allow_nested: true,
        }
    }
}

impl TypeFilter {
    /// Accepts every type.
    pub fn any() -> Self {
        Self {
            allow_abstract: true,
            ..Self::default()
        }
    }

    /// Whether abstract types (capabilities only) are accepted.
    pub fn allow_abstract(mut self, allow: bool) -> Self {
        self.allow_abstract = allow;
        self
    }

    /// Whether value types are accepted.
    pub fn allow_value_types(mut self, allow: bool) -> Self {
        self.allow_value_types = allow;
        self
    }

    /// Whether sealed types are accepted.
    pub fn allow_sealed(mut self, allow: bool) -> Self {
        self.allow_sealed = allow;
        self
    }

    /// Whether nested types are accepted.
    pub fn allow_nested(mut self, allow: bool) -> Self {
        self.allow_nested = allow;
        self
    }

    /// Tests `traits` against every flag of the filter.
    pub fn matches(&self, traits: TypeTraits) -> bool {
        (self.allow_abstract || !traits.is_abstract)
            && (self.allow_value_types || !traits.is_value_type)
            && (self.allow_sealed || !traits.is_sealed)
            && (self.allow_nested || !traits.is_nested)
    }
}

/// In-memory list of all known types, in insertion order.
#[derive(Debug, Default)]
pub struct TypeCatalog {
    entries: RwLock<Arc<Vec<Arc<TypeDescriptor>>>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole catalog in one step.
    pub(crate) fn replace(&self, entries: Vec<Arc<TypeDescriptor>>) {
        let snapshot = Arc::new(entries);
        *self.entries.write() = snapshot;
    }

    /// Current contents in scan order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<TypeDescriptor>>> {
        self.entries.read().clone()
    }

    /// Number of entries in the current snapshot.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every type assignable to `base` that passes `filter`, in scan order.
    pub fn find_by_capability(&self, base: &str, filter: TypeFilter) -> Vec<Arc<TypeDescriptor>> {
        self.snapshot()
            .iter()
            .filter(|t| t.is_assignable_to(base) && filter.matches(t.traits()))
            .cloned()
            .collect()
    }

    /// The first type in scan order assignable to `base` that passes `filter`.
    ///
    /// Despite the name, no priority comparison happens here: this returns
    /// the first structural match, not the one with the highest declared
    /// priority. Startup ordering goes through
    /// [`order_by_priority`](crate::order_by_priority) instead.
    pub fn find_highest_priority_by_capability(
        &self,
        base: &str,
        filter: TypeFilter,
    ) -> Option<Arc<TypeDescriptor>> {
        self.snapshot()
            .iter()
            .find(|t| t.is_assignable_to(base) && filter.matches(t.traits()))
            .cloned()
    }
}
