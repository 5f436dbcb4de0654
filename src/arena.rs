//! Arena storage for Forms.
//!
//! Provides `FormId` (a dense, total-orderable identifier) and `FormArena`
//! (append-only contiguous storage). Forms may reference each other, and
//! themselves, by id; a form is first *declared* (name and kind only) and later
//! *defined* with its body, so that cyclic type graphs are built without ever
//! mutating a shared object in place.
//!
//! # Determinism
//! - `FormId` ordering is by its inner `u32`, i.e. by declaration order.
//! - Iteration order over slots is by index.
//! - Ids are never reused: forms are not deallocated.

use crate::form::{FormData, FormKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dense identifier of a form inside a [`FormArena`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormId(u32);

impl FormId {
    /// Creates a new `FormId` from a raw `u32`.
    ///
    /// The id is only meaningful for the arena that issued it.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw `u32` index.
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormId({})", self.0)
    }
}

/// Slot in the form arena.
#[derive(Debug, Clone)]
enum Slot {
    /// Reserved: referenced by id, body not yet known.
    Declared { name: String, kind: FormKind },
    Defined(FormData),
}

/// Contiguous storage for forms plus the catalog of registered names.
///
/// Registered forms are unique per name, which is what makes nominal equality
/// (comparing names only) sound.
#[derive(Debug, Clone, Default)]
pub struct FormArena {
    slots: Vec<Slot>,
    registry: BTreeMap<String, FormId>,
}

impl FormArena {
    /// Creates a new empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id for a form of the given name and kind.
    ///
    /// The form can be referenced immediately and must later be completed with
    /// [`FormArena::define`].
    pub fn declare(&mut self, name: impl Into<String>, kind: FormKind) -> FormId {
        let id = FormId(self.slots.len() as u32);
        self.slots.push(Slot::Declared {
            name: name.into(),
            kind,
        });
        id
    }

    /// Stores the completed form data in a declared slot.
    pub(crate) fn fill(&mut self, id: FormId, data: FormData) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            *slot = Slot::Defined(data);
        }
    }

    /// Returns the form stored at `id`, if it has been defined.
    pub fn get(&self, id: FormId) -> Option<&FormData> {
        match self.slots.get(id.index()) {
            Some(Slot::Defined(data)) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, id: FormId) -> Option<&mut FormData> {
        match self.slots.get_mut(id.index()) {
            Some(Slot::Defined(data)) => Some(data),
            _ => None,
        }
    }

    /// Name of a declared or defined form.
    pub fn name(&self, id: FormId) -> Option<&str> {
        match self.slots.get(id.index())? {
            Slot::Declared { name, .. } => Some(name),
            Slot::Defined(data) => Some(data.name()),
        }
    }

    /// Kind of a declared or defined form.
    pub fn kind(&self, id: FormId) -> Option<FormKind> {
        match self.slots.get(id.index())? {
            Slot::Declared { kind, .. } => Some(*kind),
            Slot::Defined(data) => Some(data.kind()),
        }
    }

    /// Whether `id` has been issued by this arena.
    #[inline]
    pub fn contains(&self, id: FormId) -> bool {
        id.index() < self.slots.len()
    }

    /// Whether `id` has been declared but not yet defined.
    pub fn is_pending(&self, id: FormId) -> bool {
        matches!(self.slots.get(id.index()), Some(Slot::Declared { .. }))
    }

    /// Number of issued ids (declared and defined).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no form has been declared yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over all defined forms in id order.
    pub fn iter(&self) -> impl Iterator<Item = (FormId, &FormData)> {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| match slot {
            Slot::Defined(data) => Some((FormId(idx as u32), data)),
            Slot::Declared { .. } => None,
        })
    }

    /// Looks up a registered form by name.
    pub fn lookup(&self, name: &str) -> Option<FormId> {
        self.registry.get(name).copied()
    }

    /// Iterates over registered forms in name order.
    pub fn registered(&self) -> impl Iterator<Item = (&str, FormId)> {
        self.registry.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub(crate) fn insert_registered(&mut self, name: String, id: FormId) {
        self.registry.insert(name, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Module;

    #[test]
    fn arena_basic() {
        let mut arena = FormArena::new();
        assert!(arena.is_empty());

        let id1 = arena.declare("Onset", FormKind::Simple);
        assert_eq!(id1.as_u32(), 0);
        assert!(arena.is_pending(id1));
        assert_eq!(arena.name(id1), Some("Onset"));
        assert!(arena.get(id1).is_none());

        let id2 = arena.simple("Pitch", Module::Z);
        assert_eq!(id2.as_u32(), 1);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(id2).map(FormData::name), Some("Pitch"));
    }

    #[test]
    fn deterministic_iteration() {
        let mut arena = FormArena::new();
        let names = ["C", "A", "B"];
        for name in names {
            arena.simple(name, Module::R);
        }
        let pending = arena.declare("D", FormKind::List);
        let collected: Vec<_> = arena.iter().map(|(id, data)| (id.as_u32(), data.name())).collect();
        assert_eq!(collected, vec![(0, "C"), (1, "A"), (2, "B")]);
        assert!(arena.is_pending(pending));
    }

    #[test]
    fn unknown_ids_are_absent() {
        let arena = FormArena::new();
        let stray = FormId::new(7);
        assert!(!arena.contains(stray));
        assert!(arena.name(stray).is_none());
        assert!(arena.kind(stray).is_none());
    }
}
