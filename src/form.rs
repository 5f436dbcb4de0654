//! Forms: named, recursive type descriptors.
//!
//! A form is one of five kinds:
//!
//! | Kind | Body | Denotator coordinate |
//! |---|---|---|
//! | `Simple` | a [`Module`] | a morphism `address → module` |
//! | `Limit` | ordered sub-forms | one factor per sub-form |
//! | `Colimit` | ordered sub-forms | one `(index, factor)` pair |
//! | `Power` | one sub-form | a finite set of factors |
//! | `List` | one sub-form | a finite sequence of factors |
//!
//! Forms live in a [`FormArena`] and refer to their sub-forms by [`FormId`], so a
//! form graph may be cyclic (a `Colimit` "Tree" whose variants mention "Tree").
//!
//! # Equality
//! Two *registered* forms are equal iff their names are equal; registration keeps
//! names unique, so this is an O(1) check. Otherwise forms are compared
//! structurally and co-inductively: a pair of forms that is already being
//! compared is assumed equal. The comparison runs on an explicit worklist, so
//! neither cycles nor very deep chains can overflow the stack.
//!
//! # References
//! - Mazzola, "The Topos of Music", Chapter 6 (2002) – forms and denotators
//! - Gapeyev, Levin, Pierce, "Recursive subtyping revealed" (2002) – co-inductive
//!   equality on cyclic type graphs

use crate::address::{Module, ModuleMorphism};
use crate::arena::{FormArena, FormId};
use crate::denotator::{Denotator, DenotatorError, PathError};
use crate::fingerprint::{self, Canonicalizable, HashValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::trace;

// ----------------------------------------------------------------------------
// Kinds and bodies
// ----------------------------------------------------------------------------

/// The closed set of form kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormKind {
    /// Wraps a module of the address algebra.
    Simple,
    /// Product (record/tuple).
    Limit,
    /// Sum (tagged union).
    Colimit,
    /// Finite sets.
    Power,
    /// Finite sequences.
    List,
}

impl FormKind {
    /// All kinds, in ordinal order.
    pub const ALL: [FormKind; 5] = [
        FormKind::Simple,
        FormKind::Limit,
        FormKind::Colimit,
        FormKind::Power,
        FormKind::List,
    ];

    /// Stable ordinal, used in fingerprints.
    #[inline]
    pub const fn ordinal(self) -> u8 {
        match self {
            FormKind::Simple => 0,
            FormKind::Limit => 1,
            FormKind::Colimit => 2,
            FormKind::Power => 3,
            FormKind::List => 4,
        }
    }

    /// Persisted name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            FormKind::Simple => "Simple",
            FormKind::Limit => "Limit",
            FormKind::Colimit => "Colimit",
            FormKind::Power => "Power",
            FormKind::List => "List",
        }
    }
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormKind {
    type Err = FormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| FormError::UnknownKind(s.to_owned()))
    }
}

/// The structural definition of a form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormBody {
    Simple(Module),
    Limit(Vec<FormId>),
    Colimit(Vec<FormId>),
    Power(FormId),
    List(FormId),
}

impl FormBody {
    /// Kind of this body.
    pub fn kind(&self) -> FormKind {
        match self {
            FormBody::Simple(_) => FormKind::Simple,
            FormBody::Limit(_) => FormKind::Limit,
            FormBody::Colimit(_) => FormKind::Colimit,
            FormBody::Power(_) => FormKind::Power,
            FormBody::List(_) => FormKind::List,
        }
    }

    /// Directly referenced sub-forms, in diagram order.
    pub fn sub_forms(&self) -> &[FormId] {
        match self {
            FormBody::Simple(_) => &[],
            FormBody::Limit(factors) | FormBody::Colimit(factors) => factors,
            FormBody::Power(base) | FormBody::List(base) => std::slice::from_ref(base),
        }
    }
}

// ----------------------------------------------------------------------------
// Labels
// ----------------------------------------------------------------------------

/// A bijection between label strings and sub-form indices `0..count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl LabelMap {
    /// Builds a label map; fails unless every label is distinct.
    pub fn new(labels: Vec<String>) -> Option<Self> {
        let mut index = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            if index.insert(label.clone(), i).is_some() {
                return None;
            }
        }
        Some(Self { labels, index })
    }

    /// Index of `label`.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Label of sub-form `index`.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

// ----------------------------------------------------------------------------
// Form data
// ----------------------------------------------------------------------------

/// A defined form.
///
/// Immutable once stored, except for the label map (assigned at registration)
/// and the lazily computed fingerprint.
#[derive(Debug, Clone)]
pub struct FormData {
    name: String,
    body: FormBody,
    labels: Option<LabelMap>,
    registered: bool,
    fingerprint: OnceLock<HashValue>,
}

impl FormData {
    /// Name of the form.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the form.
    #[inline]
    pub fn kind(&self) -> FormKind {
        self.body.kind()
    }

    /// Structural definition.
    #[inline]
    pub fn body(&self) -> &FormBody {
        &self.body
    }

    /// Module of a `Simple` form.
    pub fn module(&self) -> Option<&Module> {
        match &self.body {
            FormBody::Simple(module) => Some(module),
            _ => None,
        }
    }

    /// Label map, if one was assigned.
    pub fn labels(&self) -> Option<&LabelMap> {
        self.labels.as_ref()
    }

    /// Whether the form is in its arena's name catalog.
    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Number of sub-forms: 0 for `Simple`, 1 for `Power` and `List`.
    pub fn form_count(&self) -> usize {
        self.body.sub_forms().len()
    }

    /// Sub-form at `index`.
    ///
    /// `Power` and `List` return their single sub-form for any index; a `Simple`
    /// form has no sub-forms at all.
    pub fn form_at(&self, index: usize) -> Result<FormId, PathError> {
        match &self.body {
            FormBody::Simple(_) => Err(PathError::PastLeaf { depth: 0 }),
            FormBody::Power(base) | FormBody::List(base) => Ok(*base),
            FormBody::Limit(factors) | FormBody::Colimit(factors) => {
                factors.get(index).copied().ok_or(PathError::IndexOutOfRange {
                    depth: 0,
                    index,
                    len: factors.len(),
                })
            }
        }
    }
}

/// Error raised while building or registering forms.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("form '{name}' has an empty diagram")]
    EmptyDiagram { name: String },
    #[error("labels of form '{name}' are not a bijection onto its sub-forms")]
    InvalidLabels { name: String },
    #[error("unknown form id {0}")]
    UnknownForm(FormId),
    #[error("form '{name}' is declared but not defined")]
    NotDefined { name: String },
    #[error("form '{name}' is already defined")]
    AlreadyDefined { name: String },
    #[error("form '{name}' was declared as {declared} but defined as {defined}")]
    KindMismatch {
        name: String,
        declared: FormKind,
        defined: FormKind,
    },
    #[error("a different form named '{0}' is already registered")]
    DuplicateName(String),
    #[error("unknown form kind '{0}'")]
    UnknownKind(String),
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Builder for forms.
///
/// ```
/// use denotator::prelude::*;
///
/// let mut forms = FormArena::new();
/// let onset = forms.simple("Onset", Module::R);
/// let pitch = forms.simple("Pitch", Module::Z);
/// let note = FormBuilder::limit("Note")
///     .labeled("onset", onset)
///     .labeled("pitch", pitch)
///     .build(&mut forms)
///     .unwrap();
/// assert_eq!(forms.label_index(note, "pitch"), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct FormBuilder {
    name: String,
    kind: FormKind,
    module: Option<Module>,
    factors: Vec<FormId>,
    labels: Vec<Option<String>>,
}

impl FormBuilder {
    fn new(name: impl Into<String>, kind: FormKind) -> Self {
        Self {
            name: name.into(),
            kind,
            module: None,
            factors: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// A `Simple` form over `module`.
    pub fn simple(name: impl Into<String>, module: Module) -> Self {
        let mut builder = Self::new(name, FormKind::Simple);
        builder.module = Some(module);
        builder
    }

    /// A `Limit` form; add factors with [`factor`](Self::factor).
    pub fn limit(name: impl Into<String>) -> Self {
        Self::new(name, FormKind::Limit)
    }

    /// A `Colimit` form; add variants with [`factor`](Self::factor).
    pub fn colimit(name: impl Into<String>) -> Self {
        Self::new(name, FormKind::Colimit)
    }

    /// A `Power` form over `base`.
    pub fn power(name: impl Into<String>, base: FormId) -> Self {
        Self::new(name, FormKind::Power).factor(base)
    }

    /// A `List` form over `base`.
    pub fn list(name: impl Into<String>, base: FormId) -> Self {
        Self::new(name, FormKind::List).factor(base)
    }

    /// Appends an unlabeled sub-form.
    pub fn factor(mut self, form: FormId) -> Self {
        self.factors.push(form);
        self.labels.push(None);
        self
    }

    /// Appends a labeled sub-form.
    pub fn labeled(mut self, label: impl Into<String>, form: FormId) -> Self {
        self.factors.push(form);
        self.labels.push(Some(label.into()));
        self
    }

    /// Declares and defines the form in `arena`.
    pub fn build(self, arena: &mut FormArena) -> Result<FormId, FormError> {
        let id = arena.declare(self.name.clone(), self.kind);
        self.define(arena, id)
    }

    /// Defines a previously declared form (used to close cycles).
    pub fn define(self, arena: &mut FormArena, id: FormId) -> Result<FormId, FormError> {
        let name = self.name;
        let body = match self.kind {
            FormKind::Simple => FormBody::Simple(self.module.unwrap_or(Module::Null)),
            FormKind::Limit => FormBody::Limit(self.factors),
            FormKind::Colimit => FormBody::Colimit(self.factors),
            FormKind::Power | FormKind::List => {
                let base = match self.factors.as_slice() {
                    [base] => *base,
                    [] => return Err(FormError::EmptyDiagram { name }),
                    _ => return Err(FormError::InvalidLabels { name }),
                };
                if self.kind == FormKind::Power {
                    FormBody::Power(base)
                } else {
                    FormBody::List(base)
                }
            }
        };
        let labels = if self.labels.iter().all(Option::is_none) {
            None
        } else {
            let labels: Option<Vec<String>> = self.labels.into_iter().collect();
            Some(labels.ok_or_else(|| FormError::InvalidLabels { name: name.clone() })?)
        };
        arena.define(id, body, labels)?;
        Ok(id)
    }
}

// ----------------------------------------------------------------------------
// Arena operations on forms
// ----------------------------------------------------------------------------

impl FormArena {
    /// Completes a declared form with its body and optional labels.
    pub fn define(
        &mut self,
        id: FormId,
        body: FormBody,
        labels: Option<Vec<String>>,
    ) -> Result<(), FormError> {
        let (name, declared) = match (self.name(id), self.kind(id)) {
            (Some(name), Some(kind)) => (name.to_owned(), kind),
            _ => return Err(FormError::UnknownForm(id)),
        };
        if !self.is_pending(id) {
            return Err(FormError::AlreadyDefined { name });
        }
        if body.kind() != declared {
            return Err(FormError::KindMismatch {
                name,
                declared,
                defined: body.kind(),
            });
        }
        if body.sub_forms().is_empty() && declared != FormKind::Simple {
            return Err(FormError::EmptyDiagram { name });
        }
        if let Some(missing) = body.sub_forms().iter().find(|sub| !self.contains(**sub)) {
            return Err(FormError::UnknownForm(*missing));
        }
        let labels = match labels {
            None => None,
            Some(labels) => Some(self.label_map_for(&name, &body, labels)?),
        };
        self.fill(
            id,
            FormData {
                name,
                body,
                labels,
                registered: false,
                fingerprint: OnceLock::new(),
            },
        );
        Ok(())
    }

    fn label_map_for(
        &self,
        name: &str,
        body: &FormBody,
        labels: Vec<String>,
    ) -> Result<LabelMap, FormError> {
        let invalid = || FormError::InvalidLabels {
            name: name.to_owned(),
        };
        match body {
            FormBody::Limit(factors) | FormBody::Colimit(factors) if factors.len() == labels.len() => {
                LabelMap::new(labels).ok_or_else(invalid)
            }
            _ => Err(invalid()),
        }
    }

    /// Declares and defines a `Simple` form.
    pub fn simple(&mut self, name: impl Into<String>, module: Module) -> FormId {
        let name = name.into();
        let id = self.declare(name.clone(), FormKind::Simple);
        self.fill(
            id,
            FormData {
                name,
                body: FormBody::Simple(module),
                labels: None,
                registered: false,
                fingerprint: OnceLock::new(),
            },
        );
        id
    }

    /// Declares and defines an unlabeled `Limit` form.
    pub fn limit(&mut self, name: impl Into<String>, factors: Vec<FormId>) -> Result<FormId, FormError> {
        let id = self.declare(name, FormKind::Limit);
        self.define(id, FormBody::Limit(factors), None).map(|()| id)
    }

    /// Declares and defines an unlabeled `Colimit` form.
    pub fn colimit(
        &mut self,
        name: impl Into<String>,
        variants: Vec<FormId>,
    ) -> Result<FormId, FormError> {
        let id = self.declare(name, FormKind::Colimit);
        self.define(id, FormBody::Colimit(variants), None).map(|()| id)
    }

    /// Declares and defines a `Power` form.
    pub fn power(&mut self, name: impl Into<String>, base: FormId) -> Result<FormId, FormError> {
        let id = self.declare(name, FormKind::Power);
        self.define(id, FormBody::Power(base), None).map(|()| id)
    }

    /// Declares and defines a `List` form.
    pub fn list(&mut self, name: impl Into<String>, base: FormId) -> Result<FormId, FormError> {
        let id = self.declare(name, FormKind::List);
        self.define(id, FormBody::List(base), None).map(|()| id)
    }

    fn defined(&self, id: FormId) -> Result<&FormData, FormError> {
        match self.get(id) {
            Some(data) => Ok(data),
            None => match self.name(id) {
                Some(name) => Err(FormError::NotDefined {
                    name: name.to_owned(),
                }),
                None => Err(FormError::UnknownForm(id)),
            },
        }
    }

    /// Adds a form to the name catalog.
    ///
    /// Registration is idempotent by name: registering a form structurally
    /// equal to an already registered one of the same name returns the existing
    /// id. A structurally different form under a taken name is rejected.
    pub fn register(&mut self, id: FormId) -> Result<FormId, FormError> {
        let name = self.defined(id)?.name().to_owned();
        if let Some(existing) = self.lookup(&name) {
            if existing == id || self.full_eq(existing, id) {
                return Ok(existing);
            }
            return Err(FormError::DuplicateName(name));
        }
        if let Some(data) = self.get_mut(id) {
            data.registered = true;
        }
        trace!(form = %name, id = id.as_u32(), "registered form");
        self.insert_registered(name, id);
        Ok(id)
    }

    /// Registers a form and assigns its label map.
    pub fn register_with_labels(
        &mut self,
        id: FormId,
        labels: Vec<String>,
    ) -> Result<FormId, FormError> {
        let data = self.defined(id)?;
        let map = self.label_map_for(data.name(), data.body(), labels)?;
        let registered = self.register(id)?;
        if let Some(data) = self.get_mut(registered) {
            data.labels = Some(map);
        }
        Ok(registered)
    }

    /// Form equality: nominal for two registered forms, structural otherwise.
    pub fn form_eq(&self, a: FormId, b: FormId) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (Some(x), Some(y)) if x.registered && y.registered => x.name == y.name,
            _ => self.full_eq(a, b),
        }
    }

    /// Structural, co-inductive equality.
    ///
    /// Compares names, kinds, modules and diagrams. A pair that is already
    /// assumed equal is not revisited, so cyclic graphs terminate; pairs of
    /// registered sub-forms are compared by name. Labels are not compared.
    pub fn full_eq(&self, a: FormId, b: FormId) -> bool {
        let mut assumed: HashSet<(FormId, FormId)> = HashSet::new();
        let mut work = vec![(a, b)];
        while let Some((x, y)) = work.pop() {
            if x == y || !assumed.insert((x, y)) {
                continue;
            }
            let (fx, fy) = match (self.get(x), self.get(y)) {
                (Some(fx), Some(fy)) => (fx, fy),
                _ => return false,
            };
            if fx.name != fy.name || fx.kind() != fy.kind() {
                return false;
            }
            if fx.registered && fy.registered {
                continue;
            }
            match (&fx.body, &fy.body) {
                (FormBody::Simple(m), FormBody::Simple(n)) => {
                    if m != n {
                        return false;
                    }
                }
                (left, right) => {
                    let (xs, ys) = (left.sub_forms(), right.sub_forms());
                    if xs.len() != ys.len() {
                        return false;
                    }
                    work.extend(xs.iter().copied().zip(ys.iter().copied()));
                }
            }
        }
        true
    }

    /// Collects every form reachable from `id` into `out`, post-order.
    ///
    /// Each form appears once; forms already present in `out` are skipped, so
    /// repeated calls accumulate a dependency-ordered list. On a cycle the
    /// back edge is dropped and the cycle's entry form comes last.
    pub fn dependencies(&self, id: FormId, out: &mut Vec<FormId>) {
        let mut done: HashSet<FormId> = out.iter().copied().collect();
        if done.contains(&id) {
            return;
        }
        let mut visiting = HashSet::new();
        let mut stack = vec![(id, false)];
        while let Some((form, expanded)) = stack.pop() {
            if expanded {
                if done.insert(form) {
                    out.push(form);
                }
                continue;
            }
            if done.contains(&form) || !visiting.insert(form) {
                continue;
            }
            stack.push((form, true));
            if let Some(data) = self.get(form) {
                for sub in data.body.sub_forms().iter().rev() {
                    if !done.contains(sub) && !visiting.contains(sub) {
                        stack.push((*sub, false));
                    }
                }
            }
        }
    }

    /// Sub-form index of `label` in form `id`.
    ///
    /// Without a label map the labels are the stringified indices.
    pub fn label_index(&self, id: FormId, label: &str) -> Option<usize> {
        let data = self.get(id)?;
        match &data.labels {
            Some(map) => map.index_of(label),
            None => label.parse::<usize>().ok().filter(|i| *i < data.form_count()),
        }
    }

    /// Label of sub-form `index` of form `id`.
    pub fn label_of(&self, id: FormId, index: usize) -> Option<String> {
        let data = self.get(id)?;
        match &data.labels {
            Some(map) => map.label(index).map(str::to_owned),
            None if index < data.form_count() => Some(index.to_string()),
            None => None,
        }
    }

    /// Cached fingerprint of a defined form.
    ///
    /// Combines the name, the kind ordinal and the structural identifier (the
    /// module of a `Simple` form, the sub-form names otherwise).
    pub fn fingerprint(&self, id: FormId) -> Option<HashValue> {
        let data = self.get(id)?;
        Some(*data.fingerprint.get_or_init(|| {
            let mut bytes = Vec::new();
            fingerprint::push_str(&mut bytes, &data.name);
            bytes.push(data.kind().ordinal());
            match &data.body {
                FormBody::Simple(module) => module.canonical_bytes(&mut bytes),
                body => {
                    fingerprint::push_len(&mut bytes, body.sub_forms().len());
                    for sub in body.sub_forms() {
                        fingerprint::push_str(&mut bytes, self.name(*sub).unwrap_or_default());
                    }
                }
            }
            HashValue::hash_with_domain(fingerprint::domains::FORM, &bytes)
        }))
    }

    /// Builds a minimal valid denotator of form `id` over `address`.
    ///
    /// `Simple` gives the zero constant, `Limit` the tuple of defaults, `Colimit`
    /// the first variant that has a default, `Power` and `List` the empty
    /// collection. A form whose every expansion leads back to itself (such as
    /// a `Limit` containing itself) has no default.
    pub fn create_default_denotator(
        &self,
        id: FormId,
        address: &Module,
    ) -> Result<Denotator, DenotatorError> {
        let mut in_progress = HashSet::new();
        self.default_in(id, address, &mut in_progress)
    }

    fn default_in(
        &self,
        id: FormId,
        address: &Module,
        in_progress: &mut HashSet<FormId>,
    ) -> Result<Denotator, DenotatorError> {
        let data = self.get(id).ok_or(DenotatorError::UnknownForm(id))?;
        if !in_progress.insert(id) {
            return Err(DenotatorError::NoDefault {
                form: data.name.clone(),
            });
        }
        let no_default = || DenotatorError::NoDefault {
            form: data.name.clone(),
        };
        let result = match &data.body {
            FormBody::Simple(module) => Denotator::simple(
                self,
                id,
                ModuleMorphism::constant(address.clone(), module.zero()),
            ),
            FormBody::Limit(factors) => factors
                .iter()
                .map(|factor| self.default_in(*factor, address, in_progress))
                .collect::<Result<Vec<_>, _>>()
                .and_then(|factors| Denotator::limit(self, id, factors)),
            FormBody::Colimit(variants) => variants
                .iter()
                .enumerate()
                .find_map(|(index, variant)| {
                    self.default_in(*variant, address, in_progress)
                        .ok()
                        .map(|factor| (index, factor))
                })
                .ok_or_else(no_default)
                .and_then(|(index, factor)| Denotator::colimit(self, id, index, factor)),
            FormBody::Power(_) => Denotator::power(self, id, Vec::new())
                .and_then(|d| d.change_address(self, address).ok_or_else(no_default)),
            FormBody::List(_) => Denotator::list(self, id, Vec::new())
                .and_then(|d| d.change_address(self, address).ok_or_else(no_default)),
        };
        in_progress.remove(&id);
        result
    }
}
