//! Denotators: address-parameterised values conforming to a form.
//!
//! A [`Denotator`] is an immutable tree shared through [`Arc`]. Operations that
//! "modify" a denotator ([`replace`](Denotator::replace),
//! [`map`](Denotator::map), [`change_address`](Denotator::change_address), ...)
//! return a new tree that shares every untouched subtree with the original.
//! The only destructive operations are [`Denotator::set_factor`] and
//! [`Denotator::push_factor`], which copy the edited node on write.
//!
//! # Invariants
//! - The coordinate has the kind of the denotator's form.
//! - Every factor's form equals the sub-form expected at its position.
//! - Every factor is either null-addressed or shares the parent's address.
//! - A `Simple` coordinate is a morphism `address → module`.
//! - `Power` coordinates are sorted and duplicate-free.
//!
//! Denotators built through the checked constructors satisfy all of these;
//! internal fast paths go through [`Denotator::from_parts_unchecked`], which
//! asserts [`Denotator::check`] in debug builds.

mod path;

pub use path::PathError;

use crate::address::{MappingError, Module, ModuleElement, ModuleMorphism};
use crate::arena::{FormArena, FormId};
use crate::fingerprint::{self, Canonicalizable, HashValue};
use crate::form::{FormBody, FormKind};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by denotator construction and navigation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenotatorError {
    #[error("form mismatch: expected '{expected}', found '{found}'")]
    FormMismatch { expected: String, found: String },
    #[error("address mismatch: expected {expected}, found {found}")]
    AddressMismatch { expected: Module, found: Module },
    #[error("form '{form}' expects {expected} factors, found {found}")]
    FactorCount {
        form: String,
        expected: usize,
        found: usize,
    },
    #[error("form '{form}' is {found}, expected {expected}")]
    WrongKind {
        form: String,
        expected: FormKind,
        found: FormKind,
    },
    #[error("unknown form id {0}")]
    UnknownForm(FormId),
    #[error("form '{form}' has no default denotator")]
    NoDefault { form: String },
    #[error("denotator has no name")]
    Unnamed,
    #[error("a different denotator named '{0}' is already registered")]
    DuplicateName(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// The kind-shaped payload of a denotator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Coordinate {
    /// A morphism from the address into the form's module.
    Simple(ModuleMorphism),
    /// One factor per sub-form.
    Limit(Vec<Denotator>),
    /// The selected variant and its value.
    Colimit { index: usize, factor: Denotator },
    /// A set of factors, sorted and duplicate-free.
    Power(Vec<Denotator>),
    /// A sequence of factors.
    List(Vec<Denotator>),
}

impl Coordinate {
    /// Kind of the coordinate.
    pub fn kind(&self) -> FormKind {
        match self {
            Coordinate::Simple(_) => FormKind::Simple,
            Coordinate::Limit(_) => FormKind::Limit,
            Coordinate::Colimit { .. } => FormKind::Colimit,
            Coordinate::Power(_) => FormKind::Power,
            Coordinate::List(_) => FormKind::List,
        }
    }

    /// Factor denotators; the active factor for a `Colimit`.
    pub fn factors(&self) -> &[Denotator] {
        match self {
            Coordinate::Simple(_) => &[],
            Coordinate::Limit(factors) | Coordinate::Power(factors) | Coordinate::List(factors) => {
                factors
            }
            Coordinate::Colimit { factor, .. } => std::slice::from_ref(factor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct DenotatorNode {
    form: FormId,
    name: Option<String>,
    address: Module,
    coordinate: Coordinate,
}

/// A value of a form, parameterised over an address module.
///
/// Cloning is O(1). `==` and `Ord` compare form ids, names, addresses and
/// coordinates; use [`Denotator::equals`] to compare denotators whose forms are
/// structurally but not identically equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Denotator(Arc<DenotatorNode>);

fn form_name(forms: &FormArena, id: FormId) -> String {
    forms.name(id).map_or_else(|| id.to_string(), str::to_owned)
}

fn expect_form(forms: &FormArena, expected: FormId, factor: &Denotator) -> Result<(), DenotatorError> {
    if forms.form_eq(expected, factor.form()) {
        Ok(())
    } else {
        Err(DenotatorError::FormMismatch {
            expected: form_name(forms, expected),
            found: form_name(forms, factor.form()),
        })
    }
}

/// Address shared by `factors`: the first non-null one.
fn common_address<'a>(
    factors: impl IntoIterator<Item = &'a Denotator>,
) -> Result<Module, DenotatorError> {
    let mut address: Option<&Module> = None;
    for factor in factors {
        let found = factor.address();
        if found.is_null() {
            continue;
        }
        match address {
            None => address = Some(found),
            Some(expected) if expected == found => {}
            Some(expected) => {
                return Err(DenotatorError::AddressMismatch {
                    expected: expected.clone(),
                    found: found.clone(),
                })
            }
        }
    }
    Ok(address.cloned().unwrap_or(Module::Null))
}

/// Fits `child` into a parent over `parent`, returning the child and the
/// parent's resulting address.
fn fit_factor(
    forms: &FormArena,
    parent: &Module,
    child: Denotator,
) -> Result<(Denotator, Module), DenotatorError> {
    if child.address().is_null() || child.address() == parent {
        return Ok((child, parent.clone()));
    }
    if parent.is_null() {
        // a null-addressed parent only has null-addressed factors
        let address = child.address().clone();
        return Ok((child, address));
    }
    match child.change_address(forms, parent) {
        Some(changed) => Ok((changed, parent.clone())),
        None => Err(DenotatorError::AddressMismatch {
            expected: parent.clone(),
            found: child.address().clone(),
        }),
    }
}

fn normalise(factors: &mut Vec<Denotator>) {
    factors.sort();
    factors.dedup();
}

impl Denotator {
    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    fn from_parts(form: FormId, name: Option<String>, address: Module, coordinate: Coordinate) -> Self {
        Self(Arc::new(DenotatorNode {
            form,
            name,
            address,
            coordinate,
        }))
    }

    /// Assembles a denotator without validation.
    ///
    /// Callers must already have established the invariants; debug builds
    /// assert them.
    pub(crate) fn from_parts_unchecked(
        forms: &FormArena,
        form: FormId,
        name: Option<String>,
        address: Module,
        coordinate: Coordinate,
    ) -> Self {
        let denotator = Self::from_parts(form, name, address, coordinate);
        debug_assert!(
            denotator.check(forms),
            "invalid denotator assembled: {:?}",
            denotator.validate(forms)
        );
        denotator
    }

    fn form_of_kind(
        forms: &FormArena,
        form: FormId,
        expected: FormKind,
    ) -> Result<&crate::form::FormData, DenotatorError> {
        let data = forms.get(form).ok_or(DenotatorError::UnknownForm(form))?;
        if data.kind() != expected {
            return Err(DenotatorError::WrongKind {
                form: data.name().to_owned(),
                expected,
                found: data.kind(),
            });
        }
        Ok(data)
    }

    /// A constant (null-addressed) `Simple` denotator.
    ///
    /// A value from a different module is moved into the form's module along
    /// the canonical embedding, if there is one (an integer for a real form).
    pub fn constant(
        forms: &FormArena,
        form: FormId,
        value: ModuleElement,
    ) -> Result<Self, DenotatorError> {
        let data = Self::form_of_kind(forms, form, FormKind::Simple)?;
        let module = data.module().cloned().unwrap_or(Module::Null);
        let value = if module.contains(&value) {
            value
        } else {
            Module::canonical_morphism(&value.module(), &module)
                .ok_or_else(|| MappingError::ModuleMismatch {
                    left: module.clone(),
                    right: value.module(),
                })?
                .apply(&value)?
        };
        Ok(Self::from_parts(
            form,
            None,
            Module::Null,
            Coordinate::Simple(ModuleMorphism::constant(Module::Null, value)),
        ))
    }

    /// A `Simple` denotator over the domain of `morphism`.
    pub fn simple(
        forms: &FormArena,
        form: FormId,
        morphism: ModuleMorphism,
    ) -> Result<Self, DenotatorError> {
        let data = Self::form_of_kind(forms, form, FormKind::Simple)?;
        let module = data.module().cloned().unwrap_or(Module::Null);
        if morphism.codomain() != module {
            return Err(MappingError::ModuleMismatch {
                left: module,
                right: morphism.codomain(),
            }
            .into());
        }
        let address = morphism.domain();
        Ok(Self::from_parts(form, None, address, Coordinate::Simple(morphism)))
    }

    /// A `Limit` denotator; one factor per sub-form, in order.
    pub fn limit(
        forms: &FormArena,
        form: FormId,
        factors: Vec<Denotator>,
    ) -> Result<Self, DenotatorError> {
        let data = Self::form_of_kind(forms, form, FormKind::Limit)?;
        if factors.len() != data.form_count() {
            return Err(DenotatorError::FactorCount {
                form: data.name().to_owned(),
                expected: data.form_count(),
                found: factors.len(),
            });
        }
        for (i, factor) in factors.iter().enumerate() {
            expect_form(forms, data.form_at(i)?, factor)?;
        }
        let address = common_address(&factors)?;
        Ok(Self::from_parts(form, None, address, Coordinate::Limit(factors)))
    }

    /// A `Colimit` denotator selecting variant `index`.
    pub fn colimit(
        forms: &FormArena,
        form: FormId,
        index: usize,
        factor: Denotator,
    ) -> Result<Self, DenotatorError> {
        let data = Self::form_of_kind(forms, form, FormKind::Colimit)?;
        expect_form(forms, data.form_at(index)?, &factor)?;
        let address = factor.address().clone();
        Ok(Self::from_parts(
            form,
            None,
            address,
            Coordinate::Colimit { index, factor },
        ))
    }

    /// A `Power` denotator; duplicates collapse.
    pub fn power(
        forms: &FormArena,
        form: FormId,
        mut factors: Vec<Denotator>,
    ) -> Result<Self, DenotatorError> {
        let data = Self::form_of_kind(forms, form, FormKind::Power)?;
        let base = data.form_at(0)?;
        for factor in &factors {
            expect_form(forms, base, factor)?;
        }
        let address = common_address(&factors)?;
        normalise(&mut factors);
        Ok(Self::from_parts(form, None, address, Coordinate::Power(factors)))
    }

    /// A `List` denotator.
    pub fn list(
        forms: &FormArena,
        form: FormId,
        factors: Vec<Denotator>,
    ) -> Result<Self, DenotatorError> {
        let data = Self::form_of_kind(forms, form, FormKind::List)?;
        let base = data.form_at(0)?;
        for factor in &factors {
            expect_form(forms, base, factor)?;
        }
        let address = common_address(&factors)?;
        Ok(Self::from_parts(form, None, address, Coordinate::List(factors)))
    }

    /// A renamed copy.
    pub fn named(&self, name: impl Into<String>) -> Self {
        let mut copy = self.clone();
        Arc::make_mut(&mut copy.0).name = Some(name.into());
        copy
    }

    /// An anonymous copy.
    pub fn anonymous(&self) -> Self {
        if self.0.name.is_none() {
            return self.clone();
        }
        let mut copy = self.clone();
        Arc::make_mut(&mut copy.0).name = None;
        copy
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Form of the denotator.
    #[inline]
    pub fn form(&self) -> FormId {
        self.0.form
    }

    /// Name, if the denotator is named.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// Address module.
    #[inline]
    pub fn address(&self) -> &Module {
        &self.0.address
    }

    /// Coordinate.
    #[inline]
    pub fn coordinate(&self) -> &Coordinate {
        &self.0.coordinate
    }

    /// Kind of the denotator (the kind of its form).
    #[inline]
    pub fn kind(&self) -> FormKind {
        self.0.coordinate.kind()
    }

    #[inline]
    pub fn factors(&self) -> &[Denotator] {
        self.0.coordinate.factors()
    }

    #[inline]
    pub fn factor_count(&self) -> usize {
        self.factors().len()
    }

    /// Active variant of a `Colimit` denotator.
    pub fn index(&self) -> Option<usize> {
        match &self.0.coordinate {
            Coordinate::Colimit { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Morphism of a `Simple` denotator.
    pub fn morphism(&self) -> Option<&ModuleMorphism> {
        match &self.0.coordinate {
            Coordinate::Simple(morphism) => Some(morphism),
            _ => None,
        }
    }

    /// Value of a constant `Simple` denotator.
    pub fn element(&self) -> Option<ModuleElement> {
        self.morphism().and_then(ModuleMorphism::constant_value)
    }

    /// Whether the value does not depend on the address.
    pub fn is_constant(&self) -> bool {
        match &self.0.coordinate {
            Coordinate::Simple(morphism) => morphism.is_constant(),
            _ => self.factors().iter().all(Denotator::is_constant),
        }
    }

    /// Whether two handles share the same node.
    #[inline]
    pub fn ptr_eq(&self, other: &Denotator) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // ------------------------------------------------------------------------
    // Address changes
    // ------------------------------------------------------------------------

    /// Evaluates the denotator at `element` of its address.
    ///
    /// The result is null-addressed. A null-addressed denotator is returned
    /// unchanged.
    pub fn at(&self, forms: &FormArena, element: &ModuleElement) -> Result<Denotator, DenotatorError> {
        if self.address().is_null() {
            return Ok(self.clone());
        }
        if !self.address().contains(element) {
            return Err(MappingError::OutsideDomain {
                domain: self.address().clone(),
                element: element.clone(),
            }
            .into());
        }
        self.evaluate(forms, element)
    }

    fn evaluate(&self, forms: &FormArena, element: &ModuleElement) -> Result<Denotator, DenotatorError> {
        if self.address().is_null() {
            return Ok(self.clone());
        }
        let evaluate_all = |factors: &[Denotator]| {
            factors
                .iter()
                .map(|factor| factor.evaluate(forms, element))
                .collect::<Result<Vec<_>, _>>()
        };
        let coordinate = match &self.0.coordinate {
            Coordinate::Simple(morphism) => {
                Coordinate::Simple(ModuleMorphism::constant(Module::Null, morphism.apply(element)?))
            }
            Coordinate::Limit(factors) => Coordinate::Limit(evaluate_all(factors)?),
            Coordinate::Colimit { index, factor } => Coordinate::Colimit {
                index: *index,
                factor: factor.evaluate(forms, element)?,
            },
            Coordinate::Power(factors) => {
                let mut factors = evaluate_all(factors)?;
                normalise(&mut factors);
                Coordinate::Power(factors)
            }
            Coordinate::List(factors) => Coordinate::List(evaluate_all(factors)?),
        };
        Ok(Self::from_parts_unchecked(
            forms,
            self.form(),
            self.0.name.clone(),
            Module::Null,
            coordinate,
        ))
    }

    /// An equivalent denotator over `address`.
    ///
    /// Uses the canonical morphism `address → self.address()`; returns `None`
    /// when there is none (from `R` to `Z`, or from `Null` to anything).
    pub fn change_address(&self, forms: &FormArena, address: &Module) -> Option<Denotator> {
        if self.address() == address {
            return Some(self.clone());
        }
        let old = self.address().clone();
        let canonical = Module::canonical_morphism(address, &old)?;
        self.reparameterize(forms, &old, address, &canonical).ok()
    }

    /// Precomposes every address-dependent part with `morphism`.
    ///
    /// The codomain of `morphism` must be the current address; the result lives
    /// over its domain. Null-addressed factors are kept as they are.
    pub fn change_address_by(
        &self,
        forms: &FormArena,
        morphism: &ModuleMorphism,
    ) -> Result<Denotator, DenotatorError> {
        let old = self.address().clone();
        let new = morphism.domain();
        if old.is_null() {
            return self
                .change_address(forms, &new)
                .ok_or(DenotatorError::AddressMismatch {
                    expected: new,
                    found: old,
                });
        }
        if morphism.codomain() != old {
            return Err(MappingError::NotComposable {
                codomain: morphism.codomain(),
                domain: old,
            }
            .into());
        }
        self.reparameterize(forms, &old, &new, morphism)
    }

    fn reparameterize(
        &self,
        forms: &FormArena,
        old: &Module,
        new: &Module,
        morphism: &ModuleMorphism,
    ) -> Result<Denotator, DenotatorError> {
        let factor = |factor: &Denotator| {
            if factor.address() == old {
                factor.reparameterize(forms, old, new, morphism)
            } else {
                Ok(factor.clone())
            }
        };
        let all = |factors: &[Denotator]| factors.iter().map(&factor).collect::<Result<Vec<_>, _>>();
        let coordinate = match &self.0.coordinate {
            Coordinate::Simple(current) => Coordinate::Simple(current.compose(morphism)?),
            Coordinate::Limit(factors) => Coordinate::Limit(all(factors)?),
            Coordinate::Colimit { index, factor: active } => Coordinate::Colimit {
                index: *index,
                factor: factor(active)?,
            },
            Coordinate::Power(factors) => {
                let mut factors = all(factors)?;
                normalise(&mut factors);
                Coordinate::Power(factors)
            }
            Coordinate::List(factors) => Coordinate::List(all(factors)?),
        };
        Ok(Self::from_parts_unchecked(
            forms,
            self.form(),
            self.0.name.clone(),
            new.clone(),
            coordinate,
        ))
    }

    // ------------------------------------------------------------------------
    // Validation & comparison
    // ------------------------------------------------------------------------

    /// Checks every invariant of the tree, reporting the first violation.
    pub fn validate(&self, forms: &FormArena) -> Result<(), DenotatorError> {
        let data = forms
            .get(self.form())
            .ok_or(DenotatorError::UnknownForm(self.form()))?;
        if data.kind() != self.kind() {
            return Err(DenotatorError::WrongKind {
                form: data.name().to_owned(),
                expected: data.kind(),
                found: self.kind(),
            });
        }
        match (data.body(), &self.0.coordinate) {
            (FormBody::Simple(module), Coordinate::Simple(morphism)) => {
                if morphism.domain() != *self.address() {
                    return Err(DenotatorError::AddressMismatch {
                        expected: self.address().clone(),
                        found: morphism.domain(),
                    });
                }
                if morphism.codomain() != *module {
                    return Err(MappingError::ModuleMismatch {
                        left: module.clone(),
                        right: morphism.codomain(),
                    }
                    .into());
                }
            }
            (FormBody::Limit(subs), Coordinate::Limit(factors)) => {
                if subs.len() != factors.len() {
                    return Err(DenotatorError::FactorCount {
                        form: data.name().to_owned(),
                        expected: subs.len(),
                        found: factors.len(),
                    });
                }
                for (sub, factor) in subs.iter().zip(factors) {
                    expect_form(forms, *sub, factor)?;
                }
            }
            (FormBody::Colimit(_), Coordinate::Colimit { index, factor }) => {
                expect_form(forms, data.form_at(*index)?, factor)?;
            }
            (FormBody::Power(base), Coordinate::Power(factors))
            | (FormBody::List(base), Coordinate::List(factors)) => {
                for factor in factors {
                    expect_form(forms, *base, factor)?;
                }
            }
            (body, coordinate) => {
                return Err(DenotatorError::WrongKind {
                    form: data.name().to_owned(),
                    expected: body.kind(),
                    found: coordinate.kind(),
                })
            }
        }
        for factor in self.factors() {
            if !factor.address().is_null() && factor.address() != self.address() {
                return Err(DenotatorError::AddressMismatch {
                    expected: self.address().clone(),
                    found: factor.address().clone(),
                });
            }
            factor.validate(forms)?;
        }
        Ok(())
    }

    /// Self-validation predicate; never fails, only answers.
    pub fn check(&self, forms: &FormArena) -> bool {
        self.validate(forms).is_ok()
    }

    /// Structural equality, comparing forms with [`FormArena::form_eq`].
    ///
    /// `Power` coordinates are compared as multisets.
    pub fn equals(&self, other: &Denotator, forms: &FormArena) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.name() != other.name()
            || self.address() != other.address()
            || !forms.form_eq(self.form(), other.form())
        {
            return false;
        }
        let pairwise = |xs: &[Denotator], ys: &[Denotator]| {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| x.equals(y, forms))
        };
        match (&self.0.coordinate, &other.0.coordinate) {
            (Coordinate::Simple(a), Coordinate::Simple(b)) => a == b,
            (Coordinate::Limit(xs), Coordinate::Limit(ys))
            | (Coordinate::List(xs), Coordinate::List(ys)) => pairwise(xs, ys),
            (
                Coordinate::Colimit { index: i, factor: x },
                Coordinate::Colimit { index: j, factor: y },
            ) => i == j && x.equals(y, forms),
            (Coordinate::Power(xs), Coordinate::Power(ys)) => {
                if xs.len() != ys.len() {
                    return false;
                }
                let mut used = vec![false; ys.len()];
                xs.iter().all(|x| {
                    let found = ys
                        .iter()
                        .enumerate()
                        .position(|(j, y)| !used[j] && x.equals(y, forms));
                    match found {
                        Some(j) => {
                            used[j] = true;
                            true
                        }
                        None => false,
                    }
                })
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------------

    /// Collects the named denotators of this tree into `out`, post-order.
    ///
    /// The denotator itself comes last if it is named. Entries already in
    /// `out` are not repeated.
    pub fn dependencies(&self, out: &mut Vec<Denotator>) {
        for factor in self.factors() {
            factor.dependencies(out);
        }
        if self.name().is_some() && !out.iter().any(|d| d.ptr_eq(self) || d == self) {
            out.push(self.clone());
        }
    }

    /// Collects every form used anywhere in this tree into `out`, post-order.
    pub fn form_dependencies(&self, forms: &FormArena, out: &mut Vec<FormId>) {
        for factor in self.factors() {
            factor.form_dependencies(forms, out);
        }
        forms.dependencies(self.form(), out);
    }

    // ------------------------------------------------------------------------
    // In-place editing
    // ------------------------------------------------------------------------

    /// Replaces factor `index` in place.
    ///
    /// For a `Colimit` this selects variant `index`. The node is copied first
    /// if it is shared. On error the denotator is left unchanged.
    pub fn set_factor(
        &mut self,
        forms: &FormArena,
        index: usize,
        factor: Denotator,
    ) -> Result<(), DenotatorError> {
        let data = forms
            .get(self.form())
            .ok_or(DenotatorError::UnknownForm(self.form()))?;
        let len = match &self.0.coordinate {
            Coordinate::Simple(_) => return Err(PathError::PastLeaf { depth: 0 }.into()),
            Coordinate::Colimit { .. } => data.form_count(),
            _ => self.factor_count(),
        };
        if index >= len {
            return Err(PathError::IndexOutOfRange { depth: 0, index, len }.into());
        }
        expect_form(forms, data.form_at(index)?, &factor)?;
        let (factor, address) = fit_factor(forms, self.address(), factor)?;

        let node = Arc::make_mut(&mut self.0);
        node.address = address;
        match &mut node.coordinate {
            Coordinate::Limit(factors) | Coordinate::List(factors) => factors[index] = factor,
            Coordinate::Power(factors) => {
                factors[index] = factor;
                normalise(factors);
            }
            Coordinate::Colimit {
                index: active,
                factor: current,
            } => {
                *active = index;
                *current = factor;
            }
            Coordinate::Simple(_) => {}
        }
        debug_assert!(self.check(forms));
        Ok(())
    }

    /// Appends a factor to a `Power` or `List` denotator in place.
    pub fn push_factor(&mut self, forms: &FormArena, factor: Denotator) -> Result<(), DenotatorError> {
        let data = forms
            .get(self.form())
            .ok_or(DenotatorError::UnknownForm(self.form()))?;
        if !matches!(self.kind(), FormKind::Power | FormKind::List) {
            return Err(DenotatorError::WrongKind {
                form: data.name().to_owned(),
                expected: FormKind::List,
                found: self.kind(),
            });
        }
        expect_form(forms, data.form_at(0)?, &factor)?;
        let (factor, address) = fit_factor(forms, self.address(), factor)?;

        let node = Arc::make_mut(&mut self.0);
        node.address = address;
        match &mut node.coordinate {
            Coordinate::List(factors) => factors.push(factor),
            Coordinate::Power(factors) => {
                factors.push(factor);
                normalise(factors);
            }
            _ => {}
        }
        debug_assert!(self.check(forms));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    /// Merkle fingerprint of the tree.
    pub fn fingerprint(&self, forms: &FormArena) -> HashValue {
        let mut bytes = Vec::new();
        match self.name() {
            Some(name) => {
                bytes.push(1);
                fingerprint::push_str(&mut bytes, name);
            }
            None => bytes.push(0),
        }
        let form = forms.fingerprint(self.form()).unwrap_or_else(HashValue::zero);
        bytes.extend_from_slice(form.as_bytes());
        self.address().canonical_bytes(&mut bytes);
        bytes.push(self.kind().ordinal());
        match &self.0.coordinate {
            Coordinate::Simple(morphism) => morphism.canonical_bytes(&mut bytes),
            Coordinate::Colimit { index, factor } => {
                fingerprint::push_len(&mut bytes, *index);
                bytes.extend_from_slice(factor.fingerprint(forms).as_bytes());
            }
            _ => {
                fingerprint::push_len(&mut bytes, self.factor_count());
                for factor in self.factors() {
                    bytes.extend_from_slice(factor.fingerprint(forms).as_bytes());
                }
            }
        }
        HashValue::hash_with_domain(fingerprint::domains::DENOTATOR, &bytes)
    }

    /// Renders the tree, one node per line.
    ///
    /// ```text
    /// n1:Note [Limit]
    ///   _:Onset [Simple] = 1.5
    ///   _:Pitch [Simple] = 60
    /// ```
    pub fn display(&self, forms: &FormArena) -> String {
        let mut out = String::new();
        self.display_into(forms, 0, &mut out);
        out
    }

    fn display_into(&self, forms: &FormArena, depth: usize, out: &mut String) {
        let _ = write!(
            out,
            "{:indent$}{}:{} [{}]",
            "",
            self.name().unwrap_or("_"),
            form_name(forms, self.form()),
            self.kind(),
            indent = depth * 2
        );
        if !self.address().is_null() {
            let _ = write!(out, " @ {}", self.address());
        }
        match &self.0.coordinate {
            Coordinate::Simple(morphism) => match morphism.constant_value() {
                Some(value) => {
                    let _ = write!(out, " = {}", value);
                }
                None => {
                    let _ = write!(out, " = {}", morphism);
                }
            },
            Coordinate::Colimit { index, .. } => {
                let _ = write!(out, " #{}", index);
            }
            _ => {}
        }
        out.push('\n');
        for factor in self.factors() {
            factor.display_into(forms, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        forms: FormArena,
        onset: FormId,
        pitch: FormId,
        note: FormId,
        chord: FormId,
        melody: FormId,
    }

    fn fixture() -> Fixture {
        let mut forms = FormArena::new();
        let onset = forms.simple("Onset", Module::R);
        let pitch = forms.simple("Pitch", Module::Z);
        let note = forms.limit("Note", vec![onset, pitch]).unwrap();
        let chord = forms.power("Chord", note).unwrap();
        let melody = forms.list("Melody", note).unwrap();
        Fixture {
            forms,
            onset,
            pitch,
            note,
            chord,
            melody,
        }
    }

    fn note(fx: &Fixture, onset: f64, pitch: i64) -> Denotator {
        let o = Denotator::constant(&fx.forms, fx.onset, ModuleElement::R(onset)).unwrap();
        let p = Denotator::constant(&fx.forms, fx.pitch, ModuleElement::Z(pitch)).unwrap();
        Denotator::limit(&fx.forms, fx.note, vec![o, p]).unwrap()
    }

    #[test]
    fn constants_embed_canonically() {
        let fx = fixture();
        let d = Denotator::constant(&fx.forms, fx.onset, ModuleElement::Z(2)).unwrap();
        assert_eq!(d.element(), Some(ModuleElement::R(2.0)));
        assert!(d.is_constant());
        let err = Denotator::constant(&fx.forms, fx.pitch, ModuleElement::R(2.5)).unwrap_err();
        assert!(matches!(err, DenotatorError::Mapping(_)));
    }

    #[test]
    fn limit_checks_forms_and_count() {
        let fx = fixture();
        let o = Denotator::constant(&fx.forms, fx.onset, ModuleElement::R(0.0)).unwrap();
        let err = Denotator::limit(&fx.forms, fx.note, vec![o.clone(), o.clone()]).unwrap_err();
        assert!(matches!(err, DenotatorError::FormMismatch { .. }));
        let err = Denotator::limit(&fx.forms, fx.note, vec![o]).unwrap_err();
        assert!(matches!(err, DenotatorError::FactorCount { expected: 2, found: 1, .. }));
        let err = Denotator::limit(&fx.forms, fx.onset, vec![]).unwrap_err();
        assert!(matches!(err, DenotatorError::WrongKind { .. }));
    }

    #[test]
    fn limit_rejects_mixed_addresses() {
        let fx = fixture();
        let o = Denotator::simple(&fx.forms, fx.onset, ModuleMorphism::Identity(Module::R)).unwrap();
        let p = Denotator::simple(
            &fx.forms,
            fx.pitch,
            ModuleMorphism::constant(Module::Z, ModuleElement::Z(60)),
        )
        .unwrap();
        let err = Denotator::limit(&fx.forms, fx.note, vec![o.clone(), p]).unwrap_err();
        assert!(matches!(err, DenotatorError::AddressMismatch { .. }));

        // a constant factor fits any address
        let p = Denotator::constant(&fx.forms, fx.pitch, ModuleElement::Z(60)).unwrap();
        let d = Denotator::limit(&fx.forms, fx.note, vec![o, p]).unwrap();
        assert_eq!(d.address(), &Module::R);
        assert!(d.check(&fx.forms));
        assert!(!d.is_constant());
    }

    #[test]
    fn colimit_index_is_bounded() {
        let mut fx = fixture();
        let either = fx.forms.colimit("Either", vec![fx.onset, fx.pitch]).unwrap();
        let p = Denotator::constant(&fx.forms, fx.pitch, ModuleElement::Z(1)).unwrap();
        let d = Denotator::colimit(&fx.forms, either, 1, p.clone()).unwrap();
        assert_eq!(d.index(), Some(1));
        let err = Denotator::colimit(&fx.forms, either, 2, p.clone()).unwrap_err();
        assert!(matches!(
            err,
            DenotatorError::Path(PathError::IndexOutOfRange { index: 2, len: 2, .. })
        ));
        let err = Denotator::colimit(&fx.forms, either, 0, p).unwrap_err();
        assert!(matches!(err, DenotatorError::FormMismatch { .. }));
    }

    #[test]
    fn power_is_a_set_and_list_a_sequence() {
        let fx = fixture();
        let a = note(&fx, 1.0, 60);
        let b = note(&fx, 0.0, 64);
        let chord =
            Denotator::power(&fx.forms, fx.chord, vec![a.clone(), b.clone(), a.clone()]).unwrap();
        assert_eq!(chord.factor_count(), 2);
        let melody = Denotator::list(&fx.forms, fx.melody, vec![a.clone(), b, a]).unwrap();
        assert_eq!(melody.factor_count(), 3);
    }

    #[test]
    fn at_evaluates_morphisms() {
        let fx = fixture();
        let shifted = ModuleMorphism::translation(Module::R, ModuleElement::R(0.5)).unwrap();
        let o = Denotator::simple(&fx.forms, fx.onset, shifted).unwrap();
        let p = Denotator::constant(&fx.forms, fx.pitch, ModuleElement::Z(60)).unwrap();
        let d = Denotator::limit(&fx.forms, fx.note, vec![o, p]).unwrap();

        let at = d.at(&fx.forms, &ModuleElement::R(1.0)).unwrap();
        assert!(at.address().is_null());
        assert_eq!(at.get(&[0]).unwrap().element(), Some(ModuleElement::R(1.5)));
        assert_eq!(at.get(&[1]).unwrap().element(), Some(ModuleElement::Z(60)));
        assert!(matches!(
            d.at(&fx.forms, &ModuleElement::Z(1)),
            Err(DenotatorError::Mapping(MappingError::OutsideDomain { .. }))
        ));
        // constants are returned unchanged
        let n = note(&fx, 1.0, 60);
        assert!(n.at(&fx.forms, &ModuleElement::Z(3)).unwrap().ptr_eq(&n));
    }

    #[test]
    fn change_address_uses_canonical_morphisms() {
        let fx = fixture();
        let n = note(&fx, 1.0, 60);
        let over_z = n.change_address(&fx.forms, &Module::Z).unwrap();
        assert_eq!(over_z.address(), &Module::Z);
        assert!(over_z.check(&fx.forms));
        assert!(over_z.is_constant());

        let over_r = over_z.change_address(&fx.forms, &Module::R);
        assert!(over_r.is_none(), "no canonical morphism R -> Z");
        let over_zq = over_z.change_address(&fx.forms, &Module::Zn(12));
        assert!(over_zq.is_none());

        let id = Denotator::simple(&fx.forms, fx.pitch, ModuleMorphism::Identity(Module::Z)).unwrap();
        let shift = ModuleMorphism::translation(Module::Z, ModuleElement::Z(12)).unwrap();
        let moved = id.change_address_by(&fx.forms, &shift).unwrap();
        assert_eq!(
            moved.at(&fx.forms, &ModuleElement::Z(48)).unwrap().element(),
            Some(ModuleElement::Z(60))
        );
        let wrong = ModuleMorphism::Identity(Module::R);
        assert!(id.change_address_by(&fx.forms, &wrong).is_err());
    }

    #[test]
    fn structural_equality_across_form_copies() {
        let mut fx = fixture();
        let onset = fx.forms.simple("Onset", Module::R);
        let pitch = fx.forms.simple("Pitch", Module::Z);
        let note_copy = fx.forms.limit("Note", vec![onset, pitch]).unwrap();
        let o = Denotator::constant(&fx.forms, onset, ModuleElement::R(1.0)).unwrap();
        let p = Denotator::constant(&fx.forms, pitch, ModuleElement::Z(60)).unwrap();
        let copy = Denotator::limit(&fx.forms, note_copy, vec![o, p]).unwrap();

        let original = note(&fx, 1.0, 60);
        assert_ne!(original, copy);
        assert!(original.equals(&copy, &fx.forms));
        assert!(!original.equals(&note(&fx, 1.0, 61), &fx.forms));
        assert!(!original.equals(&original.named("n"), &fx.forms));
    }

    #[test]
    fn dependencies_are_named_post_order() {
        let fx = fixture();
        let a = note(&fx, 0.0, 60).named("a");
        let b = note(&fx, 1.0, 62);
        let melody = Denotator::list(&fx.forms, fx.melody, vec![a.clone(), b, a.clone()])
            .unwrap()
            .named("m");
        let mut deps = Vec::new();
        melody.dependencies(&mut deps);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name(), Some("a"));
        assert_eq!(deps[1].name(), Some("m"));

        let mut forms = Vec::new();
        melody.form_dependencies(&fx.forms, &mut forms);
        assert_eq!(forms, vec![fx.onset, fx.pitch, fx.note, fx.melody]);
    }

    #[test]
    fn set_and_push_factor_copy_on_write() {
        let fx = fixture();
        let original = Denotator::list(&fx.forms, fx.melody, vec![note(&fx, 0.0, 60)]).unwrap();
        let mut edited = original.clone();
        edited.push_factor(&fx.forms, note(&fx, 1.0, 62)).unwrap();
        edited.set_factor(&fx.forms, 0, note(&fx, 0.0, 59)).unwrap();
        assert_eq!(original.factor_count(), 1);
        assert_eq!(edited.factor_count(), 2);
        assert_eq!(
            edited.get(&[0, 1]).unwrap().element(),
            Some(ModuleElement::Z(59))
        );

        let onset = Denotator::constant(&fx.forms, fx.onset, ModuleElement::R(0.0)).unwrap();
        assert!(matches!(
            edited.set_factor(&fx.forms, 0, onset.clone()),
            Err(DenotatorError::FormMismatch { .. })
        ));
        assert!(matches!(
            edited.set_factor(&fx.forms, 5, note(&fx, 0.0, 0)),
            Err(DenotatorError::Path(PathError::IndexOutOfRange { .. }))
        ));
        let mut leaf = onset;
        assert!(leaf.push_factor(&fx.forms, note(&fx, 0.0, 0)).is_err());
        assert_eq!(edited.factor_count(), 2);
    }

    #[test]
    fn fingerprints_follow_content() {
        let fx = fixture();
        assert_eq!(
            note(&fx, 1.0, 60).fingerprint(&fx.forms),
            note(&fx, 1.0, 60).fingerprint(&fx.forms)
        );
        assert_ne!(
            note(&fx, 1.0, 60).fingerprint(&fx.forms),
            note(&fx, 1.0, 61).fingerprint(&fx.forms)
        );
    }

    #[test]
    fn display_renders_tree() {
        let fx = fixture();
        let rendered = note(&fx, 1.5, 60).named("n1").display(&fx.forms);
        assert_eq!(
            rendered,
            "n1:Note [Limit]\n  _:Onset [Simple] = 1.5\n  _:Pitch [Simple] = 60\n"
        );
    }
}
