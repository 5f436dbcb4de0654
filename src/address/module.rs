//! Modules: the domains (addresses) and coefficient spaces of denotators.

use super::{ModuleElement, ModuleMorphism};
use std::fmt;

/// Type tags under which module kinds are persisted and dispatched.
pub mod tags {
    /// The zero module (address of constant denotators).
    pub const NULL: &str = "NullModule";
    /// The integers.
    pub const Z: &str = "ZRing";
    /// The integers modulo `n`.
    pub const ZN: &str = "ZnRing";
    /// The rationals.
    pub const Q: &str = "QRing";
    /// The reals (IEEE‑754 doubles).
    pub const R: &str = "RRing";
    /// A finite product of modules.
    pub const PRODUCT: &str = "ProductRing";
}

/// A module of the address algebra.
///
/// `Module::Null` is the distinguished zero module: a denotator whose address is
/// `Null` is address-independent (constant) and is compatible with any parent
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Module {
    /// The zero module.
    Null,
    /// The ring of integers.
    Z,
    /// The ring of integers modulo the given modulus (`1..=MAX_MODULUS`).
    Zn(u64),
    /// The field of rationals.
    Q,
    /// The field of reals.
    R,
    /// Finite product of modules.
    Product(Vec<Module>),
}

impl Module {
    /// Largest modulus of `Zn`; residues must fit in an `i64`.
    pub const MAX_MODULUS: u64 = i64::MAX as u64;

    /// Returns the persisted type tag of this module.
    pub fn tag(&self) -> &'static str {
        match self {
            Module::Null => tags::NULL,
            Module::Z => tags::Z,
            Module::Zn(_) => tags::ZN,
            Module::Q => tags::Q,
            Module::R => tags::R,
            Module::Product(_) => tags::PRODUCT,
        }
    }

    /// Whether this is the zero module.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Module::Null)
    }

    /// Whether this module is one of the coefficient rings (`Z`, `Z_n`, `Q`, `R`).
    #[inline]
    pub fn is_ring(&self) -> bool {
        matches!(self, Module::Z | Module::Zn(_) | Module::Q | Module::R)
    }

    /// Number of coordinates of an element of this module.
    pub fn dimension(&self) -> usize {
        match self {
            Module::Null => 0,
            Module::Product(factors) => factors.len(),
            _ => 1,
        }
    }

    /// The zero element of this module.
    pub fn zero(&self) -> ModuleElement {
        match self {
            Module::Null => ModuleElement::Null,
            Module::Z => ModuleElement::Z(0),
            Module::Zn(n) => ModuleElement::zn(0, *n),
            Module::Q => ModuleElement::Q(num_rational::Rational64::from_integer(0)),
            Module::R => ModuleElement::R(0.0),
            Module::Product(factors) => {
                ModuleElement::Product(factors.iter().map(Module::zero).collect())
            }
        }
    }

    /// The unit element of a ring, `None` for non-ring modules.
    pub fn one(&self) -> Option<ModuleElement> {
        match self {
            Module::Z => Some(ModuleElement::Z(1)),
            Module::Zn(n) => Some(ModuleElement::zn(1, *n)),
            Module::Q => Some(ModuleElement::Q(num_rational::Rational64::from_integer(1))),
            Module::R => Some(ModuleElement::R(1.0)),
            _ => None,
        }
    }

    /// Whether `element` is an element of this module.
    #[inline]
    pub fn contains(&self, element: &ModuleElement) -> bool {
        element.module() == *self
    }

    /// Finds the canonical morphism `from → to`, if one exists.
    ///
    /// Canonical morphisms are the identity, the zero map onto `Null`, and the
    /// embeddings `Z → Q → R`, `Z → Z_n` and `Z_n → Z_m` for `m | n`. There is no
    /// canonical morphism out of `Null` into a non-null module: a constant can
    /// not be re-addressed by choosing an arbitrary point.
    pub fn canonical_morphism(from: &Module, to: &Module) -> Option<ModuleMorphism> {
        if from == to {
            return Some(ModuleMorphism::Identity(from.clone()));
        }
        if to.is_null() {
            return Some(ModuleMorphism::Constant {
                domain: from.clone(),
                value: ModuleElement::Null,
            });
        }
        if embeds(from, to) {
            return Some(ModuleMorphism::Embedding {
                domain: from.clone(),
                codomain: to.clone(),
            });
        }
        None
    }
}

/// Whether a canonical ring embedding `from → to` exists (excluding identity).
pub(crate) fn embeds(from: &Module, to: &Module) -> bool {
    match (from, to) {
        (Module::Z, Module::Q | Module::R | Module::Zn(_)) => true,
        (Module::Q, Module::R) => true,
        (Module::Zn(n), Module::Zn(m)) => n != m && *m != 0 && n % m == 0,
        (_, Module::Null) => !from.is_null(),
        _ => false,
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Module::Null => write!(f, "Null"),
            Module::Z => write!(f, "Z"),
            Module::Zn(n) => write!(f, "Z_{}", n),
            Module::Q => write!(f, "Q"),
            Module::R => write!(f, "R"),
            Module::Product(factors) => {
                write!(f, "(")?;
                for (i, factor) in factors.iter().enumerate() {
                    if i > 0 {
                        write!(f, " x ")?;
                    }
                    write!(f, "{}", factor)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_elements_belong_to_their_module() {
        for module in [
            Module::Null,
            Module::Z,
            Module::Zn(12),
            Module::Q,
            Module::R,
            Module::Product(vec![Module::Z, Module::R]),
        ] {
            assert!(module.contains(&module.zero()), "zero of {} not contained", module);
        }
    }

    #[test]
    fn canonical_morphisms() {
        assert_eq!(
            Module::canonical_morphism(&Module::Z, &Module::Z),
            Some(ModuleMorphism::Identity(Module::Z))
        );
        assert!(Module::canonical_morphism(&Module::Z, &Module::R).is_some());
        assert!(Module::canonical_morphism(&Module::Zn(12), &Module::Zn(4)).is_some());
        // 12 is not a multiple of 5
        assert!(Module::canonical_morphism(&Module::Zn(12), &Module::Zn(5)).is_none());
        // No embedding back down the tower
        assert!(Module::canonical_morphism(&Module::R, &Module::Q).is_none());
        // Null accepts everything, emits nothing
        assert!(Module::canonical_morphism(&Module::R, &Module::Null).is_some());
        assert!(Module::canonical_morphism(&Module::Null, &Module::R).is_none());
    }

    #[test]
    fn display() {
        assert_eq!(Module::Zn(7).to_string(), "Z_7");
        assert_eq!(
            Module::Product(vec![Module::Z, Module::R]).to_string(),
            "(Z x R)"
        );
    }
}
