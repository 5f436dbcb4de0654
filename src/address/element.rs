//! Elements of address modules.

use super::{MappingError, Module};
use num_rational::Rational64;
use num_traits::{CheckedAdd, CheckedMul, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Type tags under which element kinds are persisted and dispatched.
pub mod tags {
    /// The unique element of the zero module.
    pub const NULL: &str = "NullElement";
    /// An integer.
    pub const Z: &str = "ZElement";
    /// A residue class modulo `n`.
    pub const ZN: &str = "ZnElement";
    /// A rational.
    pub const Q: &str = "QElement";
    /// A real.
    pub const R: &str = "RElement";
    /// A tuple of elements of a product module.
    pub const PRODUCT: &str = "ProductElement";
}

/// An element of a [`Module`].
///
/// Elements are totally ordered: first by kind, then by value. Reals are compared
/// with [`f64::total_cmp`], so `NaN` and signed zeros have a fixed position and
/// equality agrees with ordering.
#[derive(Debug, Clone)]
pub enum ModuleElement {
    /// The unique element of the zero module.
    Null,
    /// An integer.
    Z(i64),
    /// A residue `value mod modulus`, normalised into `0..modulus`.
    Zn {
        /// Representative in `0..modulus`.
        value: i64,
        /// Modulus (at least 1).
        modulus: u64,
    },
    /// A rational number.
    Q(Rational64),
    /// A real number.
    R(f64),
    /// A tuple of elements.
    Product(Vec<ModuleElement>),
}

impl ModuleElement {
    /// Creates the residue class of `value` modulo `modulus`.
    ///
    /// The modulus is clamped to `1..=Module::MAX_MODULUS`.
    pub fn zn(value: i64, modulus: u64) -> Self {
        let modulus = modulus.clamp(1, Module::MAX_MODULUS);
        let value = (value as i128).rem_euclid(modulus as i128) as i64;
        ModuleElement::Zn { value, modulus }
    }

    /// Creates the rational `numer / denom`; `None` if `denom` is zero.
    pub fn q(numer: i64, denom: i64) -> Option<Self> {
        if denom == 0 {
            None
        } else {
            Some(ModuleElement::Q(Rational64::new(numer, denom)))
        }
    }

    /// Returns the persisted type tag of this element.
    pub fn tag(&self) -> &'static str {
        match self {
            ModuleElement::Null => tags::NULL,
            ModuleElement::Z(_) => tags::Z,
            ModuleElement::Zn { .. } => tags::ZN,
            ModuleElement::Q(_) => tags::Q,
            ModuleElement::R(_) => tags::R,
            ModuleElement::Product(_) => tags::PRODUCT,
        }
    }

    /// The module this element belongs to.
    pub fn module(&self) -> Module {
        match self {
            ModuleElement::Null => Module::Null,
            ModuleElement::Z(_) => Module::Z,
            ModuleElement::Zn { modulus, .. } => Module::Zn(*modulus),
            ModuleElement::Q(_) => Module::Q,
            ModuleElement::R(_) => Module::R,
            ModuleElement::Product(factors) => {
                Module::Product(factors.iter().map(ModuleElement::module).collect())
            }
        }
    }

    /// Whether this is the zero of its module.
    pub fn is_zero(&self) -> bool {
        match self {
            ModuleElement::Null => true,
            ModuleElement::Z(v) => *v == 0,
            ModuleElement::Zn { value, .. } => *value == 0,
            ModuleElement::Q(q) => q.is_zero(),
            ModuleElement::R(r) => *r == 0.0,
            ModuleElement::Product(factors) => factors.iter().all(ModuleElement::is_zero),
        }
    }

    /// Integer view of `Z` and `Z_n` elements.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ModuleElement::Z(v) => Some(*v),
            ModuleElement::Zn { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Real view of ring elements (lossy for large integers and rationals).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ModuleElement::Z(v) => Some(*v as f64),
            ModuleElement::Zn { value, .. } => Some(*value as f64),
            ModuleElement::Q(q) => Some(*q.numer() as f64 / *q.denom() as f64),
            ModuleElement::R(r) => Some(*r),
            _ => None,
        }
    }

    /// Adds two elements of the same module.
    pub fn checked_add(&self, other: &ModuleElement) -> Result<ModuleElement, MappingError> {
        let overflow = || MappingError::Overflow(self.module());
        match (self, other) {
            (ModuleElement::Null, ModuleElement::Null) => Ok(ModuleElement::Null),
            (ModuleElement::Z(a), ModuleElement::Z(b)) => {
                (*a).checked_add(*b).map(ModuleElement::Z).ok_or_else(overflow)
            }
            (
                ModuleElement::Zn { value: a, modulus: m },
                ModuleElement::Zn { value: b, modulus: n },
            ) if m == n => Ok(ModuleElement::zn(
                ((*a as i128 + *b as i128).rem_euclid(*m as i128)) as i64,
                *m,
            )),
            (ModuleElement::Q(a), ModuleElement::Q(b)) => {
                CheckedAdd::checked_add(a, b).map(ModuleElement::Q).ok_or_else(overflow)
            }
            (ModuleElement::R(a), ModuleElement::R(b)) => Ok(ModuleElement::R(a + b)),
            (ModuleElement::Product(xs), ModuleElement::Product(ys)) if xs.len() == ys.len() => xs
                .iter()
                .zip(ys)
                .map(|(x, y)| x.checked_add(y))
                .collect::<Result<Vec<_>, _>>()
                .map(ModuleElement::Product),
            _ => Err(MappingError::ModuleMismatch {
                left: self.module(),
                right: other.module(),
            }),
        }
    }

    /// Multiplies two elements of the same ring.
    pub fn checked_mul(&self, other: &ModuleElement) -> Result<ModuleElement, MappingError> {
        let overflow = || MappingError::Overflow(self.module());
        match (self, other) {
            (ModuleElement::Z(a), ModuleElement::Z(b)) => {
                (*a).checked_mul(*b).map(ModuleElement::Z).ok_or_else(overflow)
            }
            (
                ModuleElement::Zn { value: a, modulus: m },
                ModuleElement::Zn { value: b, modulus: n },
            ) if m == n => Ok(ModuleElement::zn(
                ((*a as i128 * *b as i128).rem_euclid(*m as i128)) as i64,
                *m,
            )),
            (ModuleElement::Q(a), ModuleElement::Q(b)) => {
                CheckedMul::checked_mul(a, b).map(ModuleElement::Q).ok_or_else(overflow)
            }
            (ModuleElement::R(a), ModuleElement::R(b)) => Ok(ModuleElement::R(a * b)),
            _ if self.module() != other.module() => Err(MappingError::ModuleMismatch {
                left: self.module(),
                right: other.module(),
            }),
            _ => Err(MappingError::Unsupported(self.module())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ModuleElement::Null => 0,
            ModuleElement::Z(_) => 1,
            ModuleElement::Zn { .. } => 2,
            ModuleElement::Q(_) => 3,
            ModuleElement::R(_) => 4,
            ModuleElement::Product(_) => 5,
        }
    }
}

impl Ord for ModuleElement {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ModuleElement::Null, ModuleElement::Null) => Ordering::Equal,
            (ModuleElement::Z(a), ModuleElement::Z(b)) => a.cmp(b),
            (
                ModuleElement::Zn { value: a, modulus: m },
                ModuleElement::Zn { value: b, modulus: n },
            ) => m.cmp(n).then(a.cmp(b)),
            (ModuleElement::Q(a), ModuleElement::Q(b)) => a.cmp(b),
            (ModuleElement::R(a), ModuleElement::R(b)) => a.total_cmp(b),
            (ModuleElement::Product(xs), ModuleElement::Product(ys)) => xs.cmp(ys),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for ModuleElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ModuleElement {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ModuleElement {}

impl Hash for ModuleElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            ModuleElement::Null => {}
            ModuleElement::Z(v) => v.hash(state),
            ModuleElement::Zn { value, modulus } => {
                modulus.hash(state);
                value.hash(state);
            }
            ModuleElement::Q(q) => q.hash(state),
            // total_cmp equality coincides with bit equality
            ModuleElement::R(r) => r.to_bits().hash(state),
            ModuleElement::Product(xs) => xs.hash(state),
        }
    }
}

impl fmt::Display for ModuleElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleElement::Null => write!(f, "0"),
            ModuleElement::Z(v) => write!(f, "{}", v),
            ModuleElement::Zn { value, modulus } => write!(f, "{} mod {}", value, modulus),
            ModuleElement::Q(q) => write!(f, "{}", q),
            ModuleElement::R(r) => write!(f, "{}", r),
            ModuleElement::Product(xs) => {
                write!(f, "(")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
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
    fn residues_are_normalised() {
        assert_eq!(ModuleElement::zn(-1, 12), ModuleElement::zn(11, 12));
        assert_eq!(ModuleElement::zn(25, 12).as_i64(), Some(1));
        assert_eq!(
            ModuleElement::zn(-1, u64::MAX),
            ModuleElement::Zn {
                value: i64::MAX - 1,
                modulus: Module::MAX_MODULUS
            }
        );
    }

    #[test]
    fn arithmetic() {
        let sum = ModuleElement::Z(2).checked_add(&ModuleElement::Z(3)).unwrap();
        assert_eq!(sum, ModuleElement::Z(5));
        let prod = ModuleElement::zn(5, 12).checked_mul(&ModuleElement::zn(5, 12)).unwrap();
        assert_eq!(prod, ModuleElement::zn(1, 12));
        let half = ModuleElement::q(1, 2).unwrap();
        assert_eq!(half.checked_add(&half).unwrap(), ModuleElement::q(1, 1).unwrap());
    }

    #[test]
    fn overflow_and_mismatch_are_errors() {
        assert!(matches!(
            ModuleElement::Z(i64::MAX).checked_add(&ModuleElement::Z(1)),
            Err(MappingError::Overflow(Module::Z))
        ));
        assert!(matches!(
            ModuleElement::Z(1).checked_add(&ModuleElement::R(1.0)),
            Err(MappingError::ModuleMismatch { .. })
        ));
        let pair = ModuleElement::Product(vec![ModuleElement::Z(1)]);
        assert!(matches!(
            pair.checked_mul(&pair),
            Err(MappingError::Unsupported(_))
        ));
    }

    #[test]
    fn reals_are_totally_ordered() {
        let nan = ModuleElement::R(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert!(ModuleElement::R(1.5) < ModuleElement::R(2.0));
        // kinds order before values
        assert!(ModuleElement::Z(100) < ModuleElement::R(-1.0));
    }

    #[test]
    fn zero_denominator_rejected() {
        assert!(ModuleElement::q(1, 0).is_none());
    }
}
