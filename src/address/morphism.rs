//! Morphisms between address modules.

use super::module::embeds;
use super::{MappingError, Module, ModuleElement};
use num_rational::Rational64;
use std::fmt;

/// Type tags under which morphism kinds are persisted and dispatched.
pub mod tags {
    /// Constant map.
    pub const CONSTANT: &str = "ConstantMorphism";
    /// Identity map.
    pub const IDENTITY: &str = "IdentityMorphism";
    /// Affine ring map `x ↦ a·x + b`.
    pub const AFFINE: &str = "AffineMorphism";
    /// Canonical embedding.
    pub const EMBEDDING: &str = "EmbeddingMorphism";
    /// Composition `f ∘ g`.
    pub const COMPOSITION: &str = "CompositionMorphism";
}

/// A morphism of the address algebra.
///
/// The coordinate of a `Simple` denotator is a morphism from the denotator's
/// address into the form's module. A constant denotator is represented by a
/// [`ModuleMorphism::Constant`] out of `Module::Null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleMorphism {
    /// The constant map `domain → value.module()`.
    Constant {
        /// Domain of the map.
        domain: Module,
        /// The value every argument is sent to.
        value: ModuleElement,
    },
    /// The identity on a module.
    Identity(Module),
    /// The affine map `x ↦ factor·x + shift` on a ring.
    Affine {
        /// Ring acted upon (domain and codomain).
        ring: Module,
        /// Linear part.
        factor: ModuleElement,
        /// Translation part.
        shift: ModuleElement,
    },
    /// A canonical embedding (`Z → Q → R`, `Z → Z_n`, `Z_n → Z_m` for `m | n`).
    Embedding {
        /// Source module.
        domain: Module,
        /// Target module.
        codomain: Module,
    },
    /// `Composition(f, g)` is `f ∘ g`: apply `g`, then `f`.
    Composition(Box<ModuleMorphism>, Box<ModuleMorphism>),
}

impl ModuleMorphism {
    /// The constant map from `domain` to `value`.
    pub fn constant(domain: Module, value: ModuleElement) -> Self {
        ModuleMorphism::Constant { domain, value }
    }

    /// The affine map `x ↦ factor·x + shift` on `ring`.
    pub fn affine(
        ring: Module,
        factor: ModuleElement,
        shift: ModuleElement,
    ) -> Result<Self, MappingError> {
        if !ring.is_ring() {
            return Err(MappingError::Unsupported(ring));
        }
        for element in [&factor, &shift] {
            if !ring.contains(element) {
                return Err(MappingError::OutsideDomain {
                    domain: ring,
                    element: element.clone(),
                });
            }
        }
        Ok(ModuleMorphism::Affine { ring, factor, shift })
    }

    /// The translation `x ↦ x + shift` on `ring`.
    pub fn translation(ring: Module, shift: ModuleElement) -> Result<Self, MappingError> {
        let one = ring.one().ok_or_else(|| MappingError::Unsupported(ring.clone()))?;
        Self::affine(ring, one, shift)
    }

    /// The canonical embedding `domain → codomain`, if admissible.
    pub fn embedding(domain: Module, codomain: Module) -> Result<Self, MappingError> {
        if embeds(&domain, &codomain) {
            Ok(ModuleMorphism::Embedding { domain, codomain })
        } else {
            Err(MappingError::NotComposable { codomain, domain })
        }
    }

    /// Returns the persisted type tag of this morphism.
    pub fn tag(&self) -> &'static str {
        match self {
            ModuleMorphism::Constant { .. } => tags::CONSTANT,
            ModuleMorphism::Identity(_) => tags::IDENTITY,
            ModuleMorphism::Affine { .. } => tags::AFFINE,
            ModuleMorphism::Embedding { .. } => tags::EMBEDDING,
            ModuleMorphism::Composition(..) => tags::COMPOSITION,
        }
    }

    /// Domain of the morphism.
    pub fn domain(&self) -> Module {
        match self {
            ModuleMorphism::Constant { domain, .. } => domain.clone(),
            ModuleMorphism::Identity(module) => module.clone(),
            ModuleMorphism::Affine { ring, .. } => ring.clone(),
            ModuleMorphism::Embedding { domain, .. } => domain.clone(),
            ModuleMorphism::Composition(_, g) => g.domain(),
        }
    }

    /// Codomain of the morphism.
    pub fn codomain(&self) -> Module {
        match self {
            ModuleMorphism::Constant { value, .. } => value.module(),
            ModuleMorphism::Identity(module) => module.clone(),
            ModuleMorphism::Affine { ring, .. } => ring.clone(),
            ModuleMorphism::Embedding { codomain, .. } => codomain.clone(),
            ModuleMorphism::Composition(f, _) => f.codomain(),
        }
    }

    /// Whether the morphism ignores its argument.
    pub fn is_constant(&self) -> bool {
        if self.domain().is_null() {
            return true;
        }
        match self {
            ModuleMorphism::Constant { .. } => true,
            ModuleMorphism::Identity(_) => false,
            ModuleMorphism::Affine { factor, .. } => factor.is_zero(),
            ModuleMorphism::Embedding { codomain, .. } => codomain.is_null(),
            ModuleMorphism::Composition(f, g) => f.is_constant() || g.is_constant(),
        }
    }

    /// The value of a constant morphism (evaluated at zero), if constant.
    pub fn constant_value(&self) -> Option<ModuleElement> {
        match self {
            ModuleMorphism::Constant { value, .. } => Some(value.clone()),
            _ if self.is_constant() => self.apply(&self.domain().zero()).ok(),
            _ => None,
        }
    }

    /// Evaluates the morphism at `x`.
    ///
    /// Fails with [`MappingError::OutsideDomain`] if `x` is not an element of the
    /// domain, or with an arithmetic error raised by the ring operations.
    pub fn apply(&self, x: &ModuleElement) -> Result<ModuleElement, MappingError> {
        let domain = self.domain();
        if !domain.contains(x) {
            return Err(MappingError::OutsideDomain {
                domain,
                element: x.clone(),
            });
        }
        match self {
            ModuleMorphism::Constant { value, .. } => Ok(value.clone()),
            ModuleMorphism::Identity(_) => Ok(x.clone()),
            ModuleMorphism::Affine { factor, shift, .. } => factor.checked_mul(x)?.checked_add(shift),
            ModuleMorphism::Embedding { codomain, .. } => embed(x, codomain),
            ModuleMorphism::Composition(f, g) => f.apply(&g.apply(x)?),
        }
    }

    /// Returns `self ∘ inner`.
    ///
    /// Constants, identities and affine pairs are folded; anything else yields a
    /// [`ModuleMorphism::Composition`].
    pub fn compose(&self, inner: &ModuleMorphism) -> Result<ModuleMorphism, MappingError> {
        if inner.codomain() != self.domain() {
            return Err(MappingError::NotComposable {
                codomain: inner.codomain(),
                domain: self.domain(),
            });
        }
        let composed = match (self, inner) {
            (ModuleMorphism::Constant { value, .. }, _) => ModuleMorphism::Constant {
                domain: inner.domain(),
                value: value.clone(),
            },
            (ModuleMorphism::Identity(_), _) => inner.clone(),
            (_, ModuleMorphism::Identity(_)) => self.clone(),
            (_, ModuleMorphism::Constant { domain, value }) => ModuleMorphism::Constant {
                domain: domain.clone(),
                value: self.apply(value)?,
            },
            (
                ModuleMorphism::Affine { ring, factor: a, shift: b },
                ModuleMorphism::Affine { factor: c, shift: d, .. },
            ) => ModuleMorphism::Affine {
                ring: ring.clone(),
                factor: a.checked_mul(c)?,
                shift: a.checked_mul(d)?.checked_add(b)?,
            },
            _ => ModuleMorphism::Composition(Box::new(self.clone()), Box::new(inner.clone())),
        };
        Ok(composed)
    }
}

fn embed(x: &ModuleElement, codomain: &Module) -> Result<ModuleElement, MappingError> {
    let image = match (x, codomain) {
        (_, Module::Null) => ModuleElement::Null,
        (ModuleElement::Z(v), Module::Q) => ModuleElement::Q(Rational64::from_integer(*v)),
        (ModuleElement::Z(v), Module::R) => ModuleElement::R(*v as f64),
        (ModuleElement::Z(v), Module::Zn(m)) => ModuleElement::zn(*v, *m),
        (ModuleElement::Zn { value, .. }, Module::Zn(m)) => ModuleElement::zn(*value, *m),
        (ModuleElement::Q(q), Module::R) => ModuleElement::R(*q.numer() as f64 / *q.denom() as f64),
        _ => {
            return Err(MappingError::NotComposable {
                codomain: codomain.clone(),
                domain: x.module(),
            })
        }
    };
    Ok(image)
}

impl fmt::Display for ModuleMorphism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleMorphism::Constant { domain, value } => write!(f, "const[{}]({})", domain, value),
            ModuleMorphism::Identity(module) => write!(f, "id[{}]", module),
            ModuleMorphism::Affine { ring, factor, shift } => {
                write!(f, "[{}] x -> {}*x + {}", ring, factor, shift)
            }
            ModuleMorphism::Embedding { domain, codomain } => write!(f, "{} -> {}", domain, codomain),
            ModuleMorphism::Composition(outer, inner) => write!(f, "({}) o ({})", outer, inner),
        }
    }
}
