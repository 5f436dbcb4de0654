//! Address algebra: the modules, elements and morphisms over which denotators
//! are parameterised.
//!
//! A denotator of a `Simple` form carries a morphism from its *address* into the
//! form's coefficient module. Composite denotators share the address of their
//! factors. This module provides a small, closed algebra sufficient for that role:
//!
//! - [`Module`]: `Null`, the rings `Z`, `Z_n`, `Q`, `R`, and finite products.
//! - [`ModuleElement`]: elements of those modules, totally ordered.
//! - [`ModuleMorphism`]: constants, identities, affine ring maps, canonical
//!   embeddings and compositions.
//!
//! The numeric primitives here are deliberately minimal; denotators treat them as
//! opaque leaves and only rely on [`Module::zero`], equality,
//! [`ModuleMorphism::apply`], [`ModuleMorphism::compose`] and
//! [`Module::canonical_morphism`].
//!
//! # References
//! - Mazzola, "The Topos of Music", Part II (2002) – address-parameterised denotators
//! - Milmeister, "The Rubato Composer Music Software", Chapter 3 (2009)

pub mod element;
pub mod module;
pub mod morphism;

pub use element::ModuleElement;
pub use module::Module;
pub use morphism::ModuleMorphism;

use thiserror::Error;

/// Error raised when a morphism cannot be evaluated or composed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// The argument is not an element of the morphism's domain.
    #[error("element {element} lies outside the domain {domain}")]
    OutsideDomain {
        /// Domain of the morphism.
        domain: Module,
        /// Offending argument.
        element: ModuleElement,
    },
    /// The codomain of the inner morphism differs from the domain of the outer one.
    #[error("cannot compose: codomain {codomain} does not match domain {domain}")]
    NotComposable {
        /// Codomain of the inner morphism.
        codomain: Module,
        /// Domain of the outer morphism.
        domain: Module,
    },
    /// Two operands of an arithmetic operation live in different modules.
    #[error("operands live in different modules ({left} and {right})")]
    ModuleMismatch {
        /// Module of the left operand.
        left: Module,
        /// Module of the right operand.
        right: Module,
    },
    /// The operation is not defined on this module (e.g. multiplication on a product).
    #[error("operation not supported on module {0}")]
    Unsupported(Module),
    /// Fixed-width arithmetic overflowed.
    #[error("arithmetic overflow in {0}")]
    Overflow(Module),
}
