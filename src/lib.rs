//! Denotator: forms, denotators and their persisted format.
//!
//! A *form* is a recursive type. There are five kinds:
//! - `Simple` wraps a module.
//! - `Limit` is a product over its sub-forms.
//! - `Colimit` is a tagged union.
//! - `Power` is a finite set.
//! - `List` is a finite sequence.
//!
//! Forms may refer to each other, and to themselves, by identity. A
//! *denotator* is a value of a form, parameterised by an *address*: a module
//! over which the value varies. A constant denotator has the null address.
//!
//! The crate is organised bottom-up:
//! - [`address`] holds the module algebra: modules, elements and morphisms.
//! - [`arena`] and [`form`] store forms in an arena indexed by [`FormId`], with structural equality.
//! - [`denotator`] holds immutable denotator trees that share structure, with path navigation.
//! - [`repository`] is the name catalog of forms and denotators.
//! - [`codec`] and [`dispatch`] read and write documents with by-name references.
//! - [`fingerprint`] provides stable content hashes.
//!
//! # Mathematical Foundations
//!
//! Forms are the objects of a small category of diagrams over modules. Limits
//! and colimits are taken over discrete diagrams, and `Power` is the covariant
//! finite-power-set functor. Addressed denotators are the functor-of-points
//! view of a form, evaluated at a module.
//!
//! # References
//!
//! - Mazzola, G. "The Topos of Music" (2002), part II: forms and denotators
//! - Milmeister, G. "The Rubato Composer Music Software" (2009), ch. 3
//!
//! # Example
//!
//! ```
//! use denotator::prelude::*;
//!
//! let mut repo = Repository::new();
//! let forms = repo.forms_mut();
//! let onset = forms.simple("Onset", Module::R);
//! let pitch = forms.simple("Pitch", Module::Z);
//! let note = forms.limit("Note", vec![onset, pitch]).unwrap();
//!
//! let forms = repo.forms();
//! let n1 = Denotator::limit(
//!     forms,
//!     note,
//!     vec![
//!         Denotator::constant(forms, onset, ModuleElement::R(1.5)).unwrap(),
//!         Denotator::constant(forms, pitch, ModuleElement::Z(60)).unwrap(),
//!     ],
//! )
//! .unwrap()
//! .named("n1");
//!
//! let text = encode_to_string(forms, &[], &[n1.clone()]).unwrap();
//! let outcome = decode_str(&text, &mut repo);
//! assert!(outcome.is_success());
//! assert!(outcome.denotators[0].equals(&n1, repo.forms()));
//! ```

pub mod address;
pub mod arena;
pub mod codec;
pub mod denotator;
pub mod dispatch;
pub mod fingerprint;
pub mod form;
pub mod repository;

pub use address::{MappingError, Module, ModuleElement, ModuleMorphism};
pub use arena::{FormArena, FormId};
pub use codec::{ReadError, ReadOutcome, Reader, WriteError, Writer};
pub use denotator::{Coordinate, Denotator, DenotatorError, PathError};
pub use form::{FormBody, FormBuilder, FormData, FormError, FormKind, LabelMap};
pub use repository::Repository;

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::address::{MappingError, Module, ModuleElement, ModuleMorphism};
    pub use crate::arena::{FormArena, FormId};
    pub use crate::codec::{
        decode, decode_str, encode, encode_to_string, CodecConfig, Format, ReadError, ReadOutcome,
        Reader, ReaderState, SymbolKind, WriteError, Writer,
    };
    pub use crate::denotator::{Coordinate, Denotator, DenotatorError, PathError};
    pub use crate::dispatch::{Family, TypeDispatcher};
    pub use crate::fingerprint::{Canonicalizable, HashValue};
    pub use crate::form::{FormBody, FormBuilder, FormError, FormKind};
    pub use crate::repository::Repository;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    fn assert_send_sync<T: Send + Sync>() {}

    /// Values can be shared across threads.
    #[test]
    fn thread_safety() {
        assert_send_sync::<Denotator>();
        assert_send_sync::<FormArena>();
        assert_send_sync::<Repository>();
        assert_send_sync::<TypeDispatcher>();
    }

    /// A denotator built on one thread is read on another.
    #[test]
    fn denotators_cross_threads() {
        let mut forms = FormArena::new();
        let pitch = forms.simple("Pitch", Module::Z);
        let c4 = Denotator::constant(&forms, pitch, ModuleElement::Z(60)).unwrap();
        let shared = std::sync::Arc::new(forms);
        let handle = {
            let forms = std::sync::Arc::clone(&shared);
            let c4 = c4.clone();
            std::thread::spawn(move || c4.fingerprint(&forms))
        };
        assert_eq!(handle.join().unwrap(), c4.fingerprint(&shared));
    }

    /// Form kinds render as their persisted names.
    #[test]
    fn kind_names() {
        let names: Vec<_> = FormKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["Simple", "Limit", "Colimit", "Power", "List"]);
    }
}
