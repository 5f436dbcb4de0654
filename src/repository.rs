//! The catalog of registered forms and named denotators.

use crate::arena::{FormArena, FormId};
use crate::denotator::{Denotator, DenotatorError};
use crate::form::FormError;
use std::collections::BTreeMap;
use tracing::trace;

/// Owns a form arena together with the registry of named denotators.
///
/// Documents are decoded into a repository: their forms are added to its
/// arena, and references a document leaves open may be resolved against its
/// registered names.
#[derive(Debug, Default)]
pub struct Repository {
    forms: FormArena,
    denotators: BTreeMap<String, Denotator>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forms(&self) -> &FormArena {
        &self.forms
    }

    pub fn forms_mut(&mut self) -> &mut FormArena {
        &mut self.forms
    }

    /// Registers a form under its own name. See [`FormArena::register`].
    pub fn register_form(&mut self, id: FormId) -> Result<FormId, FormError> {
        self.forms.register(id)
    }

    /// Registers a form and assigns its labels.
    pub fn register_form_with_labels(
        &mut self,
        id: FormId,
        labels: Vec<String>,
    ) -> Result<FormId, FormError> {
        self.forms.register_with_labels(id, labels)
    }

    /// The registered form called `name`.
    pub fn form(&self, name: &str) -> Option<FormId> {
        self.forms.lookup(name)
    }

    /// Registers a named denotator.
    ///
    /// Registering a structurally equal denotator under a taken name is a
    /// no-op; a different one is rejected.
    pub fn register_denotator(&mut self, denotator: Denotator) -> Result<(), DenotatorError> {
        let name = denotator.name().ok_or(DenotatorError::Unnamed)?.to_owned();
        denotator.validate(&self.forms)?;
        if let Some(existing) = self.denotators.get(&name) {
            if existing.equals(&denotator, &self.forms) {
                return Ok(());
            }
            return Err(DenotatorError::DuplicateName(name));
        }
        trace!(denotator = %name, "registered denotator");
        self.denotators.insert(name, denotator);
        Ok(())
    }

    /// The registered denotator called `name`.
    pub fn denotator(&self, name: &str) -> Option<&Denotator> {
        self.denotators.get(name)
    }

    /// Registered denotators, by name.
    pub fn denotators(&self) -> impl Iterator<Item = (&str, &Denotator)> {
        self.denotators.iter().map(|(name, d)| (name.as_str(), d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Module, ModuleElement};

    #[test]
    fn denotators_register_by_name() {
        let mut repo = Repository::new();
        let pitch = repo.forms_mut().simple("Pitch", Module::Z);
        repo.register_form(pitch).unwrap();
        assert_eq!(repo.form("Pitch"), Some(pitch));

        let c4 = Denotator::constant(repo.forms(), pitch, ModuleElement::Z(60))
            .unwrap()
            .named("c4");
        repo.register_denotator(c4.clone()).unwrap();
        repo.register_denotator(c4.clone()).unwrap();
        assert_eq!(repo.denotator("c4"), Some(&c4));

        let other = Denotator::constant(repo.forms(), pitch, ModuleElement::Z(61))
            .unwrap()
            .named("c4");
        assert_eq!(
            repo.register_denotator(other),
            Err(DenotatorError::DuplicateName("c4".into()))
        );
        assert_eq!(
            repo.register_denotator(c4.anonymous()),
            Err(DenotatorError::Unnamed)
        );
        assert_eq!(repo.denotators().count(), 1);
    }
}
