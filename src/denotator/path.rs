//! Path-addressed navigation and spine-rebuilding updates.
//!
//! A path is a sequence of factor indices describing a descent through the
//! factor tree. At a `Colimit` node the index must name the active variant,
//! except at the last step of [`Denotator::replace`], which may select a
//! different one.

use super::{expect_form, fit_factor, normalise, Coordinate, Denotator, DenotatorError};
use crate::address::{MappingError, ModuleMorphism};
use crate::arena::FormArena;
use crate::form::FormKind;
use thiserror::Error;

/// A path that does not fit the shape of the tree it is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("index {index} out of range at depth {depth} (length {len})")]
    IndexOutOfRange {
        depth: usize,
        index: usize,
        len: usize,
    },
    #[error("variant {requested} is not active at depth {depth} (active: {active})")]
    InactiveVariant {
        depth: usize,
        requested: usize,
        active: usize,
    },
    #[error("path continues past a simple denotator at depth {depth}")]
    PastLeaf { depth: usize },
    #[error("path does not end at a simple denotator (depth {depth})")]
    NotSimple { depth: usize },
    #[error("unknown label '{0}'")]
    UnknownLabel(String),
}

impl PathError {
    /// The same error, reported at `depth`.
    pub fn at_depth(self, depth: usize) -> Self {
        match self {
            PathError::IndexOutOfRange { index, len, .. } => {
                PathError::IndexOutOfRange { depth, index, len }
            }
            PathError::InactiveVariant {
                requested, active, ..
            } => PathError::InactiveVariant {
                depth,
                requested,
                active,
            },
            PathError::PastLeaf { .. } => PathError::PastLeaf { depth },
            PathError::NotSimple { .. } => PathError::NotSimple { depth },
            other => other,
        }
    }
}

impl Denotator {
    fn step(&self, index: usize, depth: usize) -> Result<&Denotator, PathError> {
        match &self.0.coordinate {
            Coordinate::Simple(_) => Err(PathError::PastLeaf { depth }),
            Coordinate::Colimit {
                index: active,
                factor,
            } => {
                if index == *active {
                    Ok(factor)
                } else {
                    Err(PathError::InactiveVariant {
                        depth,
                        requested: index,
                        active: *active,
                    })
                }
            }
            Coordinate::Limit(factors) | Coordinate::Power(factors) | Coordinate::List(factors) => {
                factors.get(index).ok_or(PathError::IndexOutOfRange {
                    depth,
                    index,
                    len: factors.len(),
                })
            }
        }
    }

    /// The sub-denotator reached by following `path`.
    pub fn get(&self, path: &[usize]) -> Result<&Denotator, PathError> {
        let mut node = self;
        for (depth, index) in path.iter().enumerate() {
            node = node.step(*index, depth)?;
        }
        Ok(node)
    }

    /// Like [`get`](Self::get), with sub-form labels instead of indices.
    ///
    /// `Power` and `List` nodes take the position as their label.
    pub fn get_labeled(&self, forms: &FormArena, labels: &[&str]) -> Result<&Denotator, PathError> {
        let mut node = self;
        for (depth, label) in labels.iter().enumerate() {
            let index = match node.kind() {
                FormKind::Power | FormKind::List => label.parse::<usize>().ok(),
                _ => forms.label_index(node.form(), label),
            }
            .ok_or_else(|| PathError::UnknownLabel((*label).to_owned()))?;
            node = node.step(index, depth)?;
        }
        Ok(node)
    }

    /// A new tree with the node at `path` replaced by `new`.
    ///
    /// `new` must have the form expected at that position. If its address
    /// differs from the surrounding one it is moved there with
    /// [`change_address`](Self::change_address). Only the spine from the
    /// root to `path` is rebuilt.
    pub fn replace(
        &self,
        forms: &FormArena,
        path: &[usize],
        new: Denotator,
    ) -> Result<Denotator, DenotatorError> {
        if path.is_empty() {
            expect_form(forms, self.form(), &new)?;
            return Ok(new);
        }
        self.replace_at(forms, path, 0, new)
    }

    fn replace_at(
        &self,
        forms: &FormArena,
        path: &[usize],
        depth: usize,
        new: Denotator,
    ) -> Result<Denotator, DenotatorError> {
        let (step, rest) = match path.split_first() {
            Some((step, rest)) => (*step, rest),
            None => return Ok(new),
        };
        let data = forms
            .get(self.form())
            .ok_or(DenotatorError::UnknownForm(self.form()))?;
        let leaf = |new: Denotator| -> Result<Denotator, DenotatorError> {
            let expected = data.form_at(step).map_err(|e| e.at_depth(depth))?;
            expect_form(forms, expected, &new)?;
            Ok(new)
        };

        let coordinate = &self.0.coordinate;
        let (child, address) = match coordinate {
            Coordinate::Simple(_) => return Err(PathError::PastLeaf { depth }.into()),
            Coordinate::Colimit { .. } if rest.is_empty() => {
                fit_factor(forms, self.address(), leaf(new)?)?
            }
            _ => {
                let current = self.step(step, depth)?;
                let child = if rest.is_empty() {
                    leaf(new)?
                } else {
                    current.replace_at(forms, rest, depth + 1, new)?
                };
                fit_factor(forms, self.address(), child)?
            }
        };

        let coordinate = match coordinate {
            Coordinate::Colimit { .. } => Coordinate::Colimit {
                index: step,
                factor: child,
            },
            Coordinate::Limit(factors) | Coordinate::Power(factors) | Coordinate::List(factors) => {
                let mut factors = factors.clone();
                factors[step] = child;
                match coordinate {
                    Coordinate::Limit(_) => Coordinate::Limit(factors),
                    Coordinate::Power(_) => {
                        normalise(&mut factors);
                        Coordinate::Power(factors)
                    }
                    _ => Coordinate::List(factors),
                }
            }
            Coordinate::Simple(_) => return Err(PathError::PastLeaf { depth }.into()),
        };
        Ok(Denotator::from_parts_unchecked(
            forms,
            self.form(),
            self.0.name.clone(),
            address,
            coordinate,
        ))
    }

    /// Applies `morphism` to the `Simple` denotator at `path`.
    ///
    /// `morphism` must be an endomorphism of the form's module; the new
    /// coordinate is `morphism ∘ coordinate`.
    pub fn map(
        &self,
        forms: &FormArena,
        path: &[usize],
        morphism: &ModuleMorphism,
    ) -> Result<Denotator, DenotatorError> {
        let target = self.get(path)?;
        let current = target.morphism().ok_or(PathError::NotSimple { depth: path.len() })?;
        let module = current.codomain();
        if morphism.domain() != module || morphism.codomain() != module {
            return Err(MappingError::NotComposable {
                codomain: module,
                domain: morphism.domain(),
            }
            .into());
        }
        let mapped = Denotator::from_parts_unchecked(
            forms,
            target.form(),
            target.0.name.clone(),
            target.address().clone(),
            Coordinate::Simple(morphism.compose(current)?),
        );
        self.replace(forms, path, mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Module, ModuleElement};
    use crate::arena::FormId;

    struct Fixture {
        forms: FormArena,
        onset: FormId,
        pitch: FormId,
        note: FormId,
        either: FormId,
        voice: FormId,
    }

    fn fixture() -> Fixture {
        let mut forms = FormArena::new();
        let onset = forms.simple("Onset", Module::R);
        let pitch = forms.simple("Pitch", Module::Z);
        let note = crate::form::FormBuilder::limit("Note")
            .labeled("onset", onset)
            .labeled("pitch", pitch)
            .build(&mut forms)
            .unwrap();
        let either = forms.colimit("Either", vec![onset, note]).unwrap();
        let voice = forms.limit("Voice", vec![pitch, note, either]).unwrap();
        Fixture {
            forms,
            onset,
            pitch,
            note,
            either,
            voice,
        }
    }

    fn onset(fx: &Fixture, v: f64) -> Denotator {
        Denotator::constant(&fx.forms, fx.onset, ModuleElement::R(v)).unwrap()
    }

    fn pitch(fx: &Fixture, v: i64) -> Denotator {
        Denotator::constant(&fx.forms, fx.pitch, ModuleElement::Z(v)).unwrap()
    }

    fn note(fx: &Fixture, o: f64, p: i64) -> Denotator {
        Denotator::limit(&fx.forms, fx.note, vec![onset(fx, o), pitch(fx, p)]).unwrap()
    }

    fn voice(fx: &Fixture) -> Denotator {
        let either = Denotator::colimit(&fx.forms, fx.either, 0, onset(fx, 4.0)).unwrap();
        Denotator::limit(
            &fx.forms,
            fx.voice,
            vec![pitch(fx, 1), note(fx, 2.0, 60), either],
        )
        .unwrap()
    }

    #[test]
    fn get_follows_paths() {
        let fx = fixture();
        let v = voice(&fx);
        assert_eq!(v.get(&[]).unwrap(), &v);
        assert_eq!(v.get(&[1]).unwrap().form(), fx.note);
        assert_eq!(v.get(&[1, 1]).unwrap().element(), Some(ModuleElement::Z(60)));
        assert_eq!(v.get(&[2, 0]).unwrap().element(), Some(ModuleElement::R(4.0)));
        assert_eq!(
            v.get(&[5]),
            Err(PathError::IndexOutOfRange {
                depth: 0,
                index: 5,
                len: 3
            })
        );
        assert_eq!(v.get(&[0, 0]), Err(PathError::PastLeaf { depth: 1 }));
        assert_eq!(
            v.get(&[2, 1]),
            Err(PathError::InactiveVariant {
                depth: 1,
                requested: 1,
                active: 0
            })
        );
    }

    #[test]
    fn labels_translate_to_indices() {
        let fx = fixture();
        let v = voice(&fx);
        let p = v.get_labeled(&fx.forms, &["1", "pitch"]).unwrap();
        assert_eq!(p.element(), Some(ModuleElement::Z(60)));
        assert_eq!(
            v.get_labeled(&fx.forms, &["1", "velocity"]),
            Err(PathError::UnknownLabel("velocity".into()))
        );
    }

    #[test]
    fn replace_rebuilds_only_the_spine() {
        let fx = fixture();
        let v = voice(&fx);
        let replaced = v.replace(&fx.forms, &[1, 1], pitch(&fx, 62)).unwrap();
        assert_eq!(replaced.get(&[1, 1]).unwrap().element(), Some(ModuleElement::Z(62)));
        assert_eq!(v.get(&[1, 1]).unwrap().element(), Some(ModuleElement::Z(60)));
        // untouched siblings are shared
        assert!(replaced.get(&[0]).unwrap().ptr_eq(v.get(&[0]).unwrap()));
        assert!(replaced.get(&[1, 0]).unwrap().ptr_eq(v.get(&[1, 0]).unwrap()));
        assert!(replaced.check(&fx.forms));
    }

    #[test]
    fn replace_checks_forms() {
        let fx = fixture();
        let v = voice(&fx);
        let err = v.replace(&fx.forms, &[1, 1], onset(&fx, 0.0)).unwrap_err();
        assert!(matches!(err, DenotatorError::FormMismatch { .. }));
        let err = v.replace(&fx.forms, &[], note(&fx, 0.0, 0)).unwrap_err();
        assert!(matches!(err, DenotatorError::FormMismatch { .. }));
    }

    #[test]
    fn replace_can_switch_colimit_variant() {
        let fx = fixture();
        let v = voice(&fx);
        let switched = v.replace(&fx.forms, &[2, 1], note(&fx, 3.0, 67)).unwrap();
        assert_eq!(switched.get(&[2]).unwrap().index(), Some(1));
        assert_eq!(
            switched.get(&[2, 1, 1]).unwrap().element(),
            Some(ModuleElement::Z(67))
        );
        // deeper steps must go through the active variant
        assert!(matches!(
            v.replace(&fx.forms, &[2, 1, 0], onset(&fx, 0.0)),
            Err(DenotatorError::Path(PathError::InactiveVariant { .. }))
        ));
    }

    #[test]
    fn replace_changes_address() {
        let fx = fixture();
        let o = Denotator::simple(&fx.forms, fx.onset, ModuleMorphism::Identity(Module::R)).unwrap();
        let n = Denotator::limit(&fx.forms, fx.note, vec![o, pitch(&fx, 60)]).unwrap();
        assert_eq!(n.address(), &Module::R);

        // Z-addressed pitch moves to R? No canonical morphism R -> Z exists.
        let over_z = Denotator::simple(&fx.forms, fx.pitch, ModuleMorphism::Identity(Module::Z)).unwrap();
        assert!(matches!(
            n.replace(&fx.forms, &[1], over_z),
            Err(DenotatorError::AddressMismatch { .. })
        ));

        // A constant parent adopts the address of the new factor.
        let constant = note(&fx, 0.0, 60);
        let over_z = Denotator::simple(&fx.forms, fx.pitch, ModuleMorphism::Identity(Module::Z)).unwrap();
        let adopted = constant.replace(&fx.forms, &[1], over_z).unwrap();
        assert_eq!(adopted.address(), &Module::Z);
        assert!(adopted.check(&fx.forms));
    }

    #[test]
    fn map_composes_at_the_leaf() {
        let fx = fixture();
        let v = voice(&fx);
        let transpose = ModuleMorphism::translation(Module::Z, ModuleElement::Z(12)).unwrap();
        let up = v.map(&fx.forms, &[1, 1], &transpose).unwrap();
        assert_eq!(up.get(&[1, 1]).unwrap().element(), Some(ModuleElement::Z(72)));
        assert!(matches!(
            v.map(&fx.forms, &[1], &transpose),
            Err(DenotatorError::Path(PathError::NotSimple { depth: 1 }))
        ));
        let stretch = ModuleMorphism::translation(Module::R, ModuleElement::R(1.0)).unwrap();
        assert!(matches!(
            v.map(&fx.forms, &[1, 1], &stretch),
            Err(DenotatorError::Mapping(_))
        ));
    }
}
