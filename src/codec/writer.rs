//! Document writer.
//!
//! Every form and named denotator is emitted once, after everything it
//! refers to, and is referred to by name afterwards. Two different values
//! under one name cannot both be written.

use super::leaf::{self, LeafNames};
use super::node::{attrs, tags, Node, VERSION};
use super::{CodecConfig, Format, SymbolKind, WriteError};
use crate::address::{Module, ModuleElement, ModuleMorphism};
use crate::arena::{FormArena, FormId};
use crate::denotator::{Coordinate, Denotator};
use crate::form::FormBody;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use tracing::trace;

/// Accumulates a document over the forms of one arena.
#[derive(Debug)]
pub struct Writer<'a> {
    forms: &'a FormArena,
    config: CodecConfig,
    root: Node,
    emitted_forms: BTreeMap<String, FormId>,
    emitted_denotators: BTreeMap<String, Denotator>,
    leaf_names: LeafNames,
    defined: BTreeSet<(SymbolKind, String)>,
}

impl<'a> Writer<'a> {
    pub fn new(forms: &'a FormArena) -> Self {
        Self::with_config(forms, CodecConfig::default())
    }

    pub fn with_config(forms: &'a FormArena, config: CodecConfig) -> Self {
        Self {
            forms,
            config,
            root: Node::new(tags::DOCUMENT).with_attr(attrs::VERSION, VERSION),
            emitted_forms: BTreeMap::new(),
            emitted_denotators: BTreeMap::new(),
            leaf_names: LeafNames::default(),
            defined: BTreeSet::new(),
        }
    }

    /// Writes `id` after all forms it depends on.
    pub fn write_form(&mut self, id: FormId) -> Result<(), WriteError> {
        let mut order = Vec::new();
        self.forms.dependencies(id, &mut order);
        for form in order {
            self.emit_form(form)?;
        }
        Ok(())
    }

    /// Writes `denotator` after its forms and its named sub-denotators.
    ///
    /// An anonymous denotator is written inline at the top level each time it
    /// is passed in.
    pub fn write_denotator(&mut self, denotator: &Denotator) -> Result<(), WriteError> {
        let mut forms = Vec::new();
        denotator.form_dependencies(self.forms, &mut forms);
        for form in forms {
            self.emit_form(form)?;
        }
        let mut named = Vec::new();
        denotator.dependencies(&mut named);
        for dependency in &named {
            self.emit_named(dependency)?;
        }
        if denotator.name().is_none() {
            let node = self.denotator_node(denotator, true)?;
            self.root.push(node);
        }
        Ok(())
    }

    /// Defines a named module; equal modules written later become references.
    pub fn define_module(&mut self, name: &str, module: &Module) -> Result<(), WriteError> {
        self.claim(SymbolKind::Module, name)?;
        let body = leaf::module_body(module, &self.leaf_names);
        self.root
            .push(Node::new(tags::DEFINE_MODULE).with_attr(attrs::NAME, name).with_child(body));
        self.leaf_names.modules.insert(module.clone(), name.to_owned());
        Ok(())
    }

    /// Defines a named module element.
    pub fn define_element(&mut self, name: &str, element: &ModuleElement) -> Result<(), WriteError> {
        self.claim(SymbolKind::Element, name)?;
        let body = leaf::element_body(element, &self.leaf_names);
        self.root
            .push(Node::new(tags::DEFINE_ELEMENT).with_attr(attrs::NAME, name).with_child(body));
        self.leaf_names.elements.insert(element.clone(), name.to_owned());
        Ok(())
    }

    /// Defines a named module morphism.
    pub fn define_morphism(
        &mut self,
        name: &str,
        morphism: &ModuleMorphism,
    ) -> Result<(), WriteError> {
        self.claim(SymbolKind::Morphism, name)?;
        let body = leaf::morphism_body(morphism, &self.leaf_names);
        self.root
            .push(Node::new(tags::DEFINE_MORPHISM).with_attr(attrs::NAME, name).with_child(body));
        self.leaf_names.morphisms.insert(morphism.clone(), name.to_owned());
        Ok(())
    }

    fn claim(&mut self, kind: SymbolKind, name: &str) -> Result<(), WriteError> {
        if self.defined.insert((kind, name.to_owned())) {
            Ok(())
        } else {
            Err(WriteError::NameClash {
                kind,
                name: name.to_owned(),
            })
        }
    }

    fn emit_form(&mut self, id: FormId) -> Result<(), WriteError> {
        let data = self.forms.get(id).ok_or(WriteError::UnknownForm(id))?;
        let name = data.name();
        if let Some(&existing) = self.emitted_forms.get(name) {
            if existing == id || self.forms.form_eq(existing, id) {
                return Ok(());
            }
            return Err(WriteError::NameClash {
                kind: SymbolKind::Form,
                name: name.to_owned(),
            });
        }

        let mut node = Node::new(tags::FORM)
            .with_attr(attrs::NAME, name)
            .with_attr(attrs::TYPE, data.kind().as_str());
        match data.body() {
            FormBody::Simple(module) => node.push(leaf::module_node(module, &self.leaf_names)),
            body => {
                for &sub in body.sub_forms() {
                    let sub_name = self.forms.name(sub).ok_or(WriteError::UnknownForm(sub))?;
                    node.push(Node::reference(tags::FORM, sub_name));
                }
            }
        }
        if let Some(labels) = data.labels() {
            let mut list = Node::new(tags::LABELS);
            for label in labels.iter() {
                list.push(Node::new(tags::LABEL).with_attr(attrs::NAME, label));
            }
            node.push(list);
        }

        trace!(form = %name, "emitted form");
        self.emitted_forms.insert(name.to_owned(), id);
        self.root.push(node);
        Ok(())
    }

    fn emit_named(&mut self, denotator: &Denotator) -> Result<(), WriteError> {
        let name = match denotator.name() {
            Some(name) => name,
            None => return Ok(()),
        };
        if let Some(existing) = self.emitted_denotators.get(name) {
            if existing == denotator || existing.equals(denotator, self.forms) {
                return Ok(());
            }
            return Err(WriteError::NameClash {
                kind: SymbolKind::Denotator,
                name: name.to_owned(),
            });
        }
        let node = self.denotator_node(denotator, true)?;
        trace!(denotator = %name, "emitted denotator");
        self.emitted_denotators
            .insert(name.to_owned(), denotator.clone());
        self.root.push(node);
        Ok(())
    }

    /// The node of `denotator`; named factors below the top become references.
    fn denotator_node(&self, denotator: &Denotator, top: bool) -> Result<Node, WriteError> {
        if !top {
            if let Some(name) = denotator.name() {
                return Ok(Node::reference(tags::DENOTATOR, name));
            }
        }
        let form = self
            .forms
            .name(denotator.form())
            .ok_or(WriteError::UnknownForm(denotator.form()))?;
        let mut node = Node::new(tags::DENOTATOR)
            .with_attr(attrs::TYPE, denotator.kind().as_str())
            .with_attr(attrs::FORM, form);
        if let Some(name) = denotator.name() {
            node = node.with_attr(attrs::NAME, name);
        }
        let address = denotator.address();
        if !address.is_null() {
            node.push(
                Node::new(tags::ADDRESS).with_child(leaf::module_node(address, &self.leaf_names)),
            );
        }
        match denotator.coordinate() {
            Coordinate::Simple(morphism) => {
                node.push(leaf::map_node(morphism, address, &self.leaf_names))
            }
            Coordinate::Colimit { index, factor } => {
                node = node.with_attr(attrs::INDEX, index.to_string());
                node.push(self.denotator_node(factor, false)?);
            }
            Coordinate::Limit(factors) | Coordinate::Power(factors) | Coordinate::List(factors) => {
                for factor in factors {
                    node.push(self.denotator_node(factor, false)?);
                }
            }
        }
        Ok(node)
    }

    /// The document written so far.
    pub fn node(&self) -> &Node {
        &self.root
    }

    pub fn into_node(self) -> Node {
        self.root
    }

    /// Serializes the document to `out` in the configured format.
    pub fn finish<W: io::Write>(self, out: W) -> Result<(), WriteError> {
        match self.config.format {
            Format::Json if self.config.pretty => serde_json::to_writer_pretty(out, &self.root)
                .map_err(|e| WriteError::Serialize(e.to_string())),
            Format::Json => serde_json::to_writer(out, &self.root)
                .map_err(|e| WriteError::Serialize(e.to_string())),
            Format::Cbor => serde_cbor::to_writer(out, &self.root)
                .map_err(|e| WriteError::Serialize(e.to_string())),
        }
    }

    /// The document as JSON text, pretty unless configured otherwise.
    pub fn into_json(self) -> Result<String, WriteError> {
        self.root
            .to_json(self.config.pretty)
            .map_err(|e| WriteError::Serialize(e.to_string()))
    }
}
