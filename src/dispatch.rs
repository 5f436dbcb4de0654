//! Type-tag dispatch for polymorphic leaf values.
//!
//! The persisted format names the concrete variant of every address-algebra
//! value by a `type` attribute. [`TypeDispatcher`] maps those tags to decode
//! functions, one table per family. The tables are filled once, before any
//! decoding starts, and are read-only afterwards; [`TypeDispatcher::global`]
//! holds the process-wide instance with the built-in decoders.
//!
//! An unknown tag is not an error of the dispatcher itself: the lookup reports
//! [`ReadError::UnknownTypeTag`] to the decoding context and yields `None`, so
//! the caller can carry on with the rest of an untrusted document.

use crate::address::{Module, ModuleElement, ModuleMorphism};
use crate::codec::node::{attrs, Node};
use crate::codec::{leaf, ReadError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Polymorphic families of the persisted format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Form,
    Denotator,
    Module,
    Element,
    Morphism,
    /// Coordinates of `Simple` denotators.
    Map,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Form => "form",
            Family::Denotator => "denotator",
            Family::Module => "module",
            Family::Element => "module element",
            Family::Morphism => "module morphism",
            Family::Map => "map",
        };
        f.write_str(name)
    }
}

/// What a decoder can ask of the document it is decoding.
///
/// Nested values go back through the context, so that `ref` nodes resolve
/// against the document's definitions.
pub trait LeafContext {
    /// Decodes a nested module node.
    fn module(&mut self, node: &Node) -> Option<Module>;
    /// Decodes a nested element node.
    fn element(&mut self, node: &Node) -> Option<ModuleElement>;
    /// Decodes a nested morphism node.
    fn morphism(&mut self, node: &Node) -> Option<ModuleMorphism>;
    /// Records a decode error.
    fn report(&mut self, error: ReadError);
}

pub type ModuleDecoder = fn(&Node, &mut dyn LeafContext) -> Option<Module>;
pub type ElementDecoder = fn(&Node, &mut dyn LeafContext) -> Option<ModuleElement>;
pub type MorphismDecoder = fn(&Node, &mut dyn LeafContext) -> Option<ModuleMorphism>;
/// Decodes the coordinate of a `Simple` denotator over the given address.
pub type MapDecoder = fn(&Node, &Module, &mut dyn LeafContext) -> Option<ModuleMorphism>;

/// Tag → decoder tables for the four leaf families.
#[derive(Debug, Clone, Default)]
pub struct TypeDispatcher {
    modules: BTreeMap<String, ModuleDecoder>,
    elements: BTreeMap<String, ElementDecoder>,
    morphisms: BTreeMap<String, MorphismDecoder>,
    maps: BTreeMap<String, MapDecoder>,
}

impl TypeDispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher with every built-in decoder registered.
    pub fn with_builtins() -> Self {
        let mut dispatcher = Self::new();
        leaf::register_builtins(&mut dispatcher);
        dispatcher
    }

    /// The process-wide dispatcher, built on first use.
    pub fn global() -> &'static TypeDispatcher {
        static GLOBAL: OnceLock<TypeDispatcher> = OnceLock::new();
        GLOBAL.get_or_init(TypeDispatcher::with_builtins)
    }

    pub fn register_module(&mut self, tag: impl Into<String>, decoder: ModuleDecoder) -> &mut Self {
        self.modules.insert(tag.into(), decoder);
        self
    }

    pub fn register_element(&mut self, tag: impl Into<String>, decoder: ElementDecoder) -> &mut Self {
        self.elements.insert(tag.into(), decoder);
        self
    }

    pub fn register_morphism(
        &mut self,
        tag: impl Into<String>,
        decoder: MorphismDecoder,
    ) -> &mut Self {
        self.morphisms.insert(tag.into(), decoder);
        self
    }

    pub fn register_map(&mut self, tag: impl Into<String>, decoder: MapDecoder) -> &mut Self {
        self.maps.insert(tag.into(), decoder);
        self
    }

    pub fn module_decoder(&self, tag: &str) -> Option<ModuleDecoder> {
        self.modules.get(tag).copied()
    }

    pub fn element_decoder(&self, tag: &str) -> Option<ElementDecoder> {
        self.elements.get(tag).copied()
    }

    pub fn morphism_decoder(&self, tag: &str) -> Option<MorphismDecoder> {
        self.morphisms.get(tag).copied()
    }

    pub fn map_decoder(&self, tag: &str) -> Option<MapDecoder> {
        self.maps.get(tag).copied()
    }

    /// Registered tags of `family`, sorted.
    pub fn tags(&self, family: Family) -> Vec<&str> {
        match family {
            Family::Module => self.modules.keys().map(String::as_str).collect(),
            Family::Element => self.elements.keys().map(String::as_str).collect(),
            Family::Morphism => self.morphisms.keys().map(String::as_str).collect(),
            Family::Map => self.maps.keys().map(String::as_str).collect(),
            Family::Form | Family::Denotator => Vec::new(),
        }
    }

    /// Decodes a module node by its `type` tag.
    pub fn decode_module(&self, node: &Node, ctx: &mut dyn LeafContext) -> Option<Module> {
        let decoder = lookup(node, Family::Module, ctx, |tag| self.module_decoder(tag))?;
        decoder(node, ctx)
    }

    /// Decodes an element node by its `type` tag.
    pub fn decode_element(&self, node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleElement> {
        let decoder = lookup(node, Family::Element, ctx, |tag| self.element_decoder(tag))?;
        decoder(node, ctx)
    }

    /// Decodes a morphism node by its `type` tag.
    pub fn decode_morphism(&self, node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleMorphism> {
        let decoder = lookup(node, Family::Morphism, ctx, |tag| self.morphism_decoder(tag))?;
        decoder(node, ctx)
    }

    /// Decodes a map node over `address` by its `type` tag.
    pub fn decode_map(
        &self,
        node: &Node,
        address: &Module,
        ctx: &mut dyn LeafContext,
    ) -> Option<ModuleMorphism> {
        let decoder = lookup(node, Family::Map, ctx, |tag| self.map_decoder(tag))?;
        decoder(node, address, ctx)
    }
}

fn lookup<F>(
    node: &Node,
    family: Family,
    ctx: &mut dyn LeafContext,
    find: impl FnOnce(&str) -> Option<F>,
) -> Option<F> {
    let tag = match node.require_attr(attrs::TYPE) {
        Ok(tag) => tag,
        Err(error) => {
            ctx.report(error);
            return None;
        }
    };
    let decoder = find(tag);
    if decoder.is_none() {
        ctx.report(ReadError::UnknownTypeTag {
            family,
            tag: tag.to_owned(),
        });
    }
    decoder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::module::tags as module_tags;
    use crate::codec::node::tags;

    /// Context that decodes nested values through the global dispatcher and
    /// has no named definitions.
    #[derive(Default)]
    struct Detached {
        errors: Vec<ReadError>,
    }

    impl LeafContext for Detached {
        fn module(&mut self, node: &Node) -> Option<Module> {
            TypeDispatcher::global().decode_module(node, self)
        }
        fn element(&mut self, node: &Node) -> Option<ModuleElement> {
            TypeDispatcher::global().decode_element(node, self)
        }
        fn morphism(&mut self, node: &Node) -> Option<ModuleMorphism> {
            TypeDispatcher::global().decode_morphism(node, self)
        }
        fn report(&mut self, error: ReadError) {
            self.errors.push(error);
        }
    }

    #[test]
    fn global_has_builtins() {
        let global = TypeDispatcher::global();
        assert!(global.module_decoder(module_tags::Z).is_some());
        assert!(global.tags(Family::Element).contains(&"RElement"));
        assert!(global.tags(Family::Map).contains(&"ConstantMap"));
        assert!(std::ptr::eq(global, TypeDispatcher::global()));
    }

    #[test]
    fn unknown_tags_are_reported() {
        let mut ctx = Detached::default();
        let node = Node::new(tags::MODULE).with_attr(attrs::TYPE, "HRing");
        assert!(TypeDispatcher::global().decode_module(&node, &mut ctx).is_none());
        assert_eq!(
            ctx.errors,
            vec![ReadError::UnknownTypeTag {
                family: Family::Module,
                tag: "HRing".into()
            }]
        );
    }

    #[test]
    fn missing_type_is_malformed() {
        let mut ctx = Detached::default();
        let node = Node::new(tags::ELEMENT);
        assert!(TypeDispatcher::global().decode_element(&node, &mut ctx).is_none());
        assert!(matches!(ctx.errors[..], [ReadError::Malformed { .. }]));
    }

    #[test]
    fn custom_tables_are_independent() {
        fn always_z(_: &Node, _: &mut dyn LeafContext) -> Option<Module> {
            Some(Module::Z)
        }
        let mut dispatcher = TypeDispatcher::new();
        dispatcher.register_module("Integers", always_z);
        let mut ctx = Detached::default();
        let node = Node::new(tags::MODULE).with_attr(attrs::TYPE, "Integers");
        assert_eq!(dispatcher.decode_module(&node, &mut ctx), Some(Module::Z));
        assert!(dispatcher.tags(Family::Element).is_empty());
        assert!(TypeDispatcher::global().module_decoder("Integers").is_none());
    }
}
