//! Node encodings of modules, elements, morphisms and maps.
//!
//! Layouts, by `type` tag:
//!
//! | node             | attributes / children                                  |
//! |------------------|--------------------------------------------------------|
//! | `ZnRing`         | `modulus`                                              |
//! | `ProductRing`    | `Module` children                                      |
//! | `ZElement`, `RElement`, `QElement` | `value` (`QElement` as `n/d`)        |
//! | `ZnElement`      | `value`, `modulus`                                     |
//! | `ProductElement` | `ModuleElement` children                               |
//! | `ConstantMorphism` | `Module`, `ModuleElement`                            |
//! | `IdentityMorphism` | `Module`                                             |
//! | `AffineMorphism` | `Module`, `ModuleElement` factor, `ModuleElement` shift |
//! | `EmbeddingMorphism` | `Module` domain, `Module` codomain                  |
//! | `CompositionMorphism` | `ModuleMorphism` outer, `ModuleMorphism` inner    |
//! | `ConstantMap`    | `ModuleElement`; the domain is the denotator address   |
//! | `MorphismMap`    | `ModuleMorphism`                                       |
//!
//! Any module, element or morphism node may instead carry only a `ref`
//! attribute naming a `DefineModule*` entry of the same document.

use super::node::{attrs, tags, Node};
use super::ReadError;
use crate::address::{element, module, morphism};
use crate::address::{Module, ModuleElement, ModuleMorphism};
use crate::dispatch::{LeafContext, TypeDispatcher};
use num_rational::Rational64;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Map tags.
pub mod map_tags {
    pub const CONSTANT: &str = "ConstantMap";
    pub const MORPHISM: &str = "MorphismMap";
}

/// Named leaf values of a document being written.
///
/// A value with a name is written as a `ref` node wherever it occurs nested.
#[derive(Debug, Clone, Default)]
pub struct LeafNames {
    pub(crate) modules: BTreeMap<Module, String>,
    pub(crate) elements: BTreeMap<ModuleElement, String>,
    pub(crate) morphisms: BTreeMap<ModuleMorphism, String>,
}

/// A module node, or a reference if `module` is named.
pub fn module_node(module: &Module, names: &LeafNames) -> Node {
    match names.modules.get(module) {
        Some(name) => Node::reference(tags::MODULE, name),
        None => module_body(module, names),
    }
}

/// The full encoding of `module`; nested values may still be references.
pub fn module_body(module: &Module, names: &LeafNames) -> Node {
    let mut node = Node::new(tags::MODULE).with_attr(attrs::TYPE, module.tag());
    match module {
        Module::Zn(n) => node = node.with_attr(attrs::MODULUS, n.to_string()),
        Module::Product(factors) => {
            for factor in factors {
                node.push(module_node(factor, names));
            }
        }
        Module::Null | Module::Z | Module::Q | Module::R => {}
    }
    node
}

/// An element node, or a reference if `element` is named.
pub fn element_node(element: &ModuleElement, names: &LeafNames) -> Node {
    match names.elements.get(element) {
        Some(name) => Node::reference(tags::ELEMENT, name),
        None => element_body(element, names),
    }
}

/// The full encoding of `element`.
pub fn element_body(element: &ModuleElement, names: &LeafNames) -> Node {
    let node = Node::new(tags::ELEMENT).with_attr(attrs::TYPE, element.tag());
    match element {
        ModuleElement::Null => node,
        ModuleElement::Z(v) => node.with_attr(attrs::VALUE, v.to_string()),
        ModuleElement::Zn { value, modulus } => node
            .with_attr(attrs::VALUE, value.to_string())
            .with_attr(attrs::MODULUS, modulus.to_string()),
        ModuleElement::Q(q) => node.with_attr(attrs::VALUE, q.to_string()),
        // shortest representation that parses back to the same bits
        ModuleElement::R(r) => node.with_attr(attrs::VALUE, r.to_string()),
        ModuleElement::Product(xs) => xs
            .iter()
            .fold(node, |node, x| node.with_child(element_node(x, names))),
    }
}

/// A morphism node, or a reference if `morphism` is named.
pub fn morphism_node(morphism: &ModuleMorphism, names: &LeafNames) -> Node {
    match names.morphisms.get(morphism) {
        Some(name) => Node::reference(tags::MORPHISM, name),
        None => morphism_body(morphism, names),
    }
}

/// The full encoding of `morphism`.
pub fn morphism_body(morphism: &ModuleMorphism, names: &LeafNames) -> Node {
    let node = Node::new(tags::MORPHISM).with_attr(attrs::TYPE, morphism.tag());
    match morphism {
        ModuleMorphism::Constant { domain, value } => node
            .with_child(module_node(domain, names))
            .with_child(element_node(value, names)),
        ModuleMorphism::Identity(module) => node.with_child(module_node(module, names)),
        ModuleMorphism::Affine {
            ring,
            factor,
            shift,
        } => node
            .with_child(module_node(ring, names))
            .with_child(element_node(factor, names))
            .with_child(element_node(shift, names)),
        ModuleMorphism::Embedding { domain, codomain } => node
            .with_child(module_node(domain, names))
            .with_child(module_node(codomain, names)),
        ModuleMorphism::Composition(f, g) => node
            .with_child(morphism_node(f, names))
            .with_child(morphism_node(g, names)),
    }
}

/// The `Map` node of a simple coordinate over `address`.
pub fn map_node(morphism: &ModuleMorphism, address: &Module, names: &LeafNames) -> Node {
    match morphism {
        ModuleMorphism::Constant { domain, value } if domain == address => Node::new(tags::MAP)
            .with_attr(attrs::TYPE, map_tags::CONSTANT)
            .with_child(element_node(value, names)),
        _ => Node::new(tags::MAP)
            .with_attr(attrs::TYPE, map_tags::MORPHISM)
            .with_child(morphism_node(morphism, names)),
    }
}

/// Registers the decoders of every built-in tag.
pub fn register_builtins(dispatcher: &mut TypeDispatcher) {
    dispatcher
        .register_module(module::tags::NULL, |_, _| Some(Module::Null))
        .register_module(module::tags::Z, |_, _| Some(Module::Z))
        .register_module(module::tags::ZN, decode_zn_ring)
        .register_module(module::tags::Q, |_, _| Some(Module::Q))
        .register_module(module::tags::R, |_, _| Some(Module::R))
        .register_module(module::tags::PRODUCT, decode_product_ring);
    dispatcher
        .register_element(element::tags::NULL, |_, _| Some(ModuleElement::Null))
        .register_element(element::tags::Z, |node, ctx| {
            parsed_attr(node, attrs::VALUE, ctx).map(ModuleElement::Z)
        })
        .register_element(element::tags::ZN, decode_zn_element)
        .register_element(element::tags::Q, |node, ctx| {
            parsed_attr::<Rational64>(node, attrs::VALUE, ctx).map(ModuleElement::Q)
        })
        .register_element(element::tags::R, |node, ctx| {
            parsed_attr(node, attrs::VALUE, ctx).map(ModuleElement::R)
        })
        .register_element(element::tags::PRODUCT, decode_product_element);
    dispatcher
        .register_morphism(morphism::tags::CONSTANT, decode_constant)
        .register_morphism(morphism::tags::IDENTITY, decode_identity)
        .register_morphism(morphism::tags::AFFINE, decode_affine)
        .register_morphism(morphism::tags::EMBEDDING, decode_embedding)
        .register_morphism(morphism::tags::COMPOSITION, decode_composition);
    dispatcher
        .register_map(map_tags::CONSTANT, decode_constant_map)
        .register_map(map_tags::MORPHISM, decode_morphism_map);
}

fn malformed<T>(node: &Node, ctx: &mut dyn LeafContext, message: String) -> Option<T> {
    ctx.report(ReadError::Malformed {
        tag: node.tag.clone(),
        message,
    });
    None
}

fn parsed_attr<T>(node: &Node, key: &str, ctx: &mut dyn LeafContext) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = match node.require_attr(key) {
        Ok(raw) => raw,
        Err(error) => {
            ctx.report(error);
            return None;
        }
    };
    match raw.parse() {
        Ok(value) => Some(value),
        Err(error) => malformed(node, ctx, format!("bad {} '{}': {}", key, raw, error)),
    }
}

fn modulus(node: &Node, ctx: &mut dyn LeafContext) -> Option<u64> {
    match parsed_attr::<u64>(node, attrs::MODULUS, ctx)? {
        0 => malformed(node, ctx, "modulus must be positive".into()),
        n if n > Module::MAX_MODULUS => {
            malformed(node, ctx, format!("modulus {} exceeds {}", n, Module::MAX_MODULUS))
        }
        n => Some(n),
    }
}

/// The `i`-th child tagged `tag`.
fn nth<'a>(node: &'a Node, tag: &'a str, i: usize, ctx: &mut dyn LeafContext) -> Option<&'a Node> {
    match node.children_tagged(tag).nth(i) {
        Some(child) => Some(child),
        None => malformed(node, ctx, format!("missing {} child #{}", tag, i)),
    }
}

fn nth_module(node: &Node, i: usize, ctx: &mut dyn LeafContext) -> Option<Module> {
    let child = nth(node, tags::MODULE, i, ctx)?;
    ctx.module(child)
}

fn nth_element(node: &Node, i: usize, ctx: &mut dyn LeafContext) -> Option<ModuleElement> {
    let child = nth(node, tags::ELEMENT, i, ctx)?;
    ctx.element(child)
}

fn nth_morphism(node: &Node, i: usize, ctx: &mut dyn LeafContext) -> Option<ModuleMorphism> {
    let child = nth(node, tags::MORPHISM, i, ctx)?;
    ctx.morphism(child)
}

fn decode_zn_ring(node: &Node, ctx: &mut dyn LeafContext) -> Option<Module> {
    modulus(node, ctx).map(Module::Zn)
}

fn decode_product_ring(node: &Node, ctx: &mut dyn LeafContext) -> Option<Module> {
    // decode every factor so that all errors surface
    let factors: Vec<Option<Module>> = node
        .children_tagged(tags::MODULE)
        .map(|child| ctx.module(child))
        .collect();
    factors.into_iter().collect::<Option<Vec<_>>>().map(Module::Product)
}

fn decode_zn_element(node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleElement> {
    let value = parsed_attr::<i64>(node, attrs::VALUE, ctx)?;
    let modulus = modulus(node, ctx)?;
    Some(ModuleElement::zn(value, modulus))
}

fn decode_product_element(node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleElement> {
    let xs: Vec<Option<ModuleElement>> = node
        .children_tagged(tags::ELEMENT)
        .map(|child| ctx.element(child))
        .collect();
    xs.into_iter()
        .collect::<Option<Vec<_>>>()
        .map(ModuleElement::Product)
}

fn decode_constant(node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleMorphism> {
    let domain = nth_module(node, 0, ctx)?;
    let value = nth_element(node, 0, ctx)?;
    Some(ModuleMorphism::constant(domain, value))
}

fn decode_identity(node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleMorphism> {
    nth_module(node, 0, ctx).map(ModuleMorphism::Identity)
}

fn decode_affine(node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleMorphism> {
    let ring = nth_module(node, 0, ctx)?;
    let factor = nth_element(node, 0, ctx)?;
    let shift = nth_element(node, 1, ctx)?;
    match ModuleMorphism::affine(ring, factor, shift) {
        Ok(morphism) => Some(morphism),
        Err(error) => malformed(node, ctx, error.to_string()),
    }
}

fn decode_embedding(node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleMorphism> {
    let domain = nth_module(node, 0, ctx)?;
    let codomain = nth_module(node, 1, ctx)?;
    match ModuleMorphism::embedding(domain, codomain) {
        Ok(morphism) => Some(morphism),
        Err(error) => malformed(node, ctx, error.to_string()),
    }
}

fn decode_composition(node: &Node, ctx: &mut dyn LeafContext) -> Option<ModuleMorphism> {
    let f = nth_morphism(node, 0, ctx)?;
    let g = nth_morphism(node, 1, ctx)?;
    if f.domain() != g.codomain() {
        return malformed(
            node,
            ctx,
            format!("cannot compose {} after {}", f.domain(), g.codomain()),
        );
    }
    Some(ModuleMorphism::Composition(Box::new(f), Box::new(g)))
}

fn decode_constant_map(
    node: &Node,
    address: &Module,
    ctx: &mut dyn LeafContext,
) -> Option<ModuleMorphism> {
    let value = nth_element(node, 0, ctx)?;
    Some(ModuleMorphism::constant(address.clone(), value))
}

fn decode_morphism_map(
    node: &Node,
    _address: &Module,
    ctx: &mut dyn LeafContext,
) -> Option<ModuleMorphism> {
    nth_morphism(node, 0, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn no_names() -> LeafNames {
        LeafNames::default()
    }

    #[test]
    fn modules_decode_back() {
        let module = Module::Product(vec![Module::Z, Module::Zn(12), Module::R]);
        let node = module_node(&module, &no_names());
        assert_eq!(node.children.len(), 3);
        let mut ctx = Detached::default();
        assert_eq!(ctx.module(&node), Some(module));
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn element_values_are_textual() {
        let half = ModuleElement::q(1, 2).unwrap();
        assert_eq!(element_node(&half, &no_names()).attr(attrs::VALUE), Some("1/2"));
        let node = element_node(&ModuleElement::R(1.5), &no_names());
        assert_eq!(node.attr(attrs::VALUE), Some("1.5"));

        let mut ctx = Detached::default();
        for element in [
            half,
            ModuleElement::R(0.1),
            ModuleElement::R(f64::NEG_INFINITY),
            ModuleElement::zn(-1, 7),
            ModuleElement::Product(vec![ModuleElement::Z(60), ModuleElement::Null]),
        ] {
            let node = element_node(&element, &no_names());
            assert_eq!(ctx.element(&node), Some(element));
        }
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn bad_values_are_malformed() {
        let mut ctx = Detached::default();
        let node = Node::new(tags::ELEMENT)
            .with_attr(attrs::TYPE, element::tags::Q)
            .with_attr(attrs::VALUE, "1/0");
        assert_eq!(ctx.element(&node), None);
        let node = Node::new(tags::MODULE)
            .with_attr(attrs::TYPE, module::tags::ZN)
            .with_attr(attrs::MODULUS, "0");
        assert_eq!(ctx.module(&node), None);
        let node = Node::new(tags::ELEMENT)
            .with_attr(attrs::TYPE, element::tags::ZN)
            .with_attr(attrs::VALUE, "-1")
            .with_attr(attrs::MODULUS, u64::MAX.to_string());
        assert_eq!(ctx.element(&node), None);
        assert_eq!(ctx.errors.len(), 3);
        assert!(ctx
            .errors
            .iter()
            .all(|e| matches!(e, ReadError::Malformed { .. })));
    }

    #[test]
    fn morphisms_keep_their_shape() {
        let affine =
            ModuleMorphism::affine(Module::Z, ModuleElement::Z(2), ModuleElement::Z(1)).unwrap();
        let embed = ModuleMorphism::embedding(Module::Z, Module::R).unwrap();
        let composite = ModuleMorphism::Composition(Box::new(embed), Box::new(affine));
        let node = morphism_node(&composite, &no_names());
        let mut ctx = Detached::default();
        assert_eq!(ctx.morphism(&node), Some(composite));
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn ill_typed_composition_is_rejected() {
        let node = Node::new(tags::MORPHISM)
            .with_attr(attrs::TYPE, morphism::tags::COMPOSITION)
            .with_child(morphism_node(&ModuleMorphism::Identity(Module::R), &no_names()))
            .with_child(morphism_node(&ModuleMorphism::Identity(Module::Z), &no_names()));
        let mut ctx = Detached::default();
        assert_eq!(ctx.morphism(&node), None);
        assert!(matches!(ctx.errors[..], [ReadError::Malformed { .. }]));
    }

    #[test]
    fn constant_maps_take_the_address() {
        let value = ModuleMorphism::constant(Module::Null, ModuleElement::R(1.5));
        let node = map_node(&value, &Module::Null, &no_names());
        assert_eq!(node.attr(attrs::TYPE), Some(map_tags::CONSTANT));
        let mut ctx = Detached::default();
        let decoded = TypeDispatcher::global().decode_map(&node, &Module::Null, &mut ctx);
        assert_eq!(decoded, Some(value));

        let shifted = ModuleMorphism::translation(Module::Z, ModuleElement::Z(3)).unwrap();
        let node = map_node(&shifted, &Module::Z, &no_names());
        assert_eq!(node.attr(attrs::TYPE), Some(map_tags::MORPHISM));
    }

    #[test]
    fn named_values_become_references() {
        let mut names = LeafNames::default();
        names.modules.insert(Module::Zn(12), "PitchClass".into());
        let node = module_node(&Module::Product(vec![Module::Zn(12)]), &names);
        assert_eq!(node.children[0].reference_name(), Some("PitchClass"));
        assert_eq!(module_body(&Module::Zn(12), &names).reference_name(), None);
    }
}
