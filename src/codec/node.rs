//! The tagged-node tree underlying the persisted format.
//!
//! A document is a tree of [`Node`]s. Every node has a tag, string attributes
//! and ordered children. The tree is stored as JSON text or as CBOR bytes; both
//! are straight serde renderings of the same structure.
//!
//! ```json
//! { "tag": "Form", "attrs": { "name": "Pitch", "type": "Simple" },
//!   "children": [ { "tag": "Module", "attrs": { "type": "ZRing" } } ] }
//! ```

use super::ReadError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node tags.
pub mod tags {
    pub const DOCUMENT: &str = "Document";
    pub const FORM: &str = "Form";
    /// Accepted on input as a synonym of [`FORM`].
    pub const DEFINE_FORM: &str = "DefineForm";
    pub const DENOTATOR: &str = "Denotator";
    pub const MODULE: &str = "Module";
    pub const ELEMENT: &str = "ModuleElement";
    pub const MORPHISM: &str = "ModuleMorphism";
    pub const MAP: &str = "Map";
    pub const DEFINE_MODULE: &str = "DefineModule";
    pub const DEFINE_ELEMENT: &str = "DefineModuleElement";
    pub const DEFINE_MORPHISM: &str = "DefineModuleMorphism";
    pub const LABELS: &str = "Labels";
    pub const LABEL: &str = "Label";
    pub const ADDRESS: &str = "Address";
}

/// Attribute names.
pub mod attrs {
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const REF: &str = "ref";
    pub const FORM: &str = "form";
    pub const INDEX: &str = "index";
    pub const VALUE: &str = "value";
    pub const MODULUS: &str = "modulus";
    pub const VERSION: &str = "version";
}

/// Current document version.
pub const VERSION: &str = "1";

/// A tagged node with attributes and children.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Node {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    /// A node with no attributes or children.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// A `ref`-only node pointing at the definition `name`.
    pub fn reference(tag: &str, name: &str) -> Self {
        Self::new(tag).with_attr(attrs::REF, name)
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attrs.insert(key.to_owned(), value.into());
        self
    }

    /// Builder-style child appender.
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Appends a child.
    pub fn push(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Attribute value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Attribute value, or a `Malformed` error naming the missing attribute.
    pub fn require_attr(&self, key: &str) -> Result<&str, ReadError> {
        self.attr(key).ok_or_else(|| ReadError::Malformed {
            tag: self.tag.clone(),
            message: format!("missing attribute '{}'", key),
        })
    }

    /// The `ref` attribute, if this node is a reference.
    pub fn reference_name(&self) -> Option<&str> {
        self.attr(attrs::REF)
    }

    /// First child with `tag`.
    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.tag == tag)
    }

    /// All children with `tag`, in order.
    pub fn children_tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |child| child.tag == tag)
    }

    /// Whether this is a form node (`Form` or `DefineForm`).
    pub fn is_form(&self) -> bool {
        self.tag == tags::FORM || self.tag == tags::DEFINE_FORM
    }

    /// Renders the tree as JSON.
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }

    /// Parses a tree from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serializes the tree to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>, serde_cbor::Error> {
        serde_cbor::to_vec(self)
    }

    /// Deserializes a tree from CBOR bytes.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, serde_cbor::Error> {
        serde_cbor::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        Node::new(tags::FORM)
            .with_attr(attrs::NAME, "Pitch")
            .with_attr(attrs::TYPE, "Simple")
            .with_child(Node::new(tags::MODULE).with_attr(attrs::TYPE, "ZRing"))
    }

    #[test]
    fn json_omits_empty_fields() {
        let text = Node::new(tags::DOCUMENT).to_json(false).unwrap();
        assert_eq!(text, r#"{"tag":"Document"}"#);
        let parsed = Node::from_json(&sample().to_json(true).unwrap()).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn cbor_snapshot() {
        let bytes = sample().to_cbor().unwrap();
        assert_eq!(Node::from_cbor(&bytes).unwrap(), sample());
    }

    #[test]
    fn attribute_helpers() {
        let node = sample();
        assert_eq!(node.attr(attrs::NAME), Some("Pitch"));
        assert!(node.reference_name().is_none());
        assert!(node.is_form());
        assert!(matches!(
            node.require_attr(attrs::INDEX),
            Err(ReadError::Malformed { .. })
        ));
        assert_eq!(node.children_tagged(tags::MODULE).count(), 1);
        assert_eq!(Node::reference(tags::FORM, "Note").reference_name(), Some("Note"));
    }
}
