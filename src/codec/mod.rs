//! Persisted format for forms and denotators.
//!
//! A document is a [`Node`] tree rooted at a `Document` node whose children
//! define forms, denotators and named address values. References are by name
//! and may point forwards. [`Writer`] emits every dependency before its first
//! use; [`Reader`] collects all definitions before it resolves anything, so
//! the order of the document does not matter on input.
//!
//! Decoding untrusted input never panics. Every problem becomes a
//! [`ReadError`] in the [`ReadOutcome`], and whatever could be decoded is
//! still returned.

pub mod config;
pub mod leaf;
pub mod node;
mod reader;
mod writer;

pub use config::{CodecConfig, Format};
pub use node::Node;
pub use reader::{Document, ReadOutcome, Reader, ReaderState, SymbolTable};
pub use writer::Writer;

use crate::arena::{FormArena, FormId};
use crate::denotator::Denotator;
use crate::dispatch::Family;
use crate::repository::Repository;
use std::fmt;
use std::io;
use thiserror::Error;

/// Namespaces of named definitions in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolKind {
    Form,
    Denotator,
    Module,
    Element,
    Morphism,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Form => "form",
            SymbolKind::Denotator => "denotator",
            SymbolKind::Module => "module",
            SymbolKind::Element => "module element",
            SymbolKind::Morphism => "module morphism",
        };
        f.write_str(name)
    }
}

/// A problem found while reading a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("duplicate {kind} '{name}'")]
    DuplicateName { kind: SymbolKind, name: String },
    #[error("unresolved {kind} reference '{name}'")]
    UnresolvedReference { kind: SymbolKind, name: String },
    #[error("unknown {family} type '{tag}'")]
    UnknownTypeTag { family: Family, tag: String },
    #[error("malformed <{tag}>: {message}")]
    Malformed { tag: String, message: String },
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("{kind} '{name}' is defined in terms of itself")]
    Cyclic { kind: SymbolKind, name: String },
}

/// A problem found while writing a document.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("two different {kind}s are named '{name}'")]
    NameClash { kind: SymbolKind, name: String },
    #[error("unknown form {0}")]
    UnknownForm(FormId),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization failed: {0}")]
    Serialize(String),
}

/// Writes `forms` and `denotators`, with all their dependencies, to `out`.
pub fn encode<W: io::Write>(
    arena: &FormArena,
    forms: &[FormId],
    denotators: &[Denotator],
    out: W,
) -> Result<(), WriteError> {
    writer_for(arena, forms, denotators)?.finish(out)
}

/// Like [`encode`], returning pretty-printed JSON.
pub fn encode_to_string(
    arena: &FormArena,
    forms: &[FormId],
    denotators: &[Denotator],
) -> Result<String, WriteError> {
    writer_for(arena, forms, denotators)?.into_json()
}

fn writer_for<'a>(
    arena: &'a FormArena,
    forms: &[FormId],
    denotators: &[Denotator],
) -> Result<Writer<'a>, WriteError> {
    let mut writer = Writer::new(arena);
    for &id in forms {
        writer.write_form(id)?;
    }
    for denotator in denotators {
        writer.write_denotator(denotator)?;
    }
    Ok(writer)
}

/// Reads a JSON document into `repo` with the default settings.
pub fn decode<R: io::Read>(input: R, repo: &mut Repository) -> ReadOutcome {
    Reader::new().read(input, repo)
}

/// Reads a JSON document held in memory.
pub fn decode_str(text: &str, repo: &mut Repository) -> ReadOutcome {
    Reader::new().read_str(text, repo)
}
