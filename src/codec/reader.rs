//! Two-phase document reader.
//!
//! Phase one walks the tree once and files every definition by name: forms
//! (including inline sub-form definitions), named denotators and the
//! `DefineModule*` entries. Nothing is resolved yet, so references may point
//! forwards. Phase two checks every reference, builds the forms (declaring all
//! of them before defining any, which admits cycles), and then decodes
//! denotators on demand, memoising named ones.
//!
//! Errors never abort the read. A definition that cannot be built is dropped
//! together with everything that depends on it; all else is returned.

use super::node::{attrs, tags, Node, VERSION};
use super::{CodecConfig, Format, ReadError, SymbolKind};
use crate::address::{Module, ModuleElement, ModuleMorphism};
use crate::arena::FormId;
use crate::denotator::{Denotator, DenotatorError};
use crate::dispatch::{Family, LeafContext, TypeDispatcher};
use crate::form::{FormBody, FormKind};
use crate::repository::Repository;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::str::FromStr;
use tracing::{debug, warn};

/// Lifecycle of a [`Reader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderState {
    Idle,
    Parsing,
    ResolvingReferences,
    /// The last read finished without errors.
    Done,
    /// The last read reported at least one error.
    Failed,
}

/// Every named definition that decoded successfully.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub forms: BTreeMap<String, FormId>,
    pub denotators: BTreeMap<String, Denotator>,
    pub modules: BTreeMap<String, Module>,
    pub elements: BTreeMap<String, ModuleElement>,
    pub morphisms: BTreeMap<String, ModuleMorphism>,
}

/// The top-level content of a cleanly read document.
#[derive(Debug, Clone)]
pub struct Document {
    pub forms: Vec<FormId>,
    pub denotators: Vec<Denotator>,
}

/// Result of a read: whatever decoded, plus the errors.
#[derive(Debug, Clone, Default)]
pub struct ReadOutcome {
    /// Top-level forms, in document order.
    pub forms: Vec<FormId>,
    /// Top-level denotators, in document order.
    pub denotators: Vec<Denotator>,
    pub errors: Vec<ReadError>,
    /// Errors beyond `max_errors`, counted but not kept.
    pub suppressed: usize,
    pub symbols: SymbolTable,
}

impl ReadOutcome {
    fn failed(error: ReadError) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.suppressed == 0
    }

    /// The document if nothing went wrong, the errors otherwise.
    pub fn into_result(self) -> Result<Document, Vec<ReadError>> {
        if self.is_success() {
            Ok(Document {
                forms: self.forms,
                denotators: self.denotators,
            })
        } else {
            Err(self.errors)
        }
    }
}

/// Reads documents into a [`Repository`].
///
/// The forms of a document are built in the repository's arena, and they stay
/// there even when the read reports errors: the ids in a failed outcome's
/// symbol table remain valid for inspection. Nothing is registered by name
/// unless [`CodecConfig::register_decoded`] is set and the read is clean.
/// A form that fails validation, or depends on one that does, is dropped
/// before anything is declared, so a read never leaves a declared form
/// without a definition.
#[derive(Debug)]
pub struct Reader<'d> {
    dispatcher: &'d TypeDispatcher,
    config: CodecConfig,
    state: ReaderState,
}

impl Reader<'static> {
    /// A reader using the global dispatcher and default settings.
    pub fn new() -> Self {
        Self::with_dispatcher(TypeDispatcher::global())
    }
}

impl Default for Reader<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d> Reader<'d> {
    pub fn with_dispatcher(dispatcher: &'d TypeDispatcher) -> Self {
        Self {
            dispatcher,
            config: CodecConfig::default(),
            state: ReaderState::Idle,
        }
    }

    pub fn with_config(mut self, config: CodecConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Reads a document in the configured format.
    pub fn read<R: io::Read>(&mut self, input: R, repo: &mut Repository) -> ReadOutcome {
        self.set_state(ReaderState::Parsing);
        let parsed = match self.config.format {
            Format::Json => serde_json::from_reader(input).map_err(|e| e.to_string()),
            Format::Cbor => serde_cbor::from_reader(input).map_err(|e| e.to_string()),
        };
        self.read_parsed(parsed, repo)
    }

    /// Reads a JSON document held in memory, whatever the configured format.
    pub fn read_str(&mut self, text: &str, repo: &mut Repository) -> ReadOutcome {
        self.set_state(ReaderState::Parsing);
        let parsed = Node::from_json(text).map_err(|e| e.to_string());
        self.read_parsed(parsed, repo)
    }

    /// Reads an in-memory document in the configured format.
    pub fn read_bytes(&mut self, bytes: &[u8], repo: &mut Repository) -> ReadOutcome {
        self.set_state(ReaderState::Parsing);
        let parsed = match self.config.format {
            Format::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Format::Cbor => Node::from_cbor(bytes).map_err(|e| e.to_string()),
        };
        self.read_parsed(parsed, repo)
    }

    /// Reads an already parsed tree.
    pub fn read_node(&mut self, root: &Node, repo: &mut Repository) -> ReadOutcome {
        self.set_state(ReaderState::Parsing);
        let mut session = Session::new(self.dispatcher, self.config.clone());
        session.collect_document(root);
        self.set_state(ReaderState::ResolvingReferences);
        let outcome = session.resolve(repo);
        self.set_state(if outcome.is_success() {
            ReaderState::Done
        } else {
            ReaderState::Failed
        });
        debug!(
            forms = outcome.forms.len(),
            denotators = outcome.denotators.len(),
            errors = outcome.errors.len() + outcome.suppressed,
            "document read"
        );
        outcome
    }

    fn read_parsed(&mut self, parsed: Result<Node, String>, repo: &mut Repository) -> ReadOutcome {
        match parsed {
            Ok(root) => self.read_node(&root, repo),
            Err(message) => {
                warn!(%message, "document is not well-formed");
                self.set_state(ReaderState::Failed);
                ReadOutcome::failed(ReadError::Syntax(message))
            }
        }
    }

    fn set_state(&mut self, state: ReaderState) {
        debug!(from = ?self.state, to = ?state, "reader state");
        self.state = state;
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

enum Lazy<T> {
    Pending,
    InProgress,
    /// `None` if decoding failed.
    Done(Option<T>),
}

/// A named definition and its resolution state.
struct Def<'a, T> {
    node: &'a Node,
    state: Lazy<T>,
}

impl<'a, T> Def<'a, T> {
    fn new(node: &'a Node) -> Self {
        Self {
            node,
            state: Lazy::Pending,
        }
    }
}

struct FormDraft<'a> {
    name: &'a str,
    kind: FormKind,
    node: &'a Node,
    subs: Vec<&'a str>,
    labels: Option<Vec<String>>,
    valid: bool,
    id: Option<FormId>,
}

#[derive(Clone, Copy)]
enum Target {
    Draft(usize),
    Catalog(FormId),
}

type Table<'a, T> = BTreeMap<&'a str, Def<'a, T>>;

/// State of one read.
struct Session<'a> {
    dispatcher: &'a TypeDispatcher,
    config: CodecConfig,
    errors: Vec<ReadError>,
    suppressed: usize,
    drafts: Vec<FormDraft<'a>>,
    form_index: BTreeMap<&'a str, usize>,
    top_forms: Vec<usize>,
    modules: Table<'a, Module>,
    elements: Table<'a, ModuleElement>,
    morphisms: Table<'a, ModuleMorphism>,
    denotators: Table<'a, Denotator>,
    top_denotators: Vec<&'a Node>,
    references: Vec<(SymbolKind, &'a str)>,
}

fn symbol_kind(tag: &str) -> Option<SymbolKind> {
    match tag {
        tags::FORM | tags::DEFINE_FORM => Some(SymbolKind::Form),
        tags::DENOTATOR => Some(SymbolKind::Denotator),
        tags::MODULE => Some(SymbolKind::Module),
        tags::ELEMENT => Some(SymbolKind::Element),
        tags::MORPHISM => Some(SymbolKind::Morphism),
        _ => None,
    }
}

fn done_values<T: Clone>(table: &Table<'_, T>) -> BTreeMap<String, T> {
    table
        .iter()
        .filter_map(|(name, def)| match &def.state {
            Lazy::Done(Some(value)) => Some(((*name).to_owned(), value.clone())),
            _ => None,
        })
        .collect()
}

/// For each leaf definition, the definitions of the same family it refers to.
fn leaf_dependencies<'a, T>(table: &Table<'a, T>, tag: &str) -> BTreeMap<&'a str, Vec<&'a str>> {
    table
        .iter()
        .map(|(&name, def)| {
            let mut deps = Vec::new();
            let mut stack = vec![def.node];
            while let Some(node) = stack.pop() {
                match node.reference_name() {
                    Some(target) if node.tag == tag => deps.push(target),
                    _ => stack.extend(node.children.iter().rev()),
                }
            }
            (name, deps)
        })
        .collect()
}

/// Orders the names of `deps` so that each follows everything it depends on,
/// using an explicit stack. Returns the order and the names at which a cycle
/// closes. Targets outside `deps` are ignored.
fn dependency_order<'a>(
    deps: &BTreeMap<&'a str, Vec<&'a str>>,
) -> (Vec<&'a str>, BTreeSet<&'a str>) {
    // false while on the stack, true once emitted
    let mut finished: BTreeMap<&'a str, bool> = BTreeMap::new();
    let mut order = Vec::with_capacity(deps.len());
    let mut cyclic = BTreeSet::new();
    for &root in deps.keys() {
        if finished.contains_key(root) {
            continue;
        }
        finished.insert(root, false);
        let mut stack = vec![(root, 0usize)];
        while let Some((name, next)) = stack.last_mut() {
            let name = *name;
            match deps[name].get(*next) {
                Some(&dep) => {
                    *next += 1;
                    match finished.get(dep) {
                        None if deps.contains_key(dep) => {
                            finished.insert(dep, false);
                            stack.push((dep, 0));
                        }
                        Some(false) => {
                            cyclic.insert(dep);
                        }
                        _ => {}
                    }
                }
                None => {
                    finished.insert(name, true);
                    order.push(name);
                    stack.pop();
                }
            }
        }
    }
    (order, cyclic)
}

impl<'a> Session<'a> {
    fn new(dispatcher: &'a TypeDispatcher, config: CodecConfig) -> Self {
        Self {
            dispatcher,
            config,
            errors: Vec::new(),
            suppressed: 0,
            drafts: Vec::new(),
            form_index: BTreeMap::new(),
            top_forms: Vec::new(),
            modules: BTreeMap::new(),
            elements: BTreeMap::new(),
            morphisms: BTreeMap::new(),
            denotators: BTreeMap::new(),
            top_denotators: Vec::new(),
            references: Vec::new(),
        }
    }

    fn malformed<T>(&mut self, node: &Node, message: impl Into<String>) -> Option<T> {
        self.report(ReadError::Malformed {
            tag: node.tag.clone(),
            message: message.into(),
        });
        None
    }

    fn required(&mut self, node: &'a Node, key: &str) -> Option<&'a str> {
        match node.require_attr(key) {
            Ok(value) => Some(value),
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    fn parsed_attr<T>(&mut self, node: &'a Node, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(node, key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(error) => self.malformed(node, format!("bad {} '{}': {}", key, raw, error)),
        }
    }

    // ------------------------------------------------------------------------
    // Phase one: collect
    // ------------------------------------------------------------------------

    fn collect_document(&mut self, root: &'a Node) {
        if root.tag != tags::DOCUMENT {
            self.malformed::<()>(root, "expected a Document root");
            return;
        }
        if let Some(version) = root.attr(attrs::VERSION) {
            if version != VERSION {
                self.malformed::<()>(root, format!("unsupported version '{}'", version));
            }
        }
        self.scan_references(root);
        for node in &root.children {
            match node.tag.as_str() {
                tags::FORM | tags::DEFINE_FORM => {
                    if let Some(index) = self.collect_form(node) {
                        self.top_forms.push(index);
                    }
                }
                tags::DENOTATOR => {
                    self.collect_denotator(node);
                    self.top_denotators.push(node);
                }
                tags::DEFINE_MODULE => self.collect_leaf(node, SymbolKind::Module, tags::MODULE),
                tags::DEFINE_ELEMENT => self.collect_leaf(node, SymbolKind::Element, tags::ELEMENT),
                tags::DEFINE_MORPHISM => {
                    self.collect_leaf(node, SymbolKind::Morphism, tags::MORPHISM)
                }
                _ => {
                    self.malformed::<()>(node, "unexpected top-level node");
                }
            }
        }
        debug!(
            forms = self.drafts.len(),
            denotators = self.denotators.len(),
            references = self.references.len(),
            "collected definitions"
        );
    }

    /// Records every by-name reference of the document, in document order.
    fn scan_references(&mut self, root: &'a Node) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if let Some(name) = node.reference_name() {
                if let Some(kind) = symbol_kind(&node.tag) {
                    self.references.push((kind, name));
                }
            }
            if node.tag == tags::DENOTATOR {
                if let Some(form) = node.attr(attrs::FORM) {
                    self.references.push((SymbolKind::Form, form));
                }
            }
            stack.extend(node.children.iter().rev());
        }
    }

    fn collect_form(&mut self, node: &'a Node) -> Option<usize> {
        if node.reference_name().is_some() {
            return None;
        }
        let name = self.required(node, attrs::NAME)?;
        let tag = self.required(node, attrs::TYPE)?;
        let kind = match tag.parse::<FormKind>() {
            Ok(kind) => kind,
            Err(_) => {
                self.report(ReadError::UnknownTypeTag {
                    family: Family::Form,
                    tag: tag.to_owned(),
                });
                return None;
            }
        };

        let mut valid = true;
        let mut subs = Vec::new();
        if kind == FormKind::Simple {
            if node.child(tags::MODULE).is_none() {
                self.malformed::<()>(node, format!("form '{}' has no module", name));
                valid = false;
            }
        } else {
            for child in node.children.iter().filter(|c| c.is_form()) {
                if let Some(target) = child.reference_name() {
                    subs.push(target);
                    continue;
                }
                let inline = self.collect_form(child);
                match (inline, child.attr(attrs::NAME)) {
                    (Some(index), _) => subs.push(self.drafts[index].name),
                    // duplicate inline definition; the first one stands
                    (None, Some(existing)) => subs.push(existing),
                    (None, None) => valid = false,
                }
            }
            let single = matches!(kind, FormKind::Power | FormKind::List);
            if subs.is_empty() || (single && subs.len() != 1) {
                self.malformed::<()>(
                    node,
                    format!("{} form '{}' has {} sub-forms", kind, name, subs.len()),
                );
                valid = false;
            }
        }

        let labels = match node.child(tags::LABELS) {
            None => None,
            Some(labels) => {
                let names: Option<Vec<String>> = labels
                    .children_tagged(tags::LABEL)
                    .map(|label| label.attr(attrs::NAME).map(str::to_owned))
                    .collect();
                if names.is_none() {
                    self.malformed::<()>(labels, "label without a name");
                    valid = false;
                }
                names
            }
        };
        if let Some(names) = &labels {
            let labelled = matches!(kind, FormKind::Limit | FormKind::Colimit);
            let distinct = names.iter().collect::<BTreeSet<_>>().len() == names.len();
            if !labelled || names.len() != subs.len() || !distinct {
                self.malformed::<()>(
                    node,
                    format!("labels of form '{}' do not match its sub-forms", name),
                );
                valid = false;
            }
        }

        if self.form_index.contains_key(name) {
            self.report(ReadError::DuplicateName {
                kind: SymbolKind::Form,
                name: name.to_owned(),
            });
            return None;
        }
        let index = self.drafts.len();
        self.drafts.push(FormDraft {
            name,
            kind,
            node,
            subs,
            labels,
            valid,
            id: None,
        });
        self.form_index.insert(name, index);
        Some(index)
    }

    fn collect_denotator(&mut self, root: &'a Node) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.reference_name().is_some() {
                continue;
            }
            if let Some(name) = node.attr(attrs::NAME) {
                if self.denotators.contains_key(name) {
                    self.report(ReadError::DuplicateName {
                        kind: SymbolKind::Denotator,
                        name: name.to_owned(),
                    });
                } else {
                    self.denotators.insert(name, Def::new(node));
                }
            }
            stack.extend(
                node.children
                    .iter()
                    .filter(|child| child.tag == tags::DENOTATOR)
                    .rev(),
            );
        }
    }

    fn collect_leaf(&mut self, node: &'a Node, kind: SymbolKind, child_tag: &str) {
        let name = match self.required(node, attrs::NAME) {
            Some(name) => name,
            None => return,
        };
        let child = match node.child(child_tag) {
            Some(child) => child,
            None => {
                self.malformed::<()>(node, format!("missing {} child", child_tag));
                return;
            }
        };
        let taken = match kind {
            SymbolKind::Module => self.modules.contains_key(name),
            SymbolKind::Element => self.elements.contains_key(name),
            SymbolKind::Morphism => self.morphisms.contains_key(name),
            SymbolKind::Form | SymbolKind::Denotator => false,
        };
        if taken {
            self.report(ReadError::DuplicateName {
                kind,
                name: name.to_owned(),
            });
            return;
        }
        match kind {
            SymbolKind::Module => {
                self.modules.insert(name, Def::new(child));
            }
            SymbolKind::Element => {
                self.elements.insert(name, Def::new(child));
            }
            SymbolKind::Morphism => {
                self.morphisms.insert(name, Def::new(child));
            }
            SymbolKind::Form | SymbolKind::Denotator => {}
        }
    }

    // ------------------------------------------------------------------------
    // Phase two: resolve
    // ------------------------------------------------------------------------

    fn resolve(mut self, repo: &mut Repository) -> ReadOutcome {
        self.check_references(repo);
        self.resolve_leaves();
        self.build_forms(repo);
        let denotators = self.decode_denotators(repo);
        let symbols = self.symbols();
        if self.config.register_decoded && self.errors.is_empty() && self.suppressed == 0 {
            self.register(repo, &symbols);
        }
        let forms = self
            .top_forms
            .iter()
            .filter_map(|&i| self.valid_id(i))
            .collect();
        ReadOutcome {
            forms,
            denotators,
            errors: self.errors,
            suppressed: self.suppressed,
            symbols,
        }
    }

    fn check_references(&mut self, repo: &Repository) {
        let fallback = self.config.catalog_fallback;
        let mut seen = BTreeSet::new();
        for (kind, name) in std::mem::take(&mut self.references) {
            if !seen.insert((kind, name)) {
                continue;
            }
            let defined = match kind {
                SymbolKind::Form => {
                    self.form_index.contains_key(name)
                        || (fallback && repo.forms().lookup(name).is_some())
                }
                SymbolKind::Denotator => {
                    self.denotators.contains_key(name)
                        || (fallback && repo.denotator(name).is_some())
                }
                SymbolKind::Module => self.modules.contains_key(name),
                SymbolKind::Element => self.elements.contains_key(name),
                SymbolKind::Morphism => self.morphisms.contains_key(name),
            };
            if !defined {
                self.report(ReadError::UnresolvedReference {
                    kind,
                    name: name.to_owned(),
                });
            }
        }
    }

    fn modules_of(session: &mut Self) -> &mut Table<'a, Module> {
        &mut session.modules
    }

    fn elements_of(session: &mut Self) -> &mut Table<'a, ModuleElement> {
        &mut session.elements
    }

    fn morphisms_of(session: &mut Self) -> &mut Table<'a, ModuleMorphism> {
        &mut session.morphisms
    }

    fn denotators_of(session: &mut Self) -> &mut Table<'a, Denotator> {
        &mut session.denotators
    }

    /// Decodes the named leaf `name` once; later lookups hit the memo.
    fn resolve_leaf<T: Clone>(
        &mut self,
        kind: SymbolKind,
        name: &str,
        table: fn(&mut Self) -> &mut Table<'a, T>,
        decode: fn(&TypeDispatcher, &Node, &mut dyn LeafContext) -> Option<T>,
    ) -> Option<T> {
        let (node, state) = match table(self).get_mut(name) {
            Some(def) => (def.node, std::mem::replace(&mut def.state, Lazy::InProgress)),
            // unresolved; reported by check_references
            None => return None,
        };
        let value = match state {
            Lazy::Done(value) => value,
            Lazy::InProgress => {
                self.report(ReadError::Cyclic {
                    kind,
                    name: name.to_owned(),
                });
                return None;
            }
            Lazy::Pending => match node.reference_name() {
                // an alias of another definition
                Some(target) => self.resolve_leaf(kind, target, table, decode),
                None => {
                    let dispatcher = self.dispatcher;
                    decode(dispatcher, node, self)
                }
            },
        };
        if let Some(def) = table(self).get_mut(name) {
            def.state = Lazy::Done(value.clone());
        }
        value
    }

    /// Reports the definitions that close a `ref` cycle and settles them as
    /// failed, so that nothing recurses into them.
    fn settle_cycles<T>(
        &mut self,
        kind: SymbolKind,
        cyclic: BTreeSet<&'a str>,
        table: fn(&mut Self) -> &mut Table<'a, T>,
    ) {
        for name in cyclic {
            self.report(ReadError::Cyclic {
                kind,
                name: name.to_owned(),
            });
            if let Some(def) = table(self).get_mut(name) {
                def.state = Lazy::Done(None);
            }
        }
    }

    /// Decodes every leaf definition, referenced or not, each after the
    /// definitions it refers to.
    fn resolve_leaves(&mut self) {
        let (names, cyclic) = dependency_order(&leaf_dependencies(&self.modules, tags::MODULE));
        self.settle_cycles(SymbolKind::Module, cyclic, Self::modules_of);
        for name in names {
            self.resolve_leaf(
                SymbolKind::Module,
                name,
                Self::modules_of,
                TypeDispatcher::decode_module,
            );
        }
        let (names, cyclic) = dependency_order(&leaf_dependencies(&self.elements, tags::ELEMENT));
        self.settle_cycles(SymbolKind::Element, cyclic, Self::elements_of);
        for name in names {
            self.resolve_leaf(
                SymbolKind::Element,
                name,
                Self::elements_of,
                TypeDispatcher::decode_element,
            );
        }
        let (names, cyclic) =
            dependency_order(&leaf_dependencies(&self.morphisms, tags::MORPHISM));
        self.settle_cycles(SymbolKind::Morphism, cyclic, Self::morphisms_of);
        for name in names {
            self.resolve_leaf(
                SymbolKind::Morphism,
                name,
                Self::morphisms_of,
                TypeDispatcher::decode_morphism,
            );
        }
    }

    fn form_target(&self, name: &str, repo: &Repository) -> Option<Target> {
        match self.form_index.get(name) {
            Some(&index) => Some(Target::Draft(index)),
            None if self.config.catalog_fallback => repo.forms().lookup(name).map(Target::Catalog),
            None => None,
        }
    }

    fn valid_id(&self, index: usize) -> Option<FormId> {
        let draft = &self.drafts[index];
        if draft.valid {
            draft.id
        } else {
            None
        }
    }

    fn build_forms(&mut self, repo: &mut Repository) {
        let mut targets: Vec<Vec<Target>> = Vec::with_capacity(self.drafts.len());
        let mut modules: Vec<Option<Module>> = Vec::with_capacity(self.drafts.len());
        for i in 0..self.drafts.len() {
            let mut resolved = Vec::new();
            for sub in self.drafts[i].subs.clone() {
                match self.form_target(sub, repo) {
                    Some(target) => resolved.push(target),
                    None => self.drafts[i].valid = false,
                }
            }
            targets.push(resolved);

            let (kind, node) = (self.drafts[i].kind, self.drafts[i].node);
            let module = match (kind, node.child(tags::MODULE)) {
                (FormKind::Simple, Some(node)) => {
                    let module = self.module(node);
                    if module.is_none() {
                        self.drafts[i].valid = false;
                    }
                    module
                }
                _ => None,
            };
            modules.push(module);
        }

        self.drop_broken(&targets);
        for draft in self.drafts.iter_mut().filter(|d| d.valid) {
            draft.id = Some(repo.forms_mut().declare(draft.name, draft.kind));
        }

        let mut failed = false;
        for i in 0..self.drafts.len() {
            let id = match self.valid_id(i) {
                Some(id) => id,
                None => continue,
            };
            let subs: Vec<FormId> = targets[i]
                .iter()
                .filter_map(|target| match *target {
                    Target::Draft(j) => self.drafts[j].id,
                    Target::Catalog(id) => Some(id),
                })
                .collect();
            let body = match self.drafts[i].kind {
                FormKind::Simple => match modules[i].take() {
                    Some(module) => FormBody::Simple(module),
                    None => continue,
                },
                FormKind::Limit => FormBody::Limit(subs),
                FormKind::Colimit => FormBody::Colimit(subs),
                FormKind::Power => match subs.first() {
                    Some(&base) => FormBody::Power(base),
                    None => continue,
                },
                FormKind::List => match subs.first() {
                    Some(&base) => FormBody::List(base),
                    None => continue,
                },
            };
            let labels = self.drafts[i].labels.clone();
            if let Err(error) = repo.forms_mut().define(id, body, labels) {
                let node = self.drafts[i].node;
                self.malformed::<()>(node, error.to_string());
                self.drafts[i].valid = false;
                failed = true;
            }
        }
        if failed {
            self.drop_broken(&targets);
        }
    }

    /// Invalidates every draft with an invalid sub-form, transitively.
    fn drop_broken(&mut self, targets: &[Vec<Target>]) {
        loop {
            let mut changed = false;
            for i in 0..self.drafts.len() {
                let broken = targets[i]
                    .iter()
                    .any(|t| matches!(*t, Target::Draft(j) if !self.drafts[j].valid));
                if self.drafts[i].valid && broken {
                    debug!(form = self.drafts[i].name, "dropping form with an invalid sub-form");
                    self.drafts[i].valid = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn form_id(&self, name: &str, repo: &Repository) -> Option<FormId> {
        match self.form_index.get(name) {
            Some(&index) => self.valid_id(index),
            None if self.config.catalog_fallback => repo.forms().lookup(name),
            None => None,
        }
    }

    /// Builds every named denotator after the ones it refers to, so that
    /// resolving a `ref` never descends into another definition; then the
    /// top-level nodes.
    fn decode_denotators(&mut self, repo: &Repository) -> Vec<Denotator> {
        let (names, cyclic) = dependency_order(&self.denotator_dependencies());
        self.settle_cycles(SymbolKind::Denotator, cyclic, Self::denotators_of);
        for name in names {
            self.named_denotator(name, repo);
        }
        let mut decoded = Vec::new();
        for node in std::mem::take(&mut self.top_denotators) {
            if let Some(denotator) = self.denotator(node, repo) {
                decoded.push(denotator);
            }
        }
        decoded
    }

    /// For each named denotator, the named denotators its subtree uses: the
    /// targets of its `ref`s and the definitions nested inside it.
    fn denotator_dependencies(&self) -> BTreeMap<&'a str, Vec<&'a str>> {
        self.denotators
            .iter()
            .map(|(&name, def)| {
                let mut deps = Vec::new();
                let mut stack: Vec<&'a Node> = def.node.children.iter().rev().collect();
                while let Some(node) = stack.pop() {
                    if node.tag != tags::DENOTATOR {
                        continue;
                    }
                    if let Some(target) = node.reference_name() {
                        deps.push(target);
                        continue;
                    }
                    if let Some(nested) = node.attr(attrs::NAME) {
                        if self
                            .denotators
                            .get(nested)
                            .map_or(false, |def| std::ptr::eq(def.node, node))
                        {
                            deps.push(nested);
                            continue;
                        }
                    }
                    stack.extend(node.children.iter().rev());
                }
                (name, deps)
            })
            .collect()
    }

    fn denotator(&mut self, node: &'a Node, repo: &Repository) -> Option<Denotator> {
        if let Some(name) = node.reference_name() {
            return self.named_denotator(name, repo);
        }
        if let Some(name) = node.attr(attrs::NAME) {
            let defining = self
                .denotators
                .get(name)
                .map_or(false, |def| std::ptr::eq(def.node, node));
            if defining {
                return self.named_denotator(name, repo);
            }
        }
        self.build_denotator(node, repo)
    }

    fn named_denotator(&mut self, name: &str, repo: &Repository) -> Option<Denotator> {
        let (node, state) = match self.denotators.get_mut(name) {
            Some(def) => (def.node, std::mem::replace(&mut def.state, Lazy::InProgress)),
            None if self.config.catalog_fallback => return repo.denotator(name).cloned(),
            None => return None,
        };
        let value = match state {
            Lazy::Done(value) => value,
            Lazy::InProgress => {
                self.report(ReadError::Cyclic {
                    kind: SymbolKind::Denotator,
                    name: name.to_owned(),
                });
                return None;
            }
            Lazy::Pending => self.build_denotator(node, repo),
        };
        if let Some(def) = self.denotators.get_mut(name) {
            def.state = Lazy::Done(value.clone());
        }
        value
    }

    fn build_denotator(&mut self, node: &'a Node, repo: &Repository) -> Option<Denotator> {
        let tag = self.required(node, attrs::TYPE)?;
        let kind = match tag.parse::<FormKind>() {
            Ok(kind) => kind,
            Err(_) => {
                self.report(ReadError::UnknownTypeTag {
                    family: Family::Denotator,
                    tag: tag.to_owned(),
                });
                return None;
            }
        };
        let form_name = self.required(node, attrs::FORM)?;
        let form = self.form_id(form_name, repo)?;
        let forms = repo.forms();
        if forms.kind(form) != Some(kind) {
            return self.malformed(node, format!("form '{}' is not {}", form_name, kind));
        }
        let address = match node.child(tags::ADDRESS) {
            None => Module::Null,
            Some(address) => match address.child(tags::MODULE) {
                Some(module) => self.module(module)?,
                None => return self.malformed(address, "missing Module child"),
            },
        };

        let built = match kind {
            FormKind::Simple => {
                let map = match node.child(tags::MAP) {
                    Some(map) => map,
                    None => return self.malformed(node, "missing Map child"),
                };
                let dispatcher = self.dispatcher;
                let morphism = dispatcher.decode_map(map, &address, self)?;
                Denotator::simple(forms, form, morphism)
            }
            FormKind::Colimit => {
                let index = self.parsed_attr::<usize>(node, attrs::INDEX)?;
                let child = match node.child(tags::DENOTATOR) {
                    Some(child) => child,
                    None => return self.malformed(node, "missing Denotator child"),
                };
                let factor = self.denotator(child, repo)?;
                Denotator::colimit(forms, form, index, factor)
            }
            FormKind::Limit | FormKind::Power | FormKind::List => {
                // decode every factor so that all errors surface
                let decoded: Vec<Option<Denotator>> = node
                    .children
                    .iter()
                    .filter(|child| child.tag == tags::DENOTATOR)
                    .map(|child| self.denotator(child, repo))
                    .collect();
                let factors = decoded.into_iter().collect::<Option<Vec<_>>>()?;
                match kind {
                    FormKind::Limit => Denotator::limit(forms, form, factors),
                    FormKind::Power => Denotator::power(forms, form, factors),
                    _ => Denotator::list(forms, form, factors),
                }
            }
        };

        let denotator = match built {
            Ok(denotator) if *denotator.address() == address => denotator,
            Ok(denotator) => match denotator.change_address(forms, &address) {
                Some(moved) => moved,
                None => {
                    return self.malformed(node, format!("cannot move to address {}", address))
                }
            },
            Err(error) => return self.malformed(node, error.to_string()),
        };
        Some(match node.attr(attrs::NAME) {
            Some(name) => denotator.named(name),
            None => denotator,
        })
    }

    fn symbols(&self) -> SymbolTable {
        SymbolTable {
            forms: (0..self.drafts.len())
                .filter_map(|i| self.valid_id(i).map(|id| (self.drafts[i].name.to_owned(), id)))
                .collect(),
            denotators: done_values(&self.denotators),
            modules: done_values(&self.modules),
            elements: done_values(&self.elements),
            morphisms: done_values(&self.morphisms),
        }
    }

    fn register(&mut self, repo: &mut Repository, symbols: &SymbolTable) {
        for index in self.top_forms.clone() {
            if let Some(id) = self.valid_id(index) {
                if repo.register_form(id).is_err() {
                    let name = self.drafts[index].name.to_owned();
                    self.report(ReadError::DuplicateName {
                        kind: SymbolKind::Form,
                        name,
                    });
                }
            }
        }
        for (name, denotator) in &symbols.denotators {
            match repo.register_denotator(denotator.clone()) {
                Ok(()) => {}
                Err(DenotatorError::DuplicateName(_)) => self.report(ReadError::DuplicateName {
                    kind: SymbolKind::Denotator,
                    name: name.clone(),
                }),
                Err(error) => self.report(ReadError::Malformed {
                    tag: tags::DENOTATOR.to_owned(),
                    message: error.to_string(),
                }),
            }
        }
    }
}

impl<'a> LeafContext for Session<'a> {
    fn module(&mut self, node: &Node) -> Option<Module> {
        match node.reference_name() {
            Some(name) => self.resolve_leaf(
                SymbolKind::Module,
                name,
                Self::modules_of,
                TypeDispatcher::decode_module,
            ),
            None => {
                let dispatcher = self.dispatcher;
                dispatcher.decode_module(node, self)
            }
        }
    }

    fn element(&mut self, node: &Node) -> Option<ModuleElement> {
        match node.reference_name() {
            Some(name) => self.resolve_leaf(
                SymbolKind::Element,
                name,
                Self::elements_of,
                TypeDispatcher::decode_element,
            ),
            None => {
                let dispatcher = self.dispatcher;
                dispatcher.decode_element(node, self)
            }
        }
    }

    fn morphism(&mut self, node: &Node) -> Option<ModuleMorphism> {
        match node.reference_name() {
            Some(name) => self.resolve_leaf(
                SymbolKind::Morphism,
                name,
                Self::morphisms_of,
                TypeDispatcher::decode_morphism,
            ),
            None => {
                let dispatcher = self.dispatcher;
                dispatcher.decode_morphism(node, self)
            }
        }
    }

    fn report(&mut self, error: ReadError) {
        warn!(%error, "read error");
        match self.config.max_errors {
            Some(max) if self.errors.len() >= max => self.suppressed += 1,
            _ => self.errors.push(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Writer;

    fn read(text: &str) -> (Repository, ReadOutcome) {
        let mut repo = Repository::new();
        let outcome = Reader::new().read_str(text, &mut repo);
        (repo, outcome)
    }

    const FORWARD: &str = r#"{"tag":"Document","children":[
        {"tag":"Denotator","attrs":{"type":"Limit","form":"Note","name":"n1"},"children":[
            {"tag":"Denotator","attrs":{"type":"Simple","form":"Pitch"},"children":[
                {"tag":"Map","attrs":{"type":"ConstantMap"},"children":[
                    {"tag":"ModuleElement","attrs":{"ref":"c4"}}]}]}]},
        {"tag":"Form","attrs":{"name":"Note","type":"Limit"},"children":[
            {"tag":"Form","attrs":{"ref":"Pitch"}}]},
        {"tag":"Form","attrs":{"name":"Pitch","type":"Simple"},"children":[
            {"tag":"Module","attrs":{"type":"ZRing"}}]},
        {"tag":"DefineModuleElement","attrs":{"name":"c4"},"children":[
            {"tag":"ModuleElement","attrs":{"type":"ZElement","value":"60"}}]}
    ]}"#;

    #[test]
    fn forward_references_resolve() {
        let (repo, outcome) = read(FORWARD);
        assert!(outcome.is_success(), "{:?}", outcome.errors);
        assert_eq!(outcome.forms.len(), 2);
        let n1 = &outcome.denotators[0];
        assert_eq!(n1.name(), Some("n1"));
        assert_eq!(repo.forms().name(n1.form()), Some("Note"));
        assert_eq!(n1.factors()[0].element(), Some(ModuleElement::Z(60)));
        assert_eq!(outcome.symbols.elements["c4"], ModuleElement::Z(60));
        assert!(outcome.symbols.denotators.contains_key("n1"));
    }

    #[test]
    fn reader_states() {
        let mut repo = Repository::new();
        let mut reader = Reader::new();
        assert_eq!(reader.state(), ReaderState::Idle);
        reader.read_str(FORWARD, &mut repo);
        assert_eq!(reader.state(), ReaderState::Done);
        let outcome = reader.read_str("{not json", &mut repo);
        assert_eq!(reader.state(), ReaderState::Failed);
        assert!(matches!(outcome.errors[..], [ReadError::Syntax(_)]));
    }

    #[test]
    fn duplicate_definitions_keep_the_first() {
        let (repo, outcome) = read(
            r#"{"tag":"Document","children":[
                {"tag":"Form","attrs":{"name":"A","type":"Simple"},"children":[{"tag":"Module","attrs":{"type":"ZRing"}}]},
                {"tag":"Form","attrs":{"name":"A","type":"Simple"},"children":[{"tag":"Module","attrs":{"type":"RRing"}}]},
                {"tag":"Form","attrs":{"name":"B","type":"Simple"},"children":[{"tag":"Module","attrs":{"type":"QRing"}}]}
            ]}"#,
        );
        assert_eq!(
            outcome.errors,
            vec![ReadError::DuplicateName {
                kind: SymbolKind::Form,
                name: "A".into()
            }]
        );
        let a = outcome.symbols.forms["A"];
        assert_eq!(repo.forms().get(a).and_then(|f| f.module()), Some(&Module::Z));
        assert!(outcome.symbols.forms.contains_key("B"));
    }

    #[test]
    fn unknown_tags_drop_only_their_subtree() {
        let (_, outcome) = read(
            r#"{"tag":"Document","children":[
                {"tag":"Form","attrs":{"name":"Odd","type":"Simple"},"children":[{"tag":"Module","attrs":{"type":"Bogus"}}]},
                {"tag":"Form","attrs":{"name":"Pair","type":"Limit"},"children":[{"tag":"Form","attrs":{"ref":"Odd"}}]},
                {"tag":"Form","attrs":{"name":"Fine","type":"Simple"},"children":[{"tag":"Module","attrs":{"type":"ZRing"}}]}
            ]}"#,
        );
        assert_eq!(
            outcome.errors,
            vec![ReadError::UnknownTypeTag {
                family: Family::Module,
                tag: "Bogus".into()
            }]
        );
        assert_eq!(outcome.symbols.forms.keys().collect::<Vec<_>>(), vec!["Fine"]);
    }

    #[test]
    fn unresolved_references_are_reported_once() {
        let (_, outcome) = read(
            r#"{"tag":"Document","children":[
                {"tag":"Form","attrs":{"name":"P","type":"Limit"},"children":[
                    {"tag":"Form","attrs":{"ref":"Missing"}},{"tag":"Form","attrs":{"ref":"Missing"}}]}
            ]}"#,
        );
        assert_eq!(
            outcome.errors,
            vec![ReadError::UnresolvedReference {
                kind: SymbolKind::Form,
                name: "Missing".into()
            }]
        );
        assert!(outcome.forms.is_empty());
    }

    #[test]
    fn self_containing_denotator_is_cyclic() {
        let (_, outcome) = read(
            r#"{"tag":"Document","children":[
                {"tag":"Form","attrs":{"name":"Chain","type":"List"},"children":[{"tag":"Form","attrs":{"ref":"Chain"}}]},
                {"tag":"Denotator","attrs":{"name":"a","type":"List","form":"Chain"},"children":[
                    {"tag":"Denotator","attrs":{"ref":"a"}}]}
            ]}"#,
        );
        assert_eq!(
            outcome.errors,
            vec![ReadError::Cyclic {
                kind: SymbolKind::Denotator,
                name: "a".into()
            }]
        );
        assert!(outcome.denotators.is_empty());
        assert_eq!(outcome.forms.len(), 1);
    }

    #[test]
    fn mismatched_labels_drop_dependent_forms() {
        let (repo, outcome) = read(
            r#"{"tag":"Document","children":[
                {"tag":"Form","attrs":{"name":"P","type":"Limit"},"children":[{"tag":"Form","attrs":{"ref":"X"}}]},
                {"tag":"Form","attrs":{"name":"X","type":"Limit"},"children":[
                    {"tag":"Form","attrs":{"ref":"L"}},
                    {"tag":"Labels","children":[
                        {"tag":"Label","attrs":{"name":"a"}},{"tag":"Label","attrs":{"name":"b"}}]}]},
                {"tag":"Form","attrs":{"name":"L","type":"Simple"},"children":[{"tag":"Module","attrs":{"type":"ZRing"}}]}
            ]}"#,
        );
        assert!(matches!(outcome.errors[..], [ReadError::Malformed { .. }]));
        assert_eq!(outcome.symbols.forms.keys().collect::<Vec<_>>(), vec!["L"]);
        assert_eq!(outcome.forms, vec![outcome.symbols.forms["L"]]);
        let forms = repo.forms();
        assert!((0..forms.len()).all(|i| !forms.is_pending(FormId::new(i as u32))));
    }

    /// `d{i}` holds a reference to `d{i-1}`; the latest link comes first.
    fn reversed_chain(len: usize) -> Node {
        let mut root = Node::new(tags::DOCUMENT).with_child(
            Node::new(tags::FORM)
                .with_attr(attrs::NAME, "Chain")
                .with_attr(attrs::TYPE, "List")
                .with_child(Node::reference(tags::FORM, "Chain")),
        );
        for i in (0..len).rev() {
            let mut link = Node::new(tags::DENOTATOR)
                .with_attr(attrs::NAME, format!("d{}", i))
                .with_attr(attrs::TYPE, "List")
                .with_attr(attrs::FORM, "Chain");
            if i > 0 {
                link.push(Node::reference(tags::DENOTATOR, &format!("d{}", i - 1)));
            }
            root.push(link);
        }
        root
    }

    #[test]
    fn long_reference_chains_in_reverse_order() {
        const LEN: usize = 1000;
        let mut repo = Repository::new();
        let outcome = Reader::new().read_node(&reversed_chain(LEN), &mut repo);
        assert!(outcome.is_success(), "{:?}", outcome.errors);
        assert_eq!(outcome.denotators.len(), LEN);
        assert_eq!(outcome.symbols.denotators.len(), LEN);
        let last = &outcome.symbols.denotators[&format!("d{}", LEN - 1)];
        assert_eq!(last.factors()[0].name(), Some(format!("d{}", LEN - 2).as_str()));
        assert_eq!(outcome.symbols.denotators["d0"].factor_count(), 0);
    }

    #[test]
    fn reference_cycles_are_reported_once() {
        let (_, outcome) = read(
            r#"{"tag":"Document","children":[
                {"tag":"Form","attrs":{"name":"Chain","type":"List"},"children":[{"tag":"Form","attrs":{"ref":"Chain"}}]},
                {"tag":"Denotator","attrs":{"name":"a","type":"List","form":"Chain"},"children":[
                    {"tag":"Denotator","attrs":{"ref":"b"}}]},
                {"tag":"Denotator","attrs":{"name":"b","type":"List","form":"Chain"},"children":[
                    {"tag":"Denotator","attrs":{"ref":"a"}}]},
                {"tag":"Denotator","attrs":{"name":"c","type":"List","form":"Chain"}}
            ]}"#,
        );
        assert_eq!(
            outcome.errors,
            vec![ReadError::Cyclic {
                kind: SymbolKind::Denotator,
                name: "a".into()
            }]
        );
        assert_eq!(
            outcome.symbols.denotators.keys().collect::<Vec<_>>(),
            vec!["c"]
        );
    }

    #[test]
    fn long_module_chains_in_reverse_order() {
        const LEN: usize = 5000;
        let mut root = Node::new(tags::DOCUMENT);
        for i in (0..LEN).rev() {
            let module = if i == 0 {
                Node::new(tags::MODULE).with_attr(attrs::TYPE, "ZRing")
            } else {
                Node::reference(tags::MODULE, &format!("m{}", i - 1))
            };
            root.push(
                Node::new(tags::DEFINE_MODULE)
                    .with_attr(attrs::NAME, format!("m{}", i))
                    .with_child(module),
            );
        }
        let mut repo = Repository::new();
        let outcome = Reader::new().read_node(&root, &mut repo);
        assert!(outcome.is_success(), "{:?}", outcome.errors);
        assert_eq!(outcome.symbols.modules[&format!("m{}", LEN - 1)], Module::Z);
    }

    #[test]
    fn error_cap_counts_the_rest() {
        let mut repo = Repository::new();
        let config = CodecConfig {
            max_errors: Some(1),
            ..CodecConfig::default()
        };
        let outcome = Reader::new().with_config(config).read_str(
            r#"{"tag":"Document","children":[{"tag":"Bad"},{"tag":"Worse"},{"tag":"Worst"}]}"#,
            &mut repo,
        );
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.suppressed, 2);
        assert!(outcome.into_result().is_err());
    }

    #[test]
    fn catalog_fallback_and_registration() {
        let mut repo = Repository::new();
        let pitch = repo.forms_mut().simple("Pitch", Module::Z);
        repo.register_form(pitch).unwrap();
        let text = r#"{"tag":"Document","children":[
            {"tag":"Form","attrs":{"name":"Chord","type":"Power"},"children":[{"tag":"Form","attrs":{"ref":"Pitch"}}]}
        ]}"#;

        let strict = CodecConfig {
            catalog_fallback: false,
            ..CodecConfig::default()
        };
        let outcome = Reader::new().with_config(strict).read_str(text, &mut repo);
        assert!(matches!(
            outcome.errors[..],
            [ReadError::UnresolvedReference { .. }]
        ));

        let config = CodecConfig {
            register_decoded: true,
            ..CodecConfig::default()
        };
        let outcome = Reader::new().with_config(config).read_str(text, &mut repo);
        assert!(outcome.is_success(), "{:?}", outcome.errors);
        let chord = repo.form("Chord").unwrap();
        assert_eq!(repo.forms().get(chord).unwrap().body().sub_forms(), &[pitch]);
    }

    #[test]
    fn leaf_definitions_are_shared() {
        let mut arena = crate::arena::FormArena::new();
        let pc = arena.simple("PitchClass", Module::Zn(12));
        let mut writer = Writer::new(&arena);
        writer.define_module("Z12", &Module::Zn(12)).unwrap();
        writer.write_form(pc).unwrap();
        let root = writer.into_node();
        assert_eq!(root.children[0].tag, tags::DEFINE_MODULE);
        assert_eq!(root.children[1].children[0].reference_name(), Some("Z12"));

        let mut repo = Repository::new();
        let outcome = Reader::new().read_node(&root, &mut repo);
        assert!(outcome.is_success(), "{:?}", outcome.errors);
        assert_eq!(outcome.symbols.modules["Z12"], Module::Zn(12));
        let id = outcome.forms[0];
        assert_eq!(repo.forms().get(id).unwrap().module(), Some(&Module::Zn(12)));
    }

    #[test]
    fn cyclic_module_definitions() {
        let (_, outcome) = read(
            r#"{"tag":"Document","children":[
                {"tag":"DefineModule","attrs":{"name":"M"},"children":[
                    {"tag":"Module","attrs":{"type":"ProductRing"},"children":[{"tag":"Module","attrs":{"ref":"M"}}]}]}
            ]}"#,
        );
        assert_eq!(
            outcome.errors,
            vec![ReadError::Cyclic {
                kind: SymbolKind::Module,
                name: "M".into()
            }]
        );
        assert!(outcome.symbols.modules.is_empty());
    }
}
