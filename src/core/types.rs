//! LK-003: Layer, module, link, and module-spec types.
//!
//! Layer files and `module.yaml` spec files deserialize directly into these
//! types. `Module` inputs are free-form `Document`s; everything the linker
//! needs to wire modules together lives on `Link` and the link specs.

use super::document::Document;
use super::reference::{InterpolatedReference, Reference};
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Connections
// ============================================================================

/// A point-to-point field mapping between two documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConnection")]
pub struct ConnectionSpec {
    pub source: Reference,
    pub target: Reference,
}

impl ConnectionSpec {
    pub fn new(source: Reference, target: Reference) -> Self {
        Self { source, target }
    }
}

/// Accepted document forms: `{source, target}` or `{both}`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConnection {
    #[serde(default)]
    both: Option<Reference>,
    #[serde(default)]
    source: Option<Reference>,
    #[serde(default)]
    target: Option<Reference>,
}

impl TryFrom<RawConnection> for ConnectionSpec {
    type Error = String;

    fn try_from(raw: RawConnection) -> Result<Self, Self::Error> {
        match (raw.both, raw.source, raw.target) {
            (Some(both), None, None) => Ok(Self::new(both.clone(), both)),
            (Some(_), _, _) => Err("unexpected `both` key alongside source/target".to_string()),
            (None, Some(source), Some(target)) => Ok(Self::new(source, target)),
            (None, _, _) => Err("connection needs both `source` and `target`".to_string()),
        }
    }
}

// ============================================================================
// Link specs
// ============================================================================

/// Shared view of input and output link specs.
pub trait LinkSpec {
    /// Canonical relationship type.
    fn link_type(&self) -> &str;

    /// Name the type is referred to by in links; defaults to the type.
    fn alias(&self) -> &str;

    fn connections(&self) -> &[ConnectionSpec];

    /// Whether `name` refers to this spec by type or alias.
    fn answers_to(&self, name: &str) -> bool {
        self.link_type() == name || self.alias() == name
    }
}

/// How a module type exposes its output for a relationship type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLinkSpec {
    #[serde(rename = "type")]
    pub link_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,

    /// Wildcard source for arbitrary nested output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_all_from: Option<Reference>,
}

impl LinkSpec for OutputLinkSpec {
    fn link_type(&self) -> &str {
        &self.link_type
    }

    fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.link_type)
    }

    fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }
}

/// How a module type consumes another module's output for a relationship type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputLinkSpec {
    #[serde(rename = "type")]
    pub link_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,

    /// Eligible for inference without an explicit link
    #[serde(default)]
    pub automatic: bool,

    /// Wildcard target for arbitrary nested input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_all_to: Option<Reference>,

    /// Sequence under which each link appends a new entry (fan-in)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_target: Option<Reference>,

    /// Mapping from link params into the input document
    #[serde(default)]
    pub params_connections: Vec<ConnectionSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_schema: Option<Document>,
}

impl LinkSpec for InputLinkSpec {
    fn link_type(&self) -> &str {
        &self.link_type
    }

    fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.link_type)
    }

    fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }
}

// ============================================================================
// Module spec
// ============================================================================

/// Per-type schema shared between all instances of a module type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Module type name
    pub name: String,

    /// Deployment targets (aws, gcp, azure, local)
    #[serde(default)]
    pub clouds: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Document>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Document>,

    #[serde(default)]
    pub input_links: Vec<InputLinkSpec>,

    #[serde(default)]
    pub output_links: Vec<OutputLinkSpec>,

    /// Rules binding input locations or runtime values to provisioning variables
    #[serde(default)]
    pub input_terraform_connections: Vec<ConnectionSpec>,

    /// Directory the spec was loaded from
    #[serde(skip)]
    pub dir: Option<PathBuf>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clouds: Vec::new(),
            input_schema: None,
            output_schema: None,
            input_links: Vec::new(),
            output_links: Vec::new(),
            input_terraform_connections: Vec::new(),
            dir: None,
        }
    }

    /// Input link spec matching a type or alias.
    pub fn input_link_spec_for(&self, type_or_alias: &str) -> Option<&InputLinkSpec> {
        self.input_links.iter().find(|s| s.answers_to(type_or_alias))
    }

    /// Output link spec for a canonical type.
    pub fn output_link_spec_for(&self, link_type: &str) -> Option<&OutputLinkSpec> {
        self.output_links.iter().find(|s| s.link_type == link_type)
    }
}

// ============================================================================
// Links
// ============================================================================

/// An edge from the declaring (consuming) module to the module named `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLink")]
pub struct Link {
    /// Alias of the providing module
    pub name: String,

    /// Relationship types or their aliases; `None` means unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<BTreeSet<String>>,

    /// Per-type parameters, keyed by type or alias
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, Document>,
}

/// A link is either a bare module alias or a full mapping.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLink {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        types: Option<Vec<String>>,
        #[serde(default)]
        params: IndexMap<String, Document>,
    },
}

impl From<RawLink> for Link {
    fn from(raw: RawLink) -> Self {
        match raw {
            RawLink::Name(name) => Self::new(name),
            RawLink::Full {
                name,
                types,
                params,
            } => Self {
                name,
                types: types.map(|t| t.into_iter().collect()),
                params,
            },
        }
    }
}

impl Link {
    /// A link with unset types.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: None,
            params: IndexMap::new(),
        }
    }

    /// A dependency-only link with an empty type set.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            types: Some(BTreeSet::new()),
            ..Self::new(name)
        }
    }

    pub fn with_types<I, S>(name: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: Some(types.into_iter().map(Into::into).collect()),
            ..Self::new(name)
        }
    }

    pub fn add_type(&mut self, link_type: impl Into<String>) {
        self.types
            .get_or_insert_with(BTreeSet::new)
            .insert(link_type.into());
    }

    /// Declared types in sorted order; empty when unset.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().flatten().map(String::as_str)
    }

    pub fn params_for(&self, link_type: &str) -> Option<&Document> {
        self.params.get(link_type)
    }
}

// ============================================================================
// Modules
// ============================================================================

/// Hook invoked around provisioning of a module. All methods default to no-ops.
pub trait ModuleProcessor: fmt::Debug + Send + Sync {
    /// May modify the generated provisioning variables.
    fn pre_plan(&self, _module: &Module, _vars: &mut Document) {}

    fn pre_apply(&self, _module: &Module) {}

    fn post_apply(&self, _module: &Module) {}
}

/// A declared module instance.
#[derive(Debug, Clone)]
pub struct Module {
    /// Module type (key into the spec registry)
    pub module_type: String,

    alias: Option<String>,

    /// Free-form input; rewritten in place during resolution
    pub input: Document,

    pub links: Vec<Link>,

    pub processor: Option<Arc<dyn ModuleProcessor>>,
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        self.module_type == other.module_type
            && self.alias() == other.alias()
            && self.input == other.input
            && self.links == other.links
    }
}

impl Module {
    pub fn new(module_type: impl Into<String>) -> Self {
        Self {
            module_type: module_type.into(),
            alias: None,
            input: Document::empty_mapping(),
            links: Vec::new(),
            processor: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.set_alias(Some(alias.into()));
        self
    }

    pub fn with_input(mut self, input: Document) -> Self {
        self.input = input;
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Unique name within a layer; defaults to the module type.
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.module_type)
    }

    /// Set or clear the explicit alias. Empty strings clear it.
    pub fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias.filter(|a| !a.is_empty());
    }

    pub fn link_for_module(&self, name: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.name == name)
    }

    /// Existing link to `name`, or a new link with unset types.
    pub fn link_for_module_or_insert(&mut self, name: &str) -> &mut Link {
        let idx = match self.links.iter().position(|l| l.name == name) {
            Some(idx) => idx,
            None => {
                self.links.push(Link::new(name));
                self.links.len() - 1
            }
        };
        &mut self.links[idx]
    }

    pub fn pre_plan(&self, vars: &mut Document) {
        if let Some(ref processor) = self.processor {
            processor.pre_plan(self, vars);
        }
    }

    pub fn pre_apply(&self) {
        if let Some(ref processor) = self.processor {
            processor.pre_apply(self);
        }
    }

    pub fn post_apply(&self) {
        if let Some(ref processor) = self.processor {
            processor.post_apply(self);
        }
    }
}

impl TryFrom<Document> for Module {
    type Error = String;

    /// Every key besides `type`, `alias` and `links` becomes input.
    fn try_from(raw: Document) -> Result<Self, Self::Error> {
        let Document::Mapping(mut map) = raw else {
            return Err(format!("module must be a mapping, got {}", raw.type_name()));
        };

        let module_type = match map.shift_remove("type") {
            Some(Document::String(t)) if !t.is_empty() => t,
            Some(Document::String(_)) => return Err("module type must not be empty".to_string()),
            Some(other) => return Err(format!("module type must be a string, got {}", other.type_name())),
            None => return Err("module is missing `type`".to_string()),
        };

        let alias = match map.shift_remove("alias") {
            None | Some(Document::Null) => None,
            Some(Document::String(a)) if !a.is_empty() => Some(a),
            Some(Document::String(_)) => {
                return Err(format!("alias of module {} must not be empty", module_type))
            }
            Some(other) => {
                return Err(format!(
                    "alias of module {} must be a string, got {}",
                    module_type,
                    other.type_name()
                ))
            }
        };

        let links = match map.shift_remove("links") {
            None | Some(Document::Null) => Vec::new(),
            Some(raw_links) => serde_yaml_ng::from_value(raw_links.to_yaml())
                .map_err(|e| format!("invalid links on module {}: {}", module_type, e))?,
        };

        let mut module = Module::new(module_type);
        module.set_alias(alias);
        module.input = Document::Mapping(map);
        module.links = links;
        Ok(module)
    }
}

impl<'de> Deserialize<'de> for Module {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Document::deserialize(deserializer)?;
        Module::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Module {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.module_type)?;
        map.serialize_entry("alias", self.alias())?;
        map.serialize_entry("input", &self.input)?;
        if !self.links.is_empty() {
            map.serialize_entry("links", &self.links)?;
        }
        map.end()
    }
}

// ============================================================================
// Layer
// ============================================================================

/// Current layer file version.
pub const CURRENT_LAYER_VERSION: u32 = 1;

/// An ordered collection of module declarations loaded from one layer file.
#[derive(Debug, Clone, Deserialize)]
pub struct Layer {
    pub name: String,

    #[serde(default)]
    pub org_name: Option<String>,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub modules: Vec<Module>,
}

fn default_version() -> u32 {
    CURRENT_LAYER_VERSION
}

// ============================================================================
// Runtime context
// ============================================================================

/// Caller-supplied values bound under the `meta.*` references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeContext {
    pub env: String,
    pub layer: String,
    pub region: Option<String>,
    pub account_id: Option<String>,
}

// ============================================================================
// Link result
// ============================================================================

/// Output of a successful resolution run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkResult {
    /// Strictly ordered steps; aliases within a step are mutually independent
    pub execution_order: Vec<BTreeSet<String>>,

    /// Module alias → input location → parsed interpolation
    pub interpolations: BTreeMap<String, BTreeMap<Reference, InterpolatedReference>>,
}

impl LinkResult {
    /// Index of the step containing `alias`.
    pub fn step_of(&self, alias: &str) -> Option<usize> {
        self.execution_order
            .iter()
            .position(|step| step.contains(alias))
    }
}
