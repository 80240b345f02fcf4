//! LK-002: Weakly-typed module documents and path-addressed access.
//!
//! `Document` is the tagged-variant value every module input, link parameter
//! block and generated variable document is stored as. All structural access
//! goes through `Reference` paths: `contains`, `get`, `get_mut` and `set`.

use super::error::DocumentError;
use super::reference::{InterpolatedReference, Reference, Segment};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Strategy that manufactures a missing intermediate container.
///
/// Called with the path of the container being created and the segment that
/// will be looked up inside it next.
pub type FillMissing = fn(&Reference, &Segment) -> Document;

/// Empty sequence when the next segment is an index, empty mapping otherwise.
pub fn fill_missing_sequence_or_mapping(_path: &Reference, next: &Segment) -> Document {
    match next {
        Segment::Index(_) => Document::Sequence(Vec::new()),
        Segment::Key(_) => Document::Mapping(IndexMap::new()),
    }
}

/// A nested mapping/sequence/scalar value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Document {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Document>),
    Mapping(IndexMap<String, Document>),
    /// A string value that has been parsed as an interpolation.
    Interpolation(InterpolatedReference),
}

impl Document {
    pub fn empty_mapping() -> Self {
        Self::Mapping(IndexMap::new())
    }

    /// Variant name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
            Self::Interpolation(_) => "interpolation",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Document>> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut IndexMap<String, Document>> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Vec<Document>> {
        match self {
            Self::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_interpolation(&self) -> Option<&InterpolatedReference> {
        match self {
            Self::Interpolation(i) => Some(i),
            _ => None,
        }
    }

    /// Look up one segment below this node.
    fn child(&self, segment: &Segment) -> Option<&Document> {
        match (self, segment) {
            (Self::Mapping(m), Segment::Key(k)) => m.get(k.as_str()),
            (Self::Sequence(s), Segment::Index(i)) => s.get(*i),
            _ => None,
        }
    }

    fn child_mut(&mut self, segment: &Segment) -> Option<&mut Document> {
        match (self, segment) {
            (Self::Mapping(m), Segment::Key(k)) => m.get_mut(k.as_str()),
            (Self::Sequence(s), Segment::Index(i)) => s.get_mut(*i),
            _ => None,
        }
    }

    /// Whether `path` can be walked. Never fails.
    pub fn contains(&self, path: &Reference) -> bool {
        let mut current = self;
        for segment in path {
            match current.child(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        true
    }

    /// The value at `path`.
    pub fn get(&self, path: &Reference) -> Result<&Document, DocumentError> {
        let mut current = self;
        for (idx, segment) in path.iter().enumerate() {
            current = current
                .child(segment)
                .ok_or_else(|| lookup_error(current, path.slice(..=idx), segment))?;
        }
        Ok(current)
    }

    pub fn get_mut(&mut self, path: &Reference) -> Result<&mut Document, DocumentError> {
        let mut current = self;
        for (idx, segment) in path.iter().enumerate() {
            if current.child(segment).is_none() {
                return Err(lookup_error(current, path.slice(..=idx), segment));
            }
            current = match current.child_mut(segment) {
                Some(next) => next,
                None => return Err(DocumentError::Missing { path: path.slice(..=idx) }),
            };
        }
        Ok(current)
    }

    /// Write `value` at `path`, creating the final segment if absent.
    ///
    /// A missing intermediate container is created with `fill_missing` when one
    /// is supplied, and is an error otherwise. Sequences can only grow by
    /// writing at index `len`.
    pub fn set(
        &mut self,
        path: &Reference,
        value: Document,
        fill_missing: Option<FillMissing>,
    ) -> Result<(), DocumentError> {
        let Some((last, parents)) = path.segments().split_last() else {
            *self = value;
            return Ok(());
        };

        let mut current = self;
        for (idx, segment) in parents.iter().enumerate() {
            let here = path.slice(..=idx);
            if current.child(segment).is_none() {
                let Some(fill) = fill_missing else {
                    return Err(lookup_error(current, here, segment));
                };
                let container = fill(&here, &path.segments()[idx + 1]);
                insert_child(current, &here, segment, container)?;
            }
            current = match current.child_mut(segment) {
                Some(next) => next,
                None => return Err(DocumentError::Missing { path: here }),
            };
        }

        match current.child_mut(last) {
            Some(slot) => *slot = value,
            None => insert_child(current, path, last, value)?,
        }
        Ok(())
    }

    /// Convert to a `serde_yaml_ng::Value`; interpolations become strings.
    pub fn to_yaml(&self) -> serde_yaml_ng::Value {
        use serde_yaml_ng::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Number((*i).into()),
            Self::Float(f) => Value::Number((*f).into()),
            Self::String(s) => Value::String(s.clone()),
            Self::Sequence(items) => Value::Sequence(items.iter().map(Self::to_yaml).collect()),
            Self::Mapping(map) => Value::Mapping(
                map.iter()
                    .map(|(k, v)| (Value::String(k.clone()), v.to_yaml()))
                    .collect(),
            ),
            Self::Interpolation(i) => Value::String(i.to_string()),
        }
    }
}

/// Insert `value` under `segment` of `parent`, where `path` ends at `segment`.
fn insert_child(
    parent: &mut Document,
    path: &Reference,
    segment: &Segment,
    value: Document,
) -> Result<(), DocumentError> {
    match (parent, segment) {
        (Document::Mapping(m), Segment::Key(k)) => {
            m.insert(k.as_str().to_string(), value);
            Ok(())
        }
        (Document::Sequence(s), Segment::Index(i)) if *i == s.len() => {
            s.push(value);
            Ok(())
        }
        (Document::Sequence(s), Segment::Index(i)) => Err(DocumentError::IndexOutOfRange {
            path: path.clone(),
            index: *i,
            len: s.len(),
        }),
        (other, segment) => Err(DocumentError::WrongType {
            path: path.parent().unwrap_or_default(),
            expected: expected_container(segment),
            found: other.type_name(),
        }),
    }
}

fn lookup_error(parent: &Document, path: Reference, segment: &Segment) -> DocumentError {
    match (parent, segment) {
        (Document::Sequence(s), Segment::Index(i)) => DocumentError::IndexOutOfRange {
            path,
            index: *i,
            len: s.len(),
        },
        (Document::Mapping(_), Segment::Key(_)) => DocumentError::Missing { path },
        (other, segment) => DocumentError::WrongType {
            path: path.parent().unwrap_or_default(),
            expected: expected_container(segment),
            found: other.type_name(),
        },
    }
}

fn expected_container(segment: &Segment) -> &'static str {
    match segment {
        Segment::Index(_) => "sequence",
        Segment::Key(_) => "mapping",
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<serde_yaml_ng::Value> for Document {
    fn from(value: serde_yaml_ng::Value) -> Self {
        use serde_yaml_ng::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Sequence(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Mapping(map) => Self::Mapping(
                map.into_iter()
                    .map(|(k, v)| (yaml_key_to_string(k), Self::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Self::from(tagged.value),
        }
    }
}

/// Mapping keys are always strings in a `Document`.
fn yaml_key_to_string(key: serde_yaml_ng::Value) -> String {
    match key {
        serde_yaml_ng::Value::String(s) => s,
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Document {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Document {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<InterpolatedReference> for Document {
    fn from(i: InterpolatedReference) -> Self {
        Self::Interpolation(i)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Sequence(items) => items.serialize(serializer),
            Self::Mapping(map) => map.serialize(serializer),
            Self::Interpolation(i) => serializer.serialize_str(&i.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_yaml_ng::Value::deserialize(deserializer).map(Self::from)
    }
}
