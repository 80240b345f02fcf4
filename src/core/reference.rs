//! LK-001: References and the interpolation grammar.
//!
//! A `Reference` is an ordered path of segments addressing a location inside a
//! nested `Document`. Segments are either sequence indexes or identifiers
//! matching `[A-Za-z][A-Za-z0-9_]*`. References are validated on construction,
//! totally ordered by segment, and usable as map keys.
//!
//! Interpolations embed references in strings:
//! - `${module.net.output.vpc_id}` is a simple interpolated reference
//! - `arn:${module.db.output.name}/*` is a complex interpolated reference
//!
//! Interpolation text only accepts identifier segments. Parsing then printing an
//! interpolation reproduces the original string byte-for-byte.

use super::error::ReferenceParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::slice::SliceIndex;

static IDENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid identifier regex"));

static SIMPLE_INTERPOLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{([^}]*)\}$").expect("valid interpolation regex"));

static EMBEDDED_INTERPOLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(.*?)\}").expect("valid interpolation regex"));

// ============================================================================
// Segments
// ============================================================================

/// A validated mapping-key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    /// Validate `raw` as an identifier segment.
    pub fn new(raw: &str) -> Result<Self, ReferenceParseError> {
        if raw.is_empty() {
            return Err(ReferenceParseError::EmptySegment {
                raw: raw.to_string(),
            });
        }
        if !IDENT_PATTERN.is_match(raw) {
            return Err(ReferenceParseError::InvalidSegment {
                raw: raw.to_string(),
                segment: raw.to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Whether `raw` would be accepted by [`Ident::new`].
    pub fn is_valid(raw: &str) -> bool {
        IDENT_PATTERN.is_match(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One step of a reference path. Indexes order before keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Sequence index
    Index(usize),
    /// Mapping key
    Key(Ident),
}

impl Segment {
    /// Build a key segment, validating the identifier.
    pub fn key(raw: &str) -> Result<Self, ReferenceParseError> {
        Ident::new(raw).map(Self::Key)
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(ident) => Some(ident.as_str()),
            Self::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Key(_) => None,
        }
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<Ident> for Segment {
    fn from(ident: Ident) -> Self {
        Self::Key(ident)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{}", i),
            Self::Key(ident) => write!(f, "{}", ident),
        }
    }
}

// ============================================================================
// Reference
// ============================================================================

/// An immutable path into a nested document. The empty reference is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    path: Vec<Segment>,
}

impl Reference {
    /// The empty (root) reference.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            path: segments.into_iter().collect(),
        }
    }

    /// Build a reference of key segments only.
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, ReferenceParseError> {
        keys.iter()
            .map(|k| Segment::key(k.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(|path| Self { path })
    }

    /// Parse dotted text such as `a.0.b`. All-digit segments become indexes;
    /// an index may not carry leading zeros.
    pub fn parse(raw: &str) -> Result<Self, ReferenceParseError> {
        let mut path = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(ReferenceParseError::EmptySegment {
                    raw: raw.to_string(),
                });
            }
            if part.bytes().all(|b| b.is_ascii_digit()) {
                if part.len() > 1 && part.starts_with('0') {
                    return Err(ReferenceParseError::InvalidSegment {
                        raw: raw.to_string(),
                        segment: part.to_string(),
                    });
                }
                let index = part
                    .parse::<usize>()
                    .map_err(|_| ReferenceParseError::IndexOverflow {
                        raw: raw.to_string(),
                        segment: part.to_string(),
                    })?;
                path.push(Segment::Index(index));
                continue;
            }
            if !Ident::is_valid(part) {
                return Err(ReferenceParseError::InvalidSegment {
                    raw: raw.to_string(),
                    segment: part.to_string(),
                });
            }
            path.push(Segment::Key(Ident(part.to_string())));
        }
        Ok(Self { path })
    }

    /// Parse the inside of `${...}`, which only permits identifier segments.
    pub fn parse_interpolation(raw: &str) -> Result<Self, ReferenceParseError> {
        let parsed = Self::parse(raw)?;
        if let Some(Segment::Index(i)) = parsed.path.iter().find(|s| s.as_index().is_some()) {
            return Err(ReferenceParseError::NonIdentifierSegment {
                raw: raw.to_string(),
                segment: i.to_string(),
            });
        }
        Ok(parsed)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Segment> {
        self.path.get(idx)
    }

    pub fn first(&self) -> Option<&Segment> {
        self.path.first()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.path.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.path.iter()
    }

    /// A new reference with `segment` appended.
    pub fn child(&self, segment: impl Into<Segment>) -> Self {
        let mut path = self.path.clone();
        path.push(segment.into());
        Self { path }
    }

    /// A new reference with every segment of `other` appended.
    pub fn join(&self, other: &Reference) -> Self {
        let mut path = self.path.clone();
        path.extend(other.path.iter().cloned());
        Self { path }
    }

    /// A new reference over a sub-range of segments.
    pub fn slice<R>(&self, range: R) -> Self
    where
        R: SliceIndex<[Segment], Output = [Segment]>,
    {
        Self {
            path: self.path[range].to_vec(),
        }
    }

    /// Everything but the last segment; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.path.is_empty() {
            return None;
        }
        Some(self.slice(..self.path.len() - 1))
    }

    pub fn starts_with(&self, prefix: &Reference) -> bool {
        self.path.starts_with(&prefix.path)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, segment) in self.path.iter().enumerate() {
            if idx > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Reference {
    type Error = ReferenceParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.to_string()
    }
}

impl std::str::FromStr for Reference {
    type Err = ReferenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'a> IntoIterator for &'a Reference {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.path.iter()
    }
}

// ============================================================================
// Interpolated references
// ============================================================================

/// A reference written as `${a.b.c}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimpleInterpolatedReference(Reference);

impl SimpleInterpolatedReference {
    pub fn new(reference: Reference) -> Self {
        Self(reference)
    }

    /// Parse a string that is entirely one `${...}` interpolation.
    pub fn parse(raw: &str) -> Result<Option<Self>, ReferenceParseError> {
        match SIMPLE_INTERPOLATION.captures(raw) {
            Some(caps) => Reference::parse_interpolation(&caps[1]).map(|r| Some(Self(r))),
            None => Ok(None),
        }
    }

    pub fn reference(&self) -> &Reference {
        &self.0
    }

    pub fn into_reference(self) -> Reference {
        self.0
    }

    pub fn join(&self, other: &Reference) -> Self {
        Self(self.0.join(other))
    }
}

impl fmt::Display for SimpleInterpolatedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}}}", self.0)
    }
}

/// One piece of a complex interpolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fragment {
    Literal(String),
    Reference(SimpleInterpolatedReference),
}

/// A string mixing literal text with `${...}` references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComplexInterpolatedReference {
    fragments: Vec<Fragment>,
}

impl ComplexInterpolatedReference {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self { fragments }
    }

    /// Split `raw` on every non-greedy `${...}` occurrence. Returns `None` when
    /// the string holds no interpolation at all.
    pub fn parse(raw: &str) -> Result<Option<Self>, ReferenceParseError> {
        let mut fragments = Vec::new();
        let mut last = 0;
        for caps in EMBEDDED_INTERPOLATION.captures_iter(raw) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            if whole.start > last {
                fragments.push(Fragment::Literal(raw[last..whole.start].to_string()));
            }
            let reference = Reference::parse_interpolation(&caps[1])?;
            fragments.push(Fragment::Reference(SimpleInterpolatedReference(reference)));
            last = whole.end;
        }
        if fragments.is_empty() {
            return Ok(None);
        }
        if last < raw.len() {
            fragments.push(Fragment::Literal(raw[last..].to_string()));
        }
        Ok(Some(Self { fragments }))
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// The reference fragments, in order.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.fragments.iter().filter_map(|f| match f {
            Fragment::Reference(r) => Some(r.reference()),
            Fragment::Literal(_) => None,
        })
    }
}

impl fmt::Display for ComplexInterpolatedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(s) => f.write_str(s)?,
                Fragment::Reference(r) => write!(f, "{}", r)?,
            }
        }
        Ok(())
    }
}

/// A parsed interpolation value, either simple or mixed with literal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InterpolatedReference {
    Simple(SimpleInterpolatedReference),
    Complex(ComplexInterpolatedReference),
}

impl InterpolatedReference {
    /// Parse `raw`, preferring the simple form when the whole string is one
    /// interpolation.
    pub fn parse(raw: &str) -> Result<Option<Self>, ReferenceParseError> {
        if let Some(simple) = SimpleInterpolatedReference::parse(raw)? {
            return Ok(Some(Self::Simple(simple)));
        }
        Ok(ComplexInterpolatedReference::parse(raw)?.map(Self::Complex))
    }

    /// Every reference this interpolation points at.
    pub fn references(&self) -> Vec<&Reference> {
        match self {
            Self::Simple(s) => vec![s.reference()],
            Self::Complex(c) => c.references().collect(),
        }
    }
}

impl From<SimpleInterpolatedReference> for InterpolatedReference {
    fn from(simple: SimpleInterpolatedReference) -> Self {
        Self::Simple(simple)
    }
}

impl fmt::Display for InterpolatedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(s) => write!(f, "{}", s),
            Self::Complex(c) => write!(f, "{}", c),
        }
    }
}

impl TryFrom<String> for InterpolatedReference {
    type Error = ReferenceParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match Self::parse(&raw)? {
            Some(parsed) => Ok(parsed),
            None => Ok(Self::Complex(ComplexInterpolatedReference::new(vec![
                Fragment::Literal(raw),
            ]))),
        }
    }
}

impl From<InterpolatedReference> for String {
    fn from(interp: InterpolatedReference) -> Self {
        interp.to_string()
    }
}

/// Parse a document string value. `Ok(None)` means the string is a plain
/// literal with no interpolation in it.
pub fn parse_ref_string(raw: &str) -> Result<Option<InterpolatedReference>, ReferenceParseError> {
    InterpolatedReference::parse(raw)
}
