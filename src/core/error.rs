//! LK-003: Error types for reference parsing, document access, and link resolution.
//!
//! Every resolution failure is terminal. Variants carry the module alias and,
//! where one exists, the `Reference` path and relationship type involved so a
//! caller can render a precise diagnostic.

use super::reference::Reference;
use std::fmt;
use thiserror::Error;

/// Failure to parse dotted reference text or interpolation text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceParseError {
    #[error("empty path segment in '{raw}'")]
    EmptySegment { raw: String },

    #[error("invalid path segment '{segment}' in '{raw}'")]
    InvalidSegment { raw: String, segment: String },

    #[error("index segment '{segment}' in '{raw}' is out of range")]
    IndexOverflow { raw: String, segment: String },

    #[error("interpolation '{raw}' may only contain identifier segments, found '{segment}'")]
    NonIdentifierSegment { raw: String, segment: String },
}

/// Failure to read or write a path inside a `Document`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("no value at '{path}'")]
    Missing { path: Reference },

    #[error("expected {expected} at '{path}', found {found}")]
    WrongType {
        path: Reference,
        expected: &'static str,
        found: &'static str,
    },

    #[error("index {index} out of range at '{path}' (length {len})")]
    IndexOutOfRange {
        path: Reference,
        index: usize,
        len: usize,
    },
}

/// Error category, following the resolution error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Reference,
    LinkShape,
    Graph,
    Document,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "schema"),
            Self::Reference => write!(f, "reference"),
            Self::LinkShape => write!(f, "link"),
            Self::Graph => write!(f, "graph"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// A failed resolution run. No partial results accompany it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    // -- Schema --
    #[error("unknown module type `{module_type}` for module {alias}")]
    UnknownModuleType { alias: String, module_type: String },

    #[error("duplicate modules with alias {alias}")]
    DuplicateAlias { alias: String },

    // -- Reference --
    #[error("malformed interpolation in module {alias} at {path}: {error}")]
    MalformedInterpolation {
        alias: String,
        path: Reference,
        error: ReferenceParseError,
    },

    #[error("module {alias} references non-existent module {target} at {path}")]
    UnknownModuleReference {
        alias: String,
        path: Reference,
        target: String,
    },

    #[error("module {alias} has a module reference without an alias at {path}")]
    MissingModuleAlias { alias: String, path: Reference },

    #[error("module {alias} has an interpolation under key '{key}' at '{path}', which cannot be addressed by a reference")]
    NonAddressableKey {
        alias: String,
        path: Reference,
        key: String,
    },

    #[error("module {alias} has link ({target}) to unknown module")]
    UnknownLinkTarget { alias: String, target: String },

    #[error("module alias {alias} cannot be used in a reference: {error}")]
    InvalidAlias {
        alias: String,
        error: ReferenceParseError,
    },

    // -- Link shape --
    #[error("module {alias} has no input link spec for type {link_type}")]
    UnknownLinkType { alias: String, link_type: String },

    #[error("module {provider} does not provide link type {link_type} required by {alias}")]
    MissingOutputLinkSpec {
        alias: String,
        provider: String,
        link_type: String,
    },

    #[error("link type {link_type} already in use on {alias}")]
    DuplicateLinkType { alias: String, link_type: String },

    #[error(
        "cannot automatically link type {link_type} on {alias} since more than 1 module provides it: {}",
        .providers.join(", ")
    )]
    AmbiguousAutomaticLink {
        alias: String,
        link_type: String,
        providers: Vec<String>,
    },

    #[error("unexpected empty {side} connections list on {alias} (link {provider}, type {link_type})")]
    EmptyConnections {
        alias: String,
        provider: String,
        link_type: String,
        side: &'static str,
    },

    #[error(
        "connection source {declared} on {alias} (link {provider}, type {link_type}) is not a target of the provider's output connections"
    )]
    UnmatchedConnection {
        alias: String,
        provider: String,
        link_type: String,
        declared: Reference,
    },

    #[error("one-sided wildcard connection on {alias} (link {provider}, type {link_type}): {side} is set without its counterpart")]
    OneSidedWildcard {
        alias: String,
        provider: String,
        link_type: String,
        side: &'static str,
    },

    // -- Graph --
    #[error("link cycle detected in these modules: {}", .aliases.join(", "))]
    LinkCycle { aliases: Vec<String> },

    // -- Document --
    #[error("cannot write input of module {alias}: {error}")]
    Document { alias: String, error: DocumentError },
}

impl ResolutionError {
    /// The taxonomy category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownModuleType { .. } | Self::DuplicateAlias { .. } => ErrorKind::Schema,
            Self::MalformedInterpolation { .. }
            | Self::UnknownModuleReference { .. }
            | Self::MissingModuleAlias { .. }
            | Self::NonAddressableKey { .. }
            | Self::UnknownLinkTarget { .. }
            | Self::InvalidAlias { .. } => ErrorKind::Reference,
            Self::UnknownLinkType { .. }
            | Self::MissingOutputLinkSpec { .. }
            | Self::DuplicateLinkType { .. }
            | Self::AmbiguousAutomaticLink { .. }
            | Self::EmptyConnections { .. }
            | Self::UnmatchedConnection { .. }
            | Self::OneSidedWildcard { .. } => ErrorKind::LinkShape,
            Self::LinkCycle { .. } => ErrorKind::Graph,
            Self::Document { .. } => ErrorKind::Document,
        }
    }

    /// The consuming module the error was detected on, if any.
    pub fn alias(&self) -> Option<&str> {
        match self {
            Self::UnknownModuleType { alias, .. }
            | Self::DuplicateAlias { alias }
            | Self::MalformedInterpolation { alias, .. }
            | Self::UnknownModuleReference { alias, .. }
            | Self::MissingModuleAlias { alias, .. }
            | Self::NonAddressableKey { alias, .. }
            | Self::UnknownLinkTarget { alias, .. }
            | Self::InvalidAlias { alias, .. }
            | Self::UnknownLinkType { alias, .. }
            | Self::MissingOutputLinkSpec { alias, .. }
            | Self::DuplicateLinkType { alias, .. }
            | Self::AmbiguousAutomaticLink { alias, .. }
            | Self::EmptyConnections { alias, .. }
            | Self::UnmatchedConnection { alias, .. }
            | Self::OneSidedWildcard { alias, .. }
            | Self::Document { alias, .. } => Some(alias),
            Self::LinkCycle { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lk003_kind_mapping() {
        let e = ResolutionError::DuplicateAlias {
            alias: "db".to_string(),
        };
        assert_eq!(e.kind(), ErrorKind::Schema);

        let e = ResolutionError::LinkCycle {
            aliases: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(e.kind(), ErrorKind::Graph);
        assert_eq!(e.alias(), None);
        assert_eq!(e.to_string(), "link cycle detected in these modules: a, b");
    }

    #[test]
    fn test_lk003_ambiguous_message() {
        let e = ResolutionError::AmbiguousAutomaticLink {
            alias: "app".to_string(),
            link_type: "db".to_string(),
            providers: vec!["pg1".to_string(), "pg2".to_string()],
        };
        assert_eq!(e.kind(), ErrorKind::LinkShape);
        assert_eq!(e.alias(), Some("app"));
        assert!(e.to_string().contains("pg1, pg2"));
    }

    #[test]
    fn test_lk003_document_error_display() {
        let e = DocumentError::IndexOutOfRange {
            path: Reference::parse("a.b").unwrap(),
            index: 3,
            len: 1,
        };
        assert_eq!(e.to_string(), "index 3 out of range at 'a.b' (length 1)");
        assert_eq!(ErrorKind::LinkShape.to_string(), "link");
    }
}
