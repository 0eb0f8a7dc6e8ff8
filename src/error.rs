//! Error taxonomy for a generation run.
//!
//! - [`DocumentParseError`]: malformed input, fatal, nothing is emitted.
//! - [`BindingError`]: one operation disagrees with its path, non-fatal; the
//!   operation is dropped and the error lands in the diagnostics report.
//! - [`DuplicatePathError`]: the path set is ambiguous, fatal.
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

// ————————————————————————————————————————————————————————————————————————————
// FATAL
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Error)]
pub enum DocumentParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}: invalid JSON: {message}")]
    Json { origin: String, message: String },
    #[error("{origin}: invalid YAML: {message}")]
    Yaml { origin: String, message: String },
    #[error("{origin}: at {location}: {message}")]
    Structure {
        origin: String,
        location: String,
        message: String,
    },
    #[error("{origin}: missing `openapi` version field")]
    MissingVersion { origin: String },
    #[error("{origin}: unsupported OpenAPI version {version:?} (expected 3.x)")]
    UnsupportedVersion { origin: String, version: String },
    #[error("{origin}: JSON pointer {pointer} selects nothing")]
    PointerNotFound { origin: String, pointer: String },
    #[error("{origin}: jq filter failed: {message}")]
    Filter { origin: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DuplicatePathError {
    #[error("path `{second}` normalizes to the same segments as `{first}`")]
    SamePath { first: String, second: String },
    #[error("path `{path}`: templated segment `{segment}` conflicts with `{existing}` at the same position")]
    TemplateConflict {
        path: String,
        existing: String,
        segment: String,
    },
}

/// Anything that aborts a run.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Document(#[from] DocumentParseError),
    #[error(transparent)]
    DuplicatePath(#[from] DuplicatePathError),
    #[error("invalid path pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("config {path}: {message}")]
    Config { path: PathBuf, message: String },
}

// ————————————————————————————————————————————————————————————————————————————
// NON-FATAL
// ————————————————————————————————————————————————————————————————————————————

/// An operation that could not be bound. `pointer` locates the operation,
/// e.g. `#/paths/~1books~1{id}/get`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{pointer}: {kind}")]
pub struct BindingError {
    pub pointer: String,
    pub kind: BindingErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum BindingErrorKind {
    #[error("path parameter `{name}` has no matching placeholder in the path template")]
    UnmatchedPathParameter { name: String },
    #[error("placeholder `{{{name}}}` has no declared path parameter")]
    UndeclaredPlaceholder { name: String },
    #[error("parameter `{name}` is declared more than once in {location}")]
    DuplicateParameter { name: String, location: String },
    #[error("parameter `{name}` has unknown location `{location}`")]
    UnknownLocation { name: String, location: String },
    #[error("unresolvable reference `{reference}`")]
    UnresolvedReference { reference: String },
    #[error("malformed component at {location}: {message}")]
    MalformedComponent { location: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Warning,
    Error,
}

/// One line of the diagnostics report shipped alongside the artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub pointer: String,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            pointer: pointer.into(),
            message: message.into(),
        }
    }
}

impl From<&BindingError> for Diagnostic {
    fn from(error: &BindingError) -> Self {
        Self {
            severity: Severity::Error,
            pointer: error.pointer.clone(),
            message: error.kind.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_error_display_names_the_operation() {
        let error = BindingError {
            pointer: "#/paths/~1books~1{id}/get".into(),
            kind: BindingErrorKind::UndeclaredPlaceholder { name: "id".into() },
        };
        assert_eq!(
            error.to_string(),
            "#/paths/~1books~1{id}/get: placeholder `{id}` has no declared path parameter"
        );
        let diagnostic = Diagnostic::from(&error);
        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.pointer, error.pointer);
    }

    #[test]
    fn binding_error_serializes_with_reason_tag() {
        let error = BindingError {
            pointer: "#/paths/~1a/get".into(),
            kind: BindingErrorKind::UnmatchedPathParameter { name: "x".into() },
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["kind"]["reason"], "unmatchedPathParameter");
        assert_eq!(value["kind"]["name"], "x");
    }
}
