//! Diagnostic sink and the error taxonomy (§4.G, §7).

use std::cmp::Ordering;

/// Where a diagnostic was raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
    /// Dotted path into the template (e.g. `node_templates.db.requirements[0]`),
    /// present even when line/column are unknown (e.g. a reference built
    /// purely in-memory by a test).
    pub path: String,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, path: impl Into<String>) -> Self {
        SourceLocation {
            file: file.into(),
            line: 0,
            column: 0,
            path: path.into(),
        }
    }

    pub fn at(file: impl Into<String>, line: usize, column: usize, path: impl Into<String>) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            column,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// The full error taxonomy from §7, one variant per kind. Each carries just
/// the structured fields it needs; `#[error("...")]` supplies the
/// human-readable message so `Display` alone satisfies §6's "kind token and
/// message" requirement.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiagnosticKind {
    #[error("YAML tree does not match expected shape: {message}")]
    SchemaError { message: String },

    #[error("unsupported tosca_definitions_version `{version}`")]
    UnsupportedVersionError { version: String },

    #[error("failed to import `{reference}`: {message}")]
    ImportError { reference: String, message: String },

    #[error("derivation cycle: {}", chain.join(" -> "))]
    TypeCycleError { chain: Vec<String> },

    #[error("duplicate type definition `{name}`")]
    DuplicateTypeError { name: String },

    #[error("unknown type `{name}`")]
    UnknownTypeError { name: String },

    #[error("incompatible derivation for `{child}` from `{parent}`: {message}")]
    IncompatibleDerivationError {
        child: String,
        parent: String,
        message: String,
    },

    #[error("unknown field `{field}` on `{on}`")]
    UnknownFieldError { on: String, field: String },

    #[error("missing required field `{field}` on `{on}`")]
    MissingRequiredFieldError { on: String, field: String },

    #[error("missing required input `{name}`")]
    MissingRequiredInputError { name: String },

    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("type mismatch: {message}")]
    TypeMismatchError { message: String },

    #[error("invalid scalar-unit.{kind} value `{input}`")]
    InvalidScalarUnitError { input: String, kind: String },

    #[error("ambiguous requirement target for `{requirement}` on `{node}`: candidates {candidates:?}")]
    AmbiguousTargetError {
        node: String,
        requirement: String,
        candidates: Vec<String>,
    },

    #[error("no node matches node_filter for requirement `{requirement}` on `{node}`")]
    NoMatchError { node: String, requirement: String },

    #[error("requirement `{requirement}` on `{node}` bound {actual} times, expected [{min}, {max}]")]
    OccurrenceError {
        node: String,
        requirement: String,
        actual: usize,
        min: usize,
        max: String,
    },

    #[error("function evaluation failed: {message}")]
    FunctionEvaluationError { message: String },

    #[error("unknown intrinsic function `{name}`")]
    UnknownFunctionError { name: String },

    #[error("substitution mapping error: {message}")]
    SubstitutionMappingError { message: String },
}

impl DiagnosticKind {
    /// The three stage-aborting conditions named in §7.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiagnosticKind::ImportError { .. }
                | DiagnosticKind::TypeCycleError { .. }
                | DiagnosticKind::UnsupportedVersionError { .. }
        )
    }

    /// Short machine-readable tag, independent of the `Display` message,
    /// used for the "kind token" part of §6's exit output.
    pub fn tag(&self) -> &'static str {
        match self {
            DiagnosticKind::SchemaError { .. } => "SchemaError",
            DiagnosticKind::UnsupportedVersionError { .. } => "UnsupportedVersionError",
            DiagnosticKind::ImportError { .. } => "ImportError",
            DiagnosticKind::TypeCycleError { .. } => "TypeCycleError",
            DiagnosticKind::DuplicateTypeError { .. } => "DuplicateTypeError",
            DiagnosticKind::UnknownTypeError { .. } => "UnknownTypeError",
            DiagnosticKind::IncompatibleDerivationError { .. } => "IncompatibleDerivationError",
            DiagnosticKind::UnknownFieldError { .. } => "UnknownFieldError",
            DiagnosticKind::MissingRequiredFieldError { .. } => "MissingRequiredFieldError",
            DiagnosticKind::MissingRequiredInputError { .. } => "MissingRequiredInputError",
            DiagnosticKind::ConstraintViolation { .. } => "ConstraintViolation",
            DiagnosticKind::TypeMismatchError { .. } => "TypeMismatchError",
            DiagnosticKind::InvalidScalarUnitError { .. } => "InvalidScalarUnitError",
            DiagnosticKind::AmbiguousTargetError { .. } => "AmbiguousTargetError",
            DiagnosticKind::NoMatchError { .. } => "NoMatchError",
            DiagnosticKind::OccurrenceError { .. } => "OccurrenceError",
            DiagnosticKind::FunctionEvaluationError { .. } => "FunctionEvaluationError",
            DiagnosticKind::UnknownFunctionError { .. } => "UnknownFunctionError",
            DiagnosticKind::SubstitutionMappingError { .. } => "SubstitutionMappingError",
        }
    }
}

/// One accumulated diagnostic, as defined in §4.G.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub source: SourceLocation,
    pub related: Vec<SourceLocation>,
    /// Set for the `deprecated`-tagged warning in end-to-end scenario 6.
    pub tag: Option<&'static str>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, source: SourceLocation) -> Self {
        Diagnostic {
            severity: Severity::Error,
            kind,
            source,
            related: Vec::new(),
            tag: None,
        }
    }

    pub fn warning(kind: DiagnosticKind, source: SourceLocation) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            kind,
            source,
            related: Vec::new(),
            tag: None,
        }
    }

    pub fn tagged(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: [{}] {}",
            self.source.file,
            self.source.line,
            self.source.column,
            self.kind.tag(),
            self.kind
        )
    }
}

/// Accumulates diagnostics across all pipeline stages (§4.G). Best-effort by
/// default; `strict` short-circuits the current stage on the first error by
/// having callers check `sink.should_abort()` after each push.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    strict: bool,
}

impl DiagnosticSink {
    pub fn new(strict: bool) -> Self {
        DiagnosticSink {
            diagnostics: Vec::new(),
            strict,
        }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, kind: DiagnosticKind, source: SourceLocation) {
        self.push(Diagnostic::error(kind, source));
    }

    pub fn warning(&mut self, kind: DiagnosticKind, source: SourceLocation) {
        self.push(Diagnostic::warning(kind, source));
    }

    /// True once a fatal condition has been recorded, or (in strict mode)
    /// once any error has been recorded.
    pub fn should_abort(&self) -> bool {
        self.diagnostics.iter().any(|d| {
            d.is_error() && (d.kind.is_fatal() || self.strict)
        })
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Diagnostics sorted by `(file, line, column)` as required by §7.
    pub fn into_sorted(mut self) -> Vec<Diagnostic> {
        self.diagnostics.sort_by(|a, b| {
            (&a.source.file, a.source.line, a.source.column).cmp(&(
                &b.source.file,
                b.source.line,
                b.source.column,
            ))
        });
        self.diagnostics
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

impl PartialEq for SourceLocation {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file && self.line == other.line && self.column == other.column
    }
}
impl Eq for SourceLocation {}

impl PartialOrd for Diagnostic {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Diagnostic {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.source.file, self.source.line, self.source.column).cmp(&(
            &other.source.file,
            other.source.line,
            other.source.column,
        ))
    }
}
impl PartialEq for Diagnostic {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.kind.tag() == other.kind.tag()
    }
}
impl Eq for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_sorts_by_location() {
        let mut sink = DiagnosticSink::new(false);
        sink.error(
            DiagnosticKind::UnknownFieldError {
                on: "a".into(),
                field: "x".into(),
            },
            SourceLocation::at("b.yaml", 5, 1, "a"),
        );
        sink.error(
            DiagnosticKind::UnknownFieldError {
                on: "a".into(),
                field: "y".into(),
            },
            SourceLocation::at("a.yaml", 2, 1, "a"),
        );
        let sorted = sink.into_sorted();
        assert_eq!(sorted[0].source.file, "a.yaml");
        assert_eq!(sorted[1].source.file, "b.yaml");
    }

    #[test]
    fn fatal_kinds_abort_even_in_lenient_mode() {
        let mut sink = DiagnosticSink::new(false);
        sink.error(
            DiagnosticKind::TypeCycleError {
                chain: vec!["A".into(), "B".into(), "A".into()],
            },
            SourceLocation::new("t.yaml", "node_types.A"),
        );
        assert!(sink.should_abort());
    }

    #[test]
    fn non_fatal_errors_do_not_abort_in_lenient_mode() {
        let mut sink = DiagnosticSink::new(false);
        sink.error(
            DiagnosticKind::ConstraintViolation {
                message: "bad".into(),
            },
            SourceLocation::new("t.yaml", "inputs.cpus"),
        );
        assert!(!sink.should_abort());
        assert!(sink.has_errors());
    }
}
