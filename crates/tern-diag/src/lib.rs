//! Error reporting and diagnostics for Tern.
//!
//! This crate provides structured diagnostics with source location
//! tracking. Diagnostics are created by the typer and the back end and
//! rendered here for display. One invariant matters everywhere: no raw
//! unification variables in user-facing output — callers substitute before
//! formatting types into messages.

use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Broad category for diagnostics. Used for filtering and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Lookup of an unknown or untyped symbol.
    UndefinedName,
    /// Unification failure: expected X, got Y.
    TypeMismatch,
    /// A type variable escaped the scope that introduced it.
    EscapingSkolem,
    /// An existential effect escaped its handler clause.
    EscapingEffect,
    /// Wrong number of arguments or pattern fields.
    ArityMismatch,
    /// A handler does not implement a declared operation.
    MissingOperation,
    /// A handler implements an operation more than once.
    DuplicateOperation,
    /// Overload resolution found more than one well-typed candidate.
    AmbiguousOverload,
    /// No overload candidate type-checked.
    FailedOverload,
    /// A control effect reached the top level of a definition.
    UnhandledEffect,
    /// A handled effect was not used by the handled program.
    UnusedHandler,
    /// A block symbol was used in expression position.
    BlockAsExpression,
    /// Assignment to something that is not a `var` binder.
    InvalidAssignment,
    /// The back end found a cycle in a definition group.
    MutualRecursion,
    /// The back end cannot lower this extern.
    UnsupportedExtern,
}

impl Category {
    pub const ALL: [Category; 15] = [
        Category::UndefinedName,
        Category::TypeMismatch,
        Category::EscapingSkolem,
        Category::EscapingEffect,
        Category::ArityMismatch,
        Category::MissingOperation,
        Category::DuplicateOperation,
        Category::AmbiguousOverload,
        Category::FailedOverload,
        Category::UnhandledEffect,
        Category::UnusedHandler,
        Category::BlockAsExpression,
        Category::InvalidAssignment,
        Category::MutualRecursion,
        Category::UnsupportedExtern,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::UndefinedName => "undefined_name",
            Category::TypeMismatch => "type_mismatch",
            Category::EscapingSkolem => "escaping_skolem",
            Category::EscapingEffect => "escaping_effect",
            Category::ArityMismatch => "arity_mismatch",
            Category::MissingOperation => "missing_operation",
            Category::DuplicateOperation => "duplicate_operation",
            Category::AmbiguousOverload => "ambiguous_overload",
            Category::FailedOverload => "failed_overload",
            Category::UnhandledEffect => "unhandled_effect",
            Category::UnusedHandler => "unused_handler",
            Category::BlockAsExpression => "block_as_expression",
            Category::InvalidAssignment => "invalid_assignment",
            Category::MutualRecursion => "mutual_recursion",
            Category::UnsupportedExtern => "unsupported_extern",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::UndefinedName => "T0001",
            Category::TypeMismatch => "T0002",
            Category::EscapingSkolem => "T0003",
            Category::EscapingEffect => "T0004",
            Category::ArityMismatch => "T0005",
            Category::MissingOperation => "T0006",
            Category::DuplicateOperation => "T0007",
            Category::AmbiguousOverload => "T0008",
            Category::FailedOverload => "T0009",
            Category::UnhandledEffect => "T0010",
            Category::UnusedHandler => "T0011",
            Category::BlockAsExpression => "T0012",
            Category::InvalidAssignment => "T0013",
            Category::MutualRecursion => "B0001",
            Category::UnsupportedExtern => "B0002",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::UndefinedName => "A referenced symbol has no type entry.",
            Category::TypeMismatch => "Expression type does not match the expected type.",
            Category::EscapingSkolem => {
                "A type variable escaped the unification scope that created it."
            }
            Category::EscapingEffect => {
                "An operation's existential type leaked into the clause's effects."
            }
            Category::ArityMismatch => {
                "A call or pattern supplies the wrong number of arguments."
            }
            Category::MissingOperation => {
                "A handler leaves one of the interface's operations unimplemented."
            }
            Category::DuplicateOperation => {
                "A handler implements the same operation more than once."
            }
            Category::AmbiguousOverload => {
                "More than one candidate of an overloaded name type-checks."
            }
            Category::FailedOverload => "No candidate of an overloaded name type-checks.",
            Category::UnhandledEffect => {
                "A control effect is still live at the top level of a definition."
            }
            Category::UnusedHandler => "A handled effect is not used by the handled program.",
            Category::BlockAsExpression => {
                "Blocks are second-class and cannot be used as expressions."
            }
            Category::InvalidAssignment => "Only `var` binders can be assigned to.",
            Category::MutualRecursion => {
                "The ML back end does not support mutually recursive functions."
            }
            Category::UnsupportedExtern => {
                "The ML back end only lowers monomorphic, first-order externs."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of tern-ast's Span)
// ---------------------------------------------------------------------------

/// A source location for diagnostics.
///
/// Uses byte offsets. Callers convert from `tern-ast` spans to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. T0002).
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong.
    pub location: Option<SourceLocation>,
    /// Additional labeled spans (e.g. "expected type came from here").
    pub labels: Vec<DiagLabel>,
    /// Suggested fix, if any.
    pub help: Option<String>,
}

/// A labeled source span within a diagnostic.
#[derive(Debug, Clone)]
pub struct DiagLabel {
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Warning,
            category,
            message: message.into(),
            location: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_label(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.labels.push(DiagLabel {
            location,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Prefix the primary message; overload resolution uses this to group
    /// the diagnostics of failed candidates.
    pub fn prefixed(mut self, prefix: &str) -> Self {
        self.message = format!("{prefix}{}", self.message);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        if let Some(code) = &self.code {
            write!(f, "{prefix}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{prefix}: {}", self.message)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

/// Whether any diagnostic in the batch is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| d.severity == Severity::Error)
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn multiple(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_builder() {
        let loc = SourceLocation {
            file_id: 0,
            start: 10,
            end: 20,
        };
        let diag = Diagnostic::error(Category::TypeMismatch, "Expected Int but got String")
            .at(loc)
            .with_help("annotate the binding");

        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code.as_deref(), Some("T0002"));
        assert_eq!(diag.category, Category::TypeMismatch);
        assert!(diag.message.contains("Expected Int"));
        assert!(diag.help.unwrap().contains("annotate"));
    }

    #[test]
    fn diagnostic_display() {
        let diag = Diagnostic::error(Category::AmbiguousOverload, "Ambiguous reference to `f`");
        let s = format!("{diag}");
        assert!(s.starts_with("error[T0008]: Ambiguous reference"));
    }

    #[test]
    fn category_metadata_is_stable_and_unique() {
        let mut codes = std::collections::BTreeSet::new();
        for cat in Category::all() {
            assert!(!cat.as_str().is_empty());
            assert!(!cat.description().is_empty());
            assert!(
                codes.insert(cat.code()),
                "duplicate diagnostic code detected: {}",
                cat.code()
            );
        }
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let warn = Diagnostic::warning(Category::UnusedHandler, "Unused handler for `Exc`");
        assert!(!has_errors(&[warn.clone()]));
        let err = Diagnostic::error(Category::TypeMismatch, "mismatch");
        assert!(has_errors(&[warn, err]));
    }
}
