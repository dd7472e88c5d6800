//! Pattern-match exhaustiveness checking.
//!
//! Deliberately a no-op for now. The shape of the real analysis is a
//! per-constructor recursion on data declarations: split the scrutinee by
//! the constructors of its type, recurse into sub-patterns, and report any
//! constructor no clause covers. The signature below already takes
//! everything that analysis needs, so enabling it later does not touch
//! call sites.

use tern_ast::Pattern;
use tern_diag::Diagnostic;
use tern_types::ValueType;

use crate::typeck::DeclRegistry;

/// Check the clauses of a match against the scrutinee type.
///
/// Returns missing-case diagnostics. Currently always empty.
pub fn check_clauses(
    _registry: &DeclRegistry,
    _scrutinee: &ValueType,
    _patterns: &[Pattern],
    _has_default: bool,
) -> Vec<Diagnostic> {
    Vec::new()
}
