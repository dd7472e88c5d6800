//! Tracing types for solver observability.
//!
//! These types capture step-by-step traces of unification, letting tools
//! and tests inspect the solver's reasoning. All tracing is opt-in via
//! `Unifier::enable_tracing()` — zero overhead when disabled.

use serde::Serialize;

/// A single step in a unification trace.
#[derive(Debug, Clone, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub detail: String,
}

/// What action was taken during a unification step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Types are already identical — no-op.
    Identity,
    /// Structural recursion: decompose compound types.
    Decompose,
    /// Unification variable bound to a type.
    Bind,
    /// Capture variable bound to a capture set.
    BindCapture,
    /// A function type was instantiated with fresh variables.
    Instantiate,
    /// Occurs check fired — infinite type prevented.
    OccursCheck,
    /// Unification failed — type mismatch.
    Error,
}
