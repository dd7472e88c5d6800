//! Driver for the Tern middle and back end.
//!
//! The front end (parser, resolver) and the lifter are external
//! collaborators: they hand this crate a resolved [`tern_ast::ModuleDecl`]
//! and, after type checking, a [`tern_ir::LiftedModule`]. This crate
//! orchestrates the phases in between and maps lowered modules onto
//! output files. A phase with error diagnostics skips everything
//! downstream.

pub mod compiler;

pub use compiler::{
    backend_diagnostic, compile, exit_code, output_path, transform_module, typecheck_module,
    write_artifact, BackendConfig, BackendKind, CompilationFailure, MlArtifact, OutputMode,
};
