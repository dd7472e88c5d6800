//! Phase orchestration and output mapping.

use std::fs;
use std::path::PathBuf;

use tern_ast::{ModuleDecl, Symbol};
use tern_diag::{has_errors, Category, Diagnostic, Severity};
use tern_infer::typeck::{check_module, TyperResult};
use tern_infer::GlobalTypes;
use tern_ir::LiftedModule;
use tern_ml::{emit, transform::transform, TransformError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Ml,
}

/// Whether lowered modules are written to disk or only returned as
/// source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    File,
    Source,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub backend: BackendKind,
    pub output: OutputMode,
    pub out_dir: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Ml,
            output: OutputMode::File,
            out_dir: PathBuf::from("out"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// A phase failed; downstream phases must not run.
#[derive(Debug, thiserror::Error)]
pub enum CompilationFailure {
    #[error("type checking failed with {} error(s)", count_errors(diagnostics))]
    Typer { diagnostics: Vec<Diagnostic> },
    #[error(transparent)]
    Backend(#[from] TransformError),
    #[error("failed to write `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn count_errors(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count()
}

impl CompilationFailure {
    /// The source-level diagnostics behind this failure; what the driver
    /// surfaces before exiting non-zero. I/O failures carry no source
    /// location and report through `Display` instead.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            CompilationFailure::Typer { diagnostics } => diagnostics.clone(),
            CompilationFailure::Backend(error) => vec![backend_diagnostic(error)],
            CompilationFailure::Io { .. } => Vec::new(),
        }
    }
}

/// Render a back-end abort through the shared diagnostic taxonomy.
pub fn backend_diagnostic(error: &TransformError) -> Diagnostic {
    let category = match error {
        TransformError::MutualRecursion { .. } => Category::MutualRecursion,
        TransformError::PolymorphicExtern { .. } | TransformError::HigherOrderExtern { .. } => {
            Category::UnsupportedExtern
        }
    };
    Diagnostic::error(category, error.to_string())
}

/// The driver's exit-code policy: non-zero iff any error diagnostic.
pub fn exit_code(diagnostics: &[Diagnostic]) -> i32 {
    if has_errors(diagnostics) {
        1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Phase 1: type checking against the already-checked dependencies.
pub fn typecheck_module(
    module: &ModuleDecl,
    global: GlobalTypes,
) -> Result<TyperResult, CompilationFailure> {
    let result = check_module(module, global);
    if has_errors(&result.diagnostics) {
        return Err(CompilationFailure::Typer {
            diagnostics: result.diagnostics,
        });
    }
    Ok(result)
}

/// One lowered module, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct MlArtifact {
    pub path: PathBuf,
    pub source: String,
}

/// Phase 2: the ML back end. The lifter between type checking and this
/// phase is an external collaborator.
pub fn transform_module(
    lifted: &LiftedModule,
    main: Option<&Symbol>,
    config: &BackendConfig,
) -> Result<MlArtifact, CompilationFailure> {
    let toplevel = transform(lifted, main)?;
    let source = emit::format_toplevel(&toplevel);
    Ok(MlArtifact {
        path: output_path(config, &lifted.path),
        source,
    })
}

/// `<out>/<module path with '/' mapped to '_'>.sml`
pub fn output_path(config: &BackendConfig, module_path: &str) -> PathBuf {
    config
        .out_dir
        .join(format!("{}.sml", module_path.replace('/', "_")))
}

pub fn write_artifact(artifact: &MlArtifact) -> Result<PathBuf, CompilationFailure> {
    if let Some(parent) = artifact.path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| CompilationFailure::Io {
                path: artifact.path.clone(),
                source,
            })?;
        }
    }
    fs::write(&artifact.path, &artifact.source).map_err(|source| CompilationFailure::Io {
        path: artifact.path.clone(),
        source,
    })?;
    Ok(artifact.path.clone())
}

/// Run the full pipeline over one module. `lift` is the external lifter:
/// it receives the typer's results and produces the lifted IR plus the
/// entry point, if any.
pub fn compile<L>(
    module: &ModuleDecl,
    global: GlobalTypes,
    lift: L,
    config: &BackendConfig,
) -> Result<(TyperResult, MlArtifact), CompilationFailure>
where
    L: FnOnce(&ModuleDecl, &TyperResult) -> (LiftedModule, Option<Symbol>),
{
    let typed = typecheck_module(module, global)?;
    let (lifted, main) = lift(module, &typed);
    let artifact = transform_module(&lifted, main.as_ref(), config)?;
    if config.output == OutputMode::File {
        write_artifact(&artifact)?;
    }
    Ok((typed, artifact))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_flattens_module_paths() {
        let config = BackendConfig {
            out_dir: PathBuf::from("build"),
            ..BackendConfig::default()
        };
        assert_eq!(
            output_path(&config, "examples/hello/world"),
            PathBuf::from("build/examples_hello_world.sml")
        );
    }

    #[test]
    fn exit_code_follows_severity() {
        assert_eq!(exit_code(&[]), 0);
        let warn = Diagnostic::warning(Category::UnusedHandler, "unused");
        assert_eq!(exit_code(&[warn.clone()]), 0);
        let err = Diagnostic::error(Category::TypeMismatch, "boom");
        assert_eq!(exit_code(&[warn, err]), 1);
    }

    #[test]
    fn backend_failures_map_onto_the_taxonomy() {
        let cycle = TransformError::MutualRecursion {
            names: vec!["even".to_string(), "odd".to_string()],
        };
        let diag = backend_diagnostic(&cycle);
        assert_eq!(diag.category, Category::MutualRecursion);
        assert_eq!(diag.code.as_deref(), Some("B0001"));
        assert!(diag.message.contains("even"));
        assert!(diag.message.contains("odd"));

        let poly = TransformError::PolymorphicExtern {
            name: "id".to_string(),
        };
        assert_eq!(
            backend_diagnostic(&poly).category,
            Category::UnsupportedExtern
        );
        let higher = TransformError::HigherOrderExtern {
            name: "callit".to_string(),
        };
        assert_eq!(
            backend_diagnostic(&higher).category,
            Category::UnsupportedExtern
        );
    }

    #[test]
    fn failure_diagnostics_feed_the_exit_code() {
        let failure = CompilationFailure::Backend(TransformError::MutualRecursion {
            names: vec!["a".to_string()],
        });
        let diagnostics = failure.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(exit_code(&diagnostics), 1);
    }

    #[test]
    fn typer_errors_stop_the_pipeline() {
        use tern_ast::{
            Definition, Expr, ExprKind, FileId, FunDef, Lit, ReturnAnnotation, Span, Stmt,
            StmtKind, Symbol, TypeAnnotation,
        };
        // fun broken(): Int = "no"
        let module = ModuleDecl {
            path: "m".to_string(),
            decls: Vec::new(),
            externs: Vec::new(),
            definitions: vec![Definition::Fun(FunDef {
                id: Symbol::block(1, "broken"),
                tparams: Vec::new(),
                cparams: Vec::new(),
                vparams: Vec::new(),
                bparams: Vec::new(),
                ret: Some(ReturnAnnotation {
                    result: TypeAnnotation::Builtin(tern_ast::BuiltinType::Int),
                    effects: Vec::new(),
                }),
                body: Stmt::new(
                    StmtKind::Return(Expr::new(
                        ExprKind::Lit(Lit::String("no".to_string())),
                        Span::new(FileId(0), 0, 2),
                    )),
                    Span::new(FileId(0), 0, 2),
                ),
                span: Span::new(FileId(0), 0, 10),
            })],
        };
        let err = typecheck_module(&module, GlobalTypes::new()).unwrap_err();
        let CompilationFailure::Typer { diagnostics } = err else {
            panic!("expected a typer failure");
        };
        assert!(has_errors(&diagnostics));
    }
}
