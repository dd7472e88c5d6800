//! End-to-end driver tests: resolved tree in, SML text out.
//!
//! The lifter is an external collaborator, so these tests play its role
//! with hand-built lifted IR.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tern::{compile, exit_code, BackendConfig, CompilationFailure, OutputMode};
use tern_ast::{
    BuiltinType, Definition, Expr, ExprKind, FileId, FunDef, Lit, ModuleDecl, ReturnAnnotation,
    Span, Spanned, Symbol, TypeAnnotation,
};
use tern_diag::Category;
use tern_infer::GlobalTypes;
use tern_ir as ir;
use tern_ml::TransformError;

static TEMP_NONCE: AtomicU64 = AtomicU64::new(0);

fn temp_out_dir() -> PathBuf {
    let nonce = TEMP_NONCE.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("tern-pipeline-{}-{nonce}", std::process::id()))
}

fn span(n: u32) -> Span {
    Span::new(FileId(0), n, n + 1)
}

/// fun main(): Int = 42
fn resolved_module(main: &Symbol) -> ModuleDecl {
    ModuleDecl {
        path: "demo/answer".to_string(),
        decls: Vec::new(),
        externs: Vec::new(),
        definitions: vec![Definition::Fun(FunDef {
            id: main.clone(),
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams: Vec::new(),
            bparams: Vec::new(),
            ret: Some(ReturnAnnotation {
                result: TypeAnnotation::Builtin(BuiltinType::Int),
                effects: Vec::new(),
            }),
            body: Spanned::new(
                tern_ast::StmtKind::Return(Expr::new(ExprKind::Lit(Lit::Int(42)), span(0))),
                span(1),
            ),
            span: span(2),
        })],
    }
}

fn lifted_module(main: &Symbol) -> ir::LiftedModule {
    ir::LiftedModule {
        path: "demo/answer".to_string(),
        decls: Vec::new(),
        externs: Vec::new(),
        definitions: vec![ir::Definition::Def {
            id: main.clone(),
            block: ir::Block::BlockLit(Box::new(ir::BlockLit {
                tparams: Vec::new(),
                params: Vec::new(),
                body: ir::Stmt::Return(ir::Expr::Literal(Lit::Int(42))),
            })),
        }],
    }
}

#[test]
fn pipeline_writes_one_sml_file_per_module() {
    let main = Symbol::block(1, "main");
    let config = BackendConfig {
        out_dir: temp_out_dir(),
        ..BackendConfig::default()
    };

    let (typed, artifact) = compile(
        &resolved_module(&main),
        GlobalTypes::new(),
        |_, _| (lifted_module(&main), Some(main.clone())),
        &config,
    )
    .expect("pipeline succeeds");

    assert_eq!(exit_code(&typed.diagnostics), 0);
    assert_eq!(artifact.path, config.out_dir.join("demo_answer.sml"));

    let written = fs::read_to_string(&artifact.path).expect("artifact on disk");
    assert_eq!(written, artifact.source);
    assert!(written.contains("fun main_1"));
    assert!(written.contains("42"));

    fs::remove_dir_all(&config.out_dir).ok();
}

#[test]
fn source_mode_skips_the_filesystem() {
    let main = Symbol::block(1, "main");
    let config = BackendConfig {
        out_dir: temp_out_dir(),
        output: OutputMode::Source,
        ..BackendConfig::default()
    };

    let (_, artifact) = compile(
        &resolved_module(&main),
        GlobalTypes::new(),
        |_, _| (lifted_module(&main), Some(main.clone())),
        &config,
    )
    .expect("pipeline succeeds");

    assert!(!artifact.source.is_empty());
    assert!(!config.out_dir.exists());
}

#[test]
fn backend_structural_errors_abort_the_compilation() {
    let main = Symbol::block(1, "main");
    let even = Symbol::block(2, "even");
    let odd = Symbol::block(3, "odd");
    let cyclic = |caller: &Symbol, callee: &Symbol| ir::Definition::Def {
        id: caller.clone(),
        block: ir::Block::BlockLit(Box::new(ir::BlockLit {
            tparams: Vec::new(),
            params: Vec::new(),
            body: ir::Stmt::App {
                callee: ir::Block::BlockVar(callee.clone()),
                targs: Vec::new(),
                args: Vec::new(),
            },
        })),
    };
    let lifted = ir::LiftedModule {
        path: "demo/cycle".to_string(),
        decls: Vec::new(),
        externs: Vec::new(),
        definitions: vec![cyclic(&even, &odd), cyclic(&odd, &even)],
    };

    let err = compile(
        &resolved_module(&main),
        GlobalTypes::new(),
        |_, _| (lifted.clone(), None),
        &BackendConfig::default(),
    )
    .unwrap_err();

    let CompilationFailure::Backend(TransformError::MutualRecursion { names }) = &err else {
        panic!("expected the mutual-recursion rejection, got {err:?}");
    };
    assert_eq!(names, &vec!["even".to_string(), "odd".to_string()]);

    // The abort surfaces through the shared taxonomy and the exit-code
    // policy like any other diagnostic.
    let diagnostics = err.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].category, Category::MutualRecursion);
    assert_eq!(exit_code(&diagnostics), 1);
}
