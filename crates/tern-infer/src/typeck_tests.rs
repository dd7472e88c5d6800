//! Tests for the bidirectional typer.
//!
//! Each test constructs a resolved tree by hand and checks the inferred
//! types, effects, and diagnostics. This is verbose but precise — we know
//! exactly what we're testing.

use tern_ast::*;
use tern_diag::{Category, Severity};
use tern_types::{BlockType, Effect, Effects, FunctionType, ValueType};

use crate::typeck::{check_module, Typer};
use crate::GlobalTypes;

// ---------------------------------------------------------------------------
// Helpers for constructing resolved trees
// ---------------------------------------------------------------------------

fn s(n: u32) -> Span {
    Span::new(FileId(0), n, n + 1)
}

fn lit_int(n: i64, span: Span) -> Expr {
    Spanned::new(ExprKind::Lit(Lit::Int(n)), span)
}

fn lit_bool(b: bool, span: Span) -> Expr {
    Spanned::new(ExprKind::Lit(Lit::Bool(b)), span)
}

fn lit_str(text: &str, span: Span) -> Expr {
    Spanned::new(ExprKind::Lit(Lit::String(text.to_string())), span)
}

fn ret(expr: Expr) -> Stmt {
    let span = expr.span;
    Spanned::new(StmtKind::Return(expr), span)
}

fn var(sym: &Symbol, span: Span) -> Expr {
    Spanned::new(ExprKind::Var(sym.clone()), span)
}

fn call_ident(
    name: &str,
    scopes: Vec<Vec<Symbol>>,
    vargs: Vec<Expr>,
    span: Span,
) -> Expr {
    Spanned::new(
        ExprKind::Call {
            target: CallTarget::Ident {
                name: name.to_string(),
                scopes,
            },
            targs: Vec::new(),
            vargs,
            bargs: Vec::new(),
        },
        span,
    )
}

fn int_ann() -> TypeAnnotation {
    TypeAnnotation::Builtin(BuiltinType::Int)
}

fn unit_ann() -> TypeAnnotation {
    TypeAnnotation::Builtin(BuiltinType::Unit)
}

fn typer() -> Typer {
    Typer::new(GlobalTypes::new())
}

fn simple_fn(params: Vec<ValueType>, result: ValueType) -> BlockType {
    BlockType::Function(FunctionType::simple(params, result, Effects::pure()))
}

fn errors(typer: &Typer) -> Vec<Category> {
    typer
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.category)
        .collect()
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[test]
fn literals_synthesize_builtins() {
    let mut t = typer();
    let (ty, effs) = t.check_expr(&lit_int(42, s(0)), None);
    assert_eq!(ty, ValueType::int());
    assert!(effs.is_pure());
    assert!(t.diagnostics().is_empty());
}

#[test]
fn literal_against_wrong_expected_type_reports_mismatch() {
    let mut t = typer();
    t.check_expr(&lit_int(42, s(0)), Some(&ValueType::string()));
    assert_eq!(errors(&t), vec![Category::TypeMismatch]);
}

#[test]
fn val_binding_flows_into_body() {
    let mut t = typer();
    let x = Symbol::value(1, "x");
    let stmt = Spanned::new(
        StmtKind::Val {
            id: x.clone(),
            annotation: None,
            binding: Box::new(ret(lit_int(1, s(0)))),
            body: Box::new(ret(var(&x, s(1)))),
        },
        s(2),
    );
    let (ty, effs) = t.check_stmt(&stmt, None);
    assert_eq!(ty, ValueType::int());
    assert!(effs.is_pure());
}

#[test]
fn if_joins_branch_types() {
    let mut t = typer();
    let expr = Spanned::new(
        ExprKind::If {
            condition: Box::new(lit_bool(true, s(0))),
            then_branch: Box::new(ret(lit_int(1, s(1)))),
            else_branch: Box::new(ret(lit_int(2, s(2)))),
        },
        s(3),
    );
    let (ty, _) = t.check_expr(&expr, None);
    assert_eq!(ty, ValueType::int());
    assert!(t.diagnostics().is_empty());
}

#[test]
fn if_with_conflicting_branches_reports_mismatch() {
    let mut t = typer();
    let expr = Spanned::new(
        ExprKind::If {
            condition: Box::new(lit_bool(true, s(0))),
            then_branch: Box::new(ret(lit_int(1, s(1)))),
            else_branch: Box::new(ret(lit_str("two", s(2)))),
        },
        s(3),
    );
    t.check_expr(&expr, None);
    assert_eq!(errors(&t), vec![Category::TypeMismatch]);
}

#[test]
fn block_symbol_in_expression_position_is_an_error() {
    let mut t = typer();
    let f = Symbol::block(1, "f");
    t.ctx
        .bind_block(&f, simple_fn(vec![], ValueType::unit()));
    t.check_expr(&var(&f, s(0)), None);
    assert_eq!(errors(&t), vec![Category::BlockAsExpression]);
}

#[test]
fn assign_requires_a_var_binder() {
    let mut t = typer();
    let x = Symbol::value(1, "x");
    t.ctx.bind_value(&x, ValueType::int());
    let expr = Spanned::new(
        ExprKind::Assign {
            target: x.clone(),
            value: Box::new(lit_int(1, s(0))),
        },
        s(1),
    );
    t.check_expr(&expr, None);
    assert_eq!(errors(&t), vec![Category::InvalidAssignment]);
}

#[test]
fn assign_to_var_binder_is_unit() {
    let mut t = typer();
    let x = Symbol::value(1, "x");
    let stmt = Spanned::new(
        StmtKind::Var {
            id: x.clone(),
            annotation: None,
            binding: Box::new(lit_int(0, s(0))),
            body: Box::new(ret(Spanned::new(
                ExprKind::Assign {
                    target: x.clone(),
                    value: Box::new(lit_int(1, s(1))),
                },
                s(2),
            ))),
        },
        s(3),
    );
    let (ty, _) = t.check_stmt(&stmt, None);
    assert_eq!(ty, ValueType::unit());
    assert!(t.diagnostics().is_empty());
}

#[test]
fn hole_checks_against_anything() {
    let mut t = typer();
    let (ty, effs) = t.check_expr(
        &Spanned::new(ExprKind::Hole, s(0)),
        Some(&ValueType::string()),
    );
    assert_eq!(ty, ValueType::string());
    assert!(effs.is_pure());
    assert!(t.diagnostics().is_empty());
}

// ---------------------------------------------------------------------------
// Calls and overload resolution
// ---------------------------------------------------------------------------

#[test]
fn call_checks_arguments_and_returns_result() {
    let mut t = typer();
    let f = Symbol::block(1, "f");
    t.ctx
        .bind_block(&f, simple_fn(vec![ValueType::int()], ValueType::string()));
    let expr = call_ident("f", vec![vec![f.clone()]], vec![lit_int(1, s(0))], s(1));
    let (ty, _) = t.check_expr(&expr, None);
    assert_eq!(ty, ValueType::string());
    assert_eq!(t.annotations().resolved_calls.get(&s(1)), Some(&f));
}

#[test]
fn call_with_wrong_arity_fails() {
    let mut t = typer();
    let f = Symbol::block(1, "f");
    t.ctx
        .bind_block(&f, simple_fn(vec![ValueType::int()], ValueType::unit()));
    let expr = call_ident("f", vec![vec![f.clone()]], Vec::new(), s(1));
    t.check_expr(&expr, None);
    assert_eq!(errors(&t), vec![Category::ArityMismatch]);
}

#[test]
fn overload_picks_the_single_well_typed_candidate() {
    let mut t = typer();
    let f_int = Symbol::block(1, "f");
    let f_str = Symbol::block(2, "f");
    t.ctx
        .bind_block(&f_int, simple_fn(vec![ValueType::int()], ValueType::unit()));
    t.ctx
        .bind_block(&f_str, simple_fn(vec![ValueType::string()], ValueType::bool()));
    let expr = call_ident(
        "f",
        vec![vec![f_int.clone(), f_str.clone()]],
        vec![lit_str("hi", s(0))],
        s(1),
    );
    let (ty, _) = t.check_expr(&expr, None);
    assert_eq!(ty, ValueType::bool());
    assert_eq!(t.annotations().resolved_calls.get(&s(1)), Some(&f_str));
    assert!(t.diagnostics().is_empty());
}

#[test]
fn overload_with_two_matches_is_ambiguous() {
    let mut t = typer();
    let f1 = Symbol::block(1, "f");
    let f2 = Symbol::block(2, "f");
    t.ctx
        .bind_block(&f1, simple_fn(vec![ValueType::int()], ValueType::unit()));
    t.ctx
        .bind_block(&f2, simple_fn(vec![ValueType::int()], ValueType::unit()));
    let expr = call_ident(
        "f",
        vec![vec![f1, f2]],
        vec![lit_int(1, s(0))],
        s(1),
    );
    t.check_expr(&expr, None);
    assert_eq!(errors(&t), vec![Category::AmbiguousOverload]);
}

#[test]
fn outer_scope_is_only_consulted_when_inner_fails() {
    let mut t = typer();
    let inner = Symbol::block(1, "f");
    let outer = Symbol::block(2, "f");
    t.ctx
        .bind_block(&inner, simple_fn(vec![ValueType::string()], ValueType::unit()));
    t.ctx
        .bind_block(&outer, simple_fn(vec![ValueType::int()], ValueType::bool()));
    let expr = call_ident(
        "f",
        vec![vec![inner], vec![outer.clone()]],
        vec![lit_int(1, s(0))],
        s(1),
    );
    let (ty, _) = t.check_expr(&expr, None);
    assert_eq!(ty, ValueType::bool());
    assert_eq!(t.annotations().resolved_calls.get(&s(1)), Some(&outer));
    assert!(t.diagnostics().is_empty());
}

#[test]
fn single_failing_candidate_surfaces_its_diagnostics_verbatim() {
    let mut t = typer();
    let f = Symbol::block(1, "f");
    t.ctx
        .bind_block(&f, simple_fn(vec![ValueType::string()], ValueType::unit()));
    let expr = call_ident("f", vec![vec![f]], vec![lit_int(1, s(0))], s(1));
    t.check_expr(&expr, None);
    let diags = errors(&t);
    assert_eq!(diags, vec![Category::TypeMismatch]);
    assert!(!t.diagnostics()[0].message.starts_with("Possible overload"));
}

#[test]
fn several_failing_candidates_are_grouped_per_overload() {
    let mut t = typer();
    let f1 = Symbol::block(1, "f");
    let f2 = Symbol::block(2, "f");
    t.ctx
        .bind_block(&f1, simple_fn(vec![ValueType::string()], ValueType::unit()));
    t.ctx
        .bind_block(&f2, simple_fn(vec![ValueType::bool()], ValueType::unit()));
    let expr = call_ident("f", vec![vec![f1, f2]], vec![lit_int(1, s(0))], s(1));
    t.check_expr(&expr, None);
    let diags = errors(&t);
    assert!(diags.contains(&Category::FailedOverload));
    assert!(t
        .diagnostics()
        .iter()
        .filter(|d| d.message.starts_with("Possible overload"))
        .count() >= 2);
}

#[test]
fn failed_trials_do_not_leak_solver_state() {
    let mut t = typer();
    let f_str = Symbol::block(1, "f");
    let f_int = Symbol::block(2, "f");
    t.ctx
        .bind_block(&f_str, simple_fn(vec![ValueType::string()], ValueType::unit()));
    t.ctx
        .bind_block(&f_int, simple_fn(vec![ValueType::int()], ValueType::unit()));
    let expr = call_ident(
        "f",
        vec![vec![f_str, f_int.clone()]],
        vec![lit_int(1, s(0))],
        s(1),
    );
    let (ty, _) = t.check_expr(&expr, None);
    assert_eq!(ty, ValueType::unit());
    // The failed trial against the String overload left no diagnostics.
    assert!(t.diagnostics().is_empty());
}

#[test]
fn overload_resolution_is_deterministic() {
    let resolve = || {
        let mut t = typer();
        let f1 = Symbol::block(1, "f");
        let f2 = Symbol::block(2, "f");
        t.ctx
            .bind_block(&f1, simple_fn(vec![ValueType::int()], ValueType::unit()));
        t.ctx
            .bind_block(&f2, simple_fn(vec![ValueType::string()], ValueType::unit()));
        let expr = call_ident(
            "f",
            vec![vec![f2.clone(), f1.clone()]],
            vec![lit_int(1, s(0))],
            s(1),
        );
        t.check_expr(&expr, None);
        t.annotations().resolved_calls.get(&s(1)).cloned()
    };
    assert_eq!(resolve(), resolve());
}

#[test]
fn polymorphic_call_records_inferred_type_arguments() {
    let mut t = typer();
    let id_fn = Symbol::block(1, "id");
    let tp = Symbol::ty(2, "T");
    t.ctx.bind_block(
        &id_fn,
        BlockType::Function(FunctionType {
            tparams: vec![tp.clone()],
            cparams: Vec::new(),
            vparams: vec![ValueType::Var(tp.clone())],
            bparams: Vec::new(),
            result: Box::new(ValueType::Var(tp)),
            effects: Effects::pure(),
        }),
    );
    let expr = call_ident("id", vec![vec![id_fn]], vec![lit_int(7, s(0))], s(1));
    let (ty, _) = t.check_expr(&expr, None);
    assert_eq!(ty, ValueType::int());
    assert_eq!(
        t.annotations().call_type_args.get(&s(1)),
        Some(&vec![ValueType::int()])
    );
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn list_module_decls() -> (Vec<Decl>, Symbol, Symbol, Symbol, Symbol) {
    // data List[A] = Nil | Cons(A, List[A])
    let list = Symbol::ty(10, "List");
    let a = Symbol::ty(11, "A");
    let nil = Symbol::block(12, "Nil");
    let cons = Symbol::block(13, "Cons");
    let head = Symbol::value(14, "head");
    let tail = Symbol::value(15, "tail");
    let decls = vec![Decl::Data(DataDecl {
        id: list.clone(),
        tparams: vec![a.clone()],
        ctors: vec![
            ConstructorDecl {
                id: nil.clone(),
                fields: Vec::new(),
                span: s(100),
            },
            ConstructorDecl {
                id: cons.clone(),
                fields: vec![
                    FieldDecl {
                        id: head,
                        annotation: TypeAnnotation::Var(a.clone()),
                    },
                    FieldDecl {
                        id: tail,
                        annotation: TypeAnnotation::App {
                            symbol: list.clone(),
                            args: vec![TypeAnnotation::Var(a.clone())],
                        },
                    },
                ],
                span: s(101),
            },
        ],
        span: s(102),
    })];
    (decls, list, a, nil, cons)
}

#[test]
fn tag_pattern_binds_fields_at_the_right_types() {
    let (decls, list, _, _, cons) = list_module_decls();
    let mut t = typer();
    t.register_declarations(&decls);
    let x = Symbol::value(20, "x");
    let pattern = Spanned::new(
        PatternKind::Tag {
            constructor: cons,
            patterns: vec![
                Spanned::new(PatternKind::Any(x.clone()), s(1)),
                Spanned::new(PatternKind::Ignore, s(2)),
            ],
        },
        s(3),
    );
    let scrutinee = ValueType::Constructor {
        symbol: list,
        args: vec![ValueType::int()],
    };
    let bindings = t.check_pattern(&scrutinee, &pattern);
    assert!(t.diagnostics().is_empty());
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].0, x);
    assert_eq!(t.unifier.substitute(&bindings[0].1), ValueType::int());
}

#[test]
fn tag_pattern_arity_mismatch_is_collected_not_fatal() {
    let (decls, list, _, _, cons) = list_module_decls();
    let mut t = typer();
    t.register_declarations(&decls);
    let pattern = Spanned::new(
        PatternKind::Tag {
            constructor: cons,
            patterns: vec![Spanned::new(PatternKind::Ignore, s(1))],
        },
        s(2),
    );
    let scrutinee = ValueType::Constructor {
        symbol: list,
        args: vec![ValueType::int()],
    };
    let bindings = t.check_pattern(&scrutinee, &pattern);
    assert_eq!(errors(&t), vec![Category::ArityMismatch]);
    // The one supplied sub-pattern was still checked.
    assert!(bindings.is_empty());
}

#[test]
fn literal_pattern_checks_against_scrutinee() {
    let mut t = typer();
    let pattern = Spanned::new(PatternKind::Literal(Lit::Int(3)), s(0));
    t.check_pattern(&ValueType::string(), &pattern);
    assert_eq!(errors(&t), vec![Category::TypeMismatch]);
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// interface Exc { raise(Int): Unit }
fn exc_interface() -> (Decl, Symbol, Symbol) {
    let exc = Symbol::block(30, "Exc");
    let raise = Symbol::block(31, "raise");
    let msg = Symbol::value(32, "msg");
    let decl = Decl::Interface(InterfaceDecl {
        id: exc.clone(),
        tparams: Vec::new(),
        ops: vec![OperationDecl {
            id: raise.clone(),
            tparams: Vec::new(),
            vparams: vec![ValueParam {
                id: msg,
                annotation: Some(int_ann()),
            }],
            result: unit_ann(),
            effects: Vec::new(),
            span: s(200),
        }],
        span: s(201),
    });
    (decl, exc, raise)
}

fn handler_for(exc: &Symbol, raise: &Symbol, resume: Symbol, body: Stmt) -> Handler {
    Handler {
        effect: exc.clone(),
        targs: Vec::new(),
        clauses: vec![OpClause {
            op: raise.clone(),
            tparams: Vec::new(),
            vparams: vec![ValueParam {
                id: Symbol::value(40, "msg"),
                annotation: None,
            }],
            resume,
            body,
            span: s(202),
        }],
        span: s(203),
    }
}

#[test]
fn try_handle_discharges_the_handled_effect() {
    let (decl, exc, raise) = exc_interface();
    let mut t = typer();
    t.register_declarations(&[decl]);

    // try { raise(1); } with Exc { raise(msg) => resume(()) }
    let resume = Symbol::block(41, "resume");
    let resume_call = call_ident(
        "resume",
        vec![vec![resume.clone()]],
        vec![Spanned::new(ExprKind::Lit(Lit::Unit), s(4))],
        s(5),
    );
    let body_call = call_ident("raise", vec![vec![raise.clone()]], vec![lit_int(1, s(0))], s(1));
    let expr = Spanned::new(
        ExprKind::TryHandle {
            body: Box::new(ret(body_call)),
            handlers: vec![handler_for(&exc, &raise, resume, ret(resume_call))],
        },
        s(6),
    );
    let (_, effs) = t.check_expr(&expr, Some(&ValueType::unit()));
    assert!(t.diagnostics().iter().all(|d| d.severity != Severity::Error));
    assert!(
        !effs.iter().any(|e| matches!(e, Effect::Interface(sym) if sym.id == exc.id)),
        "the handled effect must not leak: {effs}"
    );
}

#[test]
fn missing_operation_is_reported() {
    let (decl, exc, _raise) = exc_interface();
    let mut t = typer();
    t.register_declarations(&[decl]);
    let expr = Spanned::new(
        ExprKind::TryHandle {
            body: Box::new(ret(lit_int(1, s(0)))),
            handlers: vec![Handler {
                effect: exc,
                targs: Vec::new(),
                clauses: Vec::new(),
                span: s(1),
            }],
        },
        s(2),
    );
    t.check_expr(&expr, Some(&ValueType::int()));
    assert!(errors(&t).contains(&Category::MissingOperation));
}

#[test]
fn duplicate_operation_is_reported() {
    let (decl, exc, raise) = exc_interface();
    let mut t = typer();
    t.register_declarations(&[decl]);
    let clause = OpClause {
        op: raise.clone(),
        tparams: Vec::new(),
        vparams: vec![ValueParam {
            id: Symbol::value(40, "msg"),
            annotation: None,
        }],
        resume: Symbol::block(41, "resume"),
        body: ret(lit_int(1, s(0))),
        span: s(1),
    };
    let mut clause2 = clause.clone();
    clause2.resume = Symbol::block(42, "resume");
    let expr = Spanned::new(
        ExprKind::TryHandle {
            body: Box::new(ret(lit_int(1, s(2)))),
            handlers: vec![Handler {
                effect: exc,
                targs: Vec::new(),
                clauses: vec![clause, clause2],
                span: s(3),
            }],
        },
        s(4),
    );
    t.check_expr(&expr, Some(&ValueType::int()));
    assert!(errors(&t).contains(&Category::DuplicateOperation));
}

#[test]
fn unused_handler_warns() {
    let (decl, exc, raise) = exc_interface();
    let mut t = typer();
    t.register_declarations(&[decl]);
    let resume = Symbol::block(41, "resume");
    let expr = Spanned::new(
        ExprKind::TryHandle {
            // Body does not perform Exc at all.
            body: Box::new(ret(lit_int(1, s(0)))),
            handlers: vec![handler_for(&exc, &raise, resume, ret(lit_int(2, s(1))))],
        },
        s(2),
    );
    t.check_expr(&expr, Some(&ValueType::int()));
    assert!(t
        .diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Warning && d.category == Category::UnusedHandler));
}

#[test]
fn resume_takes_the_operation_result() {
    let (decl, _exc, raise) = exc_interface();
    let mut t = typer();
    t.register_declarations(&[decl]);
    let info = t.registry().operations.get(&raise.id).cloned().expect("registered");
    assert!(!info.is_bidirectional());
    assert_eq!(info.vparams, vec![ValueType::int()]);
    assert_eq!(info.result, ValueType::unit());
}

// ---------------------------------------------------------------------------
// Definitions and modules
// ---------------------------------------------------------------------------

#[test]
fn unhandled_control_effect_is_reported_at_the_definition() {
    let (decl, _exc, raise) = exc_interface();
    let main = Symbol::block(50, "main");
    let module = ModuleDecl {
        path: "test".to_string(),
        decls: vec![decl],
        externs: Vec::new(),
        definitions: vec![Definition::Fun(FunDef {
            id: main,
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams: Vec::new(),
            bparams: Vec::new(),
            ret: Some(ReturnAnnotation {
                result: unit_ann(),
                effects: Vec::new(),
            }),
            body: ret(call_ident(
                "raise",
                vec![vec![raise]],
                vec![lit_int(1, s(0))],
                s(1),
            )),
            span: s(2),
        })],
    };
    let result = check_module(&module, GlobalTypes::new());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.category == Category::UnhandledEffect));
}

#[test]
fn mutually_recursive_annotated_functions_check() {
    // fun even(n: Int): Bool = odd(n)   fun odd(n: Int): Bool = even(n)
    let even = Symbol::block(60, "even");
    let odd = Symbol::block(61, "odd");
    let n1 = Symbol::value(62, "n");
    let n2 = Symbol::value(63, "n");
    let bool_ann = TypeAnnotation::Builtin(BuiltinType::Bool);
    let fun = |id: &Symbol, param: &Symbol, callee: &Symbol, base: u32| {
        Definition::Fun(FunDef {
            id: id.clone(),
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams: vec![ValueParam {
                id: param.clone(),
                annotation: Some(int_ann()),
            }],
            bparams: Vec::new(),
            ret: Some(ReturnAnnotation {
                result: bool_ann.clone(),
                effects: Vec::new(),
            }),
            body: ret(call_ident(
                &callee.name,
                vec![vec![callee.clone()]],
                vec![var(param, s(base))],
                s(base + 1),
            )),
            span: s(base + 2),
        })
    };
    let module = ModuleDecl {
        path: "test".to_string(),
        decls: Vec::new(),
        externs: Vec::new(),
        definitions: vec![fun(&even, &n1, &odd, 0), fun(&odd, &n2, &even, 10)],
    };
    let result = check_module(&module, GlobalTypes::new());
    assert!(
        result.diagnostics.is_empty(),
        "unexpected diagnostics: {:?}",
        result.diagnostics
    );
}

#[test]
fn unannotated_mutual_recursion_needs_annotations() {
    let f = Symbol::block(60, "f");
    let g = Symbol::block(61, "g");
    let fun = |id: &Symbol, callee: &Symbol, base: u32| {
        Definition::Fun(FunDef {
            id: id.clone(),
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams: Vec::new(),
            bparams: Vec::new(),
            ret: None,
            body: ret(call_ident(
                &callee.name,
                vec![vec![callee.clone()]],
                Vec::new(),
                s(base),
            )),
            span: s(base + 1),
        })
    };
    let module = ModuleDecl {
        path: "test".to_string(),
        decls: Vec::new(),
        externs: Vec::new(),
        definitions: vec![fun(&f, &g, 0), fun(&g, &f, 10)],
    };
    let result = check_module(&module, GlobalTypes::new());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.category == Category::UndefinedName));
}

#[test]
fn unconstrained_parameter_escapes_its_scope() {
    // fun f(x): Int = 42 — nothing ever constrains `x`.
    let f = Symbol::block(1, "f");
    let x = Symbol::value(2, "x");
    let module = ModuleDecl {
        path: "test".to_string(),
        decls: Vec::new(),
        externs: Vec::new(),
        definitions: vec![Definition::Fun(FunDef {
            id: f,
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams: vec![ValueParam {
                id: x,
                annotation: None,
            }],
            bparams: Vec::new(),
            ret: Some(ReturnAnnotation {
                result: int_ann(),
                effects: Vec::new(),
            }),
            body: ret(lit_int(42, s(0))),
            span: s(1),
        })],
    };
    let result = check_module(&module, GlobalTypes::new());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.category == Category::EscapingSkolem));
}

#[test]
fn constrained_parameters_do_not_escape() {
    // fun f(x): Int = x — the body solves `x` against the result type.
    let f = Symbol::block(1, "f");
    let x = Symbol::value(2, "x");
    let module = ModuleDecl {
        path: "test".to_string(),
        decls: Vec::new(),
        externs: Vec::new(),
        definitions: vec![Definition::Fun(FunDef {
            id: f,
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams: vec![ValueParam {
                id: x.clone(),
                annotation: None,
            }],
            bparams: Vec::new(),
            ret: Some(ReturnAnnotation {
                result: int_ann(),
                effects: Vec::new(),
            }),
            body: ret(var(&x, s(0))),
            span: s(1),
        })],
    };
    let result = check_module(&module, GlobalTypes::new());
    assert!(
        result.diagnostics.is_empty(),
        "unexpected diagnostics: {:?}",
        result.diagnostics
    );
}

#[test]
fn unconstrained_block_literal_parameter_escapes() {
    let mut t = typer();
    let x = Symbol::value(1, "x");
    let arg: BlockArg = Spanned::new(
        BlockArgKind::Lit(Box::new(BlockLit {
            tparams: Vec::new(),
            vparams: vec![ValueParam {
                id: x,
                annotation: None,
            }],
            bparams: Vec::new(),
            body: ret(lit_int(1, s(0))),
            span: s(1),
        })),
        s(2),
    );
    t.check_block_arg(&arg, None);
    assert!(errors(&t).contains(&Category::EscapingSkolem));
}

#[test]
fn stored_effects_are_concrete_after_checking() {
    let (decl, _exc, raise) = exc_interface();
    let main = Symbol::block(50, "main");
    let module = ModuleDecl {
        path: "test".to_string(),
        decls: vec![decl],
        externs: Vec::new(),
        definitions: vec![Definition::Fun(FunDef {
            id: main,
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams: Vec::new(),
            bparams: Vec::new(),
            ret: Some(ReturnAnnotation {
                result: unit_ann(),
                effects: vec![EffectAnnotation {
                    symbol: Symbol::block(30, "Exc"),
                    args: Vec::new(),
                }],
            }),
            body: ret(call_ident(
                "raise",
                vec![vec![raise]],
                vec![lit_int(1, s(0))],
                s(1),
            )),
            span: s(2),
        })],
    };
    let result = check_module(&module, GlobalTypes::new());
    assert!(result.diagnostics.is_empty());
    for (ty, effs) in result.annotations.node_types.values() {
        assert!(!ty.has_unification_vars(), "non-substituted type: {ty}");
        assert!(effs.is_concrete(), "non-concrete effects: {effs}");
    }
}
