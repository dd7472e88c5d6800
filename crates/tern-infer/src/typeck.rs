//! Bidirectional type-and-effect checking.
//!
//! The typer walks the resolved tree twice. The *precheck* pass assigns
//! signatures that can be assembled from annotations alone (fully
//! annotated functions, externs, declarations), which is what makes
//! mutually recursive definitions checkable. The *synth* pass re-walks
//! every definition and checks bodies, recording each node's inferred
//! type and effects for a final substitution pass.
//!
//! Overload resolution is speculative: each candidate is tried under a
//! snapshot of the full typer state (context, solver, diagnostics,
//! annotations) and either committed or rolled back. Diagnostics from a
//! failed trial never leak into the committed state.

use std::collections::BTreeMap;

use tern_ast::{
    BlockArg, BlockArgKind, BlockLit, BlockTypeAnnotation, CallTarget, CaptureAnnotation,
    ConstructorDecl, Decl, Definition, EffectAnnotation, Expr, ExprKind, ExternDef, FunDef,
    Handler, Lit, MatchClause, ModuleDecl, Pattern, PatternKind, Span, Stmt, StmtKind, Symbol,
    SymbolId, SymbolKind, TypeAnnotation, ValDef, ValueParam,
};
use tern_diag::{Category, Diagnostic, Severity, SourceLocation};
use tern_types::{
    BlockType, Capture, CaptureSet, Effect, Effects, FunctionType, RigidSubstitution, ValueType,
};

use crate::{
    exhaustive, FailureCause, GlobalTypes, LookupError, TypingContext, UnificationFailure, Unifier,
};

fn loc(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}

fn lit_type(lit: &Lit) -> ValueType {
    match lit {
        Lit::Int(_) => ValueType::int(),
        Lit::Double(_) => ValueType::double(),
        Lit::Bool(_) => ValueType::bool(),
        Lit::String(_) => ValueType::string(),
        Lit::Unit => ValueType::unit(),
    }
}

// ---------------------------------------------------------------------------
// Annotations recorded on the tree
// ---------------------------------------------------------------------------

/// Everything the typer learns about the tree, keyed by node span. The
/// lifter consumes these to produce the lifted IR.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    /// Inferred type and concrete effects per expression/statement node.
    pub node_types: BTreeMap<Span, (ValueType, Effects)>,
    /// The committed candidate for each overloaded call.
    pub resolved_calls: BTreeMap<Span, Symbol>,
    /// Inferred type arguments per call; always as long as the callee's
    /// type parameter list.
    pub call_type_args: BTreeMap<Span, Vec<ValueType>>,
}

// ---------------------------------------------------------------------------
// Declaration registry
// ---------------------------------------------------------------------------

/// Signature of one data/record constructor, relative to the owner's
/// rigid type parameters.
#[derive(Debug, Clone)]
pub struct ConstructorInfo {
    pub owner: Symbol,
    pub tparams: Vec<Symbol>,
    pub fields: Vec<ValueType>,
    pub is_record: bool,
}

#[derive(Debug, Clone)]
pub struct DataInfo {
    pub tparams: Vec<Symbol>,
    pub ctors: Vec<Symbol>,
}

#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub tparams: Vec<Symbol>,
    pub ops: Vec<Symbol>,
}

/// Signature of one effect operation, relative to the interface's rigid
/// type parameters plus the operation's own existential parameters.
#[derive(Debug, Clone)]
pub struct OperationInfo {
    pub interface: Symbol,
    pub index: usize,
    pub iface_tparams: Vec<Symbol>,
    pub tparams: Vec<Symbol>,
    pub vparams: Vec<ValueType>,
    pub result: ValueType,
    pub effects: Effects,
}

impl OperationInfo {
    /// Bidirectional operations perform effects of their own; their
    /// `resume` takes a block instead of a value.
    pub fn is_bidirectional(&self) -> bool {
        !self.effects.is_pure()
    }
}

#[derive(Debug, Clone)]
struct TypeAliasInfo {
    tparams: Vec<Symbol>,
    rhs: ValueType,
}

#[derive(Debug, Clone)]
struct EffectAliasInfo {
    tparams: Vec<Symbol>,
    effects: Effects,
}

/// Declared types of the module, resolved once during precheck.
#[derive(Debug, Clone, Default)]
pub struct DeclRegistry {
    pub constructors: BTreeMap<SymbolId, ConstructorInfo>,
    pub datas: BTreeMap<SymbolId, DataInfo>,
    pub interfaces: BTreeMap<SymbolId, InterfaceInfo>,
    pub operations: BTreeMap<SymbolId, OperationInfo>,
    type_aliases: BTreeMap<SymbolId, TypeAliasInfo>,
    effect_aliases: BTreeMap<SymbolId, EffectAliasInfo>,
}

// ---------------------------------------------------------------------------
// Typer
// ---------------------------------------------------------------------------

/// Result of checking one module.
#[derive(Debug)]
pub struct TyperResult {
    pub context: TypingContext,
    pub registry: DeclRegistry,
    pub annotations: Annotations,
    pub diagnostics: Vec<Diagnostic>,
}

/// Check a resolved module against the already-checked dependencies in
/// `global`.
pub fn check_module(module: &ModuleDecl, global: GlobalTypes) -> TyperResult {
    let mut typer = Typer::new(global);
    typer.register_declarations(&module.decls);
    typer.precheck_externs(&module.externs);
    typer.precheck_definitions(&module.definitions);
    for def in &module.definitions {
        typer.check_definition(def, true);
    }
    typer.finalize_annotations();
    TyperResult {
        context: typer.ctx,
        registry: typer.registry,
        annotations: typer.annotations,
        diagnostics: typer.diagnostics,
    }
}

pub struct Typer {
    pub ctx: TypingContext,
    pub unifier: Unifier,
    registry: DeclRegistry,
    diagnostics: Vec<Diagnostic>,
    annotations: Annotations,
}

/// Rollback point for speculative checking.
struct TyperSnapshot {
    ctx: crate::ContextSnapshot,
    unifier: Unifier,
    diag_len: usize,
    annotations: Annotations,
}

/// Full post-trial state, kept aside until a layer commits.
struct TyperState {
    ctx: TypingContext,
    unifier: Unifier,
    diagnostics: Vec<Diagnostic>,
    annotations: Annotations,
}

impl Typer {
    pub fn new(global: GlobalTypes) -> Self {
        Self {
            ctx: TypingContext::with_global(global),
            unifier: Unifier::new(),
            registry: DeclRegistry::default(),
            diagnostics: Vec::new(),
            annotations: Annotations::default(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn registry(&self) -> &DeclRegistry {
        &self.registry
    }

    fn error(&mut self, category: Category, message: impl Into<String>, span: Span) {
        self.diagnostics
            .push(Diagnostic::error(category, message).at(loc(span)));
    }

    fn warn(&mut self, category: Category, message: impl Into<String>, span: Span) {
        self.diagnostics
            .push(Diagnostic::warning(category, message).at(loc(span)));
    }

    fn report_failure(&mut self, err: UnificationFailure, span: Span) {
        let category = match err.cause {
            FailureCause::EscapingSkolem(_) => Category::EscapingSkolem,
            _ => Category::TypeMismatch,
        };
        self.diagnostics
            .push(Diagnostic::error(category, err.to_string()).at(loc(span)));
    }

    fn lift(&mut self, result: Result<(), UnificationFailure>, span: Span) {
        if let Err(err) = result {
            self.report_failure(err, span);
        }
    }

    // -- Snapshots --------------------------------------------------------

    fn snapshot(&self) -> TyperSnapshot {
        TyperSnapshot {
            ctx: self.ctx.backup(),
            unifier: self.unifier.clone(),
            diag_len: self.diagnostics.len(),
            annotations: self.annotations.clone(),
        }
    }

    fn restore(&mut self, snap: TyperSnapshot) {
        let mut unifier = snap.unifier;
        unifier.absorb_fresh_counters(&self.unifier);
        self.unifier = unifier;
        self.ctx.restore(snap.ctx);
        self.diagnostics.truncate(snap.diag_len);
        self.annotations = snap.annotations;
    }

    fn capture_state(&self) -> TyperState {
        TyperState {
            ctx: self.ctx.clone(),
            unifier: self.unifier.clone(),
            diagnostics: self.diagnostics.clone(),
            annotations: self.annotations.clone(),
        }
    }

    fn install_state(&mut self, state: TyperState) {
        let mut unifier = state.unifier;
        unifier.absorb_fresh_counters(&self.unifier);
        self.unifier = unifier;
        self.ctx = state.ctx;
        self.diagnostics = state.diagnostics;
        self.annotations = state.annotations;
    }

    // -- Annotation resolution --------------------------------------------

    fn resolve_value_annotation(&mut self, ann: &TypeAnnotation) -> ValueType {
        match ann {
            TypeAnnotation::Var(sym) => ValueType::Var(sym.clone()),
            TypeAnnotation::Builtin(b) => ValueType::Builtin(*b),
            TypeAnnotation::App { symbol, args } => {
                let args: Vec<ValueType> = args
                    .iter()
                    .map(|a| self.resolve_value_annotation(a))
                    .collect();
                if let Some(alias) = self.registry.type_aliases.get(&symbol.id).cloned() {
                    if alias.tparams.len() != args.len() {
                        self.error(
                            Category::ArityMismatch,
                            format!(
                                "Type alias `{symbol}` expects {} arguments but got {}",
                                alias.tparams.len(),
                                args.len()
                            ),
                            Span::synthetic(),
                        );
                        return ValueType::Bottom;
                    }
                    let subst = RigidSubstitution::for_types(
                        alias
                            .tparams
                            .iter()
                            .map(|p| p.id)
                            .zip(args.iter().cloned()),
                    );
                    ValueType::Alias {
                        symbol: symbol.clone(),
                        tparams: alias.tparams,
                        rhs: Box::new(subst.apply_value(&alias.rhs)),
                    }
                } else {
                    if let Some(data) = self.registry.datas.get(&symbol.id) {
                        if data.tparams.len() != args.len() {
                            let expected = data.tparams.len();
                            self.error(
                                Category::ArityMismatch,
                                format!(
                                    "Type `{symbol}` expects {expected} arguments but got {}",
                                    args.len()
                                ),
                                Span::synthetic(),
                            );
                        }
                    }
                    ValueType::Constructor {
                        symbol: symbol.clone(),
                        args,
                    }
                }
            }
            TypeAnnotation::Boxed { block, captures } => ValueType::Boxed {
                block: Box::new(self.resolve_block_annotation(block)),
                captures: self.resolve_capture_annotation(captures),
            },
        }
    }

    fn resolve_block_annotation(&mut self, ann: &BlockTypeAnnotation) -> BlockType {
        match ann {
            BlockTypeAnnotation::Function {
                tparams,
                cparams,
                vparams,
                bparams,
                result,
                effects,
            } => BlockType::Function(FunctionType {
                tparams: tparams.clone(),
                cparams: cparams.clone(),
                vparams: vparams
                    .iter()
                    .map(|p| self.resolve_value_annotation(p))
                    .collect(),
                bparams: bparams
                    .iter()
                    .map(|p| self.resolve_block_annotation(p))
                    .collect(),
                result: Box::new(self.resolve_value_annotation(result)),
                effects: self.resolve_effect_annotations(effects),
            }),
            BlockTypeAnnotation::Interface { symbol, args } => BlockType::Interface {
                symbol: symbol.clone(),
                args: args
                    .iter()
                    .map(|a| self.resolve_value_annotation(a))
                    .collect(),
            },
        }
    }

    fn resolve_effect_annotations(&mut self, anns: &[EffectAnnotation]) -> Effects {
        let mut effects = Vec::new();
        for ann in anns {
            let args: Vec<ValueType> = ann
                .args
                .iter()
                .map(|a| self.resolve_value_annotation(a))
                .collect();
            if let Some(alias) = self.registry.effect_aliases.get(&ann.symbol.id).cloned() {
                let subst = RigidSubstitution::for_types(
                    alias
                        .tparams
                        .iter()
                        .map(|p| p.id)
                        .zip(args.iter().cloned()),
                );
                effects.push(Effect::Alias {
                    symbol: ann.symbol.clone(),
                    tparams: alias.tparams,
                    effects: subst.apply_effects(&alias.effects),
                });
            } else if args.is_empty() {
                effects.push(Effect::Interface(ann.symbol.clone()));
            } else {
                effects.push(Effect::Apply {
                    symbol: ann.symbol.clone(),
                    args,
                });
            }
        }
        Effects::from_effects(effects)
    }

    fn resolve_capture_annotation(&self, ann: &CaptureAnnotation) -> CaptureSet {
        CaptureSet::from_captures(ann.0.iter().map(|sym| match sym.kind {
            SymbolKind::Capture => Capture::Param(sym.clone()),
            _ => Capture::Block(sym.clone()),
        }))
    }

    // -- Declaration registration -----------------------------------------

    pub fn register_declarations(&mut self, decls: &[Decl]) {
        // First pass: names only, so that later annotations can refer to
        // any declaration regardless of order. Aliases resolve in
        // declaration order.
        for decl in decls {
            match decl {
                Decl::Data(d) => {
                    self.registry.datas.insert(
                        d.id.id,
                        DataInfo {
                            tparams: d.tparams.clone(),
                            ctors: d.ctors.iter().map(|c| c.id.clone()).collect(),
                        },
                    );
                }
                Decl::Record(d) => {
                    self.registry.datas.insert(
                        d.id.id,
                        DataInfo {
                            tparams: d.tparams.clone(),
                            ctors: vec![d.ctor.id.clone()],
                        },
                    );
                }
                Decl::Interface(d) => {
                    self.registry.interfaces.insert(
                        d.id.id,
                        InterfaceInfo {
                            tparams: d.tparams.clone(),
                            ops: d.ops.iter().map(|o| o.id.clone()).collect(),
                        },
                    );
                }
                Decl::TypeAlias(_) | Decl::EffectAlias(_) => {}
            }
        }
        for decl in decls {
            match decl {
                Decl::TypeAlias(d) => {
                    let rhs = self.resolve_value_annotation(&d.rhs);
                    self.registry.type_aliases.insert(
                        d.id.id,
                        TypeAliasInfo {
                            tparams: d.tparams.clone(),
                            rhs,
                        },
                    );
                }
                Decl::EffectAlias(d) => {
                    let effects = self.resolve_effect_annotations(&d.effects);
                    self.registry.effect_aliases.insert(
                        d.id.id,
                        EffectAliasInfo {
                            tparams: d.tparams.clone(),
                            effects,
                        },
                    );
                }
                Decl::Data(d) => {
                    for ctor in &d.ctors {
                        self.register_constructor(&d.id, &d.tparams, ctor, false);
                    }
                }
                Decl::Record(d) => {
                    self.register_constructor(&d.id, &d.tparams, &d.ctor, true);
                }
                Decl::Interface(d) => {
                    for (index, op) in d.ops.iter().enumerate() {
                        self.register_operation(&d.id, &d.tparams, index, op);
                    }
                }
            }
        }
    }

    fn register_constructor(
        &mut self,
        owner: &Symbol,
        tparams: &[Symbol],
        ctor: &ConstructorDecl,
        is_record: bool,
    ) {
        let fields: Vec<ValueType> = ctor
            .fields
            .iter()
            .map(|f| self.resolve_value_annotation(&f.annotation))
            .collect();
        let result = ValueType::Constructor {
            symbol: owner.clone(),
            args: tparams.iter().map(|p| ValueType::Var(p.clone())).collect(),
        };
        self.ctx.bind_block(
            &ctor.id,
            BlockType::Function(FunctionType {
                tparams: tparams.to_vec(),
                cparams: Vec::new(),
                vparams: fields.clone(),
                bparams: Vec::new(),
                result: Box::new(result),
                effects: Effects::pure(),
            }),
        );
        self.registry.constructors.insert(
            ctor.id.id,
            ConstructorInfo {
                owner: owner.clone(),
                tparams: tparams.to_vec(),
                fields,
                is_record,
            },
        );
    }

    fn register_operation(
        &mut self,
        interface: &Symbol,
        iface_tparams: &[Symbol],
        index: usize,
        op: &tern_ast::OperationDecl,
    ) {
        let vparams: Vec<ValueType> = op
            .vparams
            .iter()
            .map(|p| match &p.annotation {
                Some(ann) => self.resolve_value_annotation(ann),
                None => {
                    self.error(
                        Category::UndefinedName,
                        format!("Operation parameter `{}` needs a type annotation", p.id),
                        op.span,
                    );
                    ValueType::Bottom
                }
            })
            .collect();
        let result = self.resolve_value_annotation(&op.result);
        let effects = self.resolve_effect_annotations(&op.effects);
        // The operation, used as a callable, additionally performs its own
        // interface.
        let own_effect = if iface_tparams.is_empty() {
            Effect::Interface(interface.clone())
        } else {
            Effect::Apply {
                symbol: interface.clone(),
                args: iface_tparams
                    .iter()
                    .map(|p| ValueType::Var(p.clone()))
                    .collect(),
            }
        };
        let call_effects = effects.union(&Effects::from_effects([own_effect]));
        let mut tparams: Vec<Symbol> = iface_tparams.to_vec();
        tparams.extend(op.tparams.iter().cloned());
        self.ctx.bind_block(
            &op.id,
            BlockType::Function(FunctionType {
                tparams,
                cparams: Vec::new(),
                vparams: vparams.clone(),
                bparams: Vec::new(),
                result: Box::new(result.clone()),
                effects: call_effects,
            }),
        );
        self.registry.operations.insert(
            op.id.id,
            OperationInfo {
                interface: interface.clone(),
                index,
                iface_tparams: iface_tparams.to_vec(),
                tparams: op.tparams.clone(),
                vparams,
                result,
                effects,
            },
        );
    }

    fn precheck_externs(&mut self, externs: &[ExternDef]) {
        for ext in externs {
            let vparams: Vec<ValueType> = ext
                .vparams
                .iter()
                .map(|p| match &p.annotation {
                    Some(ann) => self.resolve_value_annotation(ann),
                    None => {
                        self.error(
                            Category::UndefinedName,
                            format!("Extern parameter `{}` needs a type annotation", p.id),
                            ext.span,
                        );
                        ValueType::Bottom
                    }
                })
                .collect();
            let result = self.resolve_value_annotation(&ext.result);
            let effects = self.resolve_effect_annotations(&ext.effects);
            self.ctx.bind_block(
                &ext.id,
                BlockType::Function(FunctionType {
                    tparams: ext.tparams.clone(),
                    cparams: Vec::new(),
                    vparams,
                    bparams: Vec::new(),
                    result: Box::new(result),
                    effects,
                }),
            );
        }
    }

    fn precheck_definitions(&mut self, definitions: &[Definition]) {
        for def in definitions {
            if let Definition::Fun(f) = def {
                if f.fully_annotated() {
                    let ft = self.annotated_signature(f);
                    self.ctx.bind_block(&f.id, BlockType::Function(ft));
                }
            }
        }
    }

    fn annotated_signature(&mut self, def: &FunDef) -> FunctionType {
        let ret = def.ret.as_ref().expect("fully annotated");
        let vparams = def
            .vparams
            .iter()
            .map(|p| {
                let ann = p.annotation.as_ref().expect("fully annotated");
                self.resolve_value_annotation(ann)
            })
            .collect();
        let bparams = def
            .bparams
            .iter()
            .map(|p| {
                let ann = p.annotation.as_ref().expect("fully annotated");
                self.resolve_block_annotation(ann)
            })
            .collect();
        let result = self.resolve_value_annotation(&ret.result);
        let effects = self.resolve_effect_annotations(&ret.effects);
        FunctionType {
            tparams: def.tparams.clone(),
            cparams: def.cparams.clone(),
            vparams,
            bparams,
            result: Box::new(result),
            effects,
        }
    }

    // -- Definitions ------------------------------------------------------

    /// Check one definition. Returns the effects its right-hand side
    /// performs at binding time (non-empty only for `val`s).
    fn check_definition(&mut self, def: &Definition, top_level: bool) -> Effects {
        match def {
            Definition::Fun(f) => {
                self.check_fun_definition(f);
                Effects::pure()
            }
            Definition::Val(v) => self.check_val_definition(v, top_level),
        }
    }

    fn check_fun_definition(&mut self, def: &FunDef) {
        self.unifier.enter_scope();

        let mut vparam_types = Vec::with_capacity(def.vparams.len());
        for p in &def.vparams {
            let ty = match &p.annotation {
                Some(ann) => self.resolve_value_annotation(ann),
                None => self.unifier.fresh_value_var(),
            };
            self.ctx.bind_value(&p.id, ty.clone());
            vparam_types.push(ty);
        }
        let mut bparam_types = Vec::with_capacity(def.bparams.len());
        for p in &def.bparams {
            let ty = match &p.annotation {
                Some(ann) => self.resolve_block_annotation(ann),
                None => {
                    self.error(
                        Category::UndefinedName,
                        format!("Block parameter `{}` needs a type annotation", p.id),
                        def.span,
                    );
                    BlockType::Function(FunctionType::simple(
                        Vec::new(),
                        self.unifier.fresh_value_var(),
                        Effects::pure(),
                    ))
                }
            };
            self.ctx.bind_block(&p.id, ty.clone());
            bparam_types.push(ty);
        }

        let declared = def.ret.as_ref().map(|ret| {
            let result = self.resolve_value_annotation(&ret.result);
            let effects = self.resolve_effect_annotations(&ret.effects);
            (result, effects)
        });

        let mark = match &declared {
            Some((_, effects)) => {
                let mark = self
                    .ctx
                    .push_lexical_effects(effects.dealias().iter().cloned());
                Some(mark)
            }
            None => None,
        };

        let expected = declared.as_ref().map(|(result, _)| result.clone());
        let (body_ty, body_effs) = self.check_stmt(&def.body, expected.as_ref());

        if let Some(mark) = mark {
            self.ctx.truncate_lexical_effects(mark);
        }

        let body_effs = self.unifier.substitute_effects(&body_effs);
        let (result, effects) = match declared {
            Some((result, declared_effs)) => {
                let leftover = body_effs
                    .dealias()
                    .difference(&declared_effs.dealias())
                    .controls();
                if !leftover.is_empty() {
                    self.error(
                        Category::UnhandledEffect,
                        format!("Unhandled control effects {leftover} in `{}`", def.id),
                        def.span,
                    );
                }
                (result, declared_effs)
            }
            None => (body_ty, body_effs),
        };

        self.unifier.leave_scope();

        let signature = FunctionType {
            tparams: def.tparams.clone(),
            cparams: def.cparams.clone(),
            vparams: vparam_types
                .iter()
                .map(|t| self.unifier.substitute(t))
                .collect(),
            bparams: bparam_types
                .iter()
                .map(|t| self.unifier.substitute_block(t))
                .collect(),
            result: Box::new(self.unifier.substitute(&result)),
            effects: self.unifier.substitute_effects(&effects),
        };

        for var in self.unifier.escaping_function_vars(&signature) {
            let message = format!(
                "Cannot fully infer the type of `{}`: `{var}` is unconstrained",
                def.id
            );
            self.error(Category::EscapingSkolem, message, def.span);
        }

        self.ctx
            .bind_block(&def.id, BlockType::Function(signature));
    }

    fn check_val_definition(&mut self, def: &ValDef, top_level: bool) -> Effects {
        let expected = def
            .annotation
            .as_ref()
            .map(|ann| self.resolve_value_annotation(ann));
        let (ty, effs) = self.check_stmt(&def.binding, expected.as_ref());
        let ty = self.unifier.substitute(&ty);
        self.ctx.bind_value(&def.id, ty);
        if top_level {
            let controls = self.unifier.substitute_effects(&effs).dealias().controls();
            if !controls.is_empty() {
                self.error(
                    Category::UnhandledEffect,
                    format!("Unhandled control effects {controls} in `{}`", def.id),
                    def.span,
                );
            }
        }
        effs
    }

    // -- Statements -------------------------------------------------------

    pub fn check_stmt(
        &mut self,
        stmt: &Stmt,
        expected: Option<&ValueType>,
    ) -> (ValueType, Effects) {
        let (ty, effs) = match &stmt.node {
            StmtKind::Scope { definitions, body } => {
                for def in definitions {
                    if let Definition::Fun(f) = def {
                        if f.fully_annotated() {
                            let ft = self.annotated_signature(f);
                            self.ctx.bind_block(&f.id, BlockType::Function(ft));
                        }
                    }
                }
                let mut effs = Effects::pure();
                for def in definitions {
                    let def_effs = self.check_definition(def, false);
                    effs = effs.union(&def_effs);
                }
                let (ty, body_effs) = self.check_stmt(body, expected);
                (ty, effs.union(&body_effs))
            }
            StmtKind::Val {
                id,
                annotation,
                binding,
                body,
            } => {
                let bind_expected = annotation
                    .as_ref()
                    .map(|ann| self.resolve_value_annotation(ann));
                let (bty, beffs) = self.check_stmt(binding, bind_expected.as_ref());
                let bty = self.unifier.substitute(&bty);
                self.ctx.bind_value(id, bty);
                let (ty, effs) = self.check_stmt(body, expected);
                (ty, beffs.union(&effs))
            }
            StmtKind::Var {
                id,
                annotation,
                binding,
                body,
            } => {
                let bind_expected = annotation
                    .as_ref()
                    .map(|ann| self.resolve_value_annotation(ann));
                let (bty, beffs) = self.check_expr(binding, bind_expected.as_ref());
                let bty = self.unifier.substitute(&bty);
                self.ctx.bind_value(id, bty);
                self.ctx.bind_mutable(id);
                let (ty, effs) = self.check_stmt(body, expected);
                (ty, beffs.union(&effs))
            }
            StmtKind::Return(expr) => self.check_expr(expr, expected),
        };
        self.annotations
            .node_types
            .insert(stmt.span, (ty.clone(), effs.clone()));
        (ty, effs)
    }

    // -- Expressions ------------------------------------------------------

    pub fn check_expr(
        &mut self,
        expr: &Expr,
        expected: Option<&ValueType>,
    ) -> (ValueType, Effects) {
        let (ty, effs) = match &expr.node {
            ExprKind::Lit(lit) => {
                let ty = lit_type(lit);
                if let Some(exp) = expected {
                    let result = self.unifier.require_subtype(&ty, exp);
                    self.lift(result, expr.span);
                }
                (ty, Effects::pure())
            }
            ExprKind::Var(sym) => {
                if sym.kind == SymbolKind::Block {
                    self.error(
                        Category::BlockAsExpression,
                        format!("Blocks cannot be used as expressions; box `{sym}` first"),
                        expr.span,
                    );
                    (ValueType::Bottom, Effects::pure())
                } else {
                    match self.ctx.lookup_value(sym).cloned() {
                        Some(ty) => {
                            if let Some(exp) = expected {
                                let result = self.unifier.require_subtype(&ty, exp);
                                self.lift(result, expr.span);
                            }
                            (ty, Effects::pure())
                        }
                        None => {
                            self.error(
                                Category::UndefinedName,
                                format!("No type known for `{sym}`"),
                                expr.span,
                            );
                            (ValueType::Bottom, Effects::pure())
                        }
                    }
                }
            }
            ExprKind::Assign { target, value } => {
                if !self.ctx.is_mutable(target) {
                    self.error(
                        Category::InvalidAssignment,
                        format!("`{target}` is not a mutable binding"),
                        expr.span,
                    );
                }
                let target_ty = self.ctx.lookup_value(target).cloned();
                let (_, effs) = match target_ty {
                    Some(ty) => self.check_expr(value, Some(&ty)),
                    None => {
                        self.error(
                            Category::UndefinedName,
                            format!("No type known for `{target}`"),
                            expr.span,
                        );
                        self.check_expr(value, None)
                    }
                };
                if let Some(exp) = expected {
                    let result = self.unifier.require_subtype(&ValueType::unit(), exp);
                    self.lift(result, expr.span);
                }
                (ValueType::unit(), effs)
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let (_, ceffs) = self.check_expr(condition, Some(&ValueType::bool()));
                let (tty, teffs) = self.check_stmt(then_branch, expected);
                let (ety, eeffs) = self.check_stmt(else_branch, expected);
                let ty = match self.unifier.join(&[tty, ety]) {
                    Ok(ty) => ty,
                    Err(err) => {
                        self.report_failure(err, expr.span);
                        ValueType::Bottom
                    }
                };
                (ty, ceffs.union(&teffs).union(&eeffs))
            }
            ExprKind::Match {
                scrutinee,
                clauses,
                default,
            } => self.check_match(expr.span, scrutinee, clauses, default.as_deref(), expected),
            ExprKind::Call {
                target,
                targs,
                vargs,
                bargs,
            } => match target {
                CallTarget::Ident { name, scopes } => {
                    self.resolve_call(expr.span, name, scopes, targs, vargs, bargs, expected)
                }
                CallTarget::Expr(callee) => {
                    let (cty, ceffs) = self.check_expr(callee, None);
                    let cty = self.unifier.substitute(&cty).dealias();
                    match cty {
                        ValueType::Boxed { block, .. } => match *block {
                            BlockType::Function(ft) => {
                                let (ty, effs) = self.check_call_to(
                                    expr.span, "the boxed function", ft, targs, vargs, bargs,
                                    expected,
                                );
                                (ty, ceffs.union(&effs))
                            }
                            BlockType::Interface { .. } => {
                                self.error(
                                    Category::TypeMismatch,
                                    "Capabilities cannot be called directly",
                                    expr.span,
                                );
                                (ValueType::Bottom, ceffs)
                            }
                        },
                        other => {
                            self.error(
                                Category::TypeMismatch,
                                format!("Expected a boxed function but got `{other}`"),
                                expr.span,
                            );
                            (ValueType::Bottom, ceffs)
                        }
                    }
                }
            },
            ExprKind::TryHandle { body, handlers } => {
                self.check_try_handle(expr.span, body, handlers, expected)
            }
            ExprKind::Box { block } => {
                let expected_block = expected.map(|e| self.unifier.substitute(e).dealias());
                let expected_inner = match &expected_block {
                    Some(ValueType::Boxed { block, .. }) => Some((**block).clone()),
                    _ => None,
                };
                let (bt, caps, effs) = self.check_block_arg(block, expected_inner.as_ref());
                (
                    ValueType::Boxed {
                        block: Box::new(bt),
                        captures: caps,
                    },
                    effs,
                )
            }
            ExprKind::Hole => (
                expected.cloned().unwrap_or(ValueType::Bottom),
                Effects::pure(),
            ),
        };
        self.annotations
            .node_types
            .insert(expr.span, (ty.clone(), effs.clone()));
        (self.unifier.substitute(&ty), effs)
    }

    fn check_match(
        &mut self,
        span: Span,
        scrutinee: &Expr,
        clauses: &[MatchClause],
        default: Option<&Stmt>,
        expected: Option<&ValueType>,
    ) -> (ValueType, Effects) {
        let (sty, mut effs) = self.check_expr(scrutinee, None);
        let sty = self.unifier.substitute(&sty).dealias();

        let mut branch_types = Vec::new();
        for clause in clauses {
            let bindings = self.check_pattern(&sty, &clause.pattern);
            for (sym, ty) in bindings {
                self.ctx.bind_value(&sym, ty);
            }
            let (bty, beffs) = self.check_stmt(&clause.body, expected);
            branch_types.push(bty);
            effs = effs.union(&beffs);
        }
        // The default arm is checked against the result type even when no
        // clause matched before it.
        if let Some(d) = default {
            let (dty, deffs) = self.check_stmt(d, expected);
            branch_types.push(dty);
            effs = effs.union(&deffs);
        }

        let patterns: Vec<Pattern> = clauses.iter().map(|c| c.pattern.clone()).collect();
        let missing = exhaustive::check_clauses(&self.registry, &sty, &patterns, default.is_some());
        self.diagnostics.extend(missing);

        let ty = match self.unifier.join(&branch_types) {
            Ok(ty) => ty,
            Err(err) => {
                self.report_failure(err, span);
                ValueType::Bottom
            }
        };
        (ty, effs)
    }

    // -- Patterns ---------------------------------------------------------

    /// Check a pattern against the scrutinee type; returns the bindings it
    /// introduces. Errors are collected, not aborted on.
    pub fn check_pattern(
        &mut self,
        scrutinee: &ValueType,
        pattern: &Pattern,
    ) -> Vec<(Symbol, ValueType)> {
        match &pattern.node {
            PatternKind::Ignore => Vec::new(),
            PatternKind::Any(sym) => vec![(sym.clone(), scrutinee.clone())],
            PatternKind::Literal(lit) => {
                let result = self.unifier.require_equal(scrutinee, &lit_type(lit));
                self.lift(result, pattern.span);
                Vec::new()
            }
            PatternKind::Tag {
                constructor,
                patterns,
            } => {
                let Some(info) = self.registry.constructors.get(&constructor.id).cloned()
                else {
                    self.error(
                        Category::UndefinedName,
                        format!("`{constructor}` is not a constructor"),
                        pattern.span,
                    );
                    return Vec::new();
                };
                let fresh: Vec<ValueType> = info
                    .tparams
                    .iter()
                    .map(|_| self.unifier.fresh_value_var())
                    .collect();
                let ret = ValueType::Constructor {
                    symbol: info.owner.clone(),
                    args: fresh.clone(),
                };
                let result = self.unifier.require_subtype(scrutinee, &ret);
                self.lift(result, pattern.span);

                if patterns.len() != info.fields.len() {
                    self.error(
                        Category::ArityMismatch,
                        format!(
                            "Constructor `{constructor}` has {} fields but the pattern binds {}",
                            info.fields.len(),
                            patterns.len()
                        ),
                        pattern.span,
                    );
                }
                let subst = RigidSubstitution::for_types(
                    info.tparams
                        .iter()
                        .map(|p| p.id)
                        .zip(fresh.iter().cloned()),
                );
                let mut bindings = Vec::new();
                for (field, sub_pattern) in info.fields.iter().zip(patterns.iter()) {
                    let field_ty = self.unifier.substitute(&subst.apply_value(field));
                    bindings.extend(self.check_pattern(&field_ty, sub_pattern));
                }
                bindings
            }
        }
    }

    // -- Calls and overload resolution ------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn resolve_call(
        &mut self,
        span: Span,
        name: &str,
        scopes: &[Vec<Symbol>],
        targs: &[TypeAnnotation],
        vargs: &[Expr],
        bargs: &[BlockArg],
        expected: Option<&ValueType>,
    ) -> (ValueType, Effects) {
        let mut all_failures: Vec<(Symbol, Vec<Diagnostic>)> = Vec::new();

        for layer in scopes {
            let mut candidates: Vec<Symbol> = layer.clone();
            candidates.sort();
            candidates.dedup();

            let mut successes: Vec<(Symbol, (ValueType, Effects), TyperState)> = Vec::new();
            let mut failures: Vec<(Symbol, Vec<Diagnostic>)> = Vec::new();

            for candidate in candidates {
                let snap = self.snapshot();
                let diag_mark = snap.diag_len;
                match self.ctx.lookup_function_type(&candidate) {
                    Ok(ft) => {
                        let result = self.check_call_to(
                            span,
                            &candidate.name,
                            ft,
                            targs,
                            vargs,
                            bargs,
                            expected,
                        );
                        let failed = self.diagnostics[diag_mark..]
                            .iter()
                            .any(|d| d.severity == Severity::Error);
                        if failed {
                            let diags = self.diagnostics[diag_mark..].to_vec();
                            self.restore(snap);
                            failures.push((candidate, diags));
                        } else {
                            let state = self.capture_state();
                            self.restore(snap);
                            successes.push((candidate, result, state));
                        }
                    }
                    Err(err) => {
                        self.restore(snap);
                        let message = match err {
                            LookupError::NotBound => format!(
                                "Cannot type `{candidate}` yet; mutually recursive \
                                 definitions need a type annotation"
                            ),
                            LookupError::NotAFunction => {
                                format!("`{candidate}` is not callable")
                            }
                        };
                        failures.push((
                            candidate,
                            vec![Diagnostic::error(Category::UndefinedName, message).at(loc(span))],
                        ));
                    }
                }
            }

            match successes.len() {
                1 => {
                    let (candidate, result, state) = successes.into_iter().next().expect("one");
                    self.install_state(state);
                    self.annotations.resolved_calls.insert(span, candidate);
                    return result;
                }
                0 => {
                    all_failures.extend(failures);
                }
                _ => {
                    let mut shown = Vec::new();
                    for (candidate, _, _) in &successes {
                        match self.ctx.lookup_function_type(candidate) {
                            Ok(ft) => shown.push(format!("  {candidate}: {ft}")),
                            Err(_) => shown.push(format!("  {candidate}")),
                        }
                    }
                    self.error(
                        Category::AmbiguousOverload,
                        format!(
                            "Ambiguous reference to `{name}`; candidates are:\n{}",
                            shown.join("\n")
                        ),
                        span,
                    );
                    return (ValueType::Bottom, Effects::pure());
                }
            }
        }

        match all_failures.len() {
            0 => {
                self.error(
                    Category::UndefinedName,
                    format!("Unknown function `{name}`"),
                    span,
                );
            }
            1 => {
                let (_, diags) = all_failures.into_iter().next().expect("one");
                self.diagnostics.extend(diags);
            }
            _ => {
                self.error(
                    Category::FailedOverload,
                    format!("No overload of `{name}` matches this call"),
                    span,
                );
                for (candidate, diags) in all_failures {
                    let prefix = format!("Possible overload `{}`: ", candidate.name);
                    for diag in diags {
                        self.diagnostics.push(diag.prefixed(&prefix));
                    }
                }
            }
        }
        (ValueType::Bottom, Effects::pure())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_call_to(
        &mut self,
        span: Span,
        callee: &str,
        ft: FunctionType,
        targs: &[TypeAnnotation],
        vargs: &[Expr],
        bargs: &[BlockArg],
        expected: Option<&ValueType>,
    ) -> (ValueType, Effects) {
        let resolved_targs: Vec<ValueType> = targs
            .iter()
            .map(|a| self.resolve_value_annotation(a))
            .collect();
        if !resolved_targs.is_empty() && resolved_targs.len() != ft.tparams.len() {
            self.error(
                Category::ArityMismatch,
                format!(
                    "`{callee}` expects {} type arguments but got {}",
                    ft.tparams.len(),
                    resolved_targs.len()
                ),
                span,
            );
            return (ValueType::Bottom, Effects::pure());
        }

        let inst = self.unifier.instantiate(
            &ft,
            if resolved_targs.is_empty() && !ft.tparams.is_empty() {
                None
            } else {
                Some(resolved_targs)
            },
        );

        if let Some(exp) = expected {
            let result = self.unifier.require_subtype(&inst.function.result, exp);
            self.lift(result, span);
        }

        if vargs.len() != inst.function.vparams.len() {
            self.error(
                Category::ArityMismatch,
                format!(
                    "`{callee}` expects {} arguments but got {}",
                    inst.function.vparams.len(),
                    vargs.len()
                ),
                span,
            );
            return (ValueType::Bottom, Effects::pure());
        }
        if bargs.len() != inst.function.bparams.len() {
            self.error(
                Category::ArityMismatch,
                format!(
                    "`{callee}` expects {} block arguments but got {}",
                    inst.function.bparams.len(),
                    bargs.len()
                ),
                span,
            );
            return (ValueType::Bottom, Effects::pure());
        }

        let mut effs = Effects::pure();
        for (arg, param) in vargs.iter().zip(inst.function.vparams.iter()) {
            let param = self.unifier.substitute(param);
            let (_, aeffs) = self.check_expr(arg, Some(&param));
            effs = effs.union(&aeffs);
        }
        for (arg, param) in bargs.iter().zip(inst.function.bparams.iter()) {
            let param = self.unifier.substitute_block(param);
            let (_, _, aeffs) = self.check_block_arg(arg, Some(&param));
            effs = effs.union(&aeffs);
        }

        let ret_effs = self.unifier.substitute_effects(&inst.function.effects);
        effs = effs.union(&ret_effs);

        let type_args: Vec<ValueType> = inst
            .type_args
            .iter()
            .map(|t| self.unifier.substitute(t))
            .collect();
        debug_assert_eq!(type_args.len(), ft.tparams.len());
        self.annotations.call_type_args.insert(span, type_args);

        (self.unifier.substitute(&inst.function.result), effs)
    }

    // -- Block arguments --------------------------------------------------

    /// Check a block argument. Returns its block type, its captures, and
    /// the effects *accumulated at the call site* — for literals these are
    /// the body's effects not absorbed by the declared parameter type.
    pub fn check_block_arg(
        &mut self,
        arg: &BlockArg,
        expected: Option<&BlockType>,
    ) -> (BlockType, CaptureSet, Effects) {
        match &arg.node {
            BlockArgKind::Ref(sym) => {
                let Some(bt) = self.ctx.lookup_block(sym).cloned() else {
                    self.error(
                        Category::UndefinedName,
                        format!("No type known for block `{sym}`"),
                        arg.span,
                    );
                    let fallback = BlockType::Function(FunctionType::simple(
                        Vec::new(),
                        self.unifier.fresh_value_var(),
                        Effects::pure(),
                    ));
                    return (fallback, CaptureSet::empty(), Effects::pure());
                };
                if let Some(exp) = expected {
                    let result = self.unifier.require_equal_block(&bt, exp);
                    self.lift(result, arg.span);
                }
                let caps = self
                    .ctx
                    .lookup_captures(sym)
                    .cloned()
                    .unwrap_or_else(|| CaptureSet::singleton(Capture::Block(sym.clone())));
                (self.unifier.substitute_block(&bt), caps, Effects::pure())
            }
            BlockArgKind::Lit(lit) => self.check_block_lit(lit, expected),
            BlockArgKind::Unbox(expr) => {
                let (ty, effs) = self.check_expr(expr, None);
                let ty = self.unifier.substitute(&ty).dealias();
                match ty {
                    ValueType::Boxed { block, captures } => {
                        if let Some(exp) = expected {
                            let result = self.unifier.require_equal_block(&block, exp);
                            self.lift(result, arg.span);
                        }
                        (*block, captures, effs)
                    }
                    other => {
                        self.error(
                            Category::TypeMismatch,
                            format!("Cannot unbox `{other}`"),
                            arg.span,
                        );
                        let fallback = BlockType::Function(FunctionType::simple(
                            Vec::new(),
                            self.unifier.fresh_value_var(),
                            Effects::pure(),
                        ));
                        (fallback, CaptureSet::empty(), effs)
                    }
                }
            }
        }
    }

    fn check_block_lit(
        &mut self,
        lit: &BlockLit,
        expected: Option<&BlockType>,
    ) -> (BlockType, CaptureSet, Effects) {
        let expected_fn = match expected {
            Some(BlockType::Function(ft)) => {
                let ft = self.unifier.substitute_function(ft);
                // Alpha-rename the expected signature's binders into the
                // literal's, so the body sees its own type parameters.
                if ft.tparams.len() == lit.tparams.len() {
                    let rename = RigidSubstitution::for_types(
                        ft.tparams
                            .iter()
                            .map(|p| p.id)
                            .zip(lit.tparams.iter().map(|p| ValueType::Var(p.clone()))),
                    );
                    Some(FunctionType {
                        tparams: lit.tparams.clone(),
                        cparams: ft.cparams.clone(),
                        vparams: ft.vparams.iter().map(|p| rename.apply_value(p)).collect(),
                        bparams: ft.bparams.iter().map(|p| rename.apply_block(p)).collect(),
                        result: Box::new(rename.apply_value(&ft.result)),
                        effects: rename.apply_effects(&ft.effects),
                    })
                } else {
                    self.error(
                        Category::ArityMismatch,
                        format!(
                            "Block takes {} type parameters but {} were expected",
                            lit.tparams.len(),
                            ft.tparams.len()
                        ),
                        lit.span,
                    );
                    Some(ft)
                }
            }
            Some(BlockType::Interface { .. }) => {
                self.error(
                    Category::TypeMismatch,
                    "Expected a capability, found a function block",
                    lit.span,
                );
                None
            }
            None => None,
        };

        self.unifier.enter_scope();

        let mut vparam_types = Vec::with_capacity(lit.vparams.len());
        for (i, p) in lit.vparams.iter().enumerate() {
            let from_expected = expected_fn
                .as_ref()
                .and_then(|ft| ft.vparams.get(i).cloned());
            let ty = match (&p.annotation, from_expected) {
                (Some(ann), Some(exp)) => {
                    let ann_ty = self.resolve_value_annotation(ann);
                    let result = self.unifier.require_equal(&ann_ty, &exp);
                    self.lift(result, lit.span);
                    ann_ty
                }
                (Some(ann), None) => self.resolve_value_annotation(ann),
                (None, Some(exp)) => exp,
                (None, None) => self.unifier.fresh_value_var(),
            };
            self.ctx.bind_value(&p.id, ty.clone());
            vparam_types.push(ty);
        }
        if let Some(ft) = &expected_fn {
            if ft.vparams.len() != lit.vparams.len() {
                self.error(
                    Category::ArityMismatch,
                    format!(
                        "Block takes {} parameters but {} were expected",
                        lit.vparams.len(),
                        ft.vparams.len()
                    ),
                    lit.span,
                );
            }
        }

        let mut bparam_types = Vec::with_capacity(lit.bparams.len());
        for (i, p) in lit.bparams.iter().enumerate() {
            let from_expected = expected_fn
                .as_ref()
                .and_then(|ft| ft.bparams.get(i).cloned());
            let ty = match (&p.annotation, from_expected) {
                (Some(ann), _) => self.resolve_block_annotation(ann),
                (None, Some(exp)) => exp,
                (None, None) => BlockType::Function(FunctionType::simple(
                    Vec::new(),
                    self.unifier.fresh_value_var(),
                    Effects::pure(),
                )),
            };
            self.ctx.bind_block(&p.id, ty.clone());
            bparam_types.push(ty);
        }

        let declared_effects = expected_fn
            .as_ref()
            .map(|ft| ft.effects.clone())
            .unwrap_or_else(Effects::pure);
        let mark = self
            .ctx
            .push_lexical_effects(declared_effects.dealias().iter().cloned());

        let expected_result = expected_fn.as_ref().map(|ft| (*ft.result).clone());
        let (body_ty, body_effs) = self.check_stmt(&lit.body, expected_result.as_ref());

        self.ctx.truncate_lexical_effects(mark);
        self.unifier.leave_scope();

        let body_effs = self.unifier.substitute_effects(&body_effs);
        let (latent, leaked) = match &expected_fn {
            Some(ft) => {
                let leaked = body_effs.dealias().difference(&ft.effects.dealias());
                (ft.effects.clone(), leaked)
            }
            // A synthesized block keeps its effects in its own signature.
            None => (body_effs.clone(), Effects::pure()),
        };

        let function = FunctionType {
            tparams: lit.tparams.clone(),
            cparams: Vec::new(),
            vparams: vparam_types
                .iter()
                .map(|t| self.unifier.substitute(t))
                .collect(),
            bparams: bparam_types
                .iter()
                .map(|t| self.unifier.substitute_block(t))
                .collect(),
            result: Box::new(self.unifier.substitute(&body_ty)),
            effects: latent,
        };

        for var in self.unifier.escaping_function_vars(&function) {
            let message =
                format!("Cannot fully infer the type of this block: `{var}` is unconstrained");
            self.error(Category::EscapingSkolem, message, lit.span);
        }

        let captures = self.unifier.fresh_capture_var();
        (BlockType::Function(function), captures, leaked)
    }

    // -- Handlers ---------------------------------------------------------

    fn check_try_handle(
        &mut self,
        _span: Span,
        body: &Stmt,
        handlers: &[Handler],
        expected: Option<&ValueType>,
    ) -> (ValueType, Effects) {
        let ret = match expected {
            Some(ty) => ty.clone(),
            None => self.unifier.fresh_value_var(),
        };

        let mut handled: Vec<(Effect, Span)> = Vec::new();
        let mut handler_effs = Effects::pure();

        for handler in handlers {
            let Some(iface) = self.registry.interfaces.get(&handler.effect.id).cloned() else {
                self.error(
                    Category::UndefinedName,
                    format!("`{}` is not an effect interface", handler.effect),
                    handler.span,
                );
                continue;
            };

            let mut targs: Vec<ValueType> = handler
                .targs
                .iter()
                .map(|a| self.resolve_value_annotation(a))
                .collect();
            if !targs.is_empty() && targs.len() != iface.tparams.len() {
                self.error(
                    Category::ArityMismatch,
                    format!(
                        "`{}` expects {} type arguments but got {}",
                        handler.effect,
                        iface.tparams.len(),
                        targs.len()
                    ),
                    handler.span,
                );
            }
            while targs.len() < iface.tparams.len() {
                targs.push(self.unifier.fresh_value_var());
            }
            targs.truncate(iface.tparams.len());

            let handled_effect = if targs.is_empty() {
                Effect::Interface(handler.effect.clone())
            } else {
                Effect::Apply {
                    symbol: handler.effect.clone(),
                    args: targs.clone(),
                }
            };

            // Operation coverage: every declared operation exactly once.
            let mut seen: BTreeMap<SymbolId, u32> = BTreeMap::new();
            for clause in &handler.clauses {
                *seen.entry(clause.op.id).or_insert(0) += 1;
            }
            for (op_id, count) in &seen {
                if *count > 1 {
                    let name = handler
                        .clauses
                        .iter()
                        .find(|c| c.op.id == *op_id)
                        .map(|c| c.op.name.clone())
                        .unwrap_or_default();
                    self.error(
                        Category::DuplicateOperation,
                        format!("Operation `{name}` is implemented {count} times"),
                        handler.span,
                    );
                }
            }
            for op in &iface.ops {
                if !seen.contains_key(&op.id) {
                    self.error(
                        Category::MissingOperation,
                        format!(
                            "Handler for `{}` does not implement operation `{op}`",
                            handler.effect
                        ),
                        handler.span,
                    );
                }
            }

            for clause in &handler.clauses {
                let Some(info) = self.registry.operations.get(&clause.op.id).cloned() else {
                    self.error(
                        Category::UndefinedName,
                        format!(
                            "`{}` is not an operation of `{}`",
                            clause.op, handler.effect
                        ),
                        clause.span,
                    );
                    continue;
                };
                if info.interface.id != handler.effect.id {
                    self.error(
                        Category::UndefinedName,
                        format!(
                            "`{}` is not an operation of `{}`",
                            clause.op, handler.effect
                        ),
                        clause.span,
                    );
                    continue;
                }

                // Existentials: fresh rigid type variables for the
                // operation's own parameters, named by the clause when it
                // redeclares them.
                let existentials: Vec<Symbol> =
                    if clause.tparams.len() == info.tparams.len() {
                        clause.tparams.clone()
                    } else {
                        if !clause.tparams.is_empty() {
                            self.error(
                                Category::ArityMismatch,
                                format!(
                                    "Operation `{}` declares {} type parameters but the \
                                     clause binds {}",
                                    clause.op,
                                    info.tparams.len(),
                                    clause.tparams.len()
                                ),
                                clause.span,
                            );
                        }
                        info.tparams.clone()
                    };

                let mut subst = RigidSubstitution::default();
                for (param, arg) in info.iface_tparams.iter().zip(targs.iter()) {
                    subst.types.insert(param.id, arg.clone());
                }
                for (param, ex) in info.tparams.iter().zip(existentials.iter()) {
                    subst
                        .types
                        .insert(param.id, ValueType::Var(ex.clone()));
                }

                let params: Vec<ValueType> =
                    info.vparams.iter().map(|p| subst.apply_value(p)).collect();
                if clause.vparams.len() != params.len() {
                    self.error(
                        Category::ArityMismatch,
                        format!(
                            "Operation `{}` has {} parameters but the clause binds {}",
                            clause.op,
                            params.len(),
                            clause.vparams.len()
                        ),
                        clause.span,
                    );
                }
                for (p, ty) in clause.vparams.iter().zip(params.iter()) {
                    self.bind_clause_param(p, ty);
                }

                let op_result = subst.apply_value(&info.result);
                let op_effects = subst.apply_effects(&info.effects);
                let resume_type = if info.is_bidirectional() {
                    // resume accepts the remaining computation as a block.
                    FunctionType {
                        tparams: Vec::new(),
                        cparams: Vec::new(),
                        vparams: Vec::new(),
                        bparams: vec![BlockType::Function(FunctionType {
                            tparams: Vec::new(),
                            cparams: Vec::new(),
                            vparams: Vec::new(),
                            bparams: Vec::new(),
                            result: Box::new(op_result),
                            effects: op_effects,
                        })],
                        result: Box::new(ret.clone()),
                        effects: Effects::pure(),
                    }
                } else {
                    FunctionType::simple(vec![op_result], ret.clone(), Effects::pure())
                };
                self.ctx
                    .bind_block(&clause.resume, BlockType::Function(resume_type));

                let (_, clause_effs) = self.check_stmt(&clause.body, Some(&ret));

                let clause_effs = self.unifier.substitute_effects(&clause_effs).dealias();
                for ex in &existentials {
                    if clause_effs.mentions_var(ex.id) {
                        self.error(
                            Category::EscapingEffect,
                            format!(
                                "Existential type `{ex}` of operation `{}` escapes into \
                                 the clause's effects",
                                clause.op
                            ),
                            clause.span,
                        );
                    }
                }
                handler_effs = handler_effs.union(&clause_effs);
            }

            handled.push((handled_effect, handler.span));
        }

        let mark = self
            .ctx
            .push_lexical_effects(handled.iter().map(|(e, _)| e.clone()));
        let (_, body_effs) = self.check_stmt(body, Some(&ret));
        self.ctx.truncate_lexical_effects(mark);

        let body_effs = self.unifier.substitute_effects(&body_effs).dealias();
        let handled_set = Effects::from_effects(
            handled
                .iter()
                .map(|(e, _)| self.substitute_effect(e)),
        );

        for (effect, hspan) in &handled {
            let effect = self.substitute_effect(effect);
            if !body_effs.contains(&effect) {
                self.warn(
                    Category::UnusedHandler,
                    format!("Handled effect `{effect}` is not used by the program"),
                    *hspan,
                );
            }
        }

        let out = body_effs.difference(&handled_set).union(&handler_effs);
        (self.unifier.substitute(&ret), out)
    }

    fn bind_clause_param(&mut self, param: &ValueParam, ty: &ValueType) {
        let bound = match &param.annotation {
            Some(ann) => {
                let ann_ty = self.resolve_value_annotation(ann);
                let result = self.unifier.require_equal(&ann_ty, ty);
                self.lift(result, Span::synthetic());
                ann_ty
            }
            None => ty.clone(),
        };
        self.ctx.bind_value(&param.id, bound);
    }

    fn substitute_effect(&self, effect: &Effect) -> Effect {
        match effect {
            Effect::Apply { symbol, args } => Effect::Apply {
                symbol: symbol.clone(),
                args: args.iter().map(|a| self.unifier.substitute(a)).collect(),
            },
            other => other.clone(),
        }
    }

    // -- Finalization -----------------------------------------------------

    /// Apply the final substitution to everything recorded on the tree and
    /// enforce that stored effects are concrete.
    fn finalize_annotations(&mut self) {
        let node_types = std::mem::take(&mut self.annotations.node_types);
        let mut bad_spans = Vec::new();
        self.annotations.node_types = node_types
            .into_iter()
            .map(|(span, (ty, effs))| {
                let ty = self.unifier.substitute(&ty);
                let effs = self.unifier.substitute_effects(&effs);
                if !effs.is_concrete() {
                    bad_spans.push((span, effs.clone()));
                }
                (span, (ty, effs))
            })
            .collect();
        for (span, effs) in bad_spans {
            self.error(
                Category::TypeMismatch,
                format!("Could not fully infer the effects here: `{effs}`"),
                span,
            );
        }
        let call_type_args = std::mem::take(&mut self.annotations.call_type_args);
        self.annotations.call_type_args = call_type_args
            .into_iter()
            .map(|(span, args)| {
                (
                    span,
                    args.iter().map(|a| self.unifier.substitute(a)).collect(),
                )
            })
            .collect();
    }
}
