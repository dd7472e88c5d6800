//! Lowering from the lifted IR to Target-ML.
//!
//! Definitions are emitted in dependency order (`let`s stay in source
//! position), statements go through the CPS layer, handlers become
//! reset/shift threaded through evidence, and every effect interface of
//! arity *n* shares the structural `Object{n}` encoding — dispatch is
//! positional, so one datatype per arity is enough.
//!
//! The transformer is consumed by [`transform`]; its caches live exactly
//! as long as one module's lowering, which makes re-entry
//! unrepresentable.

use std::collections::{BTreeMap, BTreeSet};

use tern_ast::{Lit, Symbol, SymbolId};
use tern_ir as ir;
use tern_ir::{free_block_vars, free_expr_vars};
use tern_types::{BlockType, BuiltinType, ValueType};

use crate::ast::{Binding, Expr, MatchClause, Param, Pattern, Toplevel, Type};
use crate::cps::{self, Cont, Cps, LiftStep};
use crate::{consts, NameSupply, TransformError};

/// Lower one lifted module. `main` selects the entry point; when present
/// the toplevel ends with `main` applied to two identity continuations
/// (the outer prompt and the outer continuation).
pub fn transform(
    module: &ir::LiftedModule,
    main: Option<&Symbol>,
) -> Result<Toplevel, TransformError> {
    Transformer::new().finish(module, main)
}

/// Target-level name of a symbol. Ids keep same-named symbols apart.
pub fn ml_name(sym: &Symbol) -> String {
    let base: String = sym
        .name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{base}_{}", sym.id.0)
}

fn type_var_name(sym: &Symbol) -> String {
    let base: String = sym
        .name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    format!("{base}{}", sym.id.0)
}

/// The shared structural encoding for all interfaces of one arity.
#[derive(Debug, Clone)]
struct ObjectFamily {
    constructor: String,
    accessors: Vec<String>,
}

struct Transformer {
    names: NameSupply,
    /// Arity-indexed object families; filled on first use.
    objects: BTreeMap<usize, ObjectFamily>,
    /// Constructor symbol to field count, for `PureApp` lowering.
    constructors: BTreeMap<SymbolId, usize>,
    /// Operation symbol to its positional accessor.
    op_accessors: BTreeMap<SymbolId, String>,
    /// State cells currently in scope; their get/put members lower to
    /// deref/assign instead of calls.
    state_cells: BTreeSet<SymbolId>,
    decl_bindings: Vec<Binding>,
}

impl Transformer {
    fn new() -> Self {
        Self {
            names: NameSupply::new(),
            objects: BTreeMap::new(),
            constructors: BTreeMap::new(),
            op_accessors: BTreeMap::new(),
            state_cells: BTreeSet::new(),
            decl_bindings: Vec::new(),
        }
    }

    fn finish(
        mut self,
        module: &ir::LiftedModule,
        main: Option<&Symbol>,
    ) -> Result<Toplevel, TransformError> {
        for decl in &module.decls {
            self.declare(decl);
        }
        for ext in &module.externs {
            self.declare_extern(ext)?;
        }
        let sorted = sort_definitions(&module.definitions)?;
        let mut def_bindings = Vec::with_capacity(sorted.len());
        for def in sorted {
            def_bindings.push(self.lower_definition(def)?);
        }
        let main_call = main.map(|m| self.run_main(m));

        let mut bindings = self.decl_bindings;
        bindings.extend(def_bindings);
        Ok(Toplevel {
            bindings,
            main_call,
        })
    }

    // -- Declarations -----------------------------------------------------

    fn declare(&mut self, decl: &ir::Declaration) {
        match decl {
            ir::Declaration::Data { id, tparams, ctors } => {
                let tvars: Vec<String> = tparams.iter().map(type_var_name).collect();
                let mut entries = Vec::with_capacity(ctors.len());
                for ctor in ctors {
                    self.constructors.insert(ctor.id.id, ctor.fields.len());
                    let payload = match ctor.fields.len() {
                        0 => None,
                        1 => Some(self.value_type_to_ml(&ctor.fields[0].tpe)),
                        _ => Some(Type::Tuple(
                            ctor.fields
                                .iter()
                                .map(|f| self.value_type_to_ml(&f.tpe))
                                .collect(),
                        )),
                    };
                    entries.push((ml_name(&ctor.id), payload));
                }
                self.decl_bindings.push(Binding::DataBind {
                    name: ml_name(id),
                    tvars,
                    constructors: entries,
                });
                // Exactly one constructor: a record. Emit one accessor per
                // field, projecting positionally.
                if let [ctor] = &ctors[..] {
                    let ctor_name = ml_name(&ctor.id);
                    for (index, field) in ctor.fields.iter().enumerate() {
                        self.decl_bindings.push(Binding::FunBind {
                            name: ml_name(&field.id),
                            params: vec![Param::Patterned(projection_pattern(
                                &ctor_name,
                                ctor.fields.len(),
                                index,
                            ))],
                            body: Expr::var("arg"),
                        });
                    }
                }
            }
            ir::Declaration::Interface { ops, .. } => {
                let family = self.intern_object(ops.len());
                for (index, op) in ops.iter().enumerate() {
                    self.op_accessors
                        .insert(op.id, family.accessors[index].clone());
                }
            }
        }
    }

    /// The first interface of a given arity emits the shared datatype and
    /// accessor family; later ones only reuse the names.
    fn intern_object(&mut self, arity: usize) -> ObjectFamily {
        if let Some(family) = self.objects.get(&arity) {
            return family.clone();
        }
        let name = format!("Object{arity}");
        let tvars: Vec<String> = (0..arity).map(|i| format!("a{i}")).collect();
        let payload = match arity {
            0 => None,
            1 => Some(Type::Var(tvars[0].clone())),
            _ => Some(Type::Tuple(
                tvars.iter().map(|v| Type::Var(v.clone())).collect(),
            )),
        };
        self.decl_bindings.push(Binding::DataBind {
            name: name.clone(),
            tvars,
            constructors: vec![(name.clone(), payload)],
        });
        let accessors: Vec<String> = (1..=arity)
            .map(|i| format!("member{i}of{arity}"))
            .collect();
        for (index, accessor) in accessors.iter().enumerate() {
            self.decl_bindings.push(Binding::FunBind {
                name: accessor.clone(),
                params: vec![Param::Patterned(projection_pattern(&name, arity, index))],
                body: Expr::var("arg"),
            });
        }
        let family = ObjectFamily {
            constructor: name,
            accessors,
        };
        self.objects.insert(arity, family.clone());
        family
    }

    fn declare_extern(&mut self, ext: &ir::Extern) -> Result<(), TransformError> {
        if !ext.tparams.is_empty() {
            return Err(TransformError::PolymorphicExtern {
                name: ext.id.name.clone(),
            });
        }
        if ext
            .params
            .iter()
            .any(|p| matches!(p, ir::Param::Block(_)))
        {
            return Err(TransformError::HigherOrderExtern {
                name: ext.id.name.clone(),
            });
        }
        let params = if ext.params.is_empty() {
            "()".to_string()
        } else {
            ext.params
                .iter()
                .map(|p| ml_name(p.id()))
                .collect::<Vec<_>>()
                .join(" ")
        };
        self.decl_bindings.push(Binding::RawBind {
            text: format!("fun {} {} = {}", ml_name(&ext.id), params, ext.body),
        });
        Ok(())
    }

    // -- Definitions ------------------------------------------------------

    fn lower_definition(&mut self, def: &ir::Definition) -> Result<Binding, TransformError> {
        match def {
            ir::Definition::Def {
                id,
                block: ir::Block::BlockLit(lit),
            } => {
                let mut params: Vec<Param> = lit
                    .params
                    .iter()
                    .map(|p| Param::Named(ml_name(p.id())))
                    .collect();
                let k = self.names.fresh("k");
                params.push(Param::Named(k.clone()));
                let body_cps = self.to_ml_stmt(&lit.body)?;
                let body = body_cps.apply(&mut self.names, Cont::Dynamic(Expr::var(k)));
                Ok(Binding::FunBind {
                    name: ml_name(id),
                    params,
                    body,
                })
            }
            ir::Definition::Def { id, block } => Ok(Binding::ValBind {
                name: ml_name(id),
                expr: self.lower_block(block)?,
            }),
            ir::Definition::Let {
                id: Some(id),
                binding,
            } => Ok(Binding::ValBind {
                name: ml_name(id),
                expr: self.pure_expr(binding)?,
            }),
            ir::Definition::Let { id: None, binding } => Ok(Binding::AnonBind {
                expr: self.pure_expr(binding)?,
            }),
        }
    }

    fn run_main(&mut self, main: &Symbol) -> Expr {
        let outer_prompt = identity_lambda(&mut self.names);
        let outer_k = identity_lambda(&mut self.names);
        Expr::call(Expr::var(ml_name(main)), vec![outer_prompt, outer_k])
    }

    // -- Statements -------------------------------------------------------

    fn to_ml_stmt(&mut self, stmt: &ir::Stmt) -> Result<Cps, TransformError> {
        match stmt {
            ir::Stmt::Return(e) => Ok(Cps::pure(self.pure_expr(e)?)),

            ir::Stmt::App {
                callee, args, ..
            } => {
                if let Some(cps) = self.try_state_access(callee, args)? {
                    return Ok(cps);
                }
                let callee_e = self.lower_block(callee)?;
                let mut args_e = Vec::with_capacity(args.len() + 1);
                for arg in args {
                    args_e.push(self.lower_argument(arg)?);
                }
                Ok(Cps::inline(move |names, k| {
                    let mut call_args = args_e;
                    call_args.push(k.reify(names));
                    Expr::call(callee_e, call_args)
                }))
            }

            ir::Stmt::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let cond = self.pure_expr(cond)?;
                let then_cps = self.to_ml_stmt(then_stmt)?;
                let else_cps = self.to_ml_stmt(else_stmt)?;
                Ok(Cps::join(move |names, k| {
                    let ke = k.reify(names);
                    Expr::If {
                        cond: Box::new(cond),
                        then_branch: Box::new(
                            then_cps.apply(names, Cont::Dynamic(ke.clone())),
                        ),
                        else_branch: Box::new(else_cps.apply(names, Cont::Dynamic(ke))),
                    }
                }))
            }

            ir::Stmt::Val { id, binding, body } => {
                let binding_cps = self.to_ml_stmt(binding)?;
                let body_cps = self.to_ml_stmt(body)?;
                let name = ml_name(id);
                Ok(binding_cps.flat_map(move |_names, value| {
                    Cps::inline(move |names, k| {
                        Expr::let_in(
                            vec![Binding::ValBind { name, expr: value }],
                            body_cps.apply(names, k),
                        )
                    })
                }))
            }

            ir::Stmt::Match {
                scrutinee,
                clauses,
                default,
            } => {
                let scrutinee = self.pure_expr(scrutinee)?;
                let mut lowered = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let ctor = ml_name(&clause.constructor);
                    let binders: Vec<String> = clause
                        .body
                        .params
                        .iter()
                        .map(|p| ml_name(p.id()))
                        .collect();
                    let body_cps = self.to_ml_stmt(&clause.body.body)?;
                    lowered.push((ctor, binders, body_cps));
                }
                let default_cps = match default {
                    Some(d) => Some(self.to_ml_stmt(d)?),
                    None => None,
                };
                Ok(Cps::join(move |names, k| {
                    let ke = k.reify(names);
                    let clauses = lowered
                        .into_iter()
                        .map(|(ctor, binders, body_cps)| MatchClause {
                            pattern: clause_pattern(&ctor, &binders),
                            body: body_cps.apply(names, Cont::Dynamic(ke.clone())),
                        })
                        .collect();
                    let default =
                        default_cps.map(|d| Box::new(d.apply(names, Cont::Dynamic(ke))));
                    Expr::Match {
                        scrutinee: Box::new(scrutinee),
                        clauses,
                        default,
                    }
                }))
            }

            ir::Stmt::Hole => Ok(Cps::inline(|_names, _k| {
                Expr::RawExpr("raise Hole".to_string())
            })),

            ir::Stmt::Scope { definitions, body } => {
                let sorted = sort_definitions(definitions)?;
                let mut bindings = Vec::with_capacity(sorted.len());
                for def in sorted {
                    bindings.push(self.lower_definition(def)?);
                }
                let body_cps = self.to_ml_stmt(body)?;
                Ok(Cps::inline(move |names, k| {
                    Expr::let_in(bindings, body_cps.apply(names, k))
                }))
            }

            ir::Stmt::State {
                id,
                init,
                region,
                body,
                ..
            } => {
                self.state_cells.insert(id.id);
                let init_e = self.pure_expr(init)?;
                let cell = match region {
                    // A global cell is a plain reference.
                    ir::Region::Global => Expr::Ref(Box::new(init_e)),
                    // A local cell is allocated in its region.
                    ir::Region::Named(r) => Expr::call(
                        Expr::var(consts::FRESH),
                        vec![Expr::var(ml_name(r)), init_e],
                    ),
                };
                let body_cps = self.to_ml_stmt(body)?;
                let name = ml_name(id);
                Ok(Cps::inline(move |names, k| {
                    Expr::let_in(
                        vec![Binding::ValBind { name, expr: cell }],
                        body_cps.apply(names, k),
                    )
                }))
            }

            ir::Stmt::Try { body, handlers } => {
                let body_e = self.lower_block(body)?;
                let mut handler_es = Vec::with_capacity(handlers.len());
                for handler in handlers {
                    handler_es.push(self.lower_implementation(handler)?);
                }
                Ok(Cps::inline(move |names, k| {
                    let mut args = vec![Expr::var(consts::LIFT)];
                    args.extend(handler_es);
                    let delimited = cps::reset(names, Expr::call(body_e, args));
                    Expr::call(delimited, vec![k.reify(names)])
                }))
            }

            ir::Stmt::Shift { evidence, body } => {
                let [kparam] = &body.params[..] else {
                    panic!(
                        "shift must bind exactly one parameter (the continuation), got {}",
                        body.params.len()
                    );
                };
                let kparam = ml_name(kparam.id());
                let steps = self.evidence_steps(evidence);
                let body_cps = self.to_ml_stmt(&body.body)?;
                Ok(cps::lift(
                    steps,
                    Cps::inline(move |names, k1| {
                        let k1r = k1.reify(names);
                        let ev = names.fresh("ev");
                        let a = names.fresh("a");
                        // The captured continuation, as handler code sees
                        // it: evidence-adjusted resumption.
                        let resume = Expr::lambda(
                            vec![Param::Named(ev.clone()), Param::Named(a.clone())],
                            Expr::call(
                                Expr::var(ev),
                                vec![Expr::call(k1r, vec![Expr::var(a)])],
                            ),
                        );
                        let reified = body_cps.reify(names);
                        Expr::let_in(
                            vec![Binding::ValBind {
                                name: kparam,
                                expr: resume,
                            }],
                            reified,
                        )
                    }),
                ))
            }

            ir::Stmt::Region { body } => {
                let body_e = self.lower_block(body)?;
                Ok(Cps::inline(move |names, k| {
                    Expr::call(
                        Expr::call(Expr::var(consts::WITH_REGION), vec![body_e]),
                        vec![k.reify(names)],
                    )
                }))
            }
        }
    }

    /// Syntactic recognition of state access: `x.get(ev)` reads the cell,
    /// `x.put(ev, v)` writes it. The evidence is ignored — cells are
    /// already in scope.
    fn try_state_access(
        &mut self,
        callee: &ir::Block,
        args: &[ir::Argument],
    ) -> Result<Option<Cps>, TransformError> {
        let ir::Block::Member { receiver, op, .. } = callee else {
            return Ok(None);
        };
        let ir::Block::BlockVar(cell) = receiver.as_ref() else {
            return Ok(None);
        };
        if !self.state_cells.contains(&cell.id) {
            return Ok(None);
        }
        let cell_var = Expr::var(ml_name(cell));
        match op.name.as_str() {
            "get" => Ok(Some(Cps::pure(Expr::Deref(Box::new(cell_var))))),
            "put" => {
                let value = args
                    .iter()
                    .find_map(|a| match a {
                        ir::Argument::Expr(e) => Some(e),
                        _ => None,
                    })
                    .unwrap_or_else(|| panic!("state put takes a value argument"));
                let value = self.pure_expr(value)?;
                Ok(Some(Cps::pure(Expr::Assign {
                    target: Box::new(cell_var),
                    value: Box::new(value),
                })))
            }
            _ => Ok(None),
        }
    }

    // -- Pure expressions -------------------------------------------------

    fn pure_expr(&mut self, expr: &ir::Expr) -> Result<Expr, TransformError> {
        match expr {
            ir::Expr::ValueVar(sym) => Ok(Expr::var(ml_name(sym))),
            ir::Expr::Literal(lit) => Ok(literal(lit)),
            ir::Expr::PureApp { callee, args, .. } => {
                let mut args_e = Vec::with_capacity(args.len());
                for arg in args {
                    args_e.push(self.pure_expr(arg)?);
                }
                if let ir::Block::BlockVar(sym) = callee {
                    if self.constructors.contains_key(&sym.id) {
                        return Ok(Expr::Make {
                            constructor: ml_name(sym),
                            payload: Expr::tuple_if_multiple(args_e).map(Box::new),
                        });
                    }
                }
                Ok(Expr::call(self.lower_block(callee)?, args_e))
            }
            ir::Expr::Select { target, field } => {
                let target = self.pure_expr(target)?;
                Ok(Expr::call(Expr::var(ml_name(field)), vec![target]))
            }
            // Boxing is the identity at the target level. Not sound as a
            // nominal distinction; kept as-is.
            ir::Expr::Box(block) => self.lower_block(block),
            ir::Expr::Run(stmt) => {
                let cps = self.to_ml_stmt(stmt)?;
                Ok(cps.run(&mut self.names))
            }
        }
    }

    // -- Blocks -----------------------------------------------------------

    fn lower_block(&mut self, block: &ir::Block) -> Result<Expr, TransformError> {
        match block {
            ir::Block::BlockVar(sym) => Ok(Expr::var(ml_name(sym))),
            ir::Block::BlockLit(lit) => {
                let mut params: Vec<Param> = lit
                    .params
                    .iter()
                    .map(|p| Param::Named(ml_name(p.id())))
                    .collect();
                let k = self.names.fresh("k");
                params.push(Param::Named(k.clone()));
                let body_cps = self.to_ml_stmt(&lit.body)?;
                let body = body_cps.apply(&mut self.names, Cont::Dynamic(Expr::var(k)));
                Ok(Expr::lambda(params, body))
            }
            ir::Block::Member { receiver, op, .. } => {
                let receiver = self.lower_block(receiver)?;
                let accessor = self
                    .op_accessors
                    .get(&op.id)
                    .cloned()
                    .unwrap_or_else(|| ml_name(op));
                Ok(Expr::call(Expr::var(accessor), vec![receiver]))
            }
            // Unboxing is the identity, like boxing.
            ir::Block::Unbox(expr) => self.pure_expr(expr),
            ir::Block::New(implementation) => self.lower_implementation(implementation),
        }
    }

    fn lower_implementation(
        &mut self,
        implementation: &ir::Implementation,
    ) -> Result<Expr, TransformError> {
        let family = self.intern_object(implementation.operations.len());
        let mut ops = Vec::with_capacity(implementation.operations.len());
        for op in &implementation.operations {
            ops.push(self.lower_block(&op.block)?);
        }
        Ok(Expr::Make {
            constructor: family.constructor,
            payload: Expr::tuple_if_multiple(ops).map(Box::new),
        })
    }

    // -- Arguments and evidence -------------------------------------------

    fn lower_argument(&mut self, arg: &ir::Argument) -> Result<Expr, TransformError> {
        match arg {
            ir::Argument::Expr(e) => self.pure_expr(e),
            ir::Argument::Block(b) => self.lower_block(b),
            ir::Argument::Evidence(ev) => Ok(self.lower_evidence(ev)),
        }
    }

    /// Compose evidence into a single runtime lift value:
    /// `[]` is `here`, `[e]` is `e`, longer lists fold into `nested`.
    fn lower_evidence(&self, evidence: &ir::Evidence) -> Expr {
        let mut steps: Vec<Expr> = evidence.0.iter().map(|l| self.lift_value(l)).collect();
        match steps.len() {
            0 => Expr::var(consts::HERE),
            1 => steps.remove(0),
            _ => steps
                .into_iter()
                .rev()
                .reduce(|acc, step| {
                    Expr::call(Expr::var(consts::NESTED), vec![step, acc])
                })
                .expect("non-empty"),
        }
    }

    fn lift_value(&self, lift: &ir::Lift) -> Expr {
        match lift {
            // Reg is approximated as Try for now.
            ir::Lift::Try | ir::Lift::Reg => Expr::var(consts::LIFT),
            ir::Lift::Var(sym) => Expr::var(ml_name(sym)),
        }
    }

    fn evidence_steps(&self, evidence: &ir::Evidence) -> Vec<LiftStep> {
        evidence
            .0
            .iter()
            .map(|l| match l {
                ir::Lift::Try | ir::Lift::Reg => LiftStep::Prompt,
                ir::Lift::Var(sym) => LiftStep::Dynamic(Expr::var(ml_name(sym))),
            })
            .collect()
    }

    // -- Types ------------------------------------------------------------

    fn value_type_to_ml(&self, ty: &ValueType) -> Type {
        match &ty.dealias() {
            ValueType::Var(sym) => Type::Var(type_var_name(sym)),
            ValueType::Builtin(b) => Type::Data {
                name: match b {
                    BuiltinType::Int => "int",
                    BuiltinType::Bool => "bool",
                    BuiltinType::Unit => "unit",
                    BuiltinType::Double => "real",
                    BuiltinType::String => "string",
                }
                .to_string(),
                args: Vec::new(),
            },
            ValueType::Constructor { symbol, args } => Type::Data {
                name: ml_name(symbol),
                args: args.iter().map(|a| self.value_type_to_ml(a)).collect(),
            },
            ValueType::Boxed { block, .. } => self.block_type_to_ml(block),
            ValueType::Bottom => Type::Data {
                name: "unit".to_string(),
                args: Vec::new(),
            },
            ValueType::Unification(_) => {
                panic!("unification variable reached the backend; typer invariant violated")
            }
            ValueType::Alias { .. } => unreachable!("dealiased above"),
        }
    }

    fn block_type_to_ml(&self, ty: &BlockType) -> Type {
        match ty {
            BlockType::Function(ft) => {
                // Direct-style approximation; only used in datatype
                // payloads.
                let mut rendered: Vec<Type> = ft
                    .vparams
                    .iter()
                    .map(|p| self.value_type_to_ml(p))
                    .collect();
                rendered.extend(ft.bparams.iter().map(|b| self.block_type_to_ml(b)));
                let result = self.value_type_to_ml(&ft.result);
                let arrow = rendered
                    .into_iter()
                    .rev()
                    .fold(crate::emit::format_type(&result), |acc, param| {
                        format!("{} -> {acc}", crate::emit::format_type(&param))
                    });
                Type::Raw(format!("({arrow})"))
            }
            BlockType::Interface { .. } => {
                // Structural object; its arity is not recoverable from the
                // type alone.
                Type::Raw("exn".to_string())
            }
        }
    }
}

fn identity_lambda(names: &mut NameSupply) -> Expr {
    let a = names.fresh("a");
    Expr::lambda(vec![Param::Named(a.clone())], Expr::var(a))
}

fn literal(lit: &Lit) -> Expr {
    match lit {
        // SML spells unary minus with a tilde.
        Lit::Int(n) => Expr::RawValue(n.to_string().replace('-', "~")),
        Lit::Double(d) => Expr::RawValue(format!("{d:?}").replace('-', "~")),
        Lit::Bool(true) => Expr::var(consts::TRUE_VAL),
        Lit::Bool(false) => Expr::var(consts::FALSE_VAL),
        Lit::String(s) => Expr::MLString(s.clone()),
        Lit::Unit => Expr::var(consts::UNIT_VAL),
    }
}

/// `(C (_, _, arg, _))` — projection of field `index` out of `arity`.
fn projection_pattern(constructor: &str, arity: usize, index: usize) -> Pattern {
    let payload = match arity {
        0 => None,
        1 => Some(Box::new(Pattern::Named("arg".to_string()))),
        _ => Some(Box::new(Pattern::Tuple(
            (0..arity)
                .map(|i| {
                    if i == index {
                        Pattern::Named("arg".to_string())
                    } else {
                        Pattern::Wildcard
                    }
                })
                .collect(),
        ))),
    };
    Pattern::Make {
        constructor: constructor.to_string(),
        payload,
    }
}

fn clause_pattern(constructor: &str, binders: &[String]) -> Pattern {
    let payload = match binders.len() {
        0 => None,
        1 => Some(Box::new(Pattern::Named(binders[0].clone()))),
        _ => Some(Box::new(Pattern::Tuple(
            binders.iter().map(|b| Pattern::Named(b.clone())).collect(),
        ))),
    };
    Pattern::Make {
        constructor: constructor.to_string(),
        payload,
    }
}

// ---------------------------------------------------------------------------
// Topological ordering
// ---------------------------------------------------------------------------

/// Order definitions for emission: `let`s keep their source positions,
/// each run of `def`s between them is sorted by dependency. A cycle in a
/// group aborts the transformation naming every symbol in it.
fn sort_definitions(
    defs: &[ir::Definition],
) -> Result<Vec<&ir::Definition>, TransformError> {
    let mut out = Vec::with_capacity(defs.len());
    let mut group: Vec<&ir::Definition> = Vec::new();
    for def in defs {
        match def {
            ir::Definition::Def { .. } => group.push(def),
            ir::Definition::Let { .. } => {
                out.extend(sort_group(std::mem::take(&mut group))?);
                out.push(def);
            }
        }
    }
    out.extend(sort_group(group)?);
    Ok(out)
}

fn sort_group(group: Vec<&ir::Definition>) -> Result<Vec<&ir::Definition>, TransformError> {
    if group.len() <= 1 {
        return Ok(group);
    }
    let ids: BTreeMap<SymbolId, usize> = group
        .iter()
        .enumerate()
        .filter_map(|(i, d)| d.id().map(|s| (s.id, i)))
        .collect();

    // deps[i] holds the group members i depends on. Self-recursion is
    // fine (`fun` is recursive); only cross-references count.
    let mut deps: Vec<BTreeSet<usize>> = Vec::with_capacity(group.len());
    for (i, def) in group.iter().enumerate() {
        let free = match def {
            ir::Definition::Def { block, .. } => free_block_vars(block),
            ir::Definition::Let { binding, .. } => free_expr_vars(binding),
        };
        deps.push(
            free.iter()
                .filter_map(|id| ids.get(id))
                .copied()
                .filter(|&j| j != i)
                .collect(),
        );
    }

    let mut indegree: Vec<usize> = deps.iter().map(|d| d.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); group.len()];
    for (i, d) in deps.iter().enumerate() {
        for &j in d {
            dependents[j].push(i);
        }
    }
    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(group.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        for &dependent in &dependents[next] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    if order.len() != group.len() {
        let mut names: Vec<String> = group
            .iter()
            .enumerate()
            .filter(|(i, _)| !order.contains(i))
            .filter_map(|(_, d)| d.id().map(|s| s.name.clone()))
            .collect();
        names.sort();
        return Err(TransformError::MutualRecursion { names });
    }
    Ok(order.into_iter().map(|i| group[i]).collect())
}
