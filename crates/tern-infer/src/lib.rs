//! Type-and-effect inference for Tern.
//!
//! This crate implements:
//! - the typing context mapping symbols to value types, block types, and
//!   capture sets, with cheap backup/restore for speculative checking
//! - a scoped unification engine over value types, block types, effect
//!   sets, and capture sets
//! - the bidirectional typer with overload resolution by trial (see
//!   [`typeck`])
//!
//! The solver is eager: `require_*` operations unify immediately and
//! record solutions in a substitution. Failures are returned as values —
//! the typer decides where they surface as diagnostics, which is what
//! makes trial typechecking of overload candidates side-effect free.

pub mod exhaustive;
pub mod trace;
pub mod typeck;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tern_ast::{Symbol, SymbolId};
use tern_types::{
    BlockType, Capture, CaptureSet, CaptureUnificationVar, Effect, Effects, FunctionType,
    RigidSubstitution, ScopeId, Substitution, UnificationVar, ValueType,
};

// Re-export for convenience.
pub use tern_diag::{Category, Diagnostic, DiagnosticError, Severity, SourceLocation};

// ---------------------------------------------------------------------------
// Unification failures
// ---------------------------------------------------------------------------

/// Why two types failed to unify. The typer turns this into a diagnostic
/// at the current focus; a failure inside an overload trial may be
/// swallowed entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct UnificationFailure {
    pub left: ValueType,
    pub right: ValueType,
    pub cause: FailureCause,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    /// Different head constructors.
    HeadMismatch,
    /// Same head, different number of arguments or parameters.
    ArityMismatch,
    /// Function effects are compared by set equality; these differ.
    EffectsDiffer(Effects, Effects),
    /// Capture sets are not in the required inclusion.
    CaptureMismatch(CaptureSet, CaptureSet),
    /// A variable would contain itself.
    OccursCheck(UnificationVar),
    /// An unsolved variable outlived the scope that created it.
    EscapingSkolem(UnificationVar),
}

impl fmt::Display for UnificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            FailureCause::HeadMismatch | FailureCause::ArityMismatch => {
                write!(f, "Expected `{}` but got `{}`", self.left, self.right)
            }
            FailureCause::EffectsDiffer(a, b) => write!(
                f,
                "Expected effects `{a}` but got `{b}` (in `{}` vs `{}`)",
                self.left, self.right
            ),
            FailureCause::CaptureMismatch(sub, sup) => {
                write!(f, "Captures `{sub}` are not included in `{sup}`")
            }
            FailureCause::OccursCheck(v) => {
                write!(f, "Cannot construct the infinite type `{v} = {}`", self.right)
            }
            FailureCause::EscapingSkolem(v) => {
                write!(f, "Type variable `{v}` escapes its scope in `{}`", self.left)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Instantiation
// ---------------------------------------------------------------------------

/// Result of instantiating a polymorphic function type: the chosen type
/// and capture arguments plus the instantiated (monomorphic) signature.
#[derive(Debug, Clone)]
pub struct Instantiation {
    pub type_args: Vec<ValueType>,
    pub capture_args: Vec<CaptureSet>,
    pub function: FunctionType,
}

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// Scope-based constraint solver.
///
/// Scopes bracket unification regions: variables created inside a scope
/// must be solved by the time the enclosing definition is finished, or
/// they surface as [`FailureCause::EscapingSkolem`]. Trial typechecking
/// clones the solver wholesale and rolls back on failure, with
/// [`Unifier::absorb_fresh_counters`] keeping fresh ids monotone across
/// a rollback.
#[derive(Debug, Clone)]
pub struct Unifier {
    substitution: Substitution,
    /// Active scope stack; the root scope is always present.
    active: Vec<ScopeId>,
    next_scope: u32,
    next_var: u32,
    next_capture_var: u32,
    /// When true, unification steps are recorded for observability tools.
    tracing: bool,
    unify_trace: Vec<trace::UnifyStep>,
}

impl Default for Unifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Unifier {
    pub fn new() -> Self {
        Self {
            substitution: Substitution::new(),
            active: vec![ScopeId::root()],
            next_scope: 1,
            next_var: 0,
            next_capture_var: 0,
            tracing: false,
            unify_trace: Vec::new(),
        }
    }

    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    pub fn unify_trace(&self) -> &[trace::UnifyStep] {
        &self.unify_trace
    }

    fn record(&mut self, action: trace::UnifyAction, left: &str, right: &str, detail: &str) {
        if !self.tracing {
            return;
        }
        let step = self.unify_trace.len();
        self.unify_trace.push(trace::UnifyStep {
            step,
            action,
            left: left.to_string(),
            right: right.to_string(),
            detail: detail.to_string(),
        });
    }

    // -- Scopes -----------------------------------------------------------

    pub fn enter_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope += 1;
        self.active.push(id);
        id
    }

    pub fn leave_scope(&mut self) {
        debug_assert!(self.active.len() > 1, "cannot leave the root scope");
        self.active.pop();
    }

    pub fn current_scope(&self) -> ScopeId {
        *self.active.last().expect("scope stack is never empty")
    }

    fn scope_is_active(&self, scope: ScopeId) -> bool {
        self.active.contains(&scope)
    }

    /// Unsolved variables in `ty` whose creating scope has been left.
    /// The typer reports these as escaping skolems when a definition's
    /// final type still mentions them.
    pub fn escaping_vars(&self, ty: &ValueType) -> Vec<UnificationVar> {
        let resolved = self.substitution.apply_value(ty);
        let mut vars = BTreeSet::new();
        resolved.unification_vars(&mut vars);
        vars.into_iter()
            .filter(|v| !self.scope_is_active(v.scope))
            .collect()
    }

    /// Like [`Unifier::escaping_vars`], over a whole function signature:
    /// parameters, block parameters, result, and effects. Every
    /// `enter_scope`/`leave_scope` bracket that produces a signature runs
    /// this at scope close.
    pub fn escaping_function_vars(&self, ft: &FunctionType) -> Vec<UnificationVar> {
        let resolved = self.substitution.apply_function(ft);
        let mut vars = BTreeSet::new();
        resolved.unification_vars(&mut vars);
        vars.into_iter()
            .filter(|v| !self.scope_is_active(v.scope))
            .collect()
    }

    // -- Fresh variables --------------------------------------------------

    pub fn fresh_value_var(&mut self) -> ValueType {
        let var = UnificationVar {
            id: self.next_var,
            scope: self.current_scope(),
        };
        self.next_var += 1;
        ValueType::Unification(var)
    }

    pub fn fresh_capture_var(&mut self) -> CaptureSet {
        let var = CaptureUnificationVar {
            id: self.next_capture_var,
            scope: self.current_scope(),
        };
        self.next_capture_var += 1;
        CaptureSet::singleton(Capture::Unification(var))
    }

    /// Keep fresh-variable counters monotone relative to another solver.
    ///
    /// Used after rolling back to a snapshot taken before a speculative
    /// trial: the trial's state is discarded, but ids it consumed are
    /// never reissued.
    pub fn absorb_fresh_counters(&mut self, other: &Unifier) {
        self.next_var = self.next_var.max(other.next_var);
        self.next_capture_var = self.next_capture_var.max(other.next_capture_var);
        self.next_scope = self.next_scope.max(other.next_scope);
    }

    // -- Instantiation ----------------------------------------------------

    /// Replace a function type's type parameters with fresh unification
    /// variables (or with `targs` when provided) and its capture
    /// parameters with fresh capture variables.
    pub fn instantiate(
        &mut self,
        ft: &FunctionType,
        targs: Option<Vec<ValueType>>,
    ) -> Instantiation {
        let type_args: Vec<ValueType> = match targs {
            Some(args) => {
                debug_assert_eq!(args.len(), ft.tparams.len());
                args
            }
            None => ft.tparams.iter().map(|_| self.fresh_value_var()).collect(),
        };
        let capture_args: Vec<CaptureSet> = ft
            .cparams
            .iter()
            .map(|_| self.fresh_capture_var())
            .collect();

        let mut subst = RigidSubstitution::default();
        for (param, arg) in ft.tparams.iter().zip(type_args.iter()) {
            subst.types.insert(param.id, arg.clone());
        }
        for (param, arg) in ft.cparams.iter().zip(capture_args.iter()) {
            subst.captures.insert(param.id, arg.clone());
        }

        let function = FunctionType {
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams: ft.vparams.iter().map(|p| subst.apply_value(p)).collect(),
            bparams: ft.bparams.iter().map(|p| subst.apply_block(p)).collect(),
            result: Box::new(subst.apply_value(&ft.result)),
            effects: subst.apply_effects(&ft.effects),
        };
        if self.tracing {
            let shown = function.to_string();
            self.record(trace::UnifyAction::Instantiate, &shown, "", "");
        }
        Instantiation {
            type_args,
            capture_args,
            function,
        }
    }

    // -- Substitution -----------------------------------------------------

    pub fn substitution(&self) -> &Substitution {
        &self.substitution
    }

    pub fn substitute(&self, ty: &ValueType) -> ValueType {
        self.substitution.apply_value(ty)
    }

    pub fn substitute_block(&self, ty: &BlockType) -> BlockType {
        self.substitution.apply_block(ty)
    }

    pub fn substitute_function(&self, ft: &FunctionType) -> FunctionType {
        self.substitution.apply_function(ft)
    }

    pub fn substitute_effects(&self, effects: &Effects) -> Effects {
        self.substitution.apply_effects(effects)
    }

    pub fn substitute_captures(&self, set: &CaptureSet) -> CaptureSet {
        self.substitution.apply_captures(set)
    }

    // -- Requirements -----------------------------------------------------

    /// Record the obligation `sub <: sup`.
    ///
    /// Value constructors are invariant in their arguments and effect sets
    /// are compared by equality, so subtyping collapses to equality except
    /// at `Bottom` and at boxed captures.
    pub fn require_subtype(
        &mut self,
        sub: &ValueType,
        sup: &ValueType,
    ) -> Result<(), UnificationFailure> {
        let sub = self.substitution.apply_value(sub).dealias();
        let sup = self.substitution.apply_value(sup).dealias();
        match (&sub, &sup) {
            (ValueType::Bottom, _) => Ok(()),
            (
                ValueType::Boxed {
                    block: sub_block,
                    captures: sub_caps,
                },
                ValueType::Boxed {
                    block: sup_block,
                    captures: sup_caps,
                },
            ) => {
                self.require_equal_block(sub_block, sup_block)
                    .map_err(|e| e.outer(&sub, &sup))?;
                self.require_subregion(sub_caps, sup_caps)
                    .map_err(|cause| UnificationFailure {
                        left: sub.clone(),
                        right: sup.clone(),
                        cause,
                    })
            }
            _ => self.require_equal(&sub, &sup),
        }
    }

    /// Record the obligation `left = right`.
    pub fn require_equal(
        &mut self,
        left: &ValueType,
        right: &ValueType,
    ) -> Result<(), UnificationFailure> {
        let l = self.substitution.apply_value(left).dealias();
        let r = self.substitution.apply_value(right).dealias();
        if l == r {
            if self.tracing {
                let (ls, rs) = (l.to_string(), r.to_string());
                self.record(trace::UnifyAction::Identity, &ls, &rs, "");
            }
            return Ok(());
        }
        match (&l, &r) {
            (ValueType::Unification(a), ValueType::Unification(b)) => {
                // Solve the deeper-scoped variable into the shallower one.
                if a.scope >= b.scope {
                    self.bind(*a, r.clone())
                } else {
                    self.bind(*b, l.clone())
                }
            }
            (ValueType::Unification(v), _) => self.bind(*v, r.clone()),
            (_, ValueType::Unification(v)) => self.bind(*v, l.clone()),
            (
                ValueType::Constructor {
                    symbol: ls, args: la,
                },
                ValueType::Constructor {
                    symbol: rs, args: ra,
                },
            ) => {
                if ls.id != rs.id {
                    return Err(self.mismatch(&l, &r, FailureCause::HeadMismatch));
                }
                if la.len() != ra.len() {
                    return Err(self.mismatch(&l, &r, FailureCause::ArityMismatch));
                }
                if self.tracing {
                    let (lt, rt) = (l.to_string(), r.to_string());
                    self.record(trace::UnifyAction::Decompose, &lt, &rt, "");
                }
                for (a, b) in la.iter().zip(ra.iter()) {
                    self.require_equal(a, b)?;
                }
                Ok(())
            }
            (
                ValueType::Boxed {
                    block: lb,
                    captures: lc,
                },
                ValueType::Boxed {
                    block: rb,
                    captures: rc,
                },
            ) => {
                self.require_equal_block(lb, rb).map_err(|e| e.outer(&l, &r))?;
                self.require_subregion(lc, rc)
                    .and_then(|_| self.require_subregion(rc, lc))
                    .map_err(|cause| UnificationFailure {
                        left: l.clone(),
                        right: r.clone(),
                        cause,
                    })
            }
            _ => Err(self.mismatch(&l, &r, FailureCause::HeadMismatch)),
        }
    }

    /// Record the obligation that two block types are equal, up to
    /// alpha-renaming of their own binders.
    pub fn require_equal_block(
        &mut self,
        left: &BlockType,
        right: &BlockType,
    ) -> Result<(), UnificationFailure> {
        let l = self.substitution.apply_block(left).dealias();
        let r = self.substitution.apply_block(right).dealias();
        match (&l, &r) {
            (BlockType::Function(lf), BlockType::Function(rf)) => {
                self.require_equal_function(lf, rf)
            }
            (
                BlockType::Interface {
                    symbol: ls, args: la,
                },
                BlockType::Interface {
                    symbol: rs, args: ra,
                },
            ) => {
                if ls.id != rs.id || la.len() != ra.len() {
                    return Err(self.block_mismatch(&l, &r));
                }
                for (a, b) in la.iter().zip(ra.iter()) {
                    self.require_equal(a, b)?;
                }
                Ok(())
            }
            _ => Err(self.block_mismatch(&l, &r)),
        }
    }

    fn require_equal_function(
        &mut self,
        left: &FunctionType,
        right: &FunctionType,
    ) -> Result<(), UnificationFailure> {
        if left.tparams.len() != right.tparams.len()
            || left.cparams.len() != right.cparams.len()
            || left.vparams.len() != right.vparams.len()
            || left.bparams.len() != right.bparams.len()
        {
            return Err(self.block_mismatch(
                &BlockType::Function(left.clone()),
                &BlockType::Function(right.clone()),
            ));
        }
        // Alpha-rename the right signature's binders into the left's.
        let mut rename = RigidSubstitution::default();
        for (rp, lp) in right.tparams.iter().zip(left.tparams.iter()) {
            rename
                .types
                .insert(rp.id, ValueType::Var(lp.clone()));
        }
        for (rp, lp) in right.cparams.iter().zip(left.cparams.iter()) {
            rename
                .captures
                .insert(rp.id, CaptureSet::singleton(Capture::Param(lp.clone())));
        }
        for (lp, rp) in left.vparams.iter().zip(right.vparams.iter()) {
            let rp = rename.apply_value(rp);
            self.require_equal(lp, &rp)?;
        }
        for (lp, rp) in left.bparams.iter().zip(right.bparams.iter()) {
            let rp = rename.apply_block(rp);
            self.require_equal_block(lp, &rp)?;
        }
        let result = rename.apply_value(&right.result);
        self.require_equal(&left.result, &result)?;
        let reffs = rename.apply_effects(&right.effects);
        self.require_equal_effects(&left.effects, &reffs)
            .map_err(|cause| UnificationFailure {
                left: ValueType::Boxed {
                    block: Box::new(BlockType::Function(left.clone())),
                    captures: CaptureSet::empty(),
                },
                right: ValueType::Boxed {
                    block: Box::new(BlockType::Function(right.clone())),
                    captures: CaptureSet::empty(),
                },
                cause,
            })
    }

    /// Effect sets on function types are invariant: set equality after
    /// dealiasing. Arguments of applied effect constructors unify.
    pub fn require_equal_effects(
        &mut self,
        left: &Effects,
        right: &Effects,
    ) -> Result<(), FailureCause> {
        let l = self.substitution.apply_effects(left).dealias();
        let r = self.substitution.apply_effects(right).dealias();
        if l == r {
            return Ok(());
        }
        if l.len() != r.len() {
            return Err(FailureCause::EffectsDiffer(l, r));
        }
        for (le, re) in l.iter().zip(r.iter()) {
            match (le, re) {
                (Effect::Interface(a), Effect::Interface(b)) if a.id == b.id => {}
                (Effect::Builtin(a), Effect::Builtin(b)) if a == b => {}
                (
                    Effect::Apply {
                        symbol: a, args: la,
                    },
                    Effect::Apply {
                        symbol: b, args: ra,
                    },
                ) if a.id == b.id && la.len() == ra.len() => {
                    for (x, y) in la.iter().zip(ra.iter()) {
                        self.require_equal(x, y)
                            .map_err(|_| FailureCause::EffectsDiffer(l.clone(), r.clone()))?;
                    }
                }
                _ => return Err(FailureCause::EffectsDiffer(l.clone(), r.clone())),
            }
        }
        Ok(())
    }

    /// Record the obligation `sub ⊆ sup` on capture sets.
    pub fn require_subregion(
        &mut self,
        sub: &CaptureSet,
        sup: &CaptureSet,
    ) -> Result<(), FailureCause> {
        let sub = self.substitution.apply_captures(sub);
        let sup = self.substitution.apply_captures(sup);
        if sub.is_subset(&sup) {
            return Ok(());
        }
        // A supremum that is exactly one unsolved variable absorbs the sub
        // side; a sub side that is exactly one variable is solved to the
        // supremum.
        if let Some(var) = single_capture_var(&sup) {
            self.substitution.insert_captures(var, sub.clone());
            self.record(
                trace::UnifyAction::BindCapture,
                &sub.to_string(),
                &sup.to_string(),
                "",
            );
            return Ok(());
        }
        if let Some(var) = single_capture_var(&sub) {
            self.substitution.insert_captures(var, sup.clone());
            self.record(
                trace::UnifyAction::BindCapture,
                &sub.to_string(),
                &sup.to_string(),
                "",
            );
            return Ok(());
        }
        Err(FailureCause::CaptureMismatch(sub, sup))
    }

    /// Least upper bound of the given types under the current constraints.
    /// `Bottom` is the identity; otherwise all types must unify.
    pub fn join(&mut self, types: &[ValueType]) -> Result<ValueType, UnificationFailure> {
        let mut result: Option<ValueType> = None;
        for ty in types {
            let ty = self.substitution.apply_value(ty).dealias();
            if matches!(ty, ValueType::Bottom) {
                continue;
            }
            match &result {
                None => result = Some(ty),
                Some(acc) => {
                    let acc = acc.clone();
                    self.require_equal(&acc, &ty)?;
                }
            }
        }
        Ok(match result {
            Some(ty) => self.substitution.apply_value(&ty),
            None => ValueType::Bottom,
        })
    }

    // -- Internals --------------------------------------------------------

    fn bind(&mut self, var: UnificationVar, ty: ValueType) -> Result<(), UnificationFailure> {
        let mut occurring = BTreeSet::new();
        ty.unification_vars(&mut occurring);
        if occurring.contains(&var) {
            self.record(
                trace::UnifyAction::OccursCheck,
                &var.to_string(),
                &ty.to_string(),
                "",
            );
            return Err(UnificationFailure {
                left: ValueType::Unification(var),
                right: ty,
                cause: FailureCause::OccursCheck(var),
            });
        }
        if self.tracing {
            let shown = ty.to_string();
            let v = var.to_string();
            self.record(trace::UnifyAction::Bind, &v, &shown, "");
        }
        self.substitution.insert_value(var, ty);
        Ok(())
    }

    fn mismatch(
        &mut self,
        left: &ValueType,
        right: &ValueType,
        cause: FailureCause,
    ) -> UnificationFailure {
        if self.tracing {
            let (l, r) = (left.to_string(), right.to_string());
            self.record(trace::UnifyAction::Error, &l, &r, "");
        }
        UnificationFailure {
            left: left.clone(),
            right: right.clone(),
            cause,
        }
    }

    fn block_mismatch(&mut self, left: &BlockType, right: &BlockType) -> UnificationFailure {
        let l = ValueType::Boxed {
            block: Box::new(left.clone()),
            captures: CaptureSet::empty(),
        };
        let r = ValueType::Boxed {
            block: Box::new(right.clone()),
            captures: CaptureSet::empty(),
        };
        self.mismatch(&l, &r, FailureCause::HeadMismatch)
    }
}

impl UnificationFailure {
    /// Re-anchor a nested failure at an enclosing pair of types.
    fn outer(self, left: &ValueType, right: &ValueType) -> UnificationFailure {
        UnificationFailure {
            left: left.clone(),
            right: right.clone(),
            cause: self.cause,
        }
    }
}

fn single_capture_var(set: &CaptureSet) -> Option<CaptureUnificationVar> {
    if set.0.len() != 1 {
        return None;
    }
    match set.0.iter().next() {
        Some(Capture::Unification(v)) => Some(*v),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Global types: already-checked dependencies
// ---------------------------------------------------------------------------

/// Types of symbols from modules that were checked earlier in the
/// compilation. The typing context falls back to this database when a
/// symbol has no local entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalTypes {
    values: BTreeMap<SymbolId, ValueType>,
    blocks: BTreeMap<SymbolId, BlockType>,
    captures: BTreeMap<SymbolId, CaptureSet>,
}

impl GlobalTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_value(&mut self, sym: &Symbol, ty: ValueType) {
        self.values.insert(sym.id, ty);
    }

    pub fn bind_block(&mut self, sym: &Symbol, ty: BlockType) {
        self.blocks.insert(sym.id, ty);
    }

    pub fn bind_captures(&mut self, sym: &Symbol, set: CaptureSet) {
        self.captures.insert(sym.id, set);
    }

    /// Import everything a finished module exported.
    pub fn absorb(&mut self, ctx: &TypingContext) {
        self.values
            .extend(ctx.values.iter().map(|(k, v)| (*k, v.clone())));
        self.blocks
            .extend(ctx.blocks.iter().map(|(k, v)| (*k, v.clone())));
        self.captures
            .extend(ctx.captures.iter().map(|(k, v)| (*k, v.clone())));
    }
}

// ---------------------------------------------------------------------------
// Typing context
// ---------------------------------------------------------------------------

/// Why a function-type lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The symbol has no block type yet. For definitions this signals
    /// mutual recursion without annotation.
    NotBound,
    /// The symbol is bound, but to an interface type.
    NotAFunction,
}

/// The typing context: symbol-to-type maps plus the effects lexically in
/// scope. Backtrackable via [`TypingContext::backup`]/[`restore`].
///
/// [`restore`]: TypingContext::restore
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypingContext {
    values: BTreeMap<SymbolId, ValueType>,
    blocks: BTreeMap<SymbolId, BlockType>,
    captures: BTreeMap<SymbolId, CaptureSet>,
    /// Effects handleable at the current program point, outermost first.
    lexical_effects: Vec<Effect>,
    /// Symbols introduced by `var` binders; the only assignable targets.
    mutable: BTreeSet<SymbolId>,
    global: GlobalTypes,
}

/// A deep-enough snapshot of the context: everything except the global
/// database, which is immutable during a module check.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    values: BTreeMap<SymbolId, ValueType>,
    blocks: BTreeMap<SymbolId, BlockType>,
    captures: BTreeMap<SymbolId, CaptureSet>,
    lexical_effects: Vec<Effect>,
    mutable: BTreeSet<SymbolId>,
}

impl TypingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(global: GlobalTypes) -> Self {
        Self {
            global,
            ..Self::default()
        }
    }

    pub fn bind_value(&mut self, sym: &Symbol, ty: ValueType) {
        self.values.insert(sym.id, ty);
    }

    pub fn bind_block(&mut self, sym: &Symbol, ty: BlockType) {
        self.blocks.insert(sym.id, ty);
    }

    pub fn bind_captures(&mut self, sym: &Symbol, set: CaptureSet) {
        self.captures.insert(sym.id, set);
    }

    pub fn bind_mutable(&mut self, sym: &Symbol) {
        self.mutable.insert(sym.id);
    }

    pub fn is_mutable(&self, sym: &Symbol) -> bool {
        self.mutable.contains(&sym.id)
    }

    pub fn lookup_value(&self, sym: &Symbol) -> Option<&ValueType> {
        self.values
            .get(&sym.id)
            .or_else(|| self.global.values.get(&sym.id))
    }

    pub fn lookup_block(&self, sym: &Symbol) -> Option<&BlockType> {
        self.blocks
            .get(&sym.id)
            .or_else(|| self.global.blocks.get(&sym.id))
    }

    pub fn lookup_captures(&self, sym: &Symbol) -> Option<&CaptureSet> {
        self.captures
            .get(&sym.id)
            .or_else(|| self.global.captures.get(&sym.id))
    }

    /// Look up a block symbol expected to have a function type.
    pub fn lookup_function_type(&self, sym: &Symbol) -> Result<FunctionType, LookupError> {
        match self.lookup_block(sym) {
            Some(BlockType::Function(ft)) => Ok(ft.clone()),
            Some(BlockType::Interface { .. }) => Err(LookupError::NotAFunction),
            None => Err(LookupError::NotBound),
        }
    }

    pub fn push_lexical_effects(&mut self, effects: impl IntoIterator<Item = Effect>) -> usize {
        let mark = self.lexical_effects.len();
        self.lexical_effects.extend(effects);
        mark
    }

    pub fn truncate_lexical_effects(&mut self, mark: usize) {
        self.lexical_effects.truncate(mark);
    }

    pub fn lexical_effects(&self) -> &[Effect] {
        &self.lexical_effects
    }

    pub fn backup(&self) -> ContextSnapshot {
        ContextSnapshot {
            values: self.values.clone(),
            blocks: self.blocks.clone(),
            captures: self.captures.clone(),
            lexical_effects: self.lexical_effects.clone(),
            mutable: self.mutable.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.values = snapshot.values;
        self.blocks = snapshot.blocks;
        self.captures = snapshot.captures;
        self.lexical_effects = snapshot.lexical_effects;
        self.mutable = snapshot.mutable;
    }
}


#[cfg(test)]
mod typeck_tests;
