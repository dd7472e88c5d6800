//! Semantic types for Tern.
//!
//! This crate defines the value types, block types, effect sets, and
//! capture sets used by the type checker and the unification engine. These
//! are distinct from the syntactic annotations in `tern-ast`: annotations
//! are what the user wrote, these are what the checker computes.
//!
//! Everything here derives `Ord` so that effect sets and capture sets can
//! be stored sorted and deduplicated, which in turn makes set equality and
//! diagnostic output deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use tern_ast::BuiltinType;
use tern_ast::{Symbol, SymbolId};

// ---------------------------------------------------------------------------
// Unification variables
// ---------------------------------------------------------------------------

/// Identifies one unification scope. Scopes nest; the depth ordering is the
/// ordering of the ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl ScopeId {
    /// The outermost scope, entered once per checked definition.
    pub fn root() -> Self {
        ScopeId(0)
    }
}

/// A value-type unification variable, stamped with the scope that created
/// it. Variables must not outlive their scope; see the unification engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnificationVar {
    pub id: u32,
    pub scope: ScopeId,
}

impl fmt::Display for UnificationVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.id)
    }
}

/// A capture-set unification variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureUnificationVar {
    pub id: u32,
    pub scope: ScopeId,
}

impl fmt::Display for CaptureUnificationVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?C{}", self.id)
    }
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// A semantic value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// A rigid type variable: a type parameter or an existential skolem.
    Var(Symbol),
    /// A solver variable.
    Unification(UnificationVar),
    /// Application of a data or record type constructor.
    Constructor {
        symbol: Symbol,
        args: Vec<ValueType>,
    },
    /// A first-class block: block type plus the captures it closes over.
    Boxed {
        block: Box<BlockType>,
        captures: CaptureSet,
    },
    Builtin(BuiltinType),
    /// A type alias applied to arguments. `rhs` is the alias body with the
    /// alias's parameters already substituted; comparison must go through
    /// [`ValueType::dealias`].
    Alias {
        symbol: Symbol,
        tparams: Vec<Symbol>,
        rhs: Box<ValueType>,
    },
    /// The empty type; subtype of everything. Holes synthesize it.
    Bottom,
}

impl ValueType {
    pub fn int() -> Self {
        ValueType::Builtin(BuiltinType::Int)
    }

    pub fn bool() -> Self {
        ValueType::Builtin(BuiltinType::Bool)
    }

    pub fn unit() -> Self {
        ValueType::Builtin(BuiltinType::Unit)
    }

    pub fn double() -> Self {
        ValueType::Builtin(BuiltinType::Double)
    }

    pub fn string() -> Self {
        ValueType::Builtin(BuiltinType::String)
    }

    /// Expand alias nodes, recursively, everywhere in the type.
    pub fn dealias(&self) -> ValueType {
        match self {
            ValueType::Alias { rhs, .. } => rhs.dealias(),
            ValueType::Constructor { symbol, args } => ValueType::Constructor {
                symbol: symbol.clone(),
                args: args.iter().map(ValueType::dealias).collect(),
            },
            ValueType::Boxed { block, captures } => ValueType::Boxed {
                block: Box::new(block.dealias()),
                captures: captures.clone(),
            },
            other => other.clone(),
        }
    }

    /// Whether any unification variable occurs in the type.
    pub fn has_unification_vars(&self) -> bool {
        match self {
            ValueType::Unification(_) => true,
            ValueType::Var(_) | ValueType::Builtin(_) | ValueType::Bottom => false,
            ValueType::Constructor { args, .. } => {
                args.iter().any(ValueType::has_unification_vars)
            }
            ValueType::Boxed { block, captures } => {
                block.has_unification_vars() || captures.has_unification_vars()
            }
            ValueType::Alias { rhs, .. } => rhs.has_unification_vars(),
        }
    }

    /// Whether the rigid variable `var` occurs in the type.
    pub fn mentions_var(&self, var: SymbolId) -> bool {
        match self {
            ValueType::Var(sym) => sym.id == var,
            ValueType::Unification(_) | ValueType::Builtin(_) | ValueType::Bottom => false,
            ValueType::Constructor { args, .. } => args.iter().any(|a| a.mentions_var(var)),
            ValueType::Boxed { block, .. } => block.mentions_var(var),
            ValueType::Alias { rhs, .. } => rhs.mentions_var(var),
        }
    }

    /// Collect every unification variable occurring in the type.
    pub fn unification_vars(&self, into: &mut BTreeSet<UnificationVar>) {
        match self {
            ValueType::Unification(v) => {
                into.insert(*v);
            }
            ValueType::Var(_) | ValueType::Builtin(_) | ValueType::Bottom => {}
            ValueType::Constructor { args, .. } => {
                for a in args {
                    a.unification_vars(into);
                }
            }
            ValueType::Boxed { block, .. } => block.unification_vars(into),
            ValueType::Alias { rhs, .. } => rhs.unification_vars(into),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Var(sym) => write!(f, "{sym}"),
            ValueType::Unification(v) => write!(f, "{v}"),
            ValueType::Constructor { symbol, args } => {
                write!(f, "{symbol}")?;
                write_type_args(f, args)
            }
            ValueType::Boxed { block, captures } => {
                write!(f, "{block} at {captures}")
            }
            ValueType::Builtin(b) => write!(f, "{b}"),
            ValueType::Alias { symbol, .. } => write!(f, "{symbol}"),
            ValueType::Bottom => write!(f, "Nothing"),
        }
    }
}

fn write_type_args(f: &mut fmt::Formatter<'_>, args: &[ValueType]) -> fmt::Result {
    if args.is_empty() {
        return Ok(());
    }
    write!(f, "[")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    write!(f, "]")
}

// ---------------------------------------------------------------------------
// Block types
// ---------------------------------------------------------------------------

/// The type of a second-class block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockType {
    Function(FunctionType),
    /// A capability type: an interface applied to arguments.
    Interface {
        symbol: Symbol,
        args: Vec<ValueType>,
    },
}

impl BlockType {
    pub fn dealias(&self) -> BlockType {
        match self {
            BlockType::Function(ft) => BlockType::Function(ft.dealias()),
            BlockType::Interface { symbol, args } => BlockType::Interface {
                symbol: symbol.clone(),
                args: args.iter().map(ValueType::dealias).collect(),
            },
        }
    }

    pub fn has_unification_vars(&self) -> bool {
        match self {
            BlockType::Function(ft) => ft.has_unification_vars(),
            BlockType::Interface { args, .. } => {
                args.iter().any(ValueType::has_unification_vars)
            }
        }
    }

    pub fn mentions_var(&self, var: SymbolId) -> bool {
        match self {
            BlockType::Function(ft) => ft.mentions_var(var),
            BlockType::Interface { args, .. } => args.iter().any(|a| a.mentions_var(var)),
        }
    }

    pub fn unification_vars(&self, into: &mut BTreeSet<UnificationVar>) {
        match self {
            BlockType::Function(ft) => ft.unification_vars(into),
            BlockType::Interface { args, .. } => {
                for a in args {
                    a.unification_vars(into);
                }
            }
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockType::Function(ft) => write!(f, "{ft}"),
            BlockType::Interface { symbol, args } => {
                write!(f, "{symbol}")?;
                write_type_args(f, args)
            }
        }
    }
}

/// The type of a function block.
///
/// `tparams` and `cparams` are the quantified type and capture parameters;
/// an instantiated function type has both empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionType {
    pub tparams: Vec<Symbol>,
    pub cparams: Vec<Symbol>,
    pub vparams: Vec<ValueType>,
    pub bparams: Vec<BlockType>,
    pub result: Box<ValueType>,
    pub effects: Effects,
}

impl FunctionType {
    /// A monomorphic function over value parameters only.
    pub fn simple(vparams: Vec<ValueType>, result: ValueType, effects: Effects) -> Self {
        Self {
            tparams: Vec::new(),
            cparams: Vec::new(),
            vparams,
            bparams: Vec::new(),
            result: Box::new(result),
            effects,
        }
    }

    pub fn dealias(&self) -> FunctionType {
        FunctionType {
            tparams: self.tparams.clone(),
            cparams: self.cparams.clone(),
            vparams: self.vparams.iter().map(ValueType::dealias).collect(),
            bparams: self.bparams.iter().map(BlockType::dealias).collect(),
            result: Box::new(self.result.dealias()),
            effects: self.effects.dealias(),
        }
    }

    pub fn has_unification_vars(&self) -> bool {
        self.vparams.iter().any(ValueType::has_unification_vars)
            || self.bparams.iter().any(BlockType::has_unification_vars)
            || self.result.has_unification_vars()
            || !self.effects.is_concrete()
    }

    pub fn mentions_var(&self, var: SymbolId) -> bool {
        self.vparams.iter().any(|p| p.mentions_var(var))
            || self.bparams.iter().any(|p| p.mentions_var(var))
            || self.result.mentions_var(var)
            || self.effects.mentions_var(var)
    }

    pub fn unification_vars(&self, into: &mut BTreeSet<UnificationVar>) {
        for p in &self.vparams {
            p.unification_vars(into);
        }
        for p in &self.bparams {
            p.unification_vars(into);
        }
        self.result.unification_vars(into);
        self.effects.unification_vars(into);
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tparams.is_empty() {
            write!(f, "[")?;
            for (i, p) in self.tparams.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{p}")?;
            }
            write!(f, "]")?;
        }
        write!(f, "(")?;
        let mut first = true;
        for p in &self.vparams {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{p}")?;
        }
        for p in &self.bparams {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{{{p}}}")?;
        }
        write!(f, ") => {}", self.result)?;
        if !self.effects.is_pure() {
            write!(f, " / {}", self.effects)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Ambient effects that need no handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinEffect {
    Io,
    Control,
}

impl fmt::Display for BuiltinEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltinEffect::Io => write!(f, "IO"),
            BuiltinEffect::Control => write!(f, "Control"),
        }
    }
}

/// One element of an effect set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Effect {
    /// A nullary interface.
    Interface(Symbol),
    Builtin(BuiltinEffect),
    /// An interface applied to type arguments.
    Apply {
        symbol: Symbol,
        args: Vec<ValueType>,
    },
    /// An effect alias; must be expanded before set comparison.
    Alias {
        symbol: Symbol,
        tparams: Vec<Symbol>,
        effects: Effects,
    },
}

impl Effect {
    /// Control effects are the ones a handler can discharge.
    pub fn is_control(&self) -> bool {
        !matches!(self, Effect::Builtin(_))
    }

    pub fn has_unification_vars(&self) -> bool {
        match self {
            Effect::Interface(_) | Effect::Builtin(_) => false,
            Effect::Apply { args, .. } => args.iter().any(ValueType::has_unification_vars),
            Effect::Alias { effects, .. } => !effects.is_concrete(),
        }
    }

    pub fn mentions_var(&self, var: SymbolId) -> bool {
        match self {
            Effect::Interface(_) | Effect::Builtin(_) => false,
            Effect::Apply { args, .. } => args.iter().any(|a| a.mentions_var(var)),
            Effect::Alias { effects, .. } => effects.mentions_var(var),
        }
    }

    pub fn unification_vars(&self, into: &mut BTreeSet<UnificationVar>) {
        match self {
            Effect::Interface(_) | Effect::Builtin(_) => {}
            Effect::Apply { args, .. } => {
                for a in args {
                    a.unification_vars(into);
                }
            }
            Effect::Alias { effects, .. } => effects.unification_vars(into),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Interface(sym) => write!(f, "{sym}"),
            Effect::Builtin(b) => write!(f, "{b}"),
            Effect::Apply { symbol, args } => {
                write!(f, "{symbol}")?;
                write_type_args(f, args)
            }
            Effect::Alias { symbol, .. } => write!(f, "{symbol}"),
        }
    }
}

/// A set of effects. Semantically a multiset; stored sorted and
/// deduplicated so that set equality is structural equality.
///
/// The typer only ever stores *concrete* effect sets (no unification
/// variables); this is asserted at construction and checked again at the
/// typer boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Effects {
    effects: Vec<Effect>,
}

impl Effects {
    /// The empty effect set.
    pub fn pure() -> Self {
        Self::default()
    }

    /// Build a set from arbitrary elements: sorts and deduplicates.
    pub fn from_effects(effects: impl IntoIterator<Item = Effect>) -> Self {
        let set: BTreeSet<Effect> = effects.into_iter().collect();
        Self {
            effects: set.into_iter().collect(),
        }
    }

    /// Build a set that is required to be concrete.
    ///
    /// Construction sites inside the typer use this; a non-concrete input
    /// is a checker bug, caught in debug builds.
    pub fn concrete(effects: impl IntoIterator<Item = Effect>) -> Self {
        let out = Self::from_effects(effects);
        debug_assert!(
            out.is_concrete(),
            "effect set must be concrete: {out}"
        );
        out
    }

    pub fn is_pure(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.effects.iter()
    }

    pub fn contains(&self, effect: &Effect) -> bool {
        self.effects.binary_search(effect).is_ok()
    }

    pub fn union(&self, other: &Effects) -> Effects {
        Self::from_effects(self.effects.iter().chain(other.effects.iter()).cloned())
    }

    pub fn difference(&self, other: &Effects) -> Effects {
        Self::from_effects(
            self.effects
                .iter()
                .filter(|e| !other.contains(e))
                .cloned(),
        )
    }

    /// The handleable subset.
    pub fn controls(&self) -> Effects {
        Self::from_effects(self.effects.iter().filter(|e| e.is_control()).cloned())
    }

    /// Expand effect aliases into their members, recursively.
    pub fn dealias(&self) -> Effects {
        let mut out = Vec::new();
        for e in &self.effects {
            match e {
                Effect::Alias { effects, .. } => {
                    out.extend(effects.dealias().effects);
                }
                other => out.push(other.clone()),
            }
        }
        Self::from_effects(out)
    }

    pub fn is_concrete(&self) -> bool {
        self.effects.iter().all(|e| !e.has_unification_vars())
    }

    pub fn mentions_var(&self, var: SymbolId) -> bool {
        self.effects.iter().any(|e| e.mentions_var(var))
    }

    pub fn unification_vars(&self, into: &mut BTreeSet<UnificationVar>) {
        for e in &self.effects {
            e.unification_vars(into);
        }
    }
}

impl FromIterator<Effect> for Effects {
    fn from_iter<T: IntoIterator<Item = Effect>>(iter: T) -> Self {
        Self::from_effects(iter)
    }
}

impl fmt::Display for Effects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, e) in self.effects.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{e}")?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Capture sets
// ---------------------------------------------------------------------------

/// One capture atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capture {
    /// The capability or resource introduced by a block symbol.
    Block(Symbol),
    /// A capture parameter of an enclosing function.
    Param(Symbol),
    /// A solver variable for a not-yet-known capture set.
    Unification(CaptureUnificationVar),
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capture::Block(sym) | Capture::Param(sym) => write!(f, "{sym}"),
            Capture::Unification(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CaptureSet(pub BTreeSet<Capture>);

impl CaptureSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn singleton(capture: Capture) -> Self {
        let mut set = BTreeSet::new();
        set.insert(capture);
        Self(set)
    }

    pub fn from_captures(captures: impl IntoIterator<Item = Capture>) -> Self {
        Self(captures.into_iter().collect())
    }

    pub fn union(&self, other: &CaptureSet) -> CaptureSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn is_subset(&self, other: &CaptureSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn has_unification_vars(&self) -> bool {
        self.0
            .iter()
            .any(|c| matches!(c, Capture::Unification(_)))
    }
}

impl fmt::Display for CaptureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// The solver's solution map: unification variables to value types, capture
/// variables to capture sets. Applied during and after unification to
/// resolve inference variables.
///
/// Solutions may chain (a variable solved to another variable); `apply_*`
/// follows chains to a fixed point per occurrence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Substitution {
    values: BTreeMap<u32, ValueType>,
    captures: BTreeMap<u32, CaptureSet>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_value(&mut self, var: UnificationVar, ty: ValueType) {
        self.values.insert(var.id, ty);
    }

    pub fn insert_captures(&mut self, var: CaptureUnificationVar, set: CaptureSet) {
        self.captures.insert(var.id, set);
    }

    pub fn lookup_value(&self, var: UnificationVar) -> Option<&ValueType> {
        self.values.get(&var.id)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.captures.is_empty()
    }

    pub fn apply_value(&self, ty: &ValueType) -> ValueType {
        match ty {
            ValueType::Unification(v) => match self.values.get(&v.id) {
                Some(solution) => self.apply_value(solution),
                None => ty.clone(),
            },
            ValueType::Var(_) | ValueType::Builtin(_) | ValueType::Bottom => ty.clone(),
            ValueType::Constructor { symbol, args } => ValueType::Constructor {
                symbol: symbol.clone(),
                args: args.iter().map(|a| self.apply_value(a)).collect(),
            },
            ValueType::Boxed { block, captures } => ValueType::Boxed {
                block: Box::new(self.apply_block(block)),
                captures: self.apply_captures(captures),
            },
            ValueType::Alias {
                symbol,
                tparams,
                rhs,
            } => ValueType::Alias {
                symbol: symbol.clone(),
                tparams: tparams.clone(),
                rhs: Box::new(self.apply_value(rhs)),
            },
        }
    }

    pub fn apply_block(&self, ty: &BlockType) -> BlockType {
        match ty {
            BlockType::Function(ft) => BlockType::Function(self.apply_function(ft)),
            BlockType::Interface { symbol, args } => BlockType::Interface {
                symbol: symbol.clone(),
                args: args.iter().map(|a| self.apply_value(a)).collect(),
            },
        }
    }

    pub fn apply_function(&self, ft: &FunctionType) -> FunctionType {
        FunctionType {
            tparams: ft.tparams.clone(),
            cparams: ft.cparams.clone(),
            vparams: ft.vparams.iter().map(|p| self.apply_value(p)).collect(),
            bparams: ft.bparams.iter().map(|p| self.apply_block(p)).collect(),
            result: Box::new(self.apply_value(&ft.result)),
            effects: self.apply_effects(&ft.effects),
        }
    }

    pub fn apply_effects(&self, effects: &Effects) -> Effects {
        Effects::from_effects(effects.iter().map(|e| self.apply_effect(e)))
    }

    fn apply_effect(&self, effect: &Effect) -> Effect {
        match effect {
            Effect::Interface(_) | Effect::Builtin(_) => effect.clone(),
            Effect::Apply { symbol, args } => Effect::Apply {
                symbol: symbol.clone(),
                args: args.iter().map(|a| self.apply_value(a)).collect(),
            },
            Effect::Alias {
                symbol,
                tparams,
                effects,
            } => Effect::Alias {
                symbol: symbol.clone(),
                tparams: tparams.clone(),
                effects: self.apply_effects(effects),
            },
        }
    }

    pub fn apply_captures(&self, set: &CaptureSet) -> CaptureSet {
        let mut out = BTreeSet::new();
        for c in &set.0 {
            match c {
                Capture::Unification(v) => match self.captures.get(&v.id) {
                    Some(solution) => {
                        out.extend(self.apply_captures(solution).0);
                    }
                    None => {
                        out.insert(c.clone());
                    }
                },
                other => {
                    out.insert(other.clone());
                }
            }
        }
        CaptureSet(out)
    }
}

// ---------------------------------------------------------------------------
// Rigid-variable substitution (instantiation)
// ---------------------------------------------------------------------------

/// Replaces rigid type parameters and capture parameters by concrete
/// types/capture sets. Used by `instantiate` and by constructor/alias
/// application.
#[derive(Debug, Clone, Default)]
pub struct RigidSubstitution {
    pub types: BTreeMap<SymbolId, ValueType>,
    pub captures: BTreeMap<SymbolId, CaptureSet>,
}

impl RigidSubstitution {
    pub fn for_types(pairs: impl IntoIterator<Item = (SymbolId, ValueType)>) -> Self {
        Self {
            types: pairs.into_iter().collect(),
            captures: BTreeMap::new(),
        }
    }

    pub fn apply_value(&self, ty: &ValueType) -> ValueType {
        match ty {
            ValueType::Var(sym) => match self.types.get(&sym.id) {
                Some(replacement) => replacement.clone(),
                None => ty.clone(),
            },
            ValueType::Unification(_) | ValueType::Builtin(_) | ValueType::Bottom => ty.clone(),
            ValueType::Constructor { symbol, args } => ValueType::Constructor {
                symbol: symbol.clone(),
                args: args.iter().map(|a| self.apply_value(a)).collect(),
            },
            ValueType::Boxed { block, captures } => ValueType::Boxed {
                block: Box::new(self.apply_block(block)),
                captures: self.apply_captures(captures),
            },
            ValueType::Alias {
                symbol,
                tparams,
                rhs,
            } => ValueType::Alias {
                symbol: symbol.clone(),
                tparams: tparams.clone(),
                rhs: Box::new(self.apply_value(rhs)),
            },
        }
    }

    pub fn apply_block(&self, ty: &BlockType) -> BlockType {
        match ty {
            BlockType::Function(ft) => BlockType::Function(self.apply_function(ft)),
            BlockType::Interface { symbol, args } => BlockType::Interface {
                symbol: symbol.clone(),
                args: args.iter().map(|a| self.apply_value(a)).collect(),
            },
        }
    }

    pub fn apply_function(&self, ft: &FunctionType) -> FunctionType {
        // Shadowed parameters stay rigid inside the nested signature.
        let inner = Self {
            types: self
                .types
                .iter()
                .filter(|(id, _)| !ft.tparams.iter().any(|p| p.id == **id))
                .map(|(id, ty)| (*id, ty.clone()))
                .collect(),
            captures: self
                .captures
                .iter()
                .filter(|(id, _)| !ft.cparams.iter().any(|p| p.id == **id))
                .map(|(id, set)| (*id, set.clone()))
                .collect(),
        };
        FunctionType {
            tparams: ft.tparams.clone(),
            cparams: ft.cparams.clone(),
            vparams: ft.vparams.iter().map(|p| inner.apply_value(p)).collect(),
            bparams: ft.bparams.iter().map(|p| inner.apply_block(p)).collect(),
            result: Box::new(inner.apply_value(&ft.result)),
            effects: inner.apply_effects(&ft.effects),
        }
    }

    pub fn apply_effects(&self, effects: &Effects) -> Effects {
        Effects::from_effects(effects.iter().map(|e| match e {
            Effect::Interface(_) | Effect::Builtin(_) => e.clone(),
            Effect::Apply { symbol, args } => Effect::Apply {
                symbol: symbol.clone(),
                args: args.iter().map(|a| self.apply_value(a)).collect(),
            },
            Effect::Alias {
                symbol,
                tparams,
                effects,
            } => Effect::Alias {
                symbol: symbol.clone(),
                tparams: tparams.clone(),
                effects: self.apply_effects(effects),
            },
        }))
    }

    pub fn apply_captures(&self, set: &CaptureSet) -> CaptureSet {
        let mut out = BTreeSet::new();
        for c in &set.0 {
            match c {
                Capture::Param(sym) => match self.captures.get(&sym.id) {
                    Some(replacement) => {
                        out.extend(replacement.0.iter().cloned());
                    }
                    None => {
                        out.insert(c.clone());
                    }
                },
                other => {
                    out.insert(other.clone());
                }
            }
        }
        CaptureSet(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_ast::Symbol;

    fn iface(id: u32, name: &str) -> Symbol {
        Symbol::block(id, name)
    }

    #[test]
    fn effects_deduplicate_and_sort() {
        let exc = Effect::Interface(iface(4, "Exc"));
        let st = Effect::Interface(iface(2, "State"));
        let effs = Effects::from_effects(vec![exc.clone(), st.clone(), exc.clone()]);
        assert_eq!(effs.len(), 2);
        let collected: Vec<_> = effs.iter().cloned().collect();
        assert_eq!(collected, vec![st, exc]);
    }

    #[test]
    fn effects_union_and_difference() {
        let a = Effect::Interface(iface(1, "A"));
        let b = Effect::Interface(iface(2, "B"));
        let c = Effect::Interface(iface(3, "C"));
        let left = Effects::from_effects(vec![a.clone(), b.clone()]);
        let right = Effects::from_effects(vec![b.clone(), c.clone()]);
        assert_eq!(
            left.union(&right),
            Effects::from_effects(vec![a.clone(), b.clone(), c.clone()])
        );
        assert_eq!(left.difference(&right), Effects::from_effects(vec![a]));
    }

    #[test]
    fn concreteness_sees_through_apply_args() {
        let var = ValueType::Unification(UnificationVar {
            id: 0,
            scope: ScopeId::root(),
        });
        let effs = Effects::from_effects(vec![Effect::Apply {
            symbol: iface(9, "Reader"),
            args: vec![var],
        }]);
        assert!(!effs.is_concrete());
    }

    #[test]
    fn substitution_follows_chains() {
        let scope = ScopeId::root();
        let v0 = UnificationVar { id: 0, scope };
        let v1 = UnificationVar { id: 1, scope };
        let mut subst = Substitution::new();
        subst.insert_value(v0, ValueType::Unification(v1));
        subst.insert_value(v1, ValueType::int());
        assert_eq!(
            subst.apply_value(&ValueType::Unification(v0)),
            ValueType::int()
        );
    }

    #[test]
    fn dealias_unwraps_nested_aliases() {
        let alias = ValueType::Alias {
            symbol: Symbol::ty(5, "Name"),
            tparams: Vec::new(),
            rhs: Box::new(ValueType::string()),
        };
        let ty = ValueType::Constructor {
            symbol: Symbol::ty(6, "Pair"),
            args: vec![alias, ValueType::int()],
        };
        assert_eq!(
            ty.dealias(),
            ValueType::Constructor {
                symbol: Symbol::ty(6, "Pair"),
                args: vec![ValueType::string(), ValueType::int()],
            }
        );
    }

    #[test]
    fn effect_alias_dealias_flattens() {
        let a = Effect::Interface(iface(1, "A"));
        let b = Effect::Interface(iface(2, "B"));
        let alias = Effect::Alias {
            symbol: Symbol::ty(3, "AB"),
            tparams: Vec::new(),
            effects: Effects::from_effects(vec![a.clone(), b.clone()]),
        };
        let effs = Effects::from_effects(vec![alias]);
        assert_eq!(effs.dealias(), Effects::from_effects(vec![a, b]));
    }

    #[test]
    fn rigid_substitution_shadows_nested_binders() {
        let t = Symbol::ty(1, "T");
        let inner = FunctionType {
            tparams: vec![t.clone()],
            cparams: Vec::new(),
            vparams: vec![ValueType::Var(t.clone())],
            bparams: Vec::new(),
            result: Box::new(ValueType::Var(t.clone())),
            effects: Effects::pure(),
        };
        let subst =
            RigidSubstitution::for_types(vec![(t.id, ValueType::int())]);
        // The nested binder re-binds T, so nothing changes.
        assert_eq!(subst.apply_function(&inner), inner);
    }

    #[test]
    fn capture_substitution_expands_params() {
        let c = Symbol::capture(1, "c");
        let io = Capture::Block(Symbol::block(2, "io"));
        let set = CaptureSet::from_captures(vec![Capture::Param(c.clone())]);
        let mut rigid = RigidSubstitution::default();
        rigid
            .captures
            .insert(c.id, CaptureSet::singleton(io.clone()));
        assert_eq!(rigid.apply_captures(&set), CaptureSet::singleton(io));
    }
}
