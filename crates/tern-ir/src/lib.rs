//! Lifted IR for Tern.
//!
//! The lifter (external to this repository) produces this representation
//! from the typed tree: effect handling has been made explicit through
//! evidence parameters, and every handler body is a block literal taking
//! its evidence. The back ends only consume it.
//!
//! The data model is passive: no interning, no side tables. Symbols are
//! the same globally-unique identities the front end created, which is
//! what makes the free-variable computation here a plain set difference —
//! binders can never collide with outer ids.

use std::collections::BTreeSet;

pub use tern_ast::Lit;
use tern_ast::{Symbol, SymbolId};
use tern_types::{BlockType, ValueType};

// ---------------------------------------------------------------------------
// Modules and declarations
// ---------------------------------------------------------------------------

/// One lifted module, ready for a back end.
#[derive(Debug, Clone, PartialEq)]
pub struct LiftedModule {
    /// Source module path; used only for output file mapping.
    pub path: String,
    pub decls: Vec<Declaration>,
    pub externs: Vec<Extern>,
    pub definitions: Vec<Definition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    /// A data type. Exactly one constructor means record: the back end
    /// emits field accessors for it.
    Data {
        id: Symbol,
        tparams: Vec<Symbol>,
        ctors: Vec<Constructor>,
    },
    /// An effect interface; operations are dispatched positionally.
    Interface {
        id: Symbol,
        tparams: Vec<Symbol>,
        ops: Vec<Symbol>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constructor {
    pub id: Symbol,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: Symbol,
    pub tpe: ValueType,
}

/// A function implemented as verbatim target code.
#[derive(Debug, Clone, PartialEq)]
pub struct Extern {
    pub id: Symbol,
    pub tparams: Vec<Symbol>,
    pub params: Vec<Param>,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    /// A named block. Subject to topological reordering.
    Def { id: Symbol, block: Block },
    /// A value binding, `None` for a wildcard. Kept in source order — the
    /// right-hand side may have effects.
    Let { id: Option<Symbol>, binding: Expr },
}

impl Definition {
    pub fn id(&self) -> Option<&Symbol> {
        match self {
            Definition::Def { id, .. } => Some(id),
            Definition::Let { id, .. } => id.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Return(Expr),
    App {
        callee: Block,
        targs: Vec<ValueType>,
        args: Vec<Argument>,
    },
    If {
        cond: Expr,
        then_stmt: Box<Stmt>,
        else_stmt: Box<Stmt>,
    },
    Val {
        id: Symbol,
        binding: Box<Stmt>,
        body: Box<Stmt>,
    },
    Match {
        scrutinee: Expr,
        clauses: Vec<Clause>,
        default: Option<Box<Stmt>>,
    },
    /// An unfinished program point; lowers to a raise.
    Hole,
    Scope {
        definitions: Vec<Definition>,
        body: Box<Stmt>,
    },
    /// A mutable cell scoped to `region`, accessed through get/put members
    /// on `id`.
    State {
        id: Symbol,
        init: Expr,
        region: Region,
        evidence: Evidence,
        body: Box<Stmt>,
    },
    Try {
        body: Block,
        handlers: Vec<Implementation>,
    },
    /// Capture the continuation up to the prompt selected by `evidence`.
    /// The block takes exactly one parameter: the continuation.
    Shift {
        evidence: Evidence,
        body: Box<BlockLit>,
    },
    Region {
        body: Block,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    Global,
    Named(Symbol),
}

/// One match clause. The block literal's parameters bind the
/// constructor's fields positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub constructor: Symbol,
    pub body: BlockLit,
}

// ---------------------------------------------------------------------------
// Pure expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    ValueVar(Symbol),
    Literal(Lit),
    /// Effect-free application: constructor calls and pure externs.
    PureApp {
        callee: Block,
        targs: Vec<ValueType>,
        args: Vec<Expr>,
    },
    /// Record field projection.
    Select {
        target: Box<Expr>,
        field: Symbol,
    },
    /// First-class-ification of a block; the identity at the target level.
    Box(Block),
    /// Run a statement known to need no continuation.
    Run(Box<Stmt>),
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    BlockVar(Symbol),
    BlockLit(Box<BlockLit>),
    /// Select an operation out of a capability.
    Member {
        receiver: Box<Block>,
        op: Symbol,
        tpe: Option<BlockType>,
    },
    Unbox(Box<Expr>),
    /// A capability from an anonymous implementation.
    New(Implementation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockLit {
    pub tparams: Vec<Symbol>,
    pub params: Vec<Param>,
    pub body: Stmt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Symbol),
    Block(Symbol),
    Evidence(Symbol),
}

impl Param {
    pub fn id(&self) -> &Symbol {
        match self {
            Param::Value(s) | Param::Block(s) | Param::Evidence(s) => s,
        }
    }
}

/// Implementation of an interface: one block per operation, in the
/// interface's declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Implementation {
    pub interface: Symbol,
    pub targs: Vec<ValueType>,
    pub operations: Vec<OpImpl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpImpl {
    pub op: Symbol,
    pub block: Block,
}

// ---------------------------------------------------------------------------
// Arguments and evidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Expr(Expr),
    Block(Block),
    Evidence(Evidence),
}

/// The static path from an effect operation to its handler: an ordered
/// list of lifts, outermost first. Empty means the handler is right here.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evidence(pub Vec<Lift>);

#[derive(Debug, Clone, PartialEq)]
pub enum Lift {
    /// Transport past one `try` prompt.
    Try,
    /// Transport past one region. Currently lowered like `Try`.
    Reg,
    /// An evidence parameter in scope.
    Var(Symbol),
}

// ---------------------------------------------------------------------------
// Free variables
// ---------------------------------------------------------------------------

/// The free value/block variables of a block, as symbol ids.
///
/// Since ids are globally unique, freeness is occurrence minus binder —
/// no environment threading needed.
pub fn free_block_vars(block: &Block) -> BTreeSet<SymbolId> {
    let mut occurrences = BTreeSet::new();
    let mut binders = BTreeSet::new();
    block_vars(block, &mut occurrences, &mut binders);
    occurrences.difference(&binders).copied().collect()
}

/// The free variables of a pure expression.
pub fn free_expr_vars(expr: &Expr) -> BTreeSet<SymbolId> {
    let mut occurrences = BTreeSet::new();
    let mut binders = BTreeSet::new();
    expr_vars(expr, &mut occurrences, &mut binders);
    occurrences.difference(&binders).copied().collect()
}

fn stmt_vars(stmt: &Stmt, occ: &mut BTreeSet<SymbolId>, bound: &mut BTreeSet<SymbolId>) {
    match stmt {
        Stmt::Return(e) => expr_vars(e, occ, bound),
        Stmt::App {
            callee, args, ..
        } => {
            block_vars(callee, occ, bound);
            for arg in args {
                match arg {
                    Argument::Expr(e) => expr_vars(e, occ, bound),
                    Argument::Block(b) => block_vars(b, occ, bound),
                    Argument::Evidence(ev) => evidence_vars(ev, occ),
                }
            }
        }
        Stmt::If {
            cond,
            then_stmt,
            else_stmt,
        } => {
            expr_vars(cond, occ, bound);
            stmt_vars(then_stmt, occ, bound);
            stmt_vars(else_stmt, occ, bound);
        }
        Stmt::Val { id, binding, body } => {
            bound.insert(id.id);
            stmt_vars(binding, occ, bound);
            stmt_vars(body, occ, bound);
        }
        Stmt::Match {
            scrutinee,
            clauses,
            default,
        } => {
            expr_vars(scrutinee, occ, bound);
            for clause in clauses {
                block_lit_vars(&clause.body, occ, bound);
            }
            if let Some(d) = default {
                stmt_vars(d, occ, bound);
            }
        }
        Stmt::Hole => {}
        Stmt::Scope { definitions, body } => {
            for def in definitions {
                if let Some(id) = def.id() {
                    bound.insert(id.id);
                }
                match def {
                    Definition::Def { block, .. } => block_vars(block, occ, bound),
                    Definition::Let { binding, .. } => expr_vars(binding, occ, bound),
                }
            }
            stmt_vars(body, occ, bound);
        }
        Stmt::State {
            id,
            init,
            region,
            body,
            ..
        } => {
            bound.insert(id.id);
            if let Region::Named(r) = region {
                occ.insert(r.id);
            }
            expr_vars(init, occ, bound);
            stmt_vars(body, occ, bound);
        }
        Stmt::Try { body, handlers } => {
            block_vars(body, occ, bound);
            for handler in handlers {
                for op in &handler.operations {
                    block_vars(&op.block, occ, bound);
                }
            }
        }
        Stmt::Shift { evidence, body } => {
            evidence_vars(evidence, occ);
            block_lit_vars(body, occ, bound);
        }
        Stmt::Region { body } => block_vars(body, occ, bound),
    }
}

fn expr_vars(expr: &Expr, occ: &mut BTreeSet<SymbolId>, bound: &mut BTreeSet<SymbolId>) {
    match expr {
        Expr::ValueVar(sym) => {
            occ.insert(sym.id);
        }
        Expr::Literal(_) => {}
        Expr::PureApp { callee, args, .. } => {
            block_vars(callee, occ, bound);
            for arg in args {
                expr_vars(arg, occ, bound);
            }
        }
        Expr::Select { target, .. } => expr_vars(target, occ, bound),
        Expr::Box(b) => block_vars(b, occ, bound),
        Expr::Run(stmt) => stmt_vars(stmt, occ, bound),
    }
}

fn block_vars(block: &Block, occ: &mut BTreeSet<SymbolId>, bound: &mut BTreeSet<SymbolId>) {
    match block {
        Block::BlockVar(sym) => {
            occ.insert(sym.id);
        }
        Block::BlockLit(lit) => block_lit_vars(lit, occ, bound),
        Block::Member { receiver, .. } => block_vars(receiver, occ, bound),
        Block::Unbox(e) => expr_vars(e, occ, bound),
        Block::New(implementation) => {
            for op in &implementation.operations {
                block_vars(&op.block, occ, bound);
            }
        }
    }
}

fn block_lit_vars(lit: &BlockLit, occ: &mut BTreeSet<SymbolId>, bound: &mut BTreeSet<SymbolId>) {
    for param in &lit.params {
        bound.insert(param.id().id);
    }
    stmt_vars(&lit.body, occ, bound);
}

fn evidence_vars(evidence: &Evidence, occ: &mut BTreeSet<SymbolId>) {
    for lift in &evidence.0 {
        if let Lift::Var(sym) = lift {
            occ.insert(sym.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ret_var(sym: Symbol) -> Stmt {
        Stmt::Return(Expr::ValueVar(sym))
    }

    #[test]
    fn block_lit_params_are_bound() {
        let x = Symbol::value(1, "x");
        let lit = Block::BlockLit(Box::new(BlockLit {
            tparams: Vec::new(),
            params: vec![Param::Value(x.clone())],
            body: ret_var(x),
        }));
        assert!(free_block_vars(&lit).is_empty());
    }

    #[test]
    fn free_vars_cross_val_bindings() {
        let f = Symbol::block(1, "f");
        let x = Symbol::value(2, "x");
        let y = Symbol::value(3, "y");
        // { val x = return y; f(x) }
        let body = Stmt::Val {
            id: x.clone(),
            binding: Box::new(ret_var(y.clone())),
            body: Box::new(Stmt::App {
                callee: Block::BlockVar(f.clone()),
                targs: Vec::new(),
                args: vec![Argument::Expr(Expr::ValueVar(x.clone()))],
            }),
        };
        let lit = Block::BlockLit(Box::new(BlockLit {
            tparams: Vec::new(),
            params: Vec::new(),
            body,
        }));
        let free = free_block_vars(&lit);
        assert!(free.contains(&f.id));
        assert!(free.contains(&y.id));
        assert!(!free.contains(&x.id));
    }

    #[test]
    fn evidence_variables_are_free() {
        let ev = Symbol::block(7, "ev");
        let k = Symbol::block(8, "k");
        let shift = Stmt::Shift {
            evidence: Evidence(vec![Lift::Var(ev.clone())]),
            body: Box::new(BlockLit {
                tparams: Vec::new(),
                params: vec![Param::Block(k.clone())],
                body: Stmt::Hole,
            }),
        };
        let lit = Block::BlockLit(Box::new(BlockLit {
            tparams: Vec::new(),
            params: Vec::new(),
            body: shift,
        }));
        let free = free_block_vars(&lit);
        assert!(free.contains(&ev.id));
        assert!(!free.contains(&k.id));
    }
}
