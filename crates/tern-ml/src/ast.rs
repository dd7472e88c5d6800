//! The Target-ML AST.
//!
//! A small algebraic model of the ML subset the transformer emits. Nodes
//! are produced by [`crate::transform`] and consumed by [`crate::emit`];
//! they are short-lived and carry no source positions.

/// One emitted compilation unit: ordered bindings plus the entry call.
#[derive(Debug, Clone, PartialEq)]
pub struct Toplevel {
    pub bindings: Vec<Binding>,
    pub main_call: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    ValBind {
        name: String,
        expr: Expr,
    },
    /// `val _ = expr` — evaluated for effects only.
    AnonBind {
        expr: Expr,
    },
    FunBind {
        name: String,
        params: Vec<Param>,
        body: Expr,
    },
    DataBind {
        name: String,
        tvars: Vec<String>,
        constructors: Vec<(String, Option<Type>)>,
    },
    /// Verbatim target code; used for externs.
    RawBind {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Named(String),
    Patterned(Pattern),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Variable(String),
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Let {
        bindings: Vec<Binding>,
        body: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    /// Constructor application; multi-field payloads arrive pre-tupled.
    Make {
        constructor: String,
        payload: Option<Box<Expr>>,
    },
    Match {
        scrutinee: Box<Expr>,
        clauses: Vec<MatchClause>,
        default: Option<Box<Expr>>,
    },
    Ref(Box<Expr>),
    Deref(Box<Expr>),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// Verbatim expression text, parenthesized on emission.
    RawExpr(String),
    /// Verbatim atomic text, emitted as-is.
    RawValue(String),
    MLString(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub pattern: Pattern,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Named(String),
    Wildcard,
    Tuple(Vec<Pattern>),
    Make {
        constructor: String,
        payload: Option<Box<Pattern>>,
    },
}

/// The type sub-language, only needed for datatype payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// A type variable; emitted with a leading tick.
    Var(String),
    Data { name: String, args: Vec<Type> },
    Tuple(Vec<Type>),
    Raw(String),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Variable(name.into())
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn lambda(params: Vec<Param>, body: Expr) -> Expr {
        Expr::Lambda {
            params,
            body: Box::new(body),
        }
    }

    pub fn let_in(bindings: Vec<Binding>, body: Expr) -> Expr {
        Expr::Let {
            bindings,
            body: Box::new(body),
        }
    }

    /// Tuple unless there is exactly one expression.
    pub fn tuple_if_multiple(mut exprs: Vec<Expr>) -> Option<Expr> {
        match exprs.len() {
            0 => None,
            1 => Some(exprs.remove(0)),
            _ => Some(Expr::Tuple(exprs)),
        }
    }
}
