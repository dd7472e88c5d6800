//! Two-level continuations.
//!
//! A continuation is either *static* — a meta-level function over target
//! expressions, inlined at transformation time — or *dynamic* — a target
//! expression applied with an emitted call. The split is the central
//! lever against code blow-up: every combinator preserves static
//! continuations except [`Cps::join`], which names the continuation at
//! control-flow joins so branches can share it.

use crate::ast::{Binding, Expr, Param};
use crate::NameSupply;

/// A continuation over target expressions.
pub enum Cont {
    /// Meta-level: inlined at transformation time.
    Static(Box<dyn FnOnce(&mut NameSupply, Expr) -> Expr>),
    /// Object-level: applied with an emitted call.
    Dynamic(Expr),
}

impl Cont {
    pub fn from_fn(f: impl FnOnce(&mut NameSupply, Expr) -> Expr + 'static) -> Cont {
        Cont::Static(Box::new(f))
    }

    /// Apply to an argument: static form calls through, dynamic form
    /// emits a call.
    pub fn apply(self, names: &mut NameSupply, arg: Expr) -> Expr {
        match self {
            Cont::Static(f) => f(names, arg),
            Cont::Dynamic(k) => Expr::call(k, vec![arg]),
        }
    }

    /// A target expression denoting this continuation. The dynamic form
    /// is already one; the static form is eta-expanded.
    pub fn reify(self, names: &mut NameSupply) -> Expr {
        match self {
            Cont::Dynamic(k) => k,
            Cont::Static(f) => {
                let a = names.fresh("a");
                let body = f(names, Expr::var(&a));
                Expr::lambda(vec![Param::Named(a)], body)
            }
        }
    }

    /// The inverse of [`Cont::reify`]: view this continuation as a
    /// meta-level function.
    pub fn reflect(self) -> Box<dyn FnOnce(&mut NameSupply, Expr) -> Expr> {
        match self {
            Cont::Static(f) => f,
            Cont::Dynamic(k) => Box::new(move |_names, a| Expr::call(k, vec![a])),
        }
    }
}

/// A CPS computation: a function from a continuation to a target
/// expression.
pub struct Cps {
    prog: Box<dyn FnOnce(&mut NameSupply, Cont) -> Expr>,
}

impl Cps {
    /// `λk. k(e)`
    pub fn pure(expr: Expr) -> Cps {
        Cps::inline(move |names, k| k.apply(names, expr))
    }

    /// Wrap a builder directly.
    pub fn inline(prog: impl FnOnce(&mut NameSupply, Cont) -> Expr + 'static) -> Cps {
        Cps {
            prog: Box::new(prog),
        }
    }

    /// Like [`Cps::inline`], but the continuation is let-bound to a name
    /// before entering the builder. Used at control-flow joins (`if`,
    /// `match`, `shift`) where the continuation would otherwise be
    /// duplicated into every branch.
    pub fn join(prog: impl FnOnce(&mut NameSupply, Cont) -> Expr + 'static) -> Cps {
        Cps::inline(move |names, k| {
            let name = names.fresh("k");
            let reified = k.reify(names);
            let body = prog(names, Cont::Dynamic(Expr::var(&name)));
            Expr::let_in(
                vec![Binding::ValBind {
                    name,
                    expr: reified,
                }],
                body,
            )
        })
    }

    /// Sequence: run `self`, feed its result to `f`.
    pub fn flat_map(self, f: impl FnOnce(&mut NameSupply, Expr) -> Cps + 'static) -> Cps {
        Cps::inline(move |names, k| {
            self.apply(
                names,
                Cont::from_fn(move |names, a| f(names, a).apply(names, k)),
            )
        })
    }

    pub fn apply(self, names: &mut NameSupply, k: Cont) -> Expr {
        (self.prog)(names, k)
    }

    /// Run with the identity continuation. Only correct when the result
    /// is a pure expression.
    pub fn run(self, names: &mut NameSupply) -> Expr {
        self.apply(names, Cont::from_fn(|_names, a| a))
    }

    /// A target expression denoting this computation: `λk. m(k)`.
    pub fn reify(self, names: &mut NameSupply) -> Expr {
        let k = names.fresh("k");
        let body = self.apply(names, Cont::Dynamic(Expr::var(&k)));
        Expr::lambda(vec![Param::Named(k)], body)
    }
}

/// The pure continuation `fn a => fn k => k a`, used to delimit prompts.
pub fn pure_continuation(names: &mut NameSupply) -> Expr {
    let a = names.fresh("a");
    let k = names.fresh("k");
    Expr::lambda(
        vec![Param::Named(a.clone())],
        Expr::lambda(
            vec![Param::Named(k.clone())],
            Expr::call(Expr::var(k), vec![Expr::var(a)]),
        ),
    )
}

/// Install a fresh prompt around an already-reified program.
pub fn reset(names: &mut NameSupply, prog: Expr) -> Expr {
    let pure = pure_continuation(names);
    Expr::call(prog, vec![pure])
}

/// One step of evidence, already lowered to the target level.
pub enum LiftStep {
    /// Transport past one prompt; inlined statically.
    Prompt,
    /// An evidence value applied at runtime.
    Dynamic(Expr),
}

/// Thread `m` through a list of evidence lifts, interleaving continuation
/// plumbing with evidence composition so each prompt captures its
/// delimited slice.
pub fn lift(mut steps: Vec<LiftStep>, m: Cps) -> Cps {
    if steps.is_empty() {
        return m;
    }
    let step = steps.remove(0);
    let rest = lift(steps, m);
    match step {
        // λk₂. m(a ↦ k₁(a, k₂))
        LiftStep::Prompt => Cps::inline(move |names, k1| {
            let k2 = names.fresh("k");
            let k1r = k1.reify(names);
            let k2_name = k2.clone();
            let body = rest.apply(
                names,
                Cont::from_fn(move |_names, a| {
                    Expr::call(k1r, vec![a, Expr::var(k2_name)])
                }),
            );
            Expr::lambda(vec![Param::Named(k2)], body)
        }),
        LiftStep::Dynamic(ev) => Cps::inline(move |names, k| {
            let reified = rest.reify(names);
            let kr = k.reify(names);
            Expr::call(ev, vec![reified, kr])
        }),
    }
}
