//! Concrete SML rendering of the Target-ML AST.
//!
//! The printer is deliberately parenthesis-heavy: every compound
//! expression renders inside its own parentheses, so juxtaposition-based
//! application never needs precedence reasoning.

use crate::ast::{Binding, Expr, Param, Pattern, Toplevel, Type};

pub fn format_toplevel(toplevel: &Toplevel) -> String {
    let mut out = String::new();
    for binding in &toplevel.bindings {
        out.push_str(&format_binding(binding));
        out.push('\n');
    }
    if let Some(main) = &toplevel.main_call {
        out.push_str("val _ = ");
        out.push_str(&format_expr(main));
        out.push('\n');
    }
    out
}

pub fn format_binding(binding: &Binding) -> String {
    match binding {
        Binding::ValBind { name, expr } => format!("val {name} = {}", format_expr(expr)),
        Binding::AnonBind { expr } => format!("val _ = {}", format_expr(expr)),
        Binding::FunBind { name, params, body } => {
            let params = params
                .iter()
                .map(format_param)
                .collect::<Vec<_>>()
                .join(" ");
            format!("fun {name} {params} = {}", format_expr(body))
        }
        Binding::DataBind {
            name,
            tvars,
            constructors,
        } => {
            let prefix = match tvars.len() {
                0 => String::new(),
                1 => format!("'{} ", tvars[0]),
                _ => format!(
                    "({}) ",
                    tvars
                        .iter()
                        .map(|v| format!("'{v}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            let ctors = constructors
                .iter()
                .map(|(ctor, payload)| match payload {
                    Some(ty) => format!("{ctor} of {}", format_type(ty)),
                    None => ctor.clone(),
                })
                .collect::<Vec<_>>()
                .join(" | ");
            format!("datatype {prefix}{name} = {ctors}")
        }
        Binding::RawBind { text } => text.clone(),
    }
}

pub fn format_param(param: &Param) -> String {
    match param {
        Param::Named(name) => name.clone(),
        Param::Patterned(pattern) => format_pattern(pattern),
    }
}

pub fn format_expr(expr: &Expr) -> String {
    match expr {
        Expr::Variable(name) => name.clone(),
        Expr::Lambda { params, body } => {
            let mut out = String::from("(");
            for param in params {
                out.push_str("fn ");
                out.push_str(&format_param(param));
                out.push_str(" => ");
            }
            out.push_str(&format_expr(body));
            out.push(')');
            out
        }
        Expr::Call { callee, args } => {
            let mut out = String::from("(");
            out.push_str(&format_expr(callee));
            for arg in args {
                out.push(' ');
                out.push_str(&format_expr(arg));
            }
            out.push(')');
            out
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => format!(
            "(if {} then {} else {})",
            format_expr(cond),
            format_expr(then_branch),
            format_expr(else_branch)
        ),
        Expr::Let { bindings, body } => {
            let decls = bindings
                .iter()
                .map(format_binding)
                .collect::<Vec<_>>()
                .join(" ");
            format!("let {decls} in {} end", format_expr(body))
        }
        Expr::Tuple(items) => format!(
            "({})",
            items
                .iter()
                .map(format_expr)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Expr::Make {
            constructor,
            payload,
        } => match payload {
            Some(payload) => format!("({constructor} {})", format_expr(payload)),
            None => constructor.clone(),
        },
        Expr::Match {
            scrutinee,
            clauses,
            default,
        } => {
            let mut arms: Vec<String> = clauses
                .iter()
                .map(|clause| {
                    format!(
                        "{} => {}",
                        format_pattern(&clause.pattern),
                        format_expr(&clause.body)
                    )
                })
                .collect();
            if let Some(default) = default {
                arms.push(format!("_ => {}", format_expr(default)));
            }
            format!("(case {} of {})", format_expr(scrutinee), arms.join(" | "))
        }
        Expr::Ref(inner) => format!("(ref {})", format_expr(inner)),
        Expr::Deref(inner) => format!("(!{})", format_expr(inner)),
        Expr::Assign { target, value } => {
            format!("({} := {})", format_expr(target), format_expr(value))
        }
        Expr::RawExpr(text) => format!("({text})"),
        Expr::RawValue(text) => text.clone(),
        Expr::MLString(text) => format!("\"{}\"", escape_string(text)),
    }
}

pub fn format_pattern(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Named(name) => name.clone(),
        Pattern::Wildcard => "_".to_string(),
        Pattern::Tuple(items) => format!(
            "({})",
            items
                .iter()
                .map(format_pattern)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Pattern::Make {
            constructor,
            payload,
        } => match payload {
            Some(payload) => format!("({constructor} {})", format_pattern(payload)),
            None => constructor.clone(),
        },
    }
}

pub fn format_type(ty: &Type) -> String {
    match ty {
        Type::Var(name) => format!("'{name}"),
        Type::Data { name, args } => match args.len() {
            0 => name.clone(),
            1 => format!("{} {name}", format_type_atom(&args[0])),
            _ => format!(
                "({}) {name}",
                args.iter()
                    .map(format_type)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
        Type::Tuple(items) => items
            .iter()
            .map(format_type_atom)
            .collect::<Vec<_>>()
            .join(" * "),
        Type::Raw(text) => text.clone(),
    }
}

fn format_type_atom(ty: &Type) -> String {
    match ty {
        Type::Tuple(_) => format!("({})", format_type(ty)),
        _ => format_type(ty),
    }
}

fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_with_one_tvar() {
        let binding = Binding::DataBind {
            name: "List_1".to_string(),
            tvars: vec!["a2".to_string()],
            constructors: vec![
                ("Nil_3".to_string(), None),
                (
                    "Cons_4".to_string(),
                    Some(Type::Tuple(vec![
                        Type::Var("a2".to_string()),
                        Type::Data {
                            name: "List_1".to_string(),
                            args: vec![Type::Var("a2".to_string())],
                        },
                    ])),
                ),
            ],
        };
        assert_eq!(
            format_binding(&binding),
            "datatype 'a2 List_1 = Nil_3 | Cons_4 of 'a2 * 'a2 List_1"
        );
    }

    #[test]
    fn lambdas_curry() {
        let expr = Expr::lambda(
            vec![Param::Named("x".into()), Param::Named("k".into())],
            Expr::call(Expr::var("k"), vec![Expr::var("x")]),
        );
        assert_eq!(format_expr(&expr), "(fn x => fn k => (k x))");
    }

    #[test]
    fn case_renders_clauses_and_default() {
        let expr = Expr::Match {
            scrutinee: Box::new(Expr::var("xs")),
            clauses: vec![crate::ast::MatchClause {
                pattern: Pattern::Make {
                    constructor: "Nil_3".to_string(),
                    payload: None,
                },
                body: Expr::var("a"),
            }],
            default: Some(Box::new(Expr::var("b"))),
        };
        assert_eq!(
            format_expr(&expr),
            "(case xs of Nil_3 => a | _ => b)"
        );
    }

    #[test]
    fn accessor_projects_positionally() {
        let binding = Binding::FunBind {
            name: "member1of2".to_string(),
            params: vec![Param::Patterned(Pattern::Make {
                constructor: "Object2".to_string(),
                payload: Some(Box::new(Pattern::Tuple(vec![
                    Pattern::Named("arg".to_string()),
                    Pattern::Wildcard,
                ]))),
            })],
            body: Expr::var("arg"),
        };
        assert_eq!(
            format_binding(&binding),
            "fun member1of2 (Object2 (arg, _)) = arg"
        );
    }

    #[test]
    fn strings_escape() {
        assert_eq!(
            format_expr(&Expr::MLString("a\"b\\c\n".to_string())),
            "\"a\\\"b\\\\c\\n\""
        );
    }

    #[test]
    fn references_and_assignment() {
        assert_eq!(format_expr(&Expr::Ref(Box::new(Expr::var("x")))), "(ref x)");
        assert_eq!(format_expr(&Expr::Deref(Box::new(Expr::var("x")))), "(!x)");
        assert_eq!(
            format_expr(&Expr::Assign {
                target: Box::new(Expr::var("x")),
                value: Box::new(Expr::var("y")),
            }),
            "(x := y)"
        );
    }
}
