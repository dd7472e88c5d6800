//! The ML back end for Tern.
//!
//! Lowers the lifted IR into a small first-order ML subset (Target-ML) by
//! a selective CPS transformation. Handlers become delimited-control
//! primitives threaded through evidence; effect interfaces share one
//! structural object encoding per arity.
//!
//! Module map:
//! - [`ast`] — the Target-ML expression and binding model
//! - [`cps`] — the two-level continuation abstraction
//! - [`transform`] — the IR-to-ML transformer
//! - [`emit`] — concrete SML rendering

pub mod ast;
pub mod cps;
pub mod emit;
pub mod transform;

/// Names of the externally provided runtime primitives. The transformer
/// references them and must never inline them.
pub mod consts {
    pub const LIFT: &str = "lift";
    pub const NESTED: &str = "nested";
    pub const HERE: &str = "here";
    pub const FRESH: &str = "fresh";
    pub const WITH_REGION: &str = "withRegion";
    pub const UNIT_VAL: &str = "unitVal";
    pub const TRUE_VAL: &str = "trueVal";
    pub const FALSE_VAL: &str = "falseVal";
}

/// Why the back end refused a module. These abort the compilation; they
/// are not collected like typer diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error(
        "mutually recursive definitions are not supported by the ML backend: {}",
        names.join(", ")
    )]
    MutualRecursion { names: Vec<String> },
    #[error("extern `{name}` is polymorphic; the ML backend only lowers monomorphic externs")]
    PolymorphicExtern { name: String },
    #[error(
        "extern `{name}` takes block parameters; the ML backend only lowers first-order externs"
    )]
    HigherOrderExtern { name: String },
}

/// Hands out fresh target-level names. One per transformation; never
/// reused across modules so emitted names stay stable.
#[derive(Debug, Default)]
pub struct NameSupply {
    next: u32,
}

impl NameSupply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, hint: &str) -> String {
        let id = self.next;
        self.next += 1;
        format!("{hint}{id}")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_supply_is_sequential() {
        let mut names = NameSupply::new();
        assert_eq!(names.fresh("k"), "k0");
        assert_eq!(names.fresh("k"), "k1");
        assert_eq!(names.fresh("a"), "a2");
    }
}
