//! Structural validation of compilation units.

use std::collections::HashSet;

use super::expr::Expr;
use super::unit::CompilationUnit;
use crate::error::{JitError, JitResult};

impl CompilationUnit {
    /// Checks that the unit is well formed and self-contained.
    ///
    /// Unresolved external references are allowed as long as they are
    /// declared; they are satisfied lazily through the fallback chain.
    pub fn validate(&self) -> JitResult<()> {
        let fail = |reason: String| -> JitResult<()> { Err(JitError::structural(&self.name, reason)) };

        let mut seen = HashSet::new();
        let names = self
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.globals.iter().map(|g| g.name.as_str()))
            .chain(self.extern_functions.iter().map(|f| f.name.as_str()))
            .chain(self.extern_globals.iter().map(|g| g.name.as_str()));
        for name in names {
            if name.is_empty() {
                return fail("empty symbol name".to_string());
            }
            if !seen.insert(name) {
                return fail(format!("symbol '{name}' is defined more than once"));
            }
        }

        for function in &self.functions {
            self.validate_expr(&function.body, &function.name, function.arity)?;
        }

        for (kind, table) in [("constructor", &self.constructors), ("destructor", &self.destructors)] {
            for entry in table {
                match self.function(&entry.function) {
                    Some(f) if f.arity == 0 => {}
                    Some(f) => {
                        return fail(format!(
                            "{kind} '{}' must take no arguments, takes {}",
                            f.name, f.arity
                        ))
                    }
                    None => {
                        return fail(format!(
                            "{kind} '{}' is not defined in this unit",
                            entry.function
                        ))
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_expr(&self, expr: &Expr, function: &str, arity: usize) -> JitResult<()> {
        let mut problem: Option<String> = None;
        expr.walk(&mut |e| {
            if problem.is_some() {
                return;
            }
            match e {
                Expr::Param(idx) if *idx >= arity => {
                    problem = Some(format!(
                        "'{function}' reads parameter {idx} but takes {arity}"
                    ));
                }
                Expr::Call { callee, args } => match self.arity_of(callee) {
                    None => problem = Some(format!("'{function}' calls unknown '{callee}'")),
                    Some(expected) if expected != args.len() => {
                        problem = Some(format!(
                            "'{function}' calls '{callee}' with {} arguments, expected {expected}",
                            args.len()
                        ));
                    }
                    Some(_) => {}
                },
                Expr::FuncAddr(name) if self.arity_of(name).is_none() => {
                    problem = Some(format!(
                        "'{function}' takes the address of unknown function '{name}'"
                    ));
                }
                Expr::LoadGlobal(name) | Expr::GlobalAddr(name)
                    if !self.has_data_symbol(name) =>
                {
                    problem = Some(format!("'{function}' references unknown global '{name}'"));
                }
                Expr::StoreGlobal { name, .. } if !self.has_data_symbol(name) => {
                    problem = Some(format!("'{function}' stores to unknown global '{name}'"));
                }
                _ => {}
            }
        });
        match problem {
            Some(reason) => Err(JitError::structural(&self.name, reason)),
            None => Ok(()),
        }
    }
}
