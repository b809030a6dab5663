//! This module contains the narrow interface through which the interpreter
//! asks a constraint solver about the satisfiability of path constraints.

use std::collections::BTreeMap;

use ethnum::U256;

use crate::ir::{fold::simplify, Expression, Type};

/// A constraint solver.
///
/// The interpreter treats the solver as stateless: every call to
/// [`Self::check_sat`] receives the full set of constraints for the path being
/// asked about.
pub trait AbstractSolver {
    /// Checks whether the conjunction of `constraints` is satisfiable.
    ///
    /// Returns [`None`] when the solver cannot decide.
    fn check_sat(&mut self, constraints: &[Expression]) -> Option<bool>;

    /// Gets the assignment found by the most recent satisfiable call to
    /// [`Self::check_sat`].
    fn symbolic_mapping(&self) -> Model;

    /// Checks if the solver retains constraints between calls.
    ///
    /// This is informational only. The interpreter never consults it and
    /// always sends the full constraint set, which an incremental solver must
    /// accept as a fresh query.
    fn is_in_incremental_mode(&self) -> bool {
        false
    }
}

/// An assignment of literal values to symbolic variables.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Model {
    values: BTreeMap<String, Expression>,
}

impl Model {
    /// Creates a new, empty, model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` to the symbolic variable `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: Expression) {
        self.values.insert(name.into(), value);
    }

    /// Gets the value assigned to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Expression> {
        self.values.get(name)
    }

    /// Gets the number of assigned variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Checks if no variable is assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Evaluates `expr` under the model.
    ///
    /// Variables the model does not assign are completed with zero, which is
    /// always a valid completion as the solver left them unconstrained.
    #[must_use]
    pub fn evaluate(&self, expr: &Expression) -> Expression {
        let substituted = expr.transform(&mut |e| match e {
            Expression::SymbolicVariable { name, ty } => {
                Some(self.get(name).cloned().unwrap_or_else(|| zero_of(ty)))
            }
            _ => None,
        });
        simplify(&substituted)
    }
}

impl FromIterator<(String, Expression)> for Model {
    fn from_iter<T: IntoIterator<Item = (String, Expression)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn zero_of(ty: &Type) -> Expression {
    match ty {
        Type::Bool => Expression::bool(false),
        _ => Expression::constant(U256::ZERO, ty.clone()),
    }
}
