//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use std::rc::Rc;

use itertools::Itertools;
use p4_small_step::{
    error::execution::Error,
    evaluator::{Config, EvaluationResult, Evaluator},
    ir::{Expression, MethodCall, Node, Statement, Table, Type},
    program::{table_apply_result, ProgramInfo},
    solver::{AbstractSolver, Model},
    state::{continuation::Command, Branch, ExecutionState},
    watchdog::LazyWatchdog,
};

/// The largest number of candidate assignments the solver will try before
/// giving up.
const MAX_CANDIDATES: usize = 100_000;

/// A target whose storage starts out zeroed, whose pipeline is provided by the
/// test, and whose tables pick any one of their actions.
#[derive(Clone, Debug, Default)]
pub struct TestTarget {
    pub pipeline: Vec<Command>,
}

impl TestTarget {
    /// Constructs a target that runs `pipeline`.
    #[allow(unused)] // It is actually
    pub fn new(pipeline: Vec<Command>) -> Self {
        Self { pipeline }
    }
}

impl ProgramInfo for TestTarget {
    fn create_target_uninitialized(&self, ty: &Type, force_taint: bool) -> Expression {
        if force_taint {
            return Expression::taint(ty.clone());
        }
        match ty {
            Type::Bool => Expression::bool(false),
            _ => Expression::constant(0u8, ty.clone()),
        }
    }

    fn pipeline_sequence(&self) -> Vec<Command> {
        self.pipeline.clone()
    }

    /// Forks one branch per action of `table`, chosen by a symbolic selector
    /// named after the table. Each branch runs its action and, when asked to,
    /// produces the matching application result.
    fn step_table_apply(
        &self,
        table: &Rc<Table>,
        wants_value: bool,
        state: &Rc<ExecutionState>,
    ) -> Result<Vec<Branch>, Error> {
        let selector = Expression::symbolic(format!("{}_action", table.name), Type::bits(32));
        table
            .actions
            .iter()
            .enumerate()
            .map(|(i, action)| {
                let mut next = (**state).clone();
                let call = MethodCall::new(None, action.clone(), vec![], Type::Void);
                let mut commands = vec![Command::Statement(Node::Statement(Statement::MethodCall(call)))];
                if wants_value {
                    commands.push(Command::Return(Some(table_apply_result(true, i))));
                }
                next.replace_top_body(commands)?;
                let guard = Expression::eq(selector.clone(), Expression::bits(i as u128, 32));
                Ok(Branch::new(Some(guard), state, next))
            })
            .collect()
    }
}

/// A complete solver for constraints that only compare symbolic variables
/// against constants.
///
/// Every variable is tried with zero, with every constant of its type in the
/// constraints, and with the successor of each such constant.
#[derive(Clone, Debug, Default)]
pub struct FiniteDomainSolver {
    model: Model,
}

impl FiniteDomainSolver {
    fn candidates(constraints: &[Expression]) -> Vec<(String, Vec<Expression>)> {
        let mut variables = Vec::new();
        let mut constants = Vec::new();
        for constraint in constraints {
            constraint.any(&mut |e| {
                match e {
                    Expression::SymbolicVariable { name, ty } => {
                        variables.push((name.clone(), ty.clone()));
                    }
                    Expression::Constant { value, ty } => {
                        constants.push((ty.clone(), *value));
                    }
                    _ => {}
                }
                false
            });
        }

        variables
            .into_iter()
            .unique()
            .map(|(name, ty)| {
                let values = if ty == Type::Bool {
                    vec![Expression::bool(false), Expression::bool(true)]
                } else {
                    let mut values = vec![Expression::constant(0u8, ty.clone())];
                    for (constant_ty, value) in &constants {
                        if *constant_ty == ty {
                            values.push(Expression::constant(*value, ty.clone()));
                            values.push(Expression::constant(value.wrapping_add(1u8.into()), ty.clone()));
                        }
                    }
                    values.into_iter().unique().collect()
                };
                (name, values)
            })
            .collect()
    }

    /// Checks every constraint under `model`, or returns [`None`] if one of
    /// them does not fold to a literal.
    fn satisfies(model: &Model, constraints: &[Expression]) -> Option<bool> {
        for constraint in constraints {
            if !model.evaluate(constraint).as_bool()? {
                return Some(false);
            }
        }
        Some(true)
    }
}

impl AbstractSolver for FiniteDomainSolver {
    fn check_sat(&mut self, constraints: &[Expression]) -> Option<bool> {
        let candidates = Self::candidates(constraints);
        let space = candidates.iter().map(|(_, values)| values.len()).product::<usize>();
        if space > MAX_CANDIDATES {
            return None;
        }

        let names = candidates.iter().map(|(name, _)| name.clone()).collect_vec();
        let assignments = candidates.into_iter().map(|(_, values)| values).multi_cartesian_product();
        let mut tried_any = false;
        for assignment in assignments {
            tried_any = true;
            let model: Model = names.iter().cloned().zip(assignment).collect();
            if Self::satisfies(&model, constraints)? {
                self.model = model;
                return Some(true);
            }
        }
        if tried_any {
            return Some(false);
        }

        // No variables at all, so the constraints are decided by folding.
        let model = Model::new();
        let sat = Self::satisfies(&model, constraints)?;
        if sat {
            self.model = model;
        }
        Some(sat)
    }

    fn symbolic_mapping(&self) -> Model {
        self.model.clone()
    }
}

/// Runs the evaluator over `initial` with `target`, `config` and a
/// [`FiniteDomainSolver`].
#[allow(unused)] // It is actually
pub fn evaluate(
    target: &TestTarget,
    config: Config,
    initial: ExecutionState,
) -> anyhow::Result<EvaluationResult> {
    let mut solver = FiniteDomainSolver::default();
    let mut evaluator = Evaluator::new(target, &mut solver, config, LazyWatchdog.in_rc());
    Ok(evaluator.run(initial)?)
}

/// Builds a statement command.
#[allow(unused)] // It is actually
pub fn statement(s: Statement) -> Command {
    Command::Statement(Node::Statement(s))
}
