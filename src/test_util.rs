//! Shared fixtures for the unit tests of the crate.

use std::rc::Rc;

use crate::{
    error::execution::LocatedError,
    evaluator::Config,
    ir::{Expression, Type},
    program::ProgramInfo,
    solver::{AbstractSolver, Model},
    state::{continuation::Command, ExecutionState},
    stepper::Stepper,
};

/// The number of steps after which [`run_to_completion`] gives up.
const STEP_LIMIT: usize = 10_000;

/// A minimal target: storage starts out as zero, and the pipeline is whatever
/// the test provides.
#[derive(Clone, Debug, Default)]
pub struct TestTarget {
    pub pipeline: Vec<Command>,
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
}

/// A solver that gives the same answer to every query, with a fixed model.
///
/// Every query is recorded.
#[derive(Clone, Debug)]
pub struct TestSolver {
    answer:  Option<bool>,
    model:   Model,
    queries: Vec<Vec<Expression>>,
}

impl TestSolver {
    /// Constructs a solver that answers `answer` and reports `model`.
    pub fn new(answer: Option<bool>, model: Model) -> Self {
        Self {
            answer,
            model,
            queries: Vec::new(),
        }
    }

    /// Constructs a solver that cannot decide anything.
    pub fn inconclusive() -> Self {
        Self::new(None, Model::new())
    }

    /// Gets the constraints of every query so far, oldest first.
    pub fn queries(&self) -> &[Vec<Expression>] {
        &self.queries
    }
}

impl Default for TestSolver {
    fn default() -> Self {
        Self::new(Some(true), Model::new())
    }
}

impl AbstractSolver for TestSolver {
    fn check_sat(&mut self, constraints: &[Expression]) -> Option<bool> {
        self.queries.push(constraints.to_vec());
        self.answer
    }

    fn symbolic_mapping(&self) -> Model {
        self.model.clone()
    }
}

/// Runs `f` with a stepper over `target`, a [`TestSolver`] and the default
/// configuration.
pub fn with_stepper<T>(
    target: &TestTarget,
    f: impl FnOnce(&mut Stepper<'_>) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut solver = TestSolver::default();
    let config = Config::default();
    let mut stepper = Stepper::new(target, &mut solver, &config);
    f(&mut stepper)
}

/// Steps `initial` and every branch that follows from it, without feasibility
/// checks, and gets the terminal states in exploration order.
pub fn run_to_completion(
    target: &TestTarget,
    initial: Rc<ExecutionState>,
) -> Result<Vec<ExecutionState>, LocatedError> {
    let mut solver = TestSolver::default();
    let config = Config::default();
    let mut stepper = Stepper::new(target, &mut solver, &config);

    let mut finished = Vec::new();
    let mut pending = vec![initial];
    let mut steps = 0;
    while let Some(state) = pending.pop() {
        if state.is_terminal() {
            finished.push((*state).clone());
            continue;
        }
        steps += 1;
        if steps > STEP_LIMIT {
            break;
        }
        let branches = stepper.step(&state)?;
        pending.extend(branches.into_iter().rev().map(|b| Rc::new(b.next_state)));
    }
    Ok(finished)
}
