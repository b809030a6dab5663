//! This module contains a reference driver for the [`Stepper`] that explores
//! every path of a program depth-first.
//!
//! The driver owns everything that the transition relation leaves open: the
//! order in which branches are explored, the per-path step bound, the checking
//! of branch feasibility, and the polling of a [`crate::watchdog::Watchdog`].
//! It never changes what a single step does.

use std::{collections::VecDeque, rc::Rc};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    constant::{DEFAULT_CHECK_BRANCH_FEASIBILITY, DEFAULT_MAX_STEPS_PER_PATH},
    error::{
        container::Locatable,
        execution::{Error, Errors, Result},
    },
    ir::{fold::simplify, Program},
    program::ProgramInfo,
    solver::AbstractSolver,
    state::{Branch, ExecutionState},
    stepper::Stepper,
    watchdog::DynWatchdog,
};

/// A driver that exhaustively steps a program.
pub struct Evaluator<'a> {
    /// The target-specific information about the program being run.
    program: &'a dyn ProgramInfo,

    /// The solver used for feasibility checks and concrete evaluation.
    solver: &'a mut dyn AbstractSolver,

    /// The configuration of the search.
    config: Config,

    /// A watchdog that gets polled at intervals to check whether the search
    /// should stop.
    watchdog: DynWatchdog,
}

impl<'a> Evaluator<'a> {
    /// Constructs a new evaluator.
    #[must_use]
    pub fn new(
        program: &'a dyn ProgramInfo,
        solver: &'a mut dyn AbstractSolver,
        config: Config,
        watchdog: DynWatchdog,
    ) -> Self {
        Self {
            program,
            solver,
            config,
            watchdog,
        }
    }

    /// Gets the configuration of the evaluator.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Explores every path of `program` from its entry point.
    ///
    /// This is the library interface to the driver, and reports its errors
    /// through [`crate::error::Errors`].
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub fn evaluate(&mut self, program: Rc<Program>) -> crate::error::Result<EvaluationResult> {
        Ok(self.run(ExecutionState::at_entry(program))?)
    }

    /// Explores every path starting at `initial`, depth-first and in the order
    /// in which the stepper returns branches.
    ///
    /// Paths that use an unsupported feature are dropped and their errors
    /// collected in the result.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] immediately if stepping hits an internal defect, or if
    /// the watchdog asks the search to stop.
    pub fn run(&mut self, initial: ExecutionState) -> Result<EvaluationResult> {
        let poll_interval = self.watchdog.poll_every().max(1);
        let max_steps = u64::try_from(self.config.max_steps_per_path).unwrap_or(u64::MAX);
        let mut result = EvaluationResult::default();
        let mut worklist = VecDeque::from([Rc::new(initial)]);
        let mut counter: usize = 0;

        while let Some(state) = worklist.pop_front() {
            if counter % poll_interval == 0 && self.watchdog.should_stop() {
                return Err(Error::StoppedByWatchdog.locate(state.step_count()));
            }
            counter = counter.wrapping_add(1);

            if state.is_terminal() {
                debug!(
                    "path finished after {} steps{}",
                    state.step_count(),
                    state
                        .uncaught_exception()
                        .map_or_else(String::new, |kind| format!(" with uncaught {kind}"))
                );
                result.terminal_states.push(state);
                continue;
            }
            if state.step_count() >= max_steps {
                debug!("abandoning path at the step bound of {max_steps}");
                result.abandoned_paths += 1;
                continue;
            }

            let branches = match Stepper::new(self.program, &mut *self.solver, &self.config).step(&state) {
                Ok(branches) => branches,
                Err(error) if error.payload.is_defect() => return Err(error),
                Err(error) => {
                    warn!("dropping path: {error}");
                    result.errors.add(error);
                    continue;
                }
            };
            result.steps += 1;

            let mut feasible = Vec::with_capacity(branches.len());
            for branch in branches {
                if self.is_feasible(&branch, &mut result) {
                    feasible.push(Rc::new(branch.next_state));
                }
            }
            for next in feasible.into_iter().rev() {
                worklist.push_front(next);
            }
        }

        Ok(result)
    }

    /// Checks if the path of `branch` can be taken.
    ///
    /// Branches whose constraint is decided by folding never reach the solver.
    /// Branches the solver cannot decide are counted as unresolved and dropped.
    fn is_feasible(&mut self, branch: &Branch, result: &mut EvaluationResult) -> bool {
        if !self.config.check_branch_feasibility {
            return true;
        }
        let Some(constraint) = &branch.constraint else {
            return true;
        };
        if let Some(decided) = simplify(constraint).as_bool() {
            return decided;
        }
        match self.solver.check_sat(branch.next_state.path_constraints()) {
            Some(true) => true,
            Some(false) => {
                debug!("pruning infeasible branch on {constraint}");
                false
            }
            None => {
                warn!("branch on {constraint} could not be decided, dropping it");
                result.unresolved_branches += 1;
                false
            }
        }
    }
}

/// The outcome of an exhaustive search.
#[derive(Clone, Debug, Default)]
pub struct EvaluationResult {
    /// The states at the end of every completed path, in exploration order.
    pub terminal_states: Vec<Rc<ExecutionState>>,

    /// The unsupported-feature errors of the paths that were dropped.
    pub errors: Errors,

    /// The number of branches dropped because the solver could not decide
    /// them.
    pub unresolved_branches: usize,

    /// The number of paths abandoned at the step bound.
    pub abandoned_paths: usize,

    /// The total number of steps taken.
    pub steps: usize,
}

/// The configuration of the interpreter and its driver.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// When set, the input packet size is constrained to equal this many bits
    /// at program entry.
    ///
    /// Defaults to [`None`].
    pub min_pkt_size: Option<u64>,

    /// Whether the pipeline is truncated after its first parser.
    ///
    /// Defaults to `false`.
    pub input_packet_only: bool,

    /// The number of steps a path may take before the driver abandons it.
    ///
    /// Defaults to [`DEFAULT_MAX_STEPS_PER_PATH`].
    pub max_steps_per_path: usize,

    /// Whether assignment traces include a concrete witness of the assigned
    /// value.
    ///
    /// Defaults to `false`.
    pub trace_concrete_values: bool,

    /// Whether the driver checks every guarded branch with the solver before
    /// exploring it.
    ///
    /// Defaults to [`DEFAULT_CHECK_BRANCH_FEASIBILITY`].
    pub check_branch_feasibility: bool,
}

impl Config {
    /// Sets the `min_pkt_size` config parameter to `value`.
    #[must_use]
    pub fn with_min_pkt_size(mut self, value: u64) -> Self {
        self.min_pkt_size = Some(value);
        self
    }

    /// Sets the `input_packet_only` config parameter to `value`.
    #[must_use]
    pub fn with_input_packet_only(mut self, value: bool) -> Self {
        self.input_packet_only = value;
        self
    }

    /// Sets the `max_steps_per_path` config parameter to `value`.
    #[must_use]
    pub fn with_max_steps_per_path(mut self, value: usize) -> Self {
        self.max_steps_per_path = value;
        self
    }

    /// Sets the `trace_concrete_values` config parameter to `value`.
    #[must_use]
    pub fn with_trace_concrete_values(mut self, value: bool) -> Self {
        self.trace_concrete_values = value;
        self
    }

    /// Sets the `check_branch_feasibility` config parameter to `value`.
    #[must_use]
    pub fn with_check_branch_feasibility(mut self, value: bool) -> Self {
        self.check_branch_feasibility = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_pkt_size:             None,
            input_packet_only:        false,
            max_steps_per_path:       DEFAULT_MAX_STEPS_PER_PATH,
            trace_concrete_values:    false,
            check_branch_feasibility: DEFAULT_CHECK_BRANCH_FEASIBILITY,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{atomic::AtomicBool, Arc};

    use crate::{
        evaluator::{Config, Evaluator},
        ir::{Block, Declaration, Expression, Node, Statement, Type},
        state::{
            continuation::{Body, Command},
            ExecutionState,
        },
        test_util::{TestSolver, TestTarget},
        watchdog::{FlagWatchdog, LazyWatchdog},
    };

    fn branching_state() -> ExecutionState {
        let x = Expression::path("x", Type::bits(8));
        let statement = Statement::If {
            condition: Expression::eq(Expression::symbolic("s", Type::bits(8)), Expression::bits(1, 8)),
            if_true:   Box::new(Statement::Assign {
                left:  x.clone(),
                right: Expression::bits(1, 8),
            }),
            if_false:  Some(Box::new(Statement::Block(Block::of(vec![Statement::Assign {
                left:  x,
                right: Expression::bits(2, 8),
            }])))),
        };
        let mut state = ExecutionState::new(Body::from(vec![Command::Statement(Node::Statement(statement))]));
        state.push_namespace(vec![Declaration::variable("x", Type::bits(8))]);
        state
    }

    #[test]
    fn explores_both_arms_of_a_symbolic_branch() -> anyhow::Result<()> {
        let target = TestTarget::default();
        let mut solver = TestSolver::default();
        let mut evaluator = Evaluator::new(&target, &mut solver, Config::default(), LazyWatchdog.in_rc());
        let result = evaluator.run(branching_state())?;

        assert_eq!(result.terminal_states.len(), 2);
        assert!(result.errors.is_empty());
        assert_eq!(result.unresolved_branches, 0);
        Ok(())
    }

    #[test]
    fn inconclusive_branches_are_counted_and_dropped() -> anyhow::Result<()> {
        let target = TestTarget::default();
        let mut solver = TestSolver::inconclusive();
        let mut evaluator = Evaluator::new(&target, &mut solver, Config::default(), LazyWatchdog.in_rc());
        let result = evaluator.run(branching_state())?;

        assert!(result.terminal_states.is_empty());
        assert_eq!(result.unresolved_branches, 2);
        Ok(())
    }

    #[test]
    fn paths_are_abandoned_at_the_step_bound() -> anyhow::Result<()> {
        let target = TestTarget::default();
        let mut solver = TestSolver::default();
        let config = Config::default().with_max_steps_per_path(1);
        let mut evaluator = Evaluator::new(&target, &mut solver, config, LazyWatchdog.in_rc());
        let result = evaluator.run(branching_state())?;

        assert!(result.terminal_states.is_empty());
        assert_eq!(result.abandoned_paths, 2);
        Ok(())
    }

    #[test]
    fn raised_watchdogs_stop_the_search() {
        let target = TestTarget::default();
        let mut solver = TestSolver::default();
        let watchdog = FlagWatchdog::new(Arc::new(AtomicBool::new(true))).polling_every(1).in_rc();
        let mut evaluator = Evaluator::new(&target, &mut solver, Config::default(), watchdog);

        assert!(evaluator.run(branching_state()).is_err());
    }

    #[test]
    fn configs_round_trip_through_json() -> anyhow::Result<()> {
        let config = Config::default().with_min_pkt_size(112).with_input_packet_only(true);
        let json = serde_json::to_string(&config)?;
        assert_eq!(serde_json::from_str::<Config>(&json)?, config);

        let partial: Config = serde_json::from_str(r#"{ "max_steps_per_path": 5 }"#)?;
        assert_eq!(partial, Config::default().with_max_steps_per_path(5));
        Ok(())
    }
}
