//! This module contains the transition relation of the interpreter.
//!
//! A single call to [`Stepper::step`] executes the next command of an
//! [`ExecutionState`] and returns the [`Branch`]es that result. The stepper
//! never decides which branch to explore next; that is the job of a driver such
//! as [`crate::evaluator::Evaluator`].
//!
//! The rules are split by concern:
//!
//! - [`transition`] holds the helpers shared by all rules: value production,
//!   exceptions, continuation-passing evaluation of subexpressions, header
//!   validity and header stack shifts.
//! - [`command`] holds the rules for statements and for the non-statement
//!   commands of a body.
//! - [`expression`] holds the rules that reduce a pending expression to a
//!   value.
//! - [`parser`] holds the rules for parser states and transitions.

pub mod command;
pub mod expression;
pub mod parser;
pub mod transition;

use std::rc::Rc;

use log::trace;

use crate::{
    error::{
        container::Locatable,
        execution::{Error, LocatedError},
    },
    evaluator::Config,
    ir::{fold::simplify, Node},
    program::ProgramInfo,
    solver::AbstractSolver,
    state::{continuation::Command, Branch, ExecutionState},
};

/// The result of a single transition rule.
pub type StepResult = Result<Vec<Branch>, Error>;

/// The interpreter's transition relation.
///
/// It borrows the target-specific program information, the solver and the
/// configuration for the duration of a search.
pub struct Stepper<'a> {
    program: &'a dyn ProgramInfo,
    solver:  &'a mut dyn AbstractSolver,
    config:  &'a Config,
}

impl<'a> Stepper<'a> {
    /// Constructs a new stepper.
    pub fn new(
        program: &'a dyn ProgramInfo,
        solver: &'a mut dyn AbstractSolver,
        config: &'a Config,
    ) -> Self {
        Self {
            program,
            solver,
            config,
        }
    }

    /// Gets the configuration of the stepper.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.config
    }

    /// Executes the next command of `state`.
    ///
    /// A terminal state yields no branches. When the body is empty but frames
    /// remain, the top frame is resumed without a value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the program uses an unsupported feature, or if an
    /// internal invariant is violated. The error is located at the step count
    /// of `state`.
    pub fn step(&mut self, state: &Rc<ExecutionState>) -> Result<Vec<Branch>, LocatedError> {
        self.step_state(state).map_err(|e| e.locate(state.step_count()))
    }

    fn step_state(&mut self, state: &Rc<ExecutionState>) -> StepResult {
        if state.body().is_empty() {
            if state.stack_depth() == 0 {
                return Ok(vec![]);
            }
            let mut next = (**state).clone();
            next.pop_continuation(None)?;
            return Ok(vec![Branch::unconditional(state, next)]);
        }

        let command = state.next_command()?.clone();
        trace!("step {}: {command}", state.step_count());

        match command {
            Command::Statement(node) => self.step_node(&node, state),
            Command::TraceEvent(event) => {
                let mut next = (**state).clone();
                next.pop_body()?;
                next.add_trace_event(event);
                Ok(vec![Branch::unconditional(state, next)])
            }
            Command::Return(None) => {
                let mut next = (**state).clone();
                next.pop_continuation(None)?;
                Ok(vec![Branch::unconditional(state, next)])
            }
            Command::Return(Some(value)) if value.is_symbolic_value() => {
                self.step_symbolic_value(&simplify(&value), state)
            }
            Command::Return(Some(expr)) => self.step_expression(&expr, state),
            Command::Exception(kind) => self.step_exception(kind, state),
            Command::PropertyUpdate { name, value } => {
                let mut next = (**state).clone();
                next.pop_body()?;
                next.set_property(name, value);
                Ok(vec![Branch::unconditional(state, next)])
            }
            Command::Guard(condition) => self.step_guard(&condition, state),
        }
    }

    /// Executes the program node `node`, which is the next command of `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the program uses an unsupported feature, or if an
    /// internal invariant is violated.
    pub fn step_node(&mut self, node: &Node, state: &Rc<ExecutionState>) -> StepResult {
        match node {
            Node::Statement(statement) => self.step_statement(statement, state),
            Node::Program(program) => self.step_program(program, state),
            Node::Parser(parser) => self.step_parser(parser, state),
            Node::Control(control) => self.step_control(control, state),
            Node::ParserState {
                parser,
                state: name,
            } => self.step_parser_state(parser, name, state),
            Node::Transition { parser, transition } => {
                self.step_transition(parser, transition, state)
            }
        }
    }
}
