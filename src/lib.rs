//! This library implements the core of a symbolic test-case generator for
//! packet-processing programs: a continuation-based small-step interpreter.
//!
//! Given an [`state::ExecutionState`], the [`stepper::Stepper`] executes exactly
//! one command and returns the [`state::Branch`]es that result, each guarded by
//! the condition under which it is taken. A driver decides which branches to
//! explore; [`evaluator::Evaluator`] is a reference driver that explores all of
//! them depth-first.
//!
//! # How it Works
//!
//! 1. A program is described by the [`ir`] nodes, and everything that depends
//!    on the target architecture is supplied through [`program::ProgramInfo`].
//! 2. The state holds a body of pending commands and a stack of suspended
//!    continuations. Whenever a command needs the value of a subexpression, the
//!    rest of the body is suspended into a continuation, the subexpression is
//!    evaluated, and its value resumes the continuation.
//! 3. Exceptions of the interpreted language (`exit`, `reject` and friends)
//!    unwind the continuation stack to the innermost frame that handles them.
//! 4. Storage is flattened into scalar cells named by
//!    [`state::env::StateVariable`]s, so that every value the solver sees is a
//!    bit-vector or a boolean.
//!
//! # Basic Usage
//!
//! ```
//! use std::rc::Rc;
//!
//! use p4_small_step::{
//!     evaluator::{Config, Evaluator},
//!     ir::{Expression, Program, Type},
//!     program::ProgramInfo,
//!     solver::{AbstractSolver, Model},
//!     state::continuation::Command,
//!     watchdog::LazyWatchdog,
//! };
//!
//! struct Target;
//!
//! impl ProgramInfo for Target {
//!     fn create_target_uninitialized(&self, ty: &Type, force_taint: bool) -> Expression {
//!         if force_taint {
//!             Expression::taint(ty.clone())
//!         } else {
//!             Expression::constant(0u8, ty.clone())
//!         }
//!     }
//!
//!     fn pipeline_sequence(&self) -> Vec<Command> {
//!         vec![]
//!     }
//! }
//!
//! struct Optimist;
//!
//! impl AbstractSolver for Optimist {
//!     fn check_sat(&mut self, _constraints: &[Expression]) -> Option<bool> {
//!         Some(true)
//!     }
//!
//!     fn symbolic_mapping(&self) -> Model {
//!         Model::new()
//!     }
//! }
//!
//! let program = Rc::new(Program {
//!     name:         "empty".into(),
//!     declarations: vec![],
//! });
//! let mut solver = Optimist;
//! let mut evaluator = Evaluator::new(&Target, &mut solver, Config::default(), LazyWatchdog.in_rc());
//!
//! let result = evaluator.evaluate(program).unwrap();
//! assert_eq!(result.terminal_states.len(), 1);
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod constant;
pub mod error;
pub mod evaluator;
pub mod ir;
pub mod program;
pub mod solver;
pub mod state;
pub mod stepper;
pub mod watchdog;

#[cfg(test)]
mod test_util;

// Re-exports to provide the library interface.
pub use evaluator::{Config, EvaluationResult, Evaluator};
pub use state::{Branch, ExecutionState};
pub use stepper::Stepper;
