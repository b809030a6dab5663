//! This module contains the interface to the target-specific knowledge about
//! the program under test.
//!
//! The interpreter knows the semantics of the language. Everything that depends
//! on the architecture the program is compiled for (the order of the pipeline,
//! the initial contents of storage, the behavior of tables and externs) is
//! supplied through [`ProgramInfo`].

use std::rc::Rc;

use crate::{
    constant::{
        ACTION_RUN_WIDTH_BITS,
        INPUT_PACKET_SIZE_NAME,
        INPUT_PACKET_SIZE_WIDTH_BITS,
        TABLE_ACTION_RUN_FIELD,
        TABLE_HIT_FIELD,
        TABLE_MISS_FIELD,
    },
    error::execution::Error,
    ir::{Expression, Field, MethodCall, Node, Table, Type},
    state::{continuation::Command, Branch, ExecutionState},
};

/// The target-specific collaborator of the interpreter.
pub trait ProgramInfo {
    /// Creates the value held by freshly declared storage of the scalar type
    /// `ty`.
    ///
    /// When `force_taint` is set the value must be tainted. Otherwise the
    /// target decides whether uninitialized storage reads as a default value
    /// or as taint.
    fn create_target_uninitialized(&self, ty: &Type, force_taint: bool) -> Expression;

    /// Gets the top-level commands that make up the pipeline of the
    /// architecture, in execution order.
    fn pipeline_sequence(&self) -> Vec<Command>;

    /// Gets the constraint that holds for every input of the target, such as
    /// bounds on the input packet size.
    fn target_constraints(&self) -> Option<Expression> {
        None
    }

    /// Seeds the initial state at program entry, after the global storage has
    /// been declared.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the state cannot be initialized.
    fn initialize_state(&self, _state: &mut ExecutionState) -> Result<(), Error> {
        Ok(())
    }

    /// Runs the target-specific setup for an activation of the parser or
    /// control `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the setup fails.
    fn entry_hook(&self, _block: &Node, _state: &mut ExecutionState) -> Result<(), Error> {
        Ok(())
    }

    /// Steps the application of `table`, which is the next command of `state`.
    ///
    /// If `wants_value` is set, the top continuation of `state` expects the
    /// application result (see [`table_apply_result`]) as its value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the target does not support table application.
    fn step_table_apply(
        &self,
        table: &Rc<Table>,
        _wants_value: bool,
        _state: &Rc<ExecutionState>,
    ) -> Result<Vec<Branch>, Error> {
        Err(Error::unimplemented(format!("application of table {}", table.name)))
    }

    /// Steps the extern call `call`, which is the next command of `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the target does not know the extern.
    fn step_extern(
        &self,
        call: &MethodCall,
        _state: &Rc<ExecutionState>,
    ) -> Result<Vec<Branch>, Error> {
        Err(Error::unimplemented(format!("extern {}", call.method)))
    }
}

/// Gets the symbolic variable that stands for the size of the input packet in
/// bits.
#[must_use]
pub fn input_packet_size() -> Expression {
    Expression::symbolic(INPUT_PACKET_SIZE_NAME, Type::bits(INPUT_PACKET_SIZE_WIDTH_BITS))
}

/// Gets the type of the result of applying a table.
#[must_use]
pub fn table_apply_result_type() -> Type {
    Type::structure(
        "apply_result",
        vec![
            Field::new(TABLE_HIT_FIELD, Type::Bool),
            Field::new(TABLE_MISS_FIELD, Type::Bool),
            Field::new(TABLE_ACTION_RUN_FIELD, Type::bits(ACTION_RUN_WIDTH_BITS)),
        ],
    )
}

/// Constructs the result of applying a table that ran the action with index
/// `action_index`.
#[must_use]
pub fn table_apply_result(hit: bool, action_index: usize) -> Expression {
    Expression::aggregate(
        vec![
            Expression::bool(hit),
            Expression::bool(!hit),
            Expression::bits(action_index as u128, ACTION_RUN_WIDTH_BITS),
        ],
        table_apply_result_type(),
    )
}
