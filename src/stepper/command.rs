//! This module contains the per-construct rules for statements, program and
//! block invocations, and the non-statement commands of a body.

use std::{collections::BTreeMap, rc::Rc};

use log::{debug, warn};

use crate::{
    constant::{IN_UNDEFINED_STATE_PROPERTY, PARSER_START_STATE, TABLE_ACTION_RUN_FIELD, TABLE_APPLY_METHOD},
    error::execution::Error,
    ir::{
        fold::simplify,
        Block,
        BlockComponent,
        Control,
        Declaration,
        Expression,
        MethodCall,
        Node,
        Parser,
        Program,
        Statement,
        SwitchCase,
        SwitchLabel,
    },
    program::input_packet_size,
    state::{
        continuation::{Body, Command, Continuation, ExceptionHandlers, ExceptionKind, PropertyValue},
        trace::TraceEvent,
        Branch,
        ExecutionState,
    },
    stepper::{StepResult, Stepper},
};

impl<'a> Stepper<'a> {
    /// Executes `statement`, which is the next command of `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] for `return` statements, which are not supported, and
    /// whenever an internal invariant is violated.
    pub fn step_statement(&mut self, statement: &Statement, state: &Rc<ExecutionState>) -> StepResult {
        match statement {
            Statement::Assign { left, right } => self.step_assign(left, right, state),
            Statement::If {
                condition,
                if_true,
                if_false,
            } => self.step_if(condition, if_true, if_false.as_deref(), state),
            Statement::Switch { expr, cases } => self.step_switch(expr, cases, state),
            Statement::Block(block) => self.step_block(block, state),
            Statement::MethodCall(call) => self.step_method_call_statement(call, state),
            Statement::Exit => self.step_to_exception(ExceptionKind::Exit, state),
            Statement::Return(_) => Err(Error::unimplemented("return statements")),
            Statement::Empty => {
                let mut next = (**state).clone();
                next.pop_body()?;
                Ok(vec![Branch::unconditional(state, next)])
            }
        }
    }

    fn step_assign(&mut self, left: &Expression, right: &Expression, state: &Rc<ExecutionState>) -> StepResult {
        if !right.is_symbolic_value() {
            return self.step_to_subexpr(right, state, |v| {
                Command::Statement(Node::Statement(Statement::Assign {
                    left:  left.clone(),
                    right: v,
                }))
            });
        }

        let mut next = (**state).clone();
        let value = simplify(right);
        self.write_value(left, &value, &mut next)?;

        let concrete = if self.config.trace_concrete_values {
            self.evaluate_expression(&value, None, &next)?
        } else {
            None
        };
        next.add_trace_event(TraceEvent::Assignment {
            target: left.to_string(),
            value: value.to_string(),
            concrete: concrete.map(|c| c.to_string()),
        });
        next.pop_body()?;
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Gets the commands that run `statements` with the undefined-state
    /// property raised, restoring its previous value afterwards.
    fn under_undefined_state(
        state: &ExecutionState,
        statements: impl IntoIterator<Item = Statement>,
    ) -> Vec<Command> {
        let previous = state
            .property(IN_UNDEFINED_STATE_PROPERTY)
            .unwrap_or(PropertyValue::Bool(false));
        let mut commands = vec![Command::PropertyUpdate {
            name:  IN_UNDEFINED_STATE_PROPERTY.into(),
            value: PropertyValue::Bool(true),
        }];
        commands.extend(statements.into_iter().map(|s| Command::Statement(Node::Statement(s))));
        commands.push(Command::PropertyUpdate {
            name:  IN_UNDEFINED_STATE_PROPERTY.into(),
            value: previous,
        });
        commands
    }

    fn step_if(
        &mut self,
        condition: &Expression,
        if_true: &Statement,
        if_false: Option<&Statement>,
        state: &Rc<ExecutionState>,
    ) -> StepResult {
        if !condition.is_symbolic_value() {
            return self.step_to_subexpr(condition, state, |v| {
                Command::Statement(Node::Statement(Statement::If {
                    condition: v,
                    if_true:   Box::new(if_true.clone()),
                    if_false:  if_false.map(|s| Box::new(s.clone())),
                }))
            });
        }

        if condition.is_tainted() {
            debug!("tainted condition {condition}, executing both arms");
            let mut next = (**state).clone();
            let arms = std::iter::once(if_true.clone()).chain(if_false.cloned());
            let commands = Self::under_undefined_state(&next, arms);
            next.replace_top_body(commands)?;
            return Ok(vec![Branch::unconditional(state, next)]);
        }

        let mut taken = (**state).clone();
        taken.replace_top_body([Command::Statement(Node::Statement(if_true.clone()))])?;
        taken.add_trace_event(TraceEvent::IfCondition {
            condition: condition.to_string(),
            taken:     true,
        });

        let mut not_taken = (**state).clone();
        let else_arm = if_false.cloned().unwrap_or_else(|| Statement::Block(Block::default()));
        not_taken.replace_top_body([Command::Statement(Node::Statement(else_arm))])?;
        not_taken.add_trace_event(TraceEvent::IfCondition {
            condition: condition.to_string(),
            taken:     false,
        });

        Ok(vec![
            Branch::new(Some(condition.clone()), state, taken),
            Branch::new(Some(Expression::not(condition.clone())), state, not_taken),
        ])
    }

    /// Rewrites switch labels that name actions into the numeric indices that
    /// `t.apply().action_run` produces for the table `t`.
    fn rewrite_action_labels(
        expr: &Expression,
        cases: &[SwitchCase],
        state: &ExecutionState,
    ) -> Result<Vec<SwitchCase>, Error> {
        let table_name = match expr {
            Expression::Member { base, field, .. } if field == TABLE_ACTION_RUN_FIELD => match base.as_ref() {
                Expression::MethodCall(MethodCall {
                    receiver: Some(receiver),
                    method,
                    ..
                }) if method == TABLE_APPLY_METHOD => match receiver.as_ref() {
                    Expression::Path { name, .. } => Some(name),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        };
        let Some(table_name) = table_name else {
            return Ok(cases.to_vec());
        };
        let Some(Declaration::Table(table)) = state.find_decl(table_name) else {
            return Err(Error::UnknownTable {
                name: table_name.clone(),
            });
        };

        let indices = table.action_indices();
        let discriminant_type = expr.ty();
        Ok(cases
            .iter()
            .map(|case| {
                let label = match &case.label {
                    SwitchLabel::Expr(Expression::Path { name, .. }) => indices
                        .get_by_left(name)
                        .map_or_else(
                            || case.label.clone(),
                            |i| SwitchLabel::Expr(Expression::constant(*i as u64, discriminant_type.clone())),
                        ),
                    other => other.clone(),
                };
                SwitchCase::new(label, case.body.clone())
            })
            .collect())
    }

    /// Gets the body that runs when case `position` is matched, falling through
    /// cases without a body.
    fn fallthrough_body(cases: &[SwitchCase], position: usize) -> Option<&Statement> {
        cases[position..].iter().find_map(|c| c.body.as_ref())
    }

    fn step_switch(&mut self, expr: &Expression, cases: &[SwitchCase], state: &Rc<ExecutionState>) -> StepResult {
        let cases = Self::rewrite_action_labels(expr, cases, state)?;

        if !expr.is_symbolic_value() {
            return self.step_to_subexpr(expr, state, |v| {
                Command::Statement(Node::Statement(Statement::Switch { expr: v, cases }))
            });
        }
        let expr = simplify(expr);

        if expr.is_tainted() {
            debug!("tainted switch discriminant, executing every case");
            let mut next = (**state).clone();
            let bodies = cases.iter().filter_map(|c| c.body.clone());
            let commands = Self::under_undefined_state(&next, bodies);
            next.replace_top_body(commands)?;
            return Ok(vec![Branch::unconditional(state, next)]);
        }

        // The default case is only taken once no label matches, wherever it
        // appears in the list.
        let default = cases.iter().position(|c| matches!(c.label, SwitchLabel::Default));

        let is_literal = matches!(expr, Expression::Constant { .. } | Expression::Bool(_));
        if is_literal {
            let mut next = (**state).clone();
            let matched = cases
                .iter()
                .position(|c| matches!(&c.label, SwitchLabel::Expr(label) if simplify(label) == expr))
                .or(default);
            Self::enter_case(&cases, matched, &mut next)?;
            return Ok(vec![Branch::unconditional(state, next)]);
        }

        // A symbolic discriminant selects each labelled case under the
        // condition that it matches and no earlier label did.
        let mut branches = Vec::new();
        let mut earlier: Vec<Expression> = Vec::new();
        for (i, case) in cases.iter().enumerate() {
            let SwitchLabel::Expr(label) = &case.label else {
                continue;
            };
            let matches = Expression::eq(expr.clone(), label.clone());
            let guard = simplify(&Expression::and(matches.clone(), none_of(&earlier)));
            earlier.push(matches);
            if guard.as_bool() == Some(false) {
                continue;
            }
            let mut next = (**state).clone();
            Self::enter_case(&cases, Some(i), &mut next)?;
            let constraint = (guard.as_bool() != Some(true)).then_some(guard);
            branches.push(Branch::new(constraint, state, next));
        }

        let guard = simplify(&none_of(&earlier));
        if guard.as_bool() != Some(false) {
            let mut next = (**state).clone();
            Self::enter_case(&cases, default, &mut next)?;
            let constraint = (guard.as_bool() != Some(true)).then_some(guard);
            branches.push(Branch::new(constraint, state, next));
        }
        Ok(branches)
    }

    /// Replaces the switch at the top of `next` with the body reached from the
    /// case at `position`, or drops it if there is none.
    fn enter_case(
        cases: &[SwitchCase],
        position: Option<usize>,
        next: &mut ExecutionState,
    ) -> Result<(), Error> {
        match position.and_then(|i| Self::fallthrough_body(cases, i)) {
            Some(body) => next.replace_top_body([Command::Statement(Node::Statement(body.clone()))])?,
            None => {
                next.pop_body()?;
            }
        }
        Ok(())
    }

    /// Declares the variables among `components` and gets the commands for the
    /// rest, in order.
    ///
    /// Initialized variables are declared and then assigned their initializer.
    pub fn declare_components(
        &self,
        components: &[BlockComponent],
        state: &mut ExecutionState,
    ) -> Result<Vec<Command>, Error> {
        let mut commands = Vec::new();
        for component in components {
            match component {
                BlockComponent::Declaration(decl) => {
                    commands.extend(self.declare(decl, state)?);
                }
                BlockComponent::Statement(statement) => {
                    commands.push(Command::Statement(Node::Statement(statement.clone())));
                }
            }
        }
        Ok(commands)
    }

    /// Declares the storage for `decl`, getting the command that initializes
    /// it if it has an initializer.
    fn declare(&self, decl: &Declaration, state: &mut ExecutionState) -> Result<Option<Command>, Error> {
        let Declaration::Variable {
            name,
            ty,
            initializer,
        } = decl
        else {
            return Ok(None);
        };
        let target = Expression::path(name.clone(), ty.clone());
        self.declare_variable(&target, state)?;
        Ok(initializer.as_ref().map(|init| {
            Command::Statement(Node::Statement(Statement::Assign {
                left:  target,
                right: init.clone(),
            }))
        }))
    }

    /// Runs `block` in a frame of its own, so that its scope ends with it.
    fn step_block(&mut self, block: &Block, state: &Rc<ExecutionState>) -> StepResult {
        let mut next = (**state).clone();
        next.pop_body()?;
        if block.components.is_empty() {
            return Ok(vec![Branch::unconditional(state, next)]);
        }

        next.push_current_continuation(None, ExceptionHandlers::new());
        next.push_namespace(block.declarations().cloned());
        let commands = self.declare_components(&block.components, &mut next)?;
        next.replace_body(Body::from(commands));
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Checks if the call `call` produces a value for its caller, as opposed
    /// to an action invocation or table application executed for its effect.
    fn call_produces_value(call: &MethodCall, state: &ExecutionState) -> bool {
        if !call.returns_value() {
            return false;
        }
        let named = |name: &str| state.find_decl(name);
        match (&call.receiver, call.method.as_str()) {
            (Some(receiver), TABLE_APPLY_METHOD) => match receiver.as_ref() {
                Expression::Path { name, .. } => !matches!(named(name), Some(Declaration::Table(_))),
                _ => true,
            },
            (None, method) => !matches!(named(method), Some(Declaration::Action(_))),
            _ => true,
        }
    }

    fn step_method_call_statement(&mut self, call: &MethodCall, state: &Rc<ExecutionState>) -> StepResult {
        let mut next = (**state).clone();
        let parameter_type = Self::call_produces_value(call, &next).then(|| call.ty.clone());
        next.pop_body()?;
        next.push_current_continuation(parameter_type, ExceptionHandlers::new());
        next.replace_body(Body::from(vec![Command::Return(Some(Expression::MethodCall(call.clone())))]));
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Executes the entry point of `program`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the global storage cannot be declared or the target
    /// fails to initialize the state.
    pub fn step_program(&mut self, program: &Rc<Program>, state: &Rc<ExecutionState>) -> StepResult {
        let mut next = (**state).clone();
        next.pop_body()?;
        next.push_namespace(program.declarations.iter().cloned());

        let mut commands = Vec::new();
        for decl in &program.declarations {
            commands.extend(self.declare(decl, &mut next)?);
        }
        self.program.initialize_state(&mut next)?;

        if let Some(constraint) = self.program.target_constraints() {
            next.add_path_constraint(constraint);
        }
        if let Some(size) = self.config.min_pkt_size {
            next.add_path_constraint(Expression::eq(
                input_packet_size(),
                Expression::constant(size, input_packet_size().ty()),
            ));
        }

        let mut pipeline = self.program.pipeline_sequence();
        if self.config.input_packet_only {
            if let Some(end) = pipeline
                .iter()
                .position(|c| matches!(c, Command::Statement(Node::Parser(_))))
            {
                pipeline.truncate(end + 1);
            }
        }
        commands.extend(pipeline);

        let handlers: ExceptionHandlers = [ExceptionKind::Drop, ExceptionKind::Exit, ExceptionKind::Abort]
            .into_iter()
            .map(|kind| (kind, Continuation::default()))
            .collect();
        next.push_current_continuation(None, handlers);
        next.replace_body(Body::from(commands));
        next.add_trace_event(TraceEvent::Invocation {
            name: program.name.clone(),
        });
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Executes an invocation of `parser`.
    ///
    /// Exceptions raised inside the parser propagate to the enclosing frames.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the target's entry hook fails or the parser's locals
    /// cannot be declared.
    pub fn step_parser(&mut self, parser: &Rc<Parser>, state: &Rc<ExecutionState>) -> StepResult {
        let mut next = (**state).clone();
        next.pop_body()?;
        self.program.entry_hook(&Node::Parser(parser.clone()), &mut next)?;
        next.push_current_continuation(None, ExceptionHandlers::new());
        next.push_namespace(parser.scope_declarations());

        let mut commands = Vec::new();
        for decl in &parser.locals {
            commands.extend(self.declare(decl, &mut next)?);
        }
        commands.push(Command::Statement(Node::ParserState {
            parser: parser.clone(),
            state:  PARSER_START_STATE.into(),
        }));
        next.replace_body(Body::from(commands));
        next.add_trace_event(TraceEvent::Invocation {
            name: parser.name.clone(),
        });
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Executes an invocation of `control`.
    ///
    /// An `exit` inside the control ends the control and resumes execution
    /// after its invocation.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the target's entry hook fails or the control's locals
    /// cannot be declared.
    pub fn step_control(&mut self, control: &Rc<Control>, state: &Rc<ExecutionState>) -> StepResult {
        let mut next = (**state).clone();
        next.pop_body()?;
        self.program.entry_hook(&Node::Control(control.clone()), &mut next)?;
        let handlers = BTreeMap::from([(ExceptionKind::Exit, Continuation::default())]);
        next.push_current_continuation(None, handlers);
        next.push_namespace(control.scope_declarations());

        let mut commands = Vec::new();
        for decl in &control.locals {
            commands.extend(self.declare(decl, &mut next)?);
        }
        commands.push(Command::Statement(Node::Statement(Statement::Block(control.body.clone()))));
        next.replace_body(Body::from(commands));
        next.add_trace_event(TraceEvent::Invocation {
            name: control.name.clone(),
        });
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Raises `kind`, unwinding to the innermost frame that handles it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the catching frame's continuation expects a value.
    pub fn step_exception(&mut self, kind: ExceptionKind, state: &Rc<ExecutionState>) -> StepResult {
        let mut next = (**state).clone();
        next.pop_body()?;
        let caught = next.handle_exception(kind)?;
        debug!("{kind} raised, caught: {caught}");
        next.add_trace_event(TraceEvent::Exception { kind, caught });
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Asserts `condition` on the path of `state`.
    ///
    /// The path continues only if the solver finds the path constraints
    /// together with `condition` satisfiable. An inconclusive answer ends the
    /// path as well.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body of `state` is empty.
    pub fn step_guard(&mut self, condition: &Expression, state: &Rc<ExecutionState>) -> StepResult {
        if !condition.is_symbolic_value() {
            return self.step_to_subexpr(condition, state, Command::Guard);
        }
        let condition = simplify(condition);
        let mut constraints = state.path_constraints().to_vec();
        constraints.push(condition.clone());
        match self.solver.check_sat(&constraints) {
            Some(true) => {
                let mut next = (**state).clone();
                next.pop_body()?;
                Ok(vec![Branch::new(Some(condition), state, next)])
            }
            Some(false) => {
                debug!("guard {condition} does not hold, path ends");
                Ok(vec![])
            }
            None => {
                warn!("guard {condition} could not be decided, path ends");
                Ok(vec![])
            }
        }
    }
}

/// Gets the condition that none of `conditions` holds.
pub(crate) fn none_of(conditions: &[Expression]) -> Expression {
    conditions
        .iter()
        .fold(Expression::bool(true), |acc, c| Expression::and(acc, Expression::not(c.clone())))
}
