//! This module contains the rules that reduce a pending expression, the
//! argument of a `Return` command, to a symbolic value.

use std::rc::Rc;

use log::debug;

use crate::{
    constant::TABLE_APPLY_METHOD,
    error::execution::Error,
    ir::{fold::simplify, Action, Declaration, Direction, Expression, MethodCall, Node, Statement, Type},
    state::{continuation::Command, env::StateVariable, trace::TraceEvent, Branch, ExecutionState},
    stepper::{StepResult, Stepper},
};

impl<'a> Stepper<'a> {
    /// Takes one step towards the value of `expr`, which is pending in the
    /// `Return` command at the top of the body of `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `expr` reads unset storage, accesses a component of
    /// something that is not an aggregate, or calls something unsupported.
    pub fn step_expression(&mut self, expr: &Expression, state: &Rc<ExecutionState>) -> StepResult {
        if expr.is_reference() {
            let value = state.read_reference(expr)?;
            return self.step_symbolic_value(&simplify(&value), state);
        }

        match expr {
            Expression::Member { base, field, ty } => {
                if !base.is_symbolic_value() {
                    return self.step_to_subexpr(base, state, |v| {
                        Command::Return(Some(Expression::member(v, field.clone(), ty.clone())))
                    });
                }
                let value = match base.as_ref() {
                    Expression::Taint { .. } => Expression::taint(ty.clone()),
                    aggregate => aggregate.aggregate_field(field).cloned().ok_or_else(|| Error::TypeMismatch {
                        expected: format!("aggregate with field {field}"),
                        found:    aggregate.to_string(),
                    })?,
                };
                self.step_symbolic_value(&simplify(&value), state)
            }
            Expression::ArrayIndex { base, index, ty } => {
                if !base.is_symbolic_value() {
                    return self.step_to_subexpr(base, state, |v| {
                        Command::Return(Some(Expression::index(v, *index, ty.clone())))
                    });
                }
                let value = match base.as_ref() {
                    Expression::Taint { .. } => Expression::taint(ty.clone()),
                    Expression::Aggregate { components, .. } if *index < components.len() => {
                        components[*index].clone()
                    }
                    other => {
                        return Err(Error::TypeMismatch {
                            expected: format!("array with element {index}"),
                            found:    other.to_string(),
                        })
                    }
                };
                self.step_symbolic_value(&simplify(&value), state)
            }
            Expression::Unary { op, operand, ty } => self.step_to_subexpr(operand, state, |v| {
                Command::Return(Some(Expression::Unary {
                    op:      *op,
                    operand: Box::new(v),
                    ty:      ty.clone(),
                }))
            }),
            Expression::Binary { op, left, right, ty } => {
                let operands = [left.as_ref().clone(), right.as_ref().clone()];
                self.step_to_first_non_value(&operands, state, |i, v| {
                    let [mut left, mut right] = operands.clone();
                    if i == 0 {
                        left = v;
                    } else {
                        right = v;
                    }
                    Command::Return(Some(Expression::Binary {
                        op:    *op,
                        left:  Box::new(left),
                        right: Box::new(right),
                        ty:    ty.clone(),
                    }))
                })
                .unwrap_or_else(|| self.step_symbolic_value(&simplify(expr), state))
            }
            Expression::Mux {
                condition,
                if_true,
                if_false,
                ty,
            } => self.step_mux(condition, if_true, if_false, ty, state),
            Expression::Aggregate { components, ty } => self
                .step_to_first_non_value(components, state, |i, v| {
                    let mut components = components.clone();
                    components[i] = v;
                    Command::Return(Some(Expression::aggregate(components, ty.clone())))
                })
                .unwrap_or_else(|| self.step_symbolic_value(expr, state)),
            Expression::MethodCall(call) => self.step_method_call(call, state),
            value => self.step_symbolic_value(&simplify(value), state),
        }
    }

    fn step_mux(
        &mut self,
        condition: &Expression,
        if_true: &Expression,
        if_false: &Expression,
        ty: &Type,
        state: &Rc<ExecutionState>,
    ) -> StepResult {
        let rebuild = |c: Expression, t: Expression, f: Expression| Expression::Mux {
            condition: Box::new(c),
            if_true:   Box::new(t),
            if_false:  Box::new(f),
            ty:        ty.clone(),
        };

        if !condition.is_symbolic_value() {
            return self.step_to_subexpr(condition, state, |v| {
                Command::Return(Some(rebuild(v, if_true.clone(), if_false.clone())))
            });
        }
        if let Some(taken) = simplify(condition).as_bool() {
            let arm = if taken { if_true } else { if_false };
            let mut next = (**state).clone();
            next.replace_top_body([Command::Return(Some(arm.clone()))])?;
            return Ok(vec![Branch::unconditional(state, next)]);
        }

        let arms = [if_true.clone(), if_false.clone()];
        let whole = rebuild(condition.clone(), if_true.clone(), if_false.clone());
        self.step_to_first_non_value(&arms, state, |i, v| {
            let [t, f] = arms.clone();
            let mux = if i == 0 {
                rebuild(condition.clone(), v, f)
            } else {
                rebuild(condition.clone(), t, v)
            };
            Command::Return(Some(mux))
        })
        .unwrap_or_else(|| self.step_symbolic_value(&simplify(&whole), state))
    }

    /// Steps the call `call`, which is pending in the top command of `state`.
    ///
    /// Header validity and header stack methods are handled here, as are
    /// direct action invocations. Table application and every other call are
    /// delegated to the target.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the call is malformed or the target does not support
    /// it.
    pub fn step_method_call(&mut self, call: &MethodCall, state: &Rc<ExecutionState>) -> StepResult {
        let receiver = call.receiver.as_deref();
        match (receiver, call.method.as_str()) {
            (Some(header), "isValid") => self.step_get_header_validity(header, state),
            (Some(header), method @ ("setValid" | "setInvalid")) => {
                let mut next = (**state).clone();
                self.set_header_validity(header, method == "setValid", &mut next)?;
                next.pop_continuation(None)?;
                Ok(vec![Branch::unconditional(state, next)])
            }
            (Some(stack), method @ ("push_front" | "pop_front")) => self
                .step_to_call_argument(call, state)
                .unwrap_or_else(|| {
                    self.step_stack_push_pop_front(stack, &call.args, method == "push_front", state)
                }),
            (Some(Expression::Path { name, .. }), TABLE_APPLY_METHOD) => {
                let Some(Declaration::Table(table)) = state.find_decl(name) else {
                    return Err(Error::UnknownTable { name: name.clone() });
                };
                let table = table.clone();
                let wants_value = state
                    .top_frame()
                    .is_some_and(|frame| frame.continuation.parameter().is_some());
                debug!("applying table {}", table.name);
                self.program.step_table_apply(&table, wants_value, state)
            }
            (None, name) => match state.find_decl(name) {
                Some(Declaration::Action(action)) => {
                    let action = action.clone();
                    self.step_action_call(&action, call, state)
                }
                _ => self
                    .step_to_call_argument(call, state)
                    .unwrap_or_else(|| self.program.step_extern(call, state)),
            },
            _ => self
                .step_to_call_argument(call, state)
                .unwrap_or_else(|| self.program.step_extern(call, state)),
        }
    }

    /// Suspends `call` until its first argument that is not yet a value has
    /// been evaluated, or returns [`None`] if every argument is a value.
    fn step_to_call_argument(&mut self, call: &MethodCall, state: &Rc<ExecutionState>) -> Option<StepResult> {
        self.step_to_first_non_value(&call.args, state, |i, v| {
            Command::Return(Some(Expression::MethodCall(call.with_arg(i, v))))
        })
    }

    /// Invokes `action` with the arguments of `call`.
    ///
    /// Every parameter gets storage of its own. Directionless and `in`
    /// parameters are initialised with the evaluated argument, `inout`
    /// parameters with a copy of the referenced storage, and `out` parameters
    /// start uninitialised. Once the body has run, `out` and `inout`
    /// parameters are copied back into their arguments in parameter order.
    fn step_action_call(&mut self, action: &Rc<Action>, call: &MethodCall, state: &Rc<ExecutionState>) -> StepResult {
        if action.params.len() != call.args.len() {
            return Err(Error::TypeMismatch {
                expected: format!("{} arguments to {}", action.params.len(), action.name),
                found:    format!("{} arguments", call.args.len()),
            });
        }

        let by_value = |direction: Direction| matches!(direction, Direction::In | Direction::None);
        let pending = action
            .params
            .iter()
            .zip(&call.args)
            .position(|(p, a)| by_value(p.direction) && !a.is_symbolic_value());
        if let Some(i) = pending {
            return self.step_to_subexpr(&call.args[i], state, |v| {
                Command::Return(Some(Expression::MethodCall(call.with_arg(i, v))))
            });
        }

        let mut next = (**state).clone();
        let mut bindings = Vec::new();
        let mut copy_out = Vec::new();
        for (param, arg) in action.params.iter().zip(&call.args) {
            let target = Expression::path(param.name.clone(), param.ty.clone());
            if !by_value(param.direction) && !arg.is_reference() {
                return Err(Error::NotAReference {
                    expr: arg.to_string(),
                });
            }
            // Arguments are read before any parameter storage is declared, as
            // a parameter may share its name with the storage it is bound to.
            let binding = match param.direction {
                Direction::In | Direction::None => Binding::Value(simplify(arg)),
                Direction::InOut => Binding::Leaves(Self::read_leaves(arg, &param.ty, &next)?),
                Direction::Out => Binding::Uninitialized,
            };
            if matches!(param.direction, Direction::Out | Direction::InOut) {
                copy_out.push(Statement::Assign {
                    left:  arg.clone(),
                    right: target.clone(),
                });
            }
            bindings.push((target, binding));
        }

        next.push_namespace(action.params.iter().cloned().map(Declaration::Parameter));
        for (target, binding) in bindings {
            self.declare_variable(&target, &mut next)?;
            match binding {
                Binding::Value(value) => self.write_value(&target, &value, &mut next)?,
                Binding::Leaves(values) => {
                    let targets = Self::leaves_of(&target, &target.ty(), &next)?;
                    for (var, value) in targets.into_iter().zip(values) {
                        next.set(var, value);
                    }
                }
                Binding::Uninitialized => {}
            }
        }

        let mut commands = vec![Command::Statement(Node::Statement(Statement::Block(action.body.clone())))];
        commands.extend(copy_out.into_iter().map(|s| Command::Statement(Node::Statement(s))));
        next.replace_top_body(commands)?;
        next.add_trace_event(TraceEvent::Invocation {
            name: action.name.clone(),
        });
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Gets the leaves of the storage referenced by `reference`, followed by
    /// the validity variables of the headers it contains.
    fn leaves_of(reference: &Expression, ty: &Type, state: &ExecutionState) -> Result<Vec<StateVariable>, Error> {
        let mut validity = Vec::new();
        let mut leaves = state.get_flat_fields(reference, ty, Some(&mut validity))?;
        leaves.extend(validity);
        Ok(leaves)
    }

    /// Reads the current value of every variable [`Self::leaves_of`] gets for
    /// `reference`.
    fn read_leaves(reference: &Expression, ty: &Type, state: &ExecutionState) -> Result<Vec<Expression>, Error> {
        Self::leaves_of(reference, ty, state)?
            .iter()
            .map(|var| state.get(var).cloned())
            .collect()
    }
}

/// How a parameter is initialised when an action is invoked.
enum Binding {
    Value(Expression),
    Leaves(Vec<Expression>),
    Uninitialized,
}
