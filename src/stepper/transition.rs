//! This module contains the transition helpers that every rule of the stepper
//! builds on.

use std::rc::Rc;

use ethnum::U256;
use log::debug;

use crate::{
    error::execution::Error,
    ir::{fold::simplify, Expression, Type},
    state::{
        continuation::{Body, Command, Continuation, ExceptionKind, StackFrame},
        Branch,
        ExecutionState,
    },
    stepper::{StepResult, Stepper},
};

impl<'a> Stepper<'a> {
    /// Produces `value` for the top continuation of `state`.
    ///
    /// `value` must already be a symbolic value. The step never forks.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `value` is not a symbolic value, if there is no
    /// continuation to resume, or if the continuation does not bind a value.
    pub fn step_symbolic_value(
        &mut self,
        value: &Expression,
        state: &Rc<ExecutionState>,
    ) -> StepResult {
        if !value.is_symbolic_value() {
            return Err(Error::NotAValue {
                expr: value.to_string(),
            });
        }
        let mut next = (**state).clone();
        next.pop_continuation(Some(value))?;
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Replaces the next command of `state` with the raising of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body of `state` is empty.
    pub fn step_to_exception(&mut self, kind: ExceptionKind, state: &Rc<ExecutionState>) -> StepResult {
        let mut next = (**state).clone();
        next.replace_top_body([Command::Exception(kind)])?;
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Suspends the next command of `state` until `subexpr` has been reduced
    /// to a value.
    ///
    /// The rest of the body, starting with the command produced by `rebuild`,
    /// is packaged into a continuation that binds a fresh parameter standing
    /// for the value of `subexpr`. `rebuild` receives the expression for that
    /// parameter. The new body evaluates `subexpr` and returns its value to the
    /// continuation.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body of `state` is empty.
    pub fn step_to_subexpr(
        &mut self,
        subexpr: &Expression,
        state: &Rc<ExecutionState>,
        rebuild: impl FnOnce(Expression) -> Command,
    ) -> StepResult {
        let mut next = (**state).clone();
        let parameter = next.gen_parameter(subexpr.ty(), "");
        next.replace_top_body([rebuild(parameter.as_expression())])?;
        let body = next.take_body();
        let frame = StackFrame::new(
            Continuation::new(Some(parameter), body),
            next.namespace().scopes().clone(),
        );
        next.push_continuation(frame);
        next.replace_body(Body::from(vec![Command::Return(Some(subexpr.clone()))]));
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Suspends the next command of `state` until the first of `components`
    /// that is not yet a value has been reduced.
    ///
    /// `rebuild` receives the position of that component and the expression
    /// standing for its value. Returns [`None`] if every component is already a
    /// value.
    ///
    /// Each call evaluates a single component, so the components of an
    /// aggregate are found by rescanning from the start on every resumption.
    pub fn step_to_first_non_value(
        &mut self,
        components: &[Expression],
        state: &Rc<ExecutionState>,
        rebuild: impl FnOnce(usize, Expression) -> Command,
    ) -> Option<StepResult> {
        let position = components.iter().position(|c| !c.is_symbolic_value())?;
        Some(self.step_to_subexpr(&components[position], state, |v| rebuild(position, v)))
    }

    /// Reads the validity of the header or header union referenced by
    /// `header`.
    ///
    /// A union is valid when any of its members is. The result folds to a
    /// literal whenever the member validities are literals.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `header` is not a reference to a header or union, or
    /// if its validity was never set.
    pub fn get_header_validity(
        state: &ExecutionState,
        header: &Expression,
    ) -> Result<Expression, Error> {
        let ty = state.resolve_type(&header.ty())?;
        match &ty {
            Type::Header(_) => {
                let var = state.to_state_variable(header)?.validity();
                Ok(state.get(&var)?.clone())
            }
            Type::HeaderUnion(composite) => {
                let mut validity = Expression::bool(false);
                for member in &composite.fields {
                    let member = Expression::member(header.clone(), member.name.clone(), member.ty.clone());
                    let member_validity = Self::get_header_validity(state, &member)?;
                    if member_validity.as_bool() == Some(true) {
                        return Ok(member_validity);
                    }
                    validity = Expression::or(validity, member_validity);
                }
                Ok(simplify(&validity))
            }
            _ => Err(Error::TypeMismatch {
                expected: "header or header union".into(),
                found:    ty.to_string(),
            }),
        }
    }

    /// Produces the validity of the header referenced by `header`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the validity cannot be read.
    pub fn step_get_header_validity(
        &mut self,
        header: &Expression,
        state: &Rc<ExecutionState>,
    ) -> StepResult {
        let validity = Self::get_header_validity(state, header)?;
        self.step_symbolic_value(&validity, state)
    }

    /// Sets the validity of the header referenced by `header` to `valid`.
    ///
    /// Making a member of a union valid makes every other member of the union
    /// invalid. Making a header invalid taints all of its fields. Making a
    /// union invalid makes all of its members invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `header` is not a reference to a header or union.
    pub fn set_header_validity(
        &self,
        header: &Expression,
        valid: bool,
        state: &mut ExecutionState,
    ) -> Result<(), Error> {
        let ty = state.resolve_type(&header.ty())?;
        match &ty {
            Type::Header(_) => {}
            Type::HeaderUnion(composite) if !valid => {
                for member in &composite.fields {
                    let member =
                        Expression::member(header.clone(), member.name.clone(), member.ty.clone());
                    self.set_header_validity(&member, false, state)?;
                }
                return Ok(());
            }
            _ => {
                return Err(Error::TypeMismatch {
                    expected: "header".into(),
                    found:    ty.to_string(),
                })
            }
        }

        let var = state.to_state_variable(header)?;
        state.set(var.validity(), Expression::bool(valid));

        if !valid {
            for field in state.get_flat_fields(header, &ty, None)? {
                let value = self.program.create_target_uninitialized(field.ty(), true);
                state.set(field, value);
            }
            return Ok(());
        }

        if let Expression::Member { base, field, .. } = header {
            if let Type::HeaderUnion(union) = state.resolve_type(&base.ty())? {
                for sibling in union.fields.iter().filter(|m| m.name != *field) {
                    let sibling =
                        Expression::member(base.as_ref().clone(), sibling.name.clone(), sibling.ty.clone());
                    self.set_header_validity(&sibling, false, state)?;
                }
            }
        }
        Ok(())
    }

    /// Steps `push_front` (when `is_push`) or `pop_front` on the header stack
    /// referenced by `stack`, shifting by the constant count in `args`.
    ///
    /// An element whose source lies outside the stack becomes invalid. An
    /// element whose source is known to be invalid becomes invalid without its
    /// fields being copied.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `stack` is not a header stack, if the count is not a
    /// constant, or if any element validity is unset.
    pub fn step_stack_push_pop_front(
        &mut self,
        stack: &Expression,
        args: &[Expression],
        is_push: bool,
        state: &Rc<ExecutionState>,
    ) -> StepResult {
        let ty = state.resolve_type(&stack.ty())?;
        let Type::Stack { element, size } = &ty else {
            return Err(Error::TypeMismatch {
                expected: "header stack".into(),
                found:    ty.to_string(),
            });
        };
        let size = *size;
        let element = element.as_ref().clone();
        let count = match args.first().and_then(Expression::as_constant) {
            Some(count) if count >= U256::from(size as u64) => size,
            Some(count) => usize::try_from(count.as_u64()).unwrap_or(size),
            None => {
                return Err(Error::TypeMismatch {
                    expected: "constant shift count".into(),
                    found:    args.first().map_or_else(|| "nothing".into(), ToString::to_string),
                })
            }
        };

        let mut next = (**state).clone();
        let destinations: Vec<usize> = if is_push {
            (0..size).rev().collect()
        } else {
            (0..size).collect()
        };
        for i in destinations {
            let destination = Expression::index(stack.clone(), i, element.clone());
            let source = if is_push {
                i.checked_sub(count)
            } else {
                i.checked_add(count).filter(|j| *j < size)
            };
            let Some(source) = source else {
                self.set_header_validity(&destination, false, &mut next)?;
                continue;
            };

            let source = Expression::index(stack.clone(), source, element.clone());
            let source_validity = Self::get_header_validity(&next, &source)?;
            if source_validity.as_bool() == Some(false) {
                self.set_header_validity(&destination, false, &mut next)?;
                continue;
            }

            Self::copy_storage(&source, &destination, &element, &mut next)?;
        }

        debug!(
            "{} {stack} by {count}",
            if is_push { "push_front" } else { "pop_front" }
        );
        next.pop_continuation(None)?;
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Evaluates `expr` to a concrete literal under the path constraints of
    /// `state`, together with `extra` if provided.
    ///
    /// This is advisory: the result never changes control flow. Returns
    /// [`None`] when the constraints are not known to be satisfiable, or when
    /// the value is tainted.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `expr` refers to unset storage.
    pub fn evaluate_expression(
        &mut self,
        expr: &Expression,
        extra: Option<&Expression>,
        state: &ExecutionState,
    ) -> Result<Option<Expression>, Error> {
        let value = simplify(&state.substitute(expr)?);
        if value.is_tainted() {
            return Ok(None);
        }
        let mut constraints = state.path_constraints().to_vec();
        constraints.extend(extra.cloned());
        if self.solver.check_sat(&constraints) != Some(true) {
            return Ok(None);
        }
        let concrete = self.solver.symbolic_mapping().evaluate(&value);
        Ok(matches!(concrete, Expression::Constant { .. } | Expression::Bool(_)).then_some(concrete))
    }

    /// Copies every leaf and header validity bit of the storage referenced by
    /// `from` into the storage referenced by `to`, both of type `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if either side is not a reference or a leaf of `from`
    /// is unset.
    pub fn copy_storage(
        from: &Expression,
        to: &Expression,
        ty: &Type,
        state: &mut ExecutionState,
    ) -> Result<(), Error> {
        let mut from_validity = Vec::new();
        let mut to_validity = Vec::new();
        let sources = state.get_flat_fields(from, ty, Some(&mut from_validity))?;
        let targets = state.get_flat_fields(to, ty, Some(&mut to_validity))?;
        if sources.len() != targets.len() {
            return Err(Error::FlatFieldMismatch {
                target:        targets.len(),
                source_fields: sources.len(),
            });
        }
        for (source, target) in sources.iter().chain(&from_validity).zip(targets.into_iter().chain(to_validity)) {
            let value = state.get(source)?.clone();
            state.set(target, value);
        }
        Ok(())
    }

    /// Declares fresh storage for the reference `target`.
    ///
    /// Every leaf receives the target's uninitialized value, which is forced to
    /// taint while the interpreter is in an undefined state. Every header
    /// starts out invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `target` is not a reference or its type cannot be
    /// resolved.
    pub fn declare_variable(&self, target: &Expression, state: &mut ExecutionState) -> Result<(), Error> {
        let force_taint = state.in_undefined_state();
        let mut validity = Vec::new();
        for leaf in state.get_flat_fields(target, &target.ty(), Some(&mut validity))? {
            let value = self.program.create_target_uninitialized(leaf.ty(), force_taint);
            state.set(leaf, value);
        }
        for var in validity {
            state.set(var, Expression::bool(false));
        }
        Ok(())
    }

    /// Writes the symbolic `value` into the storage referenced by `target`.
    ///
    /// Structured targets take an aggregate value field by field, and every
    /// header they contain becomes valid. While the interpreter is in an
    /// undefined state every written leaf is tainted instead.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `target` is not a reference, or if a structured
    /// target receives a value of a different shape.
    pub fn write_value(
        &self,
        target: &Expression,
        value: &Expression,
        state: &mut ExecutionState,
    ) -> Result<(), Error> {
        let ty = state.resolve_type(&target.ty())?;
        let tainted = state.in_undefined_state();

        if !ty.is_structured() {
            let var = state.to_state_variable(target)?;
            let value = if tainted { Expression::taint(ty) } else { value.clone() };
            state.set(var, value);
            return Ok(());
        }

        let sources = match value {
            Expression::Aggregate { .. } => value.flatten_components(),
            _ => {
                return Err(Error::TypeMismatch {
                    expected: format!("aggregate value of type {ty}"),
                    found:    value.to_string(),
                })
            }
        };
        let mut validity = Vec::new();
        let targets = state.get_flat_fields(target, &ty, Some(&mut validity))?;
        if targets.len() != sources.len() {
            return Err(Error::FlatFieldMismatch {
                target:        targets.len(),
                source_fields: sources.len(),
            });
        }
        for (leaf, source) in targets.into_iter().zip(sources) {
            let value = if tainted { Expression::taint(leaf.ty().clone()) } else { source };
            state.set(leaf, value);
        }
        for var in validity {
            state.set(var, Expression::bool(true));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        evaluator::Config,
        ir::{BinaryOp, Expression, Field, Node, Statement, Type},
        solver::Model,
        state::{
            continuation::{Body, Command},
            env::StateVariable,
            trace::TraceEvent,
            ExecutionState,
        },
        stepper::Stepper,
        test_util::{with_stepper, TestSolver, TestTarget},
    };

    fn header_a() -> Type {
        Type::header("a_t", vec![Field::new("x", Type::bits(8))])
    }

    fn header_b() -> Type {
        Type::header("b_t", vec![Field::new("y", Type::bits(16))])
    }

    fn union_ref() -> Expression {
        let ty = Type::header_union("u_t", vec![Field::new("a", header_a()), Field::new("b", header_b())]);
        Expression::path("u", ty)
    }

    #[test]
    fn making_a_union_member_valid_invalidates_the_others() -> anyhow::Result<()> {
        with_stepper(&TestTarget::default(), |stepper| {
            let u = union_ref();
            let a = Expression::member(u.clone(), "a", header_a());
            let b = Expression::member(u.clone(), "b", header_b());

            let mut state = ExecutionState::new(Body::new());
            stepper.declare_variable(&u, &mut state)?;
            assert_eq!(Stepper::get_header_validity(&state, &u)?, Expression::bool(false));

            stepper.set_header_validity(&b, true, &mut state)?;
            stepper.set_header_validity(&a, true, &mut state)?;

            assert_eq!(Stepper::get_header_validity(&state, &a)?, Expression::bool(true));
            assert_eq!(Stepper::get_header_validity(&state, &b)?, Expression::bool(false));
            assert_eq!(Stepper::get_header_validity(&state, &u)?, Expression::bool(true));
            Ok(())
        })
    }

    #[test]
    fn invalidating_a_header_taints_its_fields() -> anyhow::Result<()> {
        with_stepper(&TestTarget::default(), |stepper| {
            let h = Expression::path("h", header_a());
            let mut state = ExecutionState::new(Body::new());
            stepper.declare_variable(&h, &mut state)?;
            stepper.write_value(
                &h,
                &Expression::aggregate(vec![Expression::bits(7, 8)], header_a()),
                &mut state,
            )?;
            assert_eq!(Stepper::get_header_validity(&state, &h)?, Expression::bool(true));

            stepper.set_header_validity(&h, false, &mut state)?;
            let x = state.read_reference(&Expression::member(h, "x", Type::bits(8)))?;
            assert!(x.is_tainted());
            Ok(())
        })
    }

    #[test]
    fn symbolic_member_validity_is_disjoined() -> anyhow::Result<()> {
        with_stepper(&TestTarget::default(), |stepper| {
            let u = union_ref();
            let mut state = ExecutionState::new(Body::new());
            stepper.declare_variable(&u, &mut state)?;
            let a_valid = state.to_state_variable(&Expression::member(u.clone(), "a", header_a()))?.validity();
            state.set(a_valid, Expression::symbolic("pa", Type::Bool));

            let validity = Stepper::get_header_validity(&state, &u)?;
            assert_eq!(validity, Expression::symbolic("pa", Type::Bool));
            Ok(())
        })
    }

    #[test]
    fn structured_writes_need_matching_shapes() -> anyhow::Result<()> {
        with_stepper(&TestTarget::default(), |stepper| {
            let h = Expression::path("h", header_b());
            let mut state = ExecutionState::new(Body::new());
            stepper.declare_variable(&h, &mut state)?;

            let wrong = Expression::aggregate(
                vec![Expression::bits(1, 16), Expression::bits(2, 16)],
                header_b(),
            );
            assert!(stepper.write_value(&h, &wrong, &mut state).is_err());
            assert!(stepper.write_value(&h, &Expression::bits(1, 16), &mut state).is_err());
            Ok(())
        })
    }

    /// A state in which `x` holds `value` under the constraint `s == 4`.
    fn state_with_x(value: Expression) -> ExecutionState {
        let mut state = ExecutionState::new(Body::new());
        state.set(StateVariable::new("x", Type::bits(8)), value);
        state.add_path_constraint(s_is(4));
        state
    }

    fn s() -> Expression {
        Expression::symbolic("s", Type::bits(8))
    }

    fn s_is(value: u128) -> Expression {
        Expression::eq(s(), Expression::bits(value, 8))
    }

    fn s_plus_one() -> Expression {
        Expression::binary(BinaryOp::Add, s(), Expression::bits(1, 8))
    }

    fn model() -> Model {
        [("s".to_string(), Expression::bits(4, 8))].into_iter().collect()
    }

    #[test]
    fn satisfiable_paths_evaluate_to_a_model_literal() -> anyhow::Result<()> {
        let target = TestTarget::default();
        let config = Config::default();
        let mut solver = TestSolver::new(Some(true), model());
        let state = state_with_x(s_plus_one());
        let x = Expression::path("x", Type::bits(8));
        let extra = Expression::not(s_is(9));

        let mut stepper = Stepper::new(&target, &mut solver, &config);
        let concrete = stepper.evaluate_expression(&x, Some(&extra), &state)?;

        assert_eq!(concrete, Some(Expression::bits(5, 8)));
        assert_eq!(solver.queries(), &[vec![s_is(4), extra]]);
        Ok(())
    }

    #[test]
    fn undecided_paths_have_no_concrete_value() -> anyhow::Result<()> {
        let target = TestTarget::default();
        let config = Config::default();
        let x = Expression::path("x", Type::bits(8));
        for answer in [Some(false), None] {
            let mut solver = TestSolver::new(answer, model());
            let state = state_with_x(s_plus_one());
            let mut stepper = Stepper::new(&target, &mut solver, &config);
            let concrete = stepper.evaluate_expression(&x, None, &state)?;

            assert_eq!(concrete, None);
            assert_eq!(solver.queries(), &[vec![s_is(4)]]);
        }
        Ok(())
    }

    #[test]
    fn tainted_values_have_no_concrete_value() -> anyhow::Result<()> {
        let target = TestTarget::default();
        let config = Config::default();
        let mut solver = TestSolver::new(Some(true), model());
        let tainted = Expression::binary(BinaryOp::Add, s(), Expression::taint(Type::bits(8)));
        let state = state_with_x(tainted);
        let x = Expression::path("x", Type::bits(8));

        let mut stepper = Stepper::new(&target, &mut solver, &config);
        let concrete = stepper.evaluate_expression(&x, None, &state)?;

        assert_eq!(concrete, None);
        assert!(solver.queries().is_empty());
        Ok(())
    }

    #[test]
    fn assignment_traces_carry_a_witness_when_asked_to() -> anyhow::Result<()> {
        let target = TestTarget::default();
        let config = Config {
            trace_concrete_values: true,
            ..Config::default()
        };
        let mut solver = TestSolver::new(Some(true), model());
        let assign = Statement::Assign {
            left:  Expression::path("y", Type::bits(8)),
            right: s_plus_one(),
        };
        let mut state = state_with_x(Expression::bits(0, 8));
        state.replace_body(Body::from(vec![Command::Statement(Node::Statement(assign))]));

        let branches = Stepper::new(&target, &mut solver, &config).step(&Rc::new(state))?;

        assert_eq!(branches.len(), 1);
        let Some(TraceEvent::Assignment { concrete, .. }) = branches[0].next_state.trace().last() else {
            anyhow::bail!("no assignment was traced")
        };
        assert_eq!(concrete.as_deref(), Some(Expression::bits(5, 8).to_string().as_str()));
        Ok(())
    }
}
