//! This module contains the forkable interpreter state that the stepper
//! mutates, and the [`Branch`]es that stepping produces.

pub mod continuation;
pub mod env;
pub mod namespace;
pub mod trace;

use std::{collections::BTreeMap, mem, rc::Rc};

use crate::{
    constant::IN_UNDEFINED_STATE_PROPERTY,
    error::execution::Error,
    ir::{Declaration, Expression, Node, Program, Type},
    state::{
        continuation::{
            Body,
            Command,
            Continuation,
            ContinuationParameter,
            ExceptionHandlers,
            ExceptionKind,
            PropertyValue,
            StackFrame,
        },
        env::{StateVariable, SymbolicEnv},
        namespace::NamespaceContext,
        trace::TraceEvent,
    },
};

/// The full state of the interpreter along one execution path.
///
/// # Forking
///
/// Cloning produces a state that shares no mutable substructure with the
/// original. Scopes are shared through reference counting but are immutable,
/// so mutation of either state is never observable in the other.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionState {
    /// The commands still to execute in the active frame.
    body: Body,

    /// The continuation stack, most recent frame last.
    stack: Vec<StackFrame>,

    /// The symbolic values of every live storage cell.
    env: SymbolicEnv,

    /// The active scopes and the fresh name generator.
    namespace: NamespaceContext,

    /// The conditions collected along the path, in the order they were met.
    path_constraints: Vec<Expression>,

    /// The ambient interpreter properties.
    properties: BTreeMap<String, PropertyValue>,

    /// The provenance log of the path.
    trace: Vec<TraceEvent>,

    /// The number of steps taken along the path to reach this state.
    step_count: u64,

    /// The exception that ended the path without being caught, if any.
    uncaught_exception: Option<ExceptionKind>,
}

impl ExecutionState {
    /// Constructs a new state that will execute `body`.
    #[must_use]
    pub fn new(body: Body) -> Self {
        Self {
            body,
            stack: Vec::new(),
            env: SymbolicEnv::new(),
            namespace: NamespaceContext::default(),
            path_constraints: Vec::new(),
            properties: BTreeMap::new(),
            trace: Vec::new(),
            step_count: 0,
            uncaught_exception: None,
        }
    }

    /// Constructs the initial state for executing `program` from its entry
    /// point.
    #[must_use]
    pub fn at_entry(program: Rc<Program>) -> Self {
        Self::new(Body::from(vec![Command::Statement(Node::Program(program))]))
    }

    /// Gets the commands still to execute in the active frame.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Gets the next command to execute.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body is empty.
    pub fn next_command(&self) -> Result<&Command, Error> {
        self.body.next()
    }

    /// Replaces the whole body with `body`.
    pub fn replace_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Takes the whole body, leaving it empty.
    pub fn take_body(&mut self) -> Body {
        mem::take(&mut self.body)
    }

    /// Replaces the command at the front of the body with `commands`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body is empty.
    pub fn replace_top_body(
        &mut self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Result<(), Error> {
        self.body.replace_top(commands)
    }

    /// Removes the command at the front of the body.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body is empty.
    pub fn pop_body(&mut self) -> Result<Command, Error> {
        self.body.pop()
    }

    /// Gets the number of frames on the continuation stack.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Gets the most recently pushed frame.
    #[must_use]
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.stack.last()
    }

    /// Pushes `frame` onto the continuation stack.
    pub fn push_continuation(&mut self, frame: StackFrame) {
        self.stack.push(frame);
    }

    /// Suspends the current body into a new frame that installs `handlers`,
    /// leaving the body empty.
    ///
    /// If `parameter_type` is provided the continuation binds a fresh
    /// parameter of that type, which is returned.
    pub fn push_current_continuation(
        &mut self,
        parameter_type: Option<Type>,
        handlers: ExceptionHandlers,
    ) -> Option<ContinuationParameter> {
        let parameter =
            parameter_type.map(|ty| Continuation::gen_parameter(ty, "", &mut self.namespace));
        let body = mem::take(&mut self.body);
        let frame = StackFrame::with_handlers(
            Continuation::new(parameter.clone(), body),
            handlers,
            self.namespace.scopes().clone(),
        );
        self.stack.push(frame);
        parameter
    }

    /// Discards the active frame and resumes its continuation, optionally with
    /// a produced `value`.
    ///
    /// The scopes that were active when the frame was created are restored.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty or `value` does not match the
    /// continuation's parameter.
    pub fn pop_continuation(&mut self, value: Option<&Expression>) -> Result<(), Error> {
        let frame = self.stack.pop().ok_or(Error::EmptyContinuationStack)?;
        self.body = frame.continuation.apply(value)?;
        self.namespace.restore(frame.namespace);
        Ok(())
    }

    /// Unwinds the continuation stack to the innermost frame that handles
    /// `kind`.
    ///
    /// When such a frame is found, the body becomes the handler's body followed
    /// by the frame's own continuation, and `true` is returned. Otherwise the
    /// state becomes terminal with `kind` recorded as its uncaught exception,
    /// and `false` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the catching frame's continuation expects a value.
    pub fn handle_exception(&mut self, kind: ExceptionKind) -> Result<bool, Error> {
        while let Some(frame) = self.stack.pop() {
            if let Some(handler) = frame.handlers.get(&kind) {
                let mut body = handler.apply(None)?;
                body.extend(frame.continuation.apply(None)?);
                self.body = body;
                self.namespace.restore(frame.namespace);
                return Ok(true);
            }
        }
        self.body.clear();
        self.uncaught_exception = Some(kind);
        Ok(false)
    }

    /// Checks if the path has finished: there is nothing left to execute and
    /// nothing left to resume.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.body.is_empty() && self.stack.is_empty()
    }

    /// Gets the exception that ended the path without being caught, if any.
    #[must_use]
    pub fn uncaught_exception(&self) -> Option<ExceptionKind> {
        self.uncaught_exception
    }

    /// Stores `value` in the storage cell `var`.
    pub fn set(&mut self, var: StateVariable, value: Expression) {
        self.env.set(var, value);
    }

    /// Reads the value in the storage cell `var`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the cell was never written.
    pub fn get(&self, var: &StateVariable) -> Result<&Expression, Error> {
        self.env.get(var)
    }

    /// Checks if the storage cell `var` has been written.
    #[must_use]
    pub fn exists(&self, var: &StateVariable) -> bool {
        self.env.exists(var)
    }

    /// Gets the symbolic environment.
    #[must_use]
    pub fn env(&self) -> &SymbolicEnv {
        &self.env
    }

    /// Converts the storage reference `expr` into the state variable it
    /// denotes.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `expr` is not a storage reference, or if its type
    /// cannot be resolved.
    pub fn to_state_variable(&self, expr: &Expression) -> Result<StateVariable, Error> {
        match expr {
            Expression::Path { name, ty } => {
                Ok(StateVariable::new(name.clone(), self.resolve_type(ty)?))
            }
            Expression::Member { base, field, ty } => {
                Ok(self.to_state_variable(base)?.field(field.clone(), self.resolve_type(ty)?))
            }
            Expression::ArrayIndex { base, index, ty } => {
                Ok(self.to_state_variable(base)?.element(*index, self.resolve_type(ty)?))
            }
            _ => Err(Error::NotAReference {
                expr: expr.to_string(),
            }),
        }
    }

    /// Expands the structured reference `root` of type `ty` into its scalar
    /// leaves.
    ///
    /// Leaves are produced depth-first in field declaration order, with arrays
    /// expanded element by element. When `validity` is provided, the validity
    /// variable of every header met along the way is appended to it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `root` is not a storage reference or a type cannot be
    /// resolved.
    pub fn get_flat_fields(
        &self,
        root: &Expression,
        ty: &Type,
        validity: Option<&mut Vec<StateVariable>>,
    ) -> Result<Vec<StateVariable>, Error> {
        let root = self.to_state_variable(root)?;
        self.flatten_variable(&root, ty, validity)
    }

    /// Expands the state variable `root` of type `ty` into its scalar leaves.
    ///
    /// See [`Self::get_flat_fields`].
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a type cannot be resolved.
    pub fn flatten_variable(
        &self,
        root: &StateVariable,
        ty: &Type,
        mut validity: Option<&mut Vec<StateVariable>>,
    ) -> Result<Vec<StateVariable>, Error> {
        let ty = self.resolve_type(ty)?;
        let mut leaves = Vec::new();
        match &ty {
            Type::Header(composite) => {
                if let Some(out) = validity.as_deref_mut() {
                    out.push(root.validity());
                }
                for field in &composite.fields {
                    let var = root.field(field.name.clone(), field.ty.clone());
                    leaves.extend(self.flatten_variable(&var, &field.ty, validity.as_deref_mut())?);
                }
            }
            Type::Struct(composite) | Type::HeaderUnion(composite) => {
                for field in &composite.fields {
                    let var = root.field(field.name.clone(), field.ty.clone());
                    leaves.extend(self.flatten_variable(&var, &field.ty, validity.as_deref_mut())?);
                }
            }
            Type::Stack { element, size } => {
                for i in 0..*size {
                    let var = root.element(i, element.as_ref().clone());
                    leaves.extend(self.flatten_variable(&var, element, validity.as_deref_mut())?);
                }
            }
            _ => leaves.push(root.with_type(ty.clone())),
        }
        Ok(leaves)
    }

    /// Reads the value of the storage cell `var` of type `ty`.
    ///
    /// Structured values are read as aggregate literals of their fields.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any leaf was never written or a type cannot be
    /// resolved.
    pub fn read_variable(&self, var: &StateVariable, ty: &Type) -> Result<Expression, Error> {
        let ty = self.resolve_type(ty)?;
        match &ty {
            Type::Struct(composite) | Type::Header(composite) | Type::HeaderUnion(composite) => {
                let components = composite
                    .fields
                    .iter()
                    .map(|f| self.read_variable(&var.field(f.name.clone(), f.ty.clone()), &f.ty))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expression::aggregate(components, ty.clone()))
            }
            Type::Stack { element, size } => {
                let components = (0..*size)
                    .map(|i| self.read_variable(&var.element(i, element.as_ref().clone()), element))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expression::aggregate(components, ty.clone()))
            }
            _ => Ok(self.get(var)?.clone()),
        }
    }

    /// Reads the value denoted by the storage reference `expr`.
    ///
    /// References to constants read the constant's value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `expr` is not a reference or refers to unset storage.
    pub fn read_reference(&self, expr: &Expression) -> Result<Expression, Error> {
        if let Expression::Path { name, .. } = expr {
            if let Some(Declaration::Constant { value, .. }) = self.find_decl(name) {
                return Ok(value.clone());
            }
        }
        let var = self.to_state_variable(expr)?;
        self.read_variable(&var, &expr.ty())
    }

    /// Replaces every storage reference in `expr` with its current value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any referenced storage is unset.
    pub fn substitute(&self, expr: &Expression) -> Result<Expression, Error> {
        let mut failure = None;
        let substituted = expr.transform(&mut |e| {
            if failure.is_some() || !e.is_reference() {
                return None;
            }
            match self.read_reference(e) {
                Ok(value) => Some(value),
                Err(err) => {
                    failure = Some(err);
                    Some(e.clone())
                }
            }
        });
        failure.map_or(Ok(substituted), Err)
    }

    /// Pushes a scope containing `declarations`.
    pub fn push_namespace(&mut self, declarations: impl IntoIterator<Item = Declaration>) {
        self.namespace.push(declarations);
    }

    /// Pops the innermost scope.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there is no scope to pop.
    pub fn pop_namespace(&mut self) -> Result<(), Error> {
        self.namespace.pop()
    }

    /// Gets the namespace context.
    #[must_use]
    pub fn namespace(&self) -> &NamespaceContext {
        &self.namespace
    }

    /// Gets the declaration called `name` in the active scopes.
    #[must_use]
    pub fn find_decl(&self, name: &str) -> Option<&Declaration> {
        self.namespace.find_decl(name)
    }

    /// Resolves named types in the active scopes.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a named type is not declared.
    pub fn resolve_type(&self, ty: &Type) -> Result<Type, Error> {
        self.namespace.resolve_type(ty)
    }

    /// Generates a fresh continuation parameter of type `ty`.
    pub fn gen_parameter(&mut self, ty: Type, hint: &str) -> ContinuationParameter {
        Continuation::gen_parameter(ty, hint, &mut self.namespace)
    }

    /// Adds `constraint` to the path constraints.
    pub fn add_path_constraint(&mut self, constraint: Expression) {
        self.path_constraints.push(constraint);
    }

    /// Gets the path constraints in the order they were collected.
    #[must_use]
    pub fn path_constraints(&self) -> &[Expression] {
        &self.path_constraints
    }

    /// Sets the ambient property `name` to `value`.
    pub fn set_property(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.insert(name.into(), value);
    }

    /// Gets the value of the ambient property `name`, if it has been set.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.properties.get(name).copied()
    }

    /// Checks if the interpreter is executing code whose control flow it
    /// could not decide.
    #[must_use]
    pub fn in_undefined_state(&self) -> bool {
        self.property(IN_UNDEFINED_STATE_PROPERTY)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false)
    }

    /// Appends `event` to the trace.
    pub fn add_trace_event(&mut self, event: TraceEvent) {
        self.trace.push(event);
    }

    /// Gets the trace of the path.
    #[must_use]
    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// Gets the number of steps taken along the path to reach this state.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }
}

/// One outcome of stepping a single command.
#[derive(Clone, Debug)]
pub struct Branch {
    /// The condition under which this outcome happens, [`None`] if it always
    /// does.
    pub constraint: Option<Expression>,

    /// The state that was stepped.
    pub prev_state: Rc<ExecutionState>,

    /// The state after the step.
    pub next_state: ExecutionState,
}

impl Branch {
    /// Constructs a branch from `prev_state` to `next_state` guarded by
    /// `constraint`.
    ///
    /// The constraint is added to the path constraints of the next state, and
    /// the next state is counted as one step further along the path.
    #[must_use]
    pub fn new(
        constraint: Option<Expression>,
        prev_state: &Rc<ExecutionState>,
        mut next_state: ExecutionState,
    ) -> Self {
        next_state.step_count = prev_state.step_count + 1;
        if let Some(constraint) = &constraint {
            next_state.add_path_constraint(constraint.clone());
        }
        Self {
            constraint,
            prev_state: prev_state.clone(),
            next_state,
        }
    }

    /// Constructs an unguarded branch.
    #[must_use]
    pub fn unconditional(prev_state: &Rc<ExecutionState>, next_state: ExecutionState) -> Self {
        Self::new(None, prev_state, next_state)
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        ir::{Declaration, Expression, Field, Node, Statement, Type},
        state::{
            continuation::{Body, Command, Continuation, ExceptionHandlers, ExceptionKind},
            env::StateVariable,
            trace::TraceEvent,
            Branch,
            ExecutionState,
        },
    };

    fn headers_type() -> Type {
        let eth = Type::header(
            "ethernet_t",
            vec![Field::new("dst", Type::bits(48)), Field::new("ether_type", Type::bits(16))],
        );
        let vlan = Type::header("vlan_t", vec![Field::new("vid", Type::bits(12))]);
        Type::structure(
            "headers_t",
            vec![Field::new("eth", eth), Field::new("vlans", Type::stack(vlan, 2))],
        )
    }

    fn statement(s: Statement) -> Command {
        Command::Statement(Node::Statement(s))
    }

    #[test]
    fn flat_fields_are_depth_first_in_declaration_order() -> anyhow::Result<()> {
        let state = ExecutionState::new(Body::new());
        let root = Expression::path("hdr", headers_type());
        let mut validity = Vec::new();
        let fields = state.get_flat_fields(&root, &root.ty(), Some(&mut validity))?;

        let rendered: Vec<String> = fields.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["hdr.eth.dst", "hdr.eth.ether_type", "hdr.vlans[0].vid", "hdr.vlans[1].vid"]
        );
        let rendered: Vec<String> = validity.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["hdr.eth.*valid", "hdr.vlans[0].*valid", "hdr.vlans[1].*valid"]
        );
        assert_eq!(fields[3].ty(), &Type::bits(12));

        Ok(())
    }

    #[test]
    fn clones_are_isolated() -> anyhow::Result<()> {
        let mut original = ExecutionState::new(Body::from(vec![statement(Statement::Exit)]));
        original.push_namespace(vec![Declaration::variable("x", Type::bits(8))]);
        let x = StateVariable::new("x", Type::bits(8));
        original.set(x.clone(), Expression::bits(1, 8));
        let snapshot = original.clone();

        let mut forked = original.clone();
        forked.set(x.clone(), Expression::bits(2, 8));
        forked.add_path_constraint(Expression::bool(false));
        forked.add_trace_event(TraceEvent::generic("forked"));
        forked.push_namespace(vec![Declaration::variable("y", Type::Bool)]);
        forked.pop_namespace()?;
        forked.pop_namespace()?;
        forked.push_current_continuation(Some(Type::Bool), ExceptionHandlers::new());
        forked.replace_body(Body::from(vec![statement(Statement::Empty)]));

        assert_eq!(original, snapshot);
        assert_eq!(original.get(&x)?, &Expression::bits(1, 8));
        assert!(original.find_decl("x").is_some());
        assert_eq!(original.stack_depth(), 0);

        Ok(())
    }

    #[test]
    fn can_suspend_and_resume_with_a_value() -> anyhow::Result<()> {
        let mut state = ExecutionState::new(Body::new());
        let param = state.push_current_continuation(Some(Type::bits(8)), ExceptionHandlers::new());
        let Some(param) = param else {
            anyhow::bail!("no parameter was generated")
        };
        assert_eq!(state.stack_depth(), 1);

        // Rebuild the suspended frame so its body uses the parameter.
        let mut frame = state.stack.pop().ok_or_else(|| anyhow::anyhow!("empty stack"))?;
        frame.continuation = Continuation::new(
            Some(param.clone()),
            Body::from(vec![Command::Return(Some(param.as_expression()))]),
        );
        state.push_continuation(frame);

        state.pop_continuation(Some(&Expression::bits(9, 8)))?;
        assert_eq!(state.next_command()?, &Command::Return(Some(Expression::bits(9, 8))));
        assert!(state.pop_continuation(None).is_err());

        Ok(())
    }

    #[test]
    fn caught_exceptions_resume_after_the_catching_frame() -> anyhow::Result<()> {
        let mut state = ExecutionState::new(Body::from(vec![statement(Statement::Empty)]));

        // The outermost frame catches everything but resumes nothing.
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(ExceptionKind::Exit, Continuation::default());
        state.push_current_continuation(None, handlers.clone());

        // The inner frame resumes the rest of the pipeline.
        state.replace_body(Body::from(vec![statement(Statement::Exit)]));
        state.push_current_continuation(None, handlers);
        state.replace_body(Body::from(vec![Command::Exception(ExceptionKind::Exit)]));

        assert!(state.handle_exception(ExceptionKind::Exit)?);
        assert_eq!(state.stack_depth(), 1);
        assert_eq!(state.next_command()?, &statement(Statement::Exit));

        assert!(state.handle_exception(ExceptionKind::Exit)?);
        assert_eq!(state.next_command()?, &statement(Statement::Empty));
        assert_eq!(state.stack_depth(), 0);

        assert!(!state.handle_exception(ExceptionKind::Reject)?);
        assert!(state.is_terminal());
        assert_eq!(state.uncaught_exception(), Some(ExceptionKind::Reject));

        Ok(())
    }

    #[test]
    fn branches_record_their_constraint_and_count_steps() {
        let prev = Rc::new(ExecutionState::new(Body::new()));
        let cond = Expression::symbolic("c", Type::Bool);
        let branch = Branch::new(Some(cond.clone()), &prev, (*prev).clone());

        assert_eq!(branch.next_state.path_constraints(), &[cond]);
        assert_eq!(branch.next_state.step_count(), 1);
        assert!(prev.path_constraints().is_empty());
    }

    #[test]
    fn structured_reads_build_aggregates() -> anyhow::Result<()> {
        let mut state = ExecutionState::new(Body::new());
        let root = Expression::path("hdr", headers_type());
        for (i, var) in state.get_flat_fields(&root, &root.ty(), None)?.into_iter().enumerate() {
            let width = var.ty().width().unwrap_or(1);
            state.set(var, Expression::bits(i as u128, width));
        }

        let value = state.read_reference(&root)?;
        assert!(value.is_symbolic_value());
        assert_eq!(
            value.flatten_components(),
            vec![
                Expression::bits(0, 48),
                Expression::bits(1, 16),
                Expression::bits(2, 12),
                Expression::bits(3, 12),
            ]
        );

        Ok(())
    }
}
