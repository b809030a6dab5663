//! This module contains the vocabulary of executable units: [`Command`]s, the
//! [`Body`] sequences they live in, and the [`Continuation`]s that resume a
//! suspended computation.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};

use crate::{
    constant::CONTINUATION_PARAMETER_PREFIX,
    error::execution::Error,
    ir::{Expression, Node, Type},
    state::{
        namespace::{NamespaceContext, ScopeChain},
        trace::TraceEvent,
    },
};

/// The exceptions of the interpreted language.
///
/// These are ordinary control flow, not errors. They unwind the continuation
/// stack until a frame with a handler for them is found.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum ExceptionKind {
    Exit,
    NoMatch,
    Reject,
    Drop,
    PacketTooShort,
    Abort,
}

impl Display for ExceptionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Exit => "Exit",
            Self::NoMatch => "NoMatch",
            Self::Reject => "Reject",
            Self::Drop => "Drop",
            Self::PacketTooShort => "PacketTooShort",
            Self::Abort => "Abort",
        };
        write!(f, "{name}")
    }
}

/// The value of an ambient interpreter property.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    UInt(u64),
}

impl PropertyValue {
    /// Gets the value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(b),
            Self::UInt(_) => None,
        }
    }
}

/// A single executable unit of a continuation body.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Command {
    /// A program node to step.
    Statement(Node),

    /// A provenance annotation appended to the trace when reached.
    TraceEvent(TraceEvent),

    /// Invoke the topmost continuation, optionally with a produced value.
    ///
    /// If the value is not yet a symbolic value, it is stepped first.
    Return(Option<Expression>),

    /// Raise an exception of the interpreted language.
    Exception(ExceptionKind),

    /// Set an ambient interpreter property.
    PropertyUpdate { name: String, value: PropertyValue },

    /// Assert that `condition` holds on the current path.
    Guard(Expression),
}

impl Command {
    /// Rebuilds the command with `rewrite` applied to every expression it
    /// contains.
    #[must_use]
    pub fn transform(&self, rewrite: &mut impl FnMut(&Expression) -> Option<Expression>) -> Self {
        match self {
            Self::Statement(node) => Self::Statement(node.transform(rewrite)),
            Self::Return(value) => Self::Return(value.as_ref().map(|v| v.transform(rewrite))),
            Self::Guard(condition) => Self::Guard(condition.transform(rewrite)),
            Self::TraceEvent(_) | Self::Exception(_) | Self::PropertyUpdate { .. } => self.clone(),
        }
    }

    /// Checks if the command refers to the path called `name` anywhere.
    #[must_use]
    pub fn mentions_path(&self, name: &str) -> bool {
        let mut found = false;
        let _ = self.transform(&mut |e| {
            if e.mentions_path(name) {
                found = true;
            }
            Some(e.clone())
        });
        found
    }
}

impl From<Node> for Command {
    fn from(value: Node) -> Self {
        Self::Statement(value)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Statement(node) => write!(f, "{node}"),
            Self::TraceEvent(event) => write!(f, "trace: {event}"),
            Self::Return(Some(value)) => write!(f, "return {value}"),
            Self::Return(None) => write!(f, "return"),
            Self::Exception(kind) => write!(f, "raise {kind}"),
            Self::PropertyUpdate { name, value } => write!(f, "set {name} = {value:?}"),
            Self::Guard(condition) => write!(f, "guard {condition}"),
        }
    }
}

/// An ordered, double-ended sequence of commands.
///
/// The front of the body is the next command to execute.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Body {
    commands: VecDeque<Command>,
}

impl Body {
    /// Creates a new, empty, body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the next command in the body.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body is empty.
    pub fn next(&self) -> Result<&Command, Error> {
        self.commands.front().ok_or(Error::EmptyBody)
    }

    /// Pushes `command` onto the front of the body.
    pub fn push(&mut self, command: Command) {
        self.commands.push_front(command);
    }

    /// Pops the command from the front of the body.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body is empty.
    pub fn pop(&mut self) -> Result<Command, Error> {
        self.commands.pop_front().ok_or(Error::EmptyBody)
    }

    /// Appends `command` to the back of the body.
    pub fn push_back(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    /// Replaces the command at the front of the body with `commands`, keeping
    /// their order.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the body is empty.
    pub fn replace_top(&mut self, commands: impl IntoIterator<Item = Command>) -> Result<(), Error> {
        self.pop()?;
        let commands: Vec<Command> = commands.into_iter().collect();
        commands.into_iter().rev().for_each(|c| self.push(c));
        Ok(())
    }

    /// Removes every command from the body.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Checks if the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Gets the number of commands in the body.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Iterates over the commands from front to back.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Appends every command of `other` after the commands of `self`.
    pub fn extend(&mut self, other: Body) {
        self.commands.extend(other.commands);
    }
}

impl From<Vec<Command>> for Body {
    fn from(value: Vec<Command>) -> Self {
        Self {
            commands: value.into(),
        }
    }
}

impl FromIterator<Command> for Body {
    fn from_iter<T: IntoIterator<Item = Command>>(iter: T) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

/// The parameter that a continuation binds when it is resumed with a value.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ContinuationParameter {
    pub name: String,
    pub ty:   Type,
}

impl ContinuationParameter {
    /// Gets the expression that stands for the parameter inside the
    /// continuation body.
    #[must_use]
    pub fn as_expression(&self) -> Expression {
        Expression::path(self.name.clone(), self.ty.clone())
    }
}

/// A suspended computation: an optional parameter plus the body to resume.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Continuation {
    parameter: Option<ContinuationParameter>,
    body:      Body,
}

impl Continuation {
    /// Constructs a continuation that binds `parameter` in `body`.
    #[must_use]
    pub fn new(parameter: Option<ContinuationParameter>, body: Body) -> Self {
        Self { parameter, body }
    }

    /// Constructs a continuation without a parameter.
    #[must_use]
    pub fn from_body(body: Body) -> Self {
        Self::new(None, body)
    }

    /// Generates a fresh parameter of type `ty`.
    ///
    /// The name is unique within `namespace`, whose counter is advanced.
    #[must_use]
    pub fn gen_parameter(ty: Type, hint: &str, namespace: &mut NamespaceContext) -> ContinuationParameter {
        let name = namespace.fresh_name(&format!("{CONTINUATION_PARAMETER_PREFIX}{hint}"));
        ContinuationParameter { name, ty }
    }

    /// Gets the parameter bound by this continuation, if any.
    #[must_use]
    pub fn parameter(&self) -> Option<&ContinuationParameter> {
        self.parameter.as_ref()
    }

    /// Gets the unapplied body of the continuation.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Produces the body of the continuation with its parameter bound to
    /// `value`.
    ///
    /// The continuation itself is left untouched, so it can be applied again
    /// in other forked states.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a value is supplied to a continuation without a
    /// parameter, or if no value is supplied to one with a parameter.
    pub fn apply(&self, value: Option<&Expression>) -> Result<Body, Error> {
        match (&self.parameter, value) {
            (None, None) => Ok(self.body.clone()),
            (Some(parameter), Some(value)) => Ok(self
                .body
                .iter()
                .map(|c| {
                    c.transform(&mut |e| match e {
                        Expression::Path { name, .. } if *name == parameter.name => {
                            Some(value.clone())
                        }
                        _ => None,
                    })
                })
                .collect()),
            (declared, supplied) => Err(Error::ContinuationArity {
                declared: declared.is_some(),
                supplied: supplied.is_some(),
            }),
        }
    }
}

/// The handlers installed by a frame, keyed by the exception they catch.
pub type ExceptionHandlers = BTreeMap<ExceptionKind, Continuation>;

/// A frame of the continuation stack.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackFrame {
    /// The continuation resumed when the frame is popped normally.
    pub continuation: Continuation,

    /// The handlers for exceptions raised while this frame is active.
    pub handlers: ExceptionHandlers,

    /// The scopes that were active when the frame was created.
    pub namespace: ScopeChain,
}

impl StackFrame {
    /// Constructs a frame without exception handlers.
    #[must_use]
    pub fn new(continuation: Continuation, namespace: ScopeChain) -> Self {
        Self::with_handlers(continuation, ExceptionHandlers::new(), namespace)
    }

    /// Constructs a frame with the provided exception `handlers`.
    #[must_use]
    pub fn with_handlers(
        continuation: Continuation,
        handlers: ExceptionHandlers,
        namespace: ScopeChain,
    ) -> Self {
        Self {
            continuation,
            handlers,
            namespace,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::execution::Error,
        ir::{BinaryOp, Expression, Node, Statement, Type},
        state::{
            continuation::{Body, Command, Continuation},
            namespace::NamespaceContext,
        },
    };

    #[test]
    fn next_on_empty_body_is_an_error() {
        let body = Body::new();
        assert_eq!(body.next(), Err(Error::EmptyBody));
    }

    #[test]
    fn can_replace_the_top_of_a_body() -> anyhow::Result<()> {
        let mut body = Body::from(vec![Command::Return(None), Command::Guard(Expression::bool(true))]);
        body.replace_top(vec![
            Command::Statement(Node::Statement(Statement::Exit)),
            Command::Statement(Node::Statement(Statement::Empty)),
        ])?;

        assert_eq!(body.len(), 3);
        assert_eq!(body.next()?, &Command::Statement(Node::Statement(Statement::Exit)));

        Ok(())
    }

    #[test]
    fn applying_a_continuation_binds_its_parameter() -> anyhow::Result<()> {
        let mut namespace = NamespaceContext::default();
        let param = Continuation::gen_parameter(Type::bits(8), "v", &mut namespace);
        let body = Body::from(vec![
            Command::Statement(Node::Statement(Statement::Assign {
                left:  Expression::path("x", Type::bits(8)),
                right: Expression::binary(
                    BinaryOp::Add,
                    param.as_expression(),
                    param.as_expression(),
                ),
            })),
            Command::Guard(Expression::eq(param.as_expression(), Expression::bits(1, 8))),
        ]);
        let k = Continuation::new(Some(param.clone()), body);

        let applied = k.apply(Some(&Expression::bits(3, 8)))?;
        assert!(applied.iter().all(|c| !c.mentions_path(&param.name)));

        // The continuation is unchanged and can be applied again.
        assert!(k.body().iter().any(|c| c.mentions_path(&param.name)));
        let again = k.apply(Some(&Expression::bits(4, 8)))?;
        assert_ne!(applied, again);

        Ok(())
    }

    #[test]
    fn arity_is_checked() {
        let k = Continuation::from_body(Body::new());
        assert!(matches!(
            k.apply(Some(&Expression::bool(true))),
            Err(Error::ContinuationArity { declared: false, supplied: true })
        ));

        let mut namespace = NamespaceContext::default();
        let param = Continuation::gen_parameter(Type::Bool, "v", &mut namespace);
        let k = Continuation::new(Some(param), Body::new());
        assert!(k.apply(None).is_err());
    }

    #[test]
    fn generated_parameters_are_fresh() {
        let mut namespace = NamespaceContext::default();
        let a = Continuation::gen_parameter(Type::Bool, "v", &mut namespace);
        let b = Continuation::gen_parameter(Type::Bool, "v", &mut namespace);
        assert_ne!(a.name, b.name);
    }
}
