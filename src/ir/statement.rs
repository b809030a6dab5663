//! This module contains the statements of the program representation.

use std::fmt::{Display, Formatter};

use crate::ir::{
    decl::Declaration,
    expression::{Expression, MethodCall},
};

/// A statement in the program.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Statement {
    /// Assignment of `right` to the storage referenced by `left`.
    Assign { left: Expression, right: Expression },

    /// A two-armed conditional.
    If {
        condition: Expression,
        if_true:   Box<Statement>,
        if_false:  Option<Box<Statement>>,
    },

    /// A switch over a discriminant, typically `t.apply().action_run`.
    Switch { expr: Expression, cases: Vec<SwitchCase> },

    /// A block that opens its own scope.
    Block(Block),

    /// A call whose result, if any, is discarded.
    MethodCall(MethodCall),

    /// The `exit` statement.
    Exit,

    /// The `return` statement.
    Return(Option<Expression>),

    /// The empty statement.
    Empty,
}

impl Statement {
    /// Gets a short name for the kind of this statement for use in
    /// diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Assign { .. } => "AssignmentStatement",
            Self::If { .. } => "IfStatement",
            Self::Switch { .. } => "SwitchStatement",
            Self::Block(_) => "BlockStatement",
            Self::MethodCall(_) => "MethodCallStatement",
            Self::Exit => "ExitStatement",
            Self::Return(_) => "ReturnStatement",
            Self::Empty => "EmptyStatement",
        }
    }

    /// Rebuilds the statement with `rewrite` applied to every expression it
    /// contains, including those of nested statements.
    #[must_use]
    pub fn transform(&self, rewrite: &mut impl FnMut(&Expression) -> Option<Expression>) -> Self {
        match self {
            Self::Assign { left, right } => Self::Assign {
                left:  left.transform(rewrite),
                right: right.transform(rewrite),
            },
            Self::If {
                condition,
                if_true,
                if_false,
            } => Self::If {
                condition: condition.transform(rewrite),
                if_true:   Box::new(if_true.transform(rewrite)),
                if_false:  if_false.as_ref().map(|s| Box::new(s.transform(rewrite))),
            },
            Self::Switch { expr, cases } => Self::Switch {
                expr:  expr.transform(rewrite),
                cases: cases.iter().map(|c| c.transform(rewrite)).collect(),
            },
            Self::Block(block) => Self::Block(block.transform(rewrite)),
            Self::MethodCall(call) => Self::MethodCall(call.transform(rewrite)),
            Self::Return(value) => Self::Return(value.as_ref().map(|v| v.transform(rewrite))),
            Self::Exit | Self::Empty => self.clone(),
        }
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assign { left, right } => write!(f, "{left} = {right};"),
            Self::If { condition, .. } => write!(f, "if ({condition}) ..."),
            Self::Switch { expr, .. } => write!(f, "switch ({expr}) ..."),
            Self::Block(block) => write!(f, "{{ {} components }}", block.components.len()),
            Self::MethodCall(call) => write!(f, "{call};"),
            Self::Exit => write!(f, "exit;"),
            Self::Return(Some(value)) => write!(f, "return {value};"),
            Self::Return(None) => write!(f, "return;"),
            Self::Empty => write!(f, ";"),
        }
    }
}

/// A case of a switch statement.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SwitchCase {
    pub label: SwitchLabel,

    /// The body of the case, [`None`] for a case that falls through to the
    /// next one.
    pub body: Option<Statement>,
}

impl SwitchCase {
    /// Constructs a new switch case.
    #[must_use]
    pub fn new(label: SwitchLabel, body: Option<Statement>) -> Self {
        Self { label, body }
    }

    fn transform(&self, rewrite: &mut impl FnMut(&Expression) -> Option<Expression>) -> Self {
        let label = match &self.label {
            SwitchLabel::Default => SwitchLabel::Default,
            SwitchLabel::Expr(e) => SwitchLabel::Expr(e.transform(rewrite)),
        };
        let body = self.body.as_ref().map(|b| b.transform(rewrite));
        Self { label, body }
    }
}

/// The label of a switch case.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SwitchLabel {
    Default,
    Expr(Expression),
}

/// A sequence of declarations and statements that forms its own scope.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Block {
    pub components: Vec<BlockComponent>,
}

impl Block {
    /// Constructs a block from its `components`.
    #[must_use]
    pub fn new(components: Vec<BlockComponent>) -> Self {
        Self { components }
    }

    /// Constructs a block that contains only `statements`.
    #[must_use]
    pub fn of(statements: Vec<Statement>) -> Self {
        Self::new(statements.into_iter().map(BlockComponent::Statement).collect())
    }

    /// Gets the declarations made in this block, in declaration order.
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.components.iter().filter_map(|c| match c {
            BlockComponent::Declaration(d) => Some(d),
            BlockComponent::Statement(_) => None,
        })
    }

    /// Rebuilds the block with `rewrite` applied to every expression in it,
    /// including variable initializers.
    #[must_use]
    pub fn transform(&self, rewrite: &mut impl FnMut(&Expression) -> Option<Expression>) -> Self {
        let components = self
            .components
            .iter()
            .map(|c| match c {
                BlockComponent::Declaration(Declaration::Variable {
                    name,
                    ty,
                    initializer,
                }) => BlockComponent::Declaration(Declaration::Variable {
                    name:        name.clone(),
                    ty:          ty.clone(),
                    initializer: initializer.as_ref().map(|i| i.transform(rewrite)),
                }),
                BlockComponent::Declaration(d) => BlockComponent::Declaration(d.clone()),
                BlockComponent::Statement(s) => BlockComponent::Statement(s.transform(rewrite)),
            })
            .collect();
        Self { components }
    }
}

/// A component of a block.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum BlockComponent {
    Declaration(Declaration),
    Statement(Statement),
}
