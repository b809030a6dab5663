//! This module contains the typed program representation that the interpreter
//! steps over.
//!
//! Producing this representation (parsing, type checking, inlining and
//! specialisation) is the job of the front- and mid-end. The interpreter only
//! relies on the closed set of node kinds defined here, which is what lets
//! [`crate::stepper::Stepper::step`] dispatch over them exhaustively.

pub mod decl;
pub mod expression;
pub mod fold;
pub mod statement;
pub mod types;

use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

pub use decl::{
    Action,
    Control,
    Declaration,
    Direction,
    Keyset,
    Parameter,
    Parser,
    ParserState,
    Program,
    SelectCase,
    Table,
    Transition,
};
pub use expression::{BinaryOp, Expression, MethodCall, UnaryOp};
pub use statement::{Block, BlockComponent, Statement, SwitchCase, SwitchLabel};
pub use types::{Composite, Field, Type};

/// A program node that can be placed in a continuation body and stepped.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Node {
    /// A statement.
    Statement(Statement),

    /// The entry point of a whole program.
    Program(Rc<Program>),

    /// An invocation of a parser.
    Parser(Rc<Parser>),

    /// An invocation of a control.
    Control(Rc<Control>),

    /// Entry into the state called `state` of `parser`.
    ParserState { parser: Rc<Parser>, state: String },

    /// The transition that ends a state of `parser`.
    Transition {
        parser:     Rc<Parser>,
        transition: Transition,
    },
}

impl Node {
    /// Gets a short name for the kind of this node for use in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Statement(s) => s.kind_name(),
            Self::Program(_) => "P4Program",
            Self::Parser(_) => "P4Parser",
            Self::Control(_) => "P4Control",
            Self::ParserState { .. } => "ParserState",
            Self::Transition { .. } => "Transition",
        }
    }

    /// Rebuilds the node with `rewrite` applied to every expression it
    /// contains.
    ///
    /// Declarations (programs, parsers and controls) contain no free
    /// expressions and are shared rather than rebuilt.
    #[must_use]
    pub fn transform(&self, rewrite: &mut impl FnMut(&Expression) -> Option<Expression>) -> Self {
        match self {
            Self::Statement(s) => Self::Statement(s.transform(rewrite)),
            Self::Transition { parser, transition } => Self::Transition {
                parser:     parser.clone(),
                transition: transition.transform(rewrite),
            },
            Self::Program(_) | Self::Parser(_) | Self::Control(_) | Self::ParserState { .. } => {
                self.clone()
            }
        }
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Statement(s) => write!(f, "{s}"),
            Self::Program(p) => write!(f, "program {}", p.name),
            Self::Parser(p) => write!(f, "parser {}", p.name),
            Self::Control(c) => write!(f, "control {}", c.name),
            Self::ParserState { parser, state } => write!(f, "state {}.{state}", parser.name),
            Self::Transition { parser, .. } => write!(f, "transition in {}", parser.name),
        }
    }
}

impl From<Statement> for Node {
    fn from(value: Statement) -> Self {
        Self::Statement(value)
    }
}
