//! This module contains the declarations of the program representation: local
//! and global storage, actions, tables, parsers, controls and whole programs.

use std::rc::Rc;

use bimap::BiMap;

use crate::ir::{
    expression::Expression,
    statement::{Block, BlockComponent},
    types::Type,
};

/// A named declaration that can be found through the namespace.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Declaration {
    /// A variable, with an optional initializer.
    Variable {
        name:        String,
        ty:          Type,
        initializer: Option<Expression>,
    },

    /// A compile-time constant.
    Constant {
        name:  String,
        ty:    Type,
        value: Expression,
    },

    /// A parameter of an action, parser or control.
    Parameter(Parameter),

    /// A named type.
    Type { name: String, ty: Type },

    Action(Rc<Action>),
    Table(Rc<Table>),
    Parser(Rc<Parser>),
    Control(Rc<Control>),
}

impl Declaration {
    /// Constructs an uninitialized variable declaration.
    #[must_use]
    pub fn variable(name: impl Into<String>, ty: Type) -> Self {
        Self::Variable {
            name: name.into(),
            ty,
            initializer: None,
        }
    }

    /// Gets the name under which the declaration is found.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Variable { name, .. } | Self::Constant { name, .. } | Self::Type { name, .. } => {
                name
            }
            Self::Parameter(p) => &p.name,
            Self::Action(a) => &a.name,
            Self::Table(t) => &t.name,
            Self::Parser(p) => &p.name,
            Self::Control(c) => &c.name,
        }
    }

    /// Gets the type of the storage declared, if this declares storage.
    #[must_use]
    pub fn storage_type(&self) -> Option<&Type> {
        match self {
            Self::Variable { ty, .. } | Self::Constant { ty, .. } => Some(ty),
            Self::Parameter(p) => Some(&p.ty),
            _ => None,
        }
    }
}

/// The direction of a parameter.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    None,
    In,
    Out,
    InOut,
}

/// A parameter of an action, parser or control.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Parameter {
    pub name:      String,
    pub ty:        Type,
    pub direction: Direction,
}

impl Parameter {
    /// Constructs a new parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type, direction: Direction) -> Self {
        let name = name.into();
        Self {
            name,
            ty,
            direction,
        }
    }
}

/// An action: a parameterised block of statements invoked by tables or
/// directly.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Action {
    pub name:   String,
    pub params: Vec<Parameter>,
    pub body:   Block,
}

/// A match-action table.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Table {
    pub name:           String,
    pub keys:           Vec<Expression>,
    pub actions:        Vec<String>,
    pub default_action: String,
}

impl Table {
    /// Gets the bidirectional mapping between the names of the table's actions
    /// and their numeric `action_run` index.
    ///
    /// Indices follow the order in which the actions are listed.
    #[must_use]
    pub fn action_indices(&self) -> BiMap<String, usize> {
        self.actions.iter().cloned().enumerate().map(|(i, a)| (a, i)).collect()
    }
}

/// A parser, made up of a set of named states.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Parser {
    pub name:   String,
    pub params: Vec<Parameter>,
    pub locals: Vec<Declaration>,
    pub states: Vec<ParserState>,
}

impl Parser {
    /// Gets the state called `name`.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&ParserState> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Gets every declaration visible inside the parser: its parameters
    /// followed by its locals.
    #[must_use]
    pub fn scope_declarations(&self) -> Vec<Declaration> {
        self.params
            .iter()
            .cloned()
            .map(Declaration::Parameter)
            .chain(self.locals.iter().cloned())
            .collect()
    }
}

/// A state of a parser.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ParserState {
    pub name:       String,
    pub components: Vec<BlockComponent>,
    pub transition: Transition,
}

/// The transition at the end of a parser state.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Transition {
    /// An unconditional transition to the named state, which may be `accept`
    /// or `reject`.
    Direct(String),

    /// A transition selected by matching `keys` against each case in order.
    Select {
        keys:  Vec<Expression>,
        cases: Vec<SelectCase>,
    },
}

impl Transition {
    /// Rebuilds the transition with `rewrite` applied to its keys.
    #[must_use]
    pub fn transform(&self, rewrite: &mut impl FnMut(&Expression) -> Option<Expression>) -> Self {
        match self {
            Self::Direct(_) => self.clone(),
            Self::Select { keys, cases } => Self::Select {
                keys:  keys.iter().map(|k| k.transform(rewrite)).collect(),
                cases: cases.clone(),
            },
        }
    }
}

/// A case of a select transition.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SelectCase {
    pub keyset: Keyset,
    pub next:   String,
}

/// The set of key values matched by a select case.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Keyset {
    /// Matches any key.
    Default,

    /// Matches keys equal to these values, one per select key.
    Values(Vec<Expression>),
}

/// A control block.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Control {
    pub name:   String,
    pub params: Vec<Parameter>,
    pub locals: Vec<Declaration>,
    pub body:   Block,
}

impl Control {
    /// Gets every declaration visible inside the control: its parameters
    /// followed by its locals.
    #[must_use]
    pub fn scope_declarations(&self) -> Vec<Declaration> {
        self.params
            .iter()
            .cloned()
            .map(Declaration::Parameter)
            .chain(self.locals.iter().cloned())
            .collect()
    }
}

/// A whole program: the top-level declarations, including the global storage
/// that flows through the pipeline.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Program {
    pub name:         String,
    pub declarations: Vec<Declaration>,
}

#[cfg(test)]
mod test {
    use crate::ir::decl::Table;

    #[test]
    fn action_indices_follow_declaration_order() {
        let table = Table {
            name:           "t".into(),
            keys:           vec![],
            actions:        vec!["a".into(), "b".into(), "NoAction".into()],
            default_action: "NoAction".into(),
        };
        let indices = table.action_indices();

        assert_eq!(indices.get_by_left("b"), Some(&1));
        assert_eq!(indices.get_by_right(&2).map(String::as_str), Some("NoAction"));
    }
}
