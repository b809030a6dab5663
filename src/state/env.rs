//! This module contains the definition of the symbolic environment: the
//! mapping from flattened storage cells to their current symbolic values.

use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

use derivative::Derivative;

use crate::{
    constant::VALIDITY_FIELD_NAME,
    error::execution::Error,
    ir::{Expression, Type},
};

/// A segment of the access path of a [`StateVariable`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Segment {
    /// A declared name or field name.
    Name(String),

    /// A constant array index.
    Index(usize),
}

/// A scalar leaf of program storage.
///
/// Structured values never live in the environment directly. They are always
/// represented as one state variable per scalar field, plus one boolean
/// validity variable for every header instance.
///
/// Identity is the access path alone. The type of the leaf is carried along for
/// the convenience of callers and does not take part in equality or hashing.
#[derive(Clone, Debug, Derivative)]
#[derivative(Eq, Hash, PartialEq)]
pub struct StateVariable {
    segments: Vec<Segment>,

    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    ty: Type,
}

impl StateVariable {
    /// Constructs the state variable for the top-level declaration `root`.
    #[must_use]
    pub fn new(root: impl Into<String>, ty: Type) -> Self {
        let segments = vec![Segment::Name(root.into())];
        Self { segments, ty }
    }

    /// Gets the state variable for the field `name` (of type `ty`) of this one.
    #[must_use]
    pub fn field(&self, name: impl Into<String>, ty: Type) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Name(name.into()));
        Self { segments, ty }
    }

    /// Gets the state variable for the element `index` (of type `ty`) of this
    /// one.
    #[must_use]
    pub fn element(&self, index: usize, ty: Type) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments, ty }
    }

    /// Gets the validity variable of the header that this state variable
    /// names.
    #[must_use]
    pub fn validity(&self) -> Self {
        self.field(VALIDITY_FIELD_NAME, Type::Bool)
    }

    /// Gets the same access path with a different leaf type.
    #[must_use]
    pub fn with_type(&self, ty: Type) -> Self {
        let segments = self.segments.clone();
        Self { segments, ty }
    }

    /// Gets the type of the storage cell.
    #[must_use]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Gets the access path of the storage cell.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Checks if `self` is `other` or lies within it.
    #[must_use]
    pub fn is_within(&self, other: &StateVariable) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl Display for StateVariable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Name(name) if i == 0 => write!(f, "{name}")?,
                Segment::Name(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// The symbolic environment of an execution state.
///
/// Iteration order is unspecified.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SymbolicEnv {
    values: HashMap<StateVariable, Expression>,
}

impl SymbolicEnv {
    /// Creates a new, empty, environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` in the cell `var`, overwriting any value already there.
    pub fn set(&mut self, var: StateVariable, value: Expression) {
        self.values.insert(var, value);
    }

    /// Reads the value in the cell `var`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the cell has never been written, as live cells are
    /// always initialized before they are read.
    pub fn get(&self, var: &StateVariable) -> Result<&Expression, Error> {
        self.values.get(var).ok_or_else(|| Error::MissingStateVariable {
            variable: var.to_string(),
        })
    }

    /// Checks if the cell `var` has been written.
    #[must_use]
    pub fn exists(&self, var: &StateVariable) -> bool {
        self.values.contains_key(var)
    }

    /// Gets the number of cells in the environment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Checks if the environment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over every cell and its value.
    pub fn iter(&self) -> impl Iterator<Item = (&StateVariable, &Expression)> {
        self.values.iter()
    }
}
