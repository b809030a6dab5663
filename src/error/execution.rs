//! This module contains errors pertaining to the symbolic small-step execution
//! of a program.
//!
//! Note that the exceptions of the interpreted language (`exit`, `reject` and
//! friends) are _not_ errors. They are ordinary control flow and are modelled
//! by [`crate::state::continuation::ExceptionKind`].

use thiserror::Error;

use crate::error::container;

/// Errors that occur during the stepping of a program by the
/// [`crate::stepper::Stepper`] or its driver.
///
/// The variants fall into three groups:
///
/// - **Defects** are internal invariant violations. They are always fatal and
///   abort the search entirely.
/// - **Unsupported features** are recognised but intentionally unimplemented
///   language features. They stop processing of the offending program but are
///   not logic bugs.
/// - **Stops** are requested by the driver's environment.
///
/// There is no variant for a node the stepper does not know how to step:
/// dispatch is an exhaustive match over the closed set of node kinds, so such
/// a node cannot be constructed.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Tried to take a command from an empty body")]
    EmptyBody,

    #[error("Tried to pop a continuation from an empty continuation stack")]
    EmptyContinuationStack,

    #[error(
        "Continuation declared a parameter: {declared:?}, but a value was supplied: {supplied:?}"
    )]
    ContinuationArity { declared: bool, supplied: bool },

    #[error("Tried to pop a scope from an empty namespace")]
    EmptyNamespace,

    #[error("State variable {variable} was read before it was set")]
    MissingStateVariable { variable: String },

    #[error("The name {name} could not be resolved in the current namespace")]
    UnresolvedName { name: String },

    #[error("The expression {expr} does not denote a storage reference")]
    NotAReference { expr: String },

    #[error("The expression {expr} is not a fully-evaluated symbolic value")]
    NotAValue { expr: String },

    #[error("Flattened target has {target} fields but the source has {source_fields}")]
    FlatFieldMismatch { target: usize, source_fields: usize },

    #[error("Expected a value of type {expected} but found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Parser {parser} has no state named {state}")]
    UnknownParserState { parser: String, state: String },

    #[error("The table {name} does not exist")]
    UnknownTable { name: String },

    #[error("Unimplemented feature: {feature}")]
    Unimplemented { feature: String },

    #[error("Execution was stopped by the watchdog")]
    StoppedByWatchdog,
}

impl Error {
    /// Constructs an unsupported-feature error describing `feature`.
    pub fn unimplemented(feature: impl Into<String>) -> Self {
        Self::Unimplemented {
            feature: feature.into(),
        }
    }

    /// Checks if the error is an internal invariant violation.
    #[must_use]
    pub fn is_defect(&self) -> bool {
        !matches!(
            self,
            Self::Unimplemented { .. } | Self::StoppedByWatchdog
        )
    }

    /// Checks if the error reports a recognised but unsupported language
    /// feature.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unimplemented { .. })
    }
}

/// An execution error with an associated step location.
pub type LocatedError = container::Located<Error>;

/// A container of execution errors used for aggregation of errors during
/// evaluation.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have execution errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, step: u64) -> Self::Located {
        container::Located {
            location: step,
            payload:  self,
        }
    }
}
