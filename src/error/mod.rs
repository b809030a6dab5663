//! Error types of the library.
//!
//! Subsystems return their own, more specific, errors. Functions on the public
//! driver surface wrap them in [`Error`] and report them through [`Errors`].

pub mod container;
pub mod execution;

use thiserror::Error;

/// The result type of the library interface.
pub type Result<T> = std::result::Result<T, Errors>;

/// Every error that the library interface can report.
#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Execution(#[from] execution::Error),

    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an error that carries only a `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, step: u64) -> Self::Located {
        container::Located {
            location: step,
            payload:  self,
        }
    }
}

/// An interface error tagged with the step at which it occurred.
pub type LocatedError = container::Located<Error>;

/// The errors reported by the library interface.
pub type Errors = container::Errors<LocatedError>;

impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        Self {
            location: value.location,
            payload:  value.payload.into(),
        }
    }
}

impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        Self::from(LocatedError::from(value))
    }
}

impl From<execution::Errors> for Errors {
    fn from(value: execution::Errors) -> Self {
        Vec::from(value).into_iter().map(LocatedError::from).collect::<Vec<_>>().into()
    }
}

#[cfg(test)]
mod test {
    use crate::error::{
        container::Locatable,
        execution,
        Error,
        Errors,
        LocatedError,
    };

    #[test]
    fn execution_errors_keep_their_location_when_wrapped() {
        let located = execution::Error::EmptyBody.locate(4);
        let errors = Errors::from(located);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors.payloads()[0].location, 4);
        assert!(matches!(
            errors.payloads()[0].payload,
            Error::Execution(execution::Error::EmptyBody)
        ));
    }

    #[test]
    fn whole_containers_can_be_wrapped() {
        let mut inner = execution::Errors::default();
        inner.add_located(2, execution::Error::unimplemented("return"));
        inner.add_located(1, execution::Error::EmptyBody);

        let errors = Errors::from(inner);
        let steps = errors.iter().map(|e: &LocatedError| e.location).collect::<Vec<_>>();
        assert_eq!(steps, vec![1, 2]);
        assert_eq!(Error::other("boom").to_string(), "Unknown Error: \"boom\"");
    }
}
