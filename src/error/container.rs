//! Generic wrappers that attach step locations to errors and gather many
//! errors together.

use std::fmt::{Display, Formatter};

use thiserror::Error;

/// An error tagged with the number of steps its execution path had taken when
/// it occurred.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Located<E>
where
    E: Clone,
{
    pub location: u64,
    pub payload:  E,
}

impl<E> Display for Located<E>
where
    E: Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[step {}]: {}", self.location, self.payload)
    }
}

/// Things that a step location can be attached to.
pub trait Locatable
where
    Self: Sized,
{
    /// The type with the location attached.
    type Located;

    /// Tags `self` with `step`, the number of steps taken by the path on which
    /// it arose.
    fn locate(self, step: u64) -> Self::Located;
}

/// Locating a result locates its error, if any.
impl<T, E> Locatable for Result<T, E>
where
    E: std::error::Error + Clone,
{
    type Located = Result<T, Located<E>>;

    fn locate(self, step: u64) -> Self::Located {
        self.map_err(|payload| Located {
            location: step,
            payload,
        })
    }
}

/// A collection of errors, kept in the order in which they were added.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Errors<E> {
    payloads: Vec<E>,
}

impl<E> Errors<E> {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self { payloads: vec![] }
    }

    #[must_use]
    pub fn payloads(&self) -> &[E] {
        &self.payloads
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.payloads.iter()
    }
}

/// Located errors are kept ordered by step, with errors at the same step in
/// insertion order.
impl<E> Errors<Located<E>>
where
    E: std::error::Error + Clone,
{
    /// Adds the located `error`.
    pub fn add(&mut self, error: Located<E>) {
        let at = self.payloads.partition_point(|e| e.location <= error.location);
        self.payloads.insert(at, error);
    }

    /// Adds `payload` as having occurred at `step`.
    pub fn add_located(&mut self, step: u64, payload: E) {
        self.add(Located {
            location: step,
            payload,
        });
    }
}

impl<E> Default for Errors<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> From<E> for Errors<E>
where
    E: std::error::Error,
{
    fn from(value: E) -> Self {
        Self {
            payloads: vec![value],
        }
    }
}

impl<E> From<Errors<E>> for Vec<E> {
    fn from(value: Errors<E>) -> Self {
        value.payloads
    }
}

impl<E> From<Vec<E>> for Errors<E> {
    fn from(payloads: Vec<E>) -> Self {
        Self { payloads }
    }
}

/// Prints a count followed by one error per line.
impl<E> Display for Errors<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.payloads.is_empty() {
            return write!(f, "no errors");
        }
        writeln!(f, "{} error(s):", self.payloads.len())?;
        for error in &self.payloads {
            writeln!(f, "  {error}")?;
        }
        Ok(())
    }
}
