//! This module contains the trace events that record the provenance of an
//! execution path.
//!
//! The trace is append-only. The interpreter never reads it back to make a
//! control decision; it exists for the renderers of generated test cases.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::state::continuation::ExceptionKind;

/// A single entry of the trace of an execution state.
///
/// Expressions are stored rendered so that the trace can be serialized and
/// handed off independently of the program representation.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum TraceEvent {
    /// Free-form text.
    Generic(String),

    /// An assignment of `value` to `target`, with a concrete witness of the
    /// value when one was requested and available.
    Assignment {
        target:   String,
        value:    String,
        concrete: Option<String>,
    },

    /// The arm taken by a conditional.
    IfCondition { condition: String, taken: bool },

    /// Entry into a parser, control or action.
    Invocation { name: String },

    /// Entry into a parser state.
    ParserState { parser: String, state: String },

    /// The select case matched in a parser transition.
    SelectCase { keys: String, next: String },

    /// A raised exception, and whether it was caught.
    Exception { kind: ExceptionKind, caught: bool },
}

impl TraceEvent {
    /// Constructs a free-form trace event.
    #[must_use]
    pub fn generic(text: impl Into<String>) -> Self {
        Self::Generic(text.into())
    }
}

impl Display for TraceEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic(text) => write!(f, "{text}"),
            Self::Assignment {
                target,
                value,
                concrete: Some(concrete),
            } => write!(f, "{target} = {value} (e.g. {concrete})"),
            Self::Assignment { target, value, .. } => write!(f, "{target} = {value}"),
            Self::IfCondition { condition, taken } => {
                write!(f, "if ({condition}) took the {taken} arm")
            }
            Self::Invocation { name } => write!(f, "enter {name}"),
            Self::ParserState { parser, state } => write!(f, "parser {parser}: state {state}"),
            Self::SelectCase { keys, next } => write!(f, "select ({keys}) -> {next}"),
            Self::Exception { kind, caught: true } => write!(f, "{kind} raised and handled"),
            Self::Exception { kind, caught: false } => write!(f, "{kind} raised, path ends"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::state::{continuation::ExceptionKind, trace::TraceEvent};

    #[test]
    fn can_round_trip_through_json() -> anyhow::Result<()> {
        let event = TraceEvent::Exception {
            kind:   ExceptionKind::Reject,
            caught: false,
        };
        let json = serde_json::to_string(&event)?;
        let back: TraceEvent = serde_json::from_str(&json)?;

        assert_eq!(back, event);
        assert_eq!(back.to_string(), "Reject raised, path ends");

        Ok(())
    }
}
