//! This module contains the rules for parser states and the transitions
//! between them.

use std::rc::Rc;

use itertools::Itertools;
use log::debug;

use crate::{
    constant::{PARSER_ACCEPT_STATE, PARSER_REJECT_STATE},
    error::execution::Error,
    ir::{fold::simplify, BlockComponent, Expression, Keyset, Node, Parser, SelectCase, Transition},
    state::{
        continuation::{Command, ExceptionKind},
        trace::TraceEvent,
        Branch,
        ExecutionState,
    },
    stepper::{command::none_of, StepResult, Stepper},
};

impl<'a> Stepper<'a> {
    /// Enters the state called `name` of `parser`.
    ///
    /// Entering `accept` finishes the parser and entering `reject` raises
    /// [`ExceptionKind::Reject`].
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the parser has no state called `name`.
    pub fn step_parser_state(&mut self, parser: &Rc<Parser>, name: &str, state: &Rc<ExecutionState>) -> StepResult {
        match name {
            PARSER_ACCEPT_STATE => {
                let mut next = (**state).clone();
                next.pop_body()?;
                return Ok(vec![Branch::unconditional(state, next)]);
            }
            PARSER_REJECT_STATE => return self.step_to_exception(ExceptionKind::Reject, state),
            _ => {}
        }

        let parser_state = parser.state(name).ok_or_else(|| Error::UnknownParserState {
            parser: parser.name.clone(),
            state:  name.into(),
        })?;

        let mut next = (**state).clone();
        next.add_trace_event(TraceEvent::ParserState {
            parser: parser.name.clone(),
            state:  name.into(),
        });
        next.push_namespace(parser_state.components.iter().filter_map(|c| match c {
            BlockComponent::Declaration(d) => Some(d.clone()),
            BlockComponent::Statement(_) => None,
        }));
        let mut commands = self.declare_components(&parser_state.components, &mut next)?;
        commands.push(Command::Statement(Node::Transition {
            parser:     parser.clone(),
            transition: parser_state.transition.clone(),
        }));
        next.replace_top_body(commands)?;
        Ok(vec![Branch::unconditional(state, next)])
    }

    /// Makes the top command of `next` move `parser` to the state called
    /// `target`, ending the scope of the state being left.
    fn transition_to(parser: &Rc<Parser>, target: &str, next: &mut ExecutionState) -> Result<(), Error> {
        next.pop_namespace()?;
        match target {
            PARSER_ACCEPT_STATE => {
                next.pop_body()?;
            }
            PARSER_REJECT_STATE => next.replace_top_body([Command::Exception(ExceptionKind::Reject)])?,
            _ => next.replace_top_body([Command::Statement(Node::ParserState {
                parser: parser.clone(),
                state:  target.into(),
            })])?,
        }
        Ok(())
    }

    /// Executes the transition `transition` at the end of a state of `parser`.
    ///
    /// A select transition forks one branch per case that can match, each
    /// guarded by its match condition and by no earlier case matching. When no
    /// case is a default, a further branch raises
    /// [`ExceptionKind::NoMatch`]. Tainted keys may match anything, so every
    /// case is explored without a guard.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a keyset does not have one value per key.
    pub fn step_transition(
        &mut self,
        parser: &Rc<Parser>,
        transition: &Transition,
        state: &Rc<ExecutionState>,
    ) -> StepResult {
        let (keys, cases) = match transition {
            Transition::Direct(target) => {
                let mut next = (**state).clone();
                Self::transition_to(parser, target, &mut next)?;
                return Ok(vec![Branch::unconditional(state, next)]);
            }
            Transition::Select { keys, cases } => (keys, cases),
        };

        if let Some(result) = self.step_to_first_non_value(keys, state, |i, v| {
            let mut keys = keys.clone();
            keys[i] = v;
            Command::Statement(Node::Transition {
                parser:     parser.clone(),
                transition: Transition::Select {
                    keys,
                    cases: cases.clone(),
                },
            })
        }) {
            return result;
        }

        let keys: Vec<Expression> = keys.iter().map(simplify).collect();
        let rendered_keys = keys.iter().join(", ");

        if keys.iter().any(Expression::is_tainted) {
            debug!("tainted select keys ({rendered_keys}), exploring every case");
            return cases
                .iter()
                .map(|case| {
                    let mut next = (**state).clone();
                    Self::select(parser, case, &rendered_keys, &mut next)?;
                    Ok(Branch::new(None, state, next))
                })
                .collect();
        }

        let mut branches = Vec::new();
        let mut earlier = Vec::new();
        for case in cases {
            let matches = Self::keyset_matches(&keys, &case.keyset)?;
            let guard = simplify(&Expression::and(matches.clone(), none_of(&earlier)));
            earlier.push(matches);

            let closes = matches!(case.keyset, Keyset::Default) || guard.as_bool() == Some(true);
            if guard.as_bool() != Some(false) {
                let mut next = (**state).clone();
                Self::select(parser, case, &rendered_keys, &mut next)?;
                let constraint = (guard.as_bool() != Some(true)).then_some(guard);
                branches.push(Branch::new(constraint, state, next));
            }
            if closes {
                return Ok(branches);
            }
        }

        let guard = simplify(&none_of(&earlier));
        if guard.as_bool() != Some(false) {
            let mut next = (**state).clone();
            next.pop_namespace()?;
            next.replace_top_body([Command::Exception(ExceptionKind::NoMatch)])?;
            let constraint = (guard.as_bool() != Some(true)).then_some(guard);
            branches.push(Branch::new(constraint, state, next));
        }
        Ok(branches)
    }

    fn select(
        parser: &Rc<Parser>,
        case: &SelectCase,
        rendered_keys: &str,
        next: &mut ExecutionState,
    ) -> Result<(), Error> {
        next.add_trace_event(TraceEvent::SelectCase {
            keys: rendered_keys.into(),
            next: case.next.clone(),
        });
        Self::transition_to(parser, &case.next, next)
    }

    /// Gets the condition under which `keys` match `keyset`.
    fn keyset_matches(keys: &[Expression], keyset: &Keyset) -> Result<Expression, Error> {
        let Keyset::Values(values) = keyset else {
            return Ok(Expression::bool(true));
        };
        if values.len() != keys.len() {
            return Err(Error::TypeMismatch {
                expected: format!("keyset of {} values", keys.len()),
                found:    format!("keyset of {} values", values.len()),
            });
        }
        Ok(keys
            .iter()
            .zip(values)
            .fold(Expression::bool(true), |acc, (k, v)| {
                Expression::and(acc, Expression::eq(k.clone(), v.clone()))
            }))
    }
}
