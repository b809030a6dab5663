//! This module contains constants that are needed throughout the codebase.

/// The name of the synthetic field that stores the validity bit of every header
/// instance.
///
/// It contains characters that cannot appear in a program identifier, so it
/// never collides with a declared field.
pub const VALIDITY_FIELD_NAME: &str = "*valid";

/// The name of the symbolic variable that stands for the size of the input
/// packet.
pub const INPUT_PACKET_SIZE_NAME: &str = "*inputPacketSize";

/// The bit-width of the input packet size variable.
pub const INPUT_PACKET_SIZE_WIDTH_BITS: u16 = 32;

/// The prefix used for the names of fresh continuation parameters.
pub const CONTINUATION_PARAMETER_PREFIX: &str = "*k";

/// The name of the ambient property that is raised while the interpreter
/// executes code whose control flow it cannot decide.
pub const IN_UNDEFINED_STATE_PROPERTY: &str = "inUndefinedState";

/// The name of the field of a table application result that reports a hit.
pub const TABLE_HIT_FIELD: &str = "hit";

/// The name of the field of a table application result that reports a miss.
pub const TABLE_MISS_FIELD: &str = "miss";

/// The name of the field of a table application result that carries the index
/// of the executed action.
pub const TABLE_ACTION_RUN_FIELD: &str = "action_run";

/// The bit-width of the `action_run` discriminant.
pub const ACTION_RUN_WIDTH_BITS: u16 = 32;

/// The name of the method that applies a table.
pub const TABLE_APPLY_METHOD: &str = "apply";

/// The name of the start state of every parser.
pub const PARSER_START_STATE: &str = "start";

/// The name of the terminal accepting parser state.
pub const PARSER_ACCEPT_STATE: &str = "accept";

/// The name of the terminal rejecting parser state.
pub const PARSER_REJECT_STATE: &str = "reject";

/// The default maximum number of steps that the evaluator takes along a single
/// execution path before abandoning it.
pub const DEFAULT_MAX_STEPS_PER_PATH: usize = 10_000;

/// The default number of loop iterations the evaluator will wait before polling
/// the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;

/// The default value for whether the evaluator checks the feasibility of every
/// guarded branch with the solver before exploring it.
pub const DEFAULT_CHECK_BRANCH_FEASIBILITY: bool = true;
