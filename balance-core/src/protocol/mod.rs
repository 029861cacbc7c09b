//! Newline-delimited JSON command protocol.
//!
//! Bytes are assembled into lines by [`LineAssembler`], decoded into a bounded,
//! borrowed [`Message`] by a `winnow` parser, validated into a typed [`Request`],
//! and answered with exactly one [`Response`].

use core::fmt;

pub mod json;
pub mod line;
pub mod request;
pub mod response;

pub use json::{JsonValue, Message, parse_message};
pub use line::{LineAssembler, MAX_LINE_LEN};
pub use request::{CommandKind, Parameters, Request, TurnDirection};
pub use response::{MAX_RESPONSE_LEN, Response, StatusData};

/// Priority reserved for the immediate stop command.
pub const PRIORITY_STOP: u8 = 100;

/// Priority assumed when a message omits the field.
pub const PRIORITY_NORMAL: u8 = 0;

/// Reasons a line is rejected before any controller state is touched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// Not a single well-formed JSON object.
    Malformed,
    /// More members than the bounded decoder keeps.
    TooManyFields,
    MissingField(&'static str),
    WrongType(&'static str),
    UnknownCommand,
    OutOfRange(&'static str),
    /// Priority 100 sent with something other than `stop`.
    ReservedPriority,
    LineTooLong,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed => f.write_str("malformed message: expected a JSON object"),
            ProtocolError::TooManyFields => f.write_str("too many fields"),
            ProtocolError::MissingField(field) => write!(f, "missing field `{field}`"),
            ProtocolError::WrongType(field) => write!(f, "field `{field}` has the wrong type"),
            ProtocolError::UnknownCommand => f.write_str("unknown command"),
            ProtocolError::OutOfRange(field) => write!(f, "field `{field}` is out of range"),
            ProtocolError::ReservedPriority => f.write_str("priority 100 is reserved for stop"),
            ProtocolError::LineTooLong => {
                write!(f, "line too long (max {MAX_LINE_LEN} bytes)")
            }
        }
    }
}
