//! Outbound response encoding.

use core::fmt::{self, Write};

use heapless::String;

use super::CommandKind;

/// Longest human readable message kept in a response.
pub const MAX_MESSAGE_LEN: usize = 96;

/// Buffer size for one encoded response line, terminator excluded.
pub const MAX_RESPONSE_LEN: usize = 512;

/// Snapshot returned by the `status` query.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct StatusData {
    pub angle_deg: f32,
    pub rate_dps: f32,
    pub velocity_setpoint: f32,
    pub rotation_setpoint: f32,
    pub queue_depth: usize,
    pub active: Option<CommandKind>,
    pub balanced: bool,
    pub calibrated: bool,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub target_angle_deg: f32,
}

/// Reply sent for every processed line.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub success: bool,
    pub message: String<MAX_MESSAGE_LEN>,
    pub data: Option<StatusData>,
}

impl Response {
    /// Successful response carrying `message`, truncated to fit.
    pub fn ok(message: impl fmt::Display) -> Self {
        Self::new(true, message)
    }

    /// Failed response carrying `reason`, truncated to fit.
    pub fn error(reason: impl fmt::Display) -> Self {
        Self::new(false, reason)
    }

    fn new(success: bool, text: impl fmt::Display) -> Self {
        let mut message = String::new();
        // Overflow only truncates the human readable text.
        let _ = write!(message, "{text}");
        Self {
            success,
            message,
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: StatusData) -> Self {
        self.data = Some(data);
        self
    }

    /// Writes the response as one JSON object, without a line terminator.
    ///
    /// # Errors
    ///
    /// Propagates errors from `out`.
    pub fn write_json<W: Write>(&self, out: &mut W) -> fmt::Result {
        write!(out, "{{\"success\":{}", self.success)?;
        if !self.message.is_empty() {
            out.write_str(",\"message\":")?;
            write_string(out, &self.message)?;
        }
        if let Some(data) = &self.data {
            out.write_str(",\"data\":")?;
            write_status(out, data)?;
        }
        out.write_char('}')
    }

    /// Encodes the response into a fixed buffer.
    ///
    /// # Errors
    ///
    /// Returns [`fmt::Error`] if the encoding does not fit.
    pub fn to_line(&self) -> Result<String<MAX_RESPONSE_LEN>, fmt::Error> {
        let mut line = String::new();
        self.write_json(&mut line)?;
        Ok(line)
    }
}

fn write_string<W: Write>(out: &mut W, text: &str) -> fmt::Result {
    out.write_char('"')?;
    for ch in text.chars() {
        match ch {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            ch if u32::from(ch) < 0x20 => write!(out, "\\u{:04x}", u32::from(ch))?,
            ch => out.write_char(ch)?,
        }
    }
    out.write_char('"')
}

fn write_number<W: Write>(out: &mut W, value: f32) -> fmt::Result {
    if value.is_finite() {
        write!(out, "{value:.3}")
    } else {
        out.write_str("null")
    }
}

fn write_status<W: Write>(out: &mut W, data: &StatusData) -> fmt::Result {
    let numbers = [
        ("angle", data.angle_deg),
        ("rate", data.rate_dps),
        ("velocity_setpoint", data.velocity_setpoint),
        ("rotation_setpoint", data.rotation_setpoint),
        ("kp", data.kp),
        ("ki", data.ki),
        ("kd", data.kd),
        ("target_angle", data.target_angle_deg),
    ];

    out.write_char('{')?;
    for (key, value) in numbers {
        write!(out, "\"{key}\":")?;
        write_number(out, value)?;
        out.write_char(',')?;
    }
    write!(
        out,
        "\"queue_depth\":{},\"balanced\":{},\"calibrated\":{},\"active\":",
        data.queue_depth, data.balanced, data.calibrated
    )?;
    match data.active {
        Some(kind) => write_string(out, kind.name())?,
        None => out.write_str("null")?,
    }
    out.write_char('}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::json::{JsonValue, parse_message, parse_object};

    #[test]
    fn encodes_success_with_message() {
        let line = Response::ok("queued").to_line().unwrap();
        assert_eq!(line.as_str(), r#"{"success":true,"message":"queued"}"#);
    }

    #[test]
    fn escapes_message_text() {
        let line = Response::error("bad \"x\"\n").to_line().unwrap();
        assert_eq!(
            line.as_str(),
            r#"{"success":false,"message":"bad \"x\"\n"}"#
        );
    }

    #[test]
    fn empty_message_is_omitted() {
        let line = Response::ok("").to_line().unwrap();
        assert_eq!(line.as_str(), r#"{"success":true}"#);
    }

    #[test]
    fn long_messages_are_truncated() {
        let text = [b'x'; MAX_MESSAGE_LEN + 20];
        let response = Response::error(core::str::from_utf8(&text).unwrap());
        assert!(!response.message.is_empty());
        assert!(response.message.len() <= MAX_MESSAGE_LEN);
    }

    #[test]
    fn status_data_is_valid_json() {
        let data = StatusData {
            angle_deg: 1.25,
            rate_dps: f32::NAN,
            queue_depth: 3,
            active: Some(CommandKind::Square),
            balanced: true,
            ..StatusData::default()
        };
        let line = Response::ok("status").with_data(data).to_line().unwrap();

        let message = parse_message(&line).unwrap();
        assert_eq!(message.get("success"), Some(JsonValue::Bool(true)));
        let Some(JsonValue::Object(raw)) = message.get("data") else {
            panic!("missing data in {line}");
        };
        let data = parse_object(raw).unwrap();
        assert_eq!(data.get("angle"), Some(JsonValue::Number(1.25)));
        assert_eq!(data.get("rate"), Some(JsonValue::Null));
        assert_eq!(data.get("queue_depth"), Some(JsonValue::Number(3.0)));
        assert_eq!(data.get("active"), Some(JsonValue::Str("square")));
    }
}
