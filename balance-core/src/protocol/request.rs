//! Validation of decoded messages into typed requests.

use core::fmt;

use libm::trunc;

use super::json::{JsonValue, Message, parse_message, parse_object};
use super::{PRIORITY_NORMAL, PRIORITY_STOP, ProtocolError};

/// Longest duration accepted for a timed command, in seconds.
pub const MAX_DURATION_S: f32 = 3_600.0;

/// Largest rotation accepted for an angle-bound command, in degrees.
pub const MAX_ANGLE_DEG: f32 = 3_600.0;

/// Longest side of a square pattern, in seconds.
pub const MAX_SIDE_S: f32 = 60.0;

/// Largest gain accepted by `set_gains`.
pub const MAX_GAIN: f32 = 10_000.0;

/// Largest `samples` accepted by `calibrate` and `log`.
pub const MAX_SAMPLES: u16 = 1_000;

/// Command names accepted on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandKind {
    Stop,
    MoveForward,
    MoveBackward,
    RotateClockwise,
    RotateCounterclockwise,
    TurnLeft,
    TurnRight,
    TurnAround,
    Square,
    Circle,
    SetGains,
    SetTarget,
    Reset,
    Calibrate,
    Log,
    Status,
}

impl CommandKind {
    pub const ALL: [CommandKind; 16] = [
        CommandKind::Stop,
        CommandKind::MoveForward,
        CommandKind::MoveBackward,
        CommandKind::RotateClockwise,
        CommandKind::RotateCounterclockwise,
        CommandKind::TurnLeft,
        CommandKind::TurnRight,
        CommandKind::TurnAround,
        CommandKind::Square,
        CommandKind::Circle,
        CommandKind::SetGains,
        CommandKind::SetTarget,
        CommandKind::Reset,
        CommandKind::Calibrate,
        CommandKind::Log,
        CommandKind::Status,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            CommandKind::Stop => "stop",
            CommandKind::MoveForward => "move_forward",
            CommandKind::MoveBackward => "move_backward",
            CommandKind::RotateClockwise => "rotate_clockwise",
            CommandKind::RotateCounterclockwise => "rotate_counterclockwise",
            CommandKind::TurnLeft => "turn_left",
            CommandKind::TurnRight => "turn_right",
            CommandKind::TurnAround => "turn_around",
            CommandKind::Square => "square",
            CommandKind::Circle => "circle",
            CommandKind::SetGains => "set_gains",
            CommandKind::SetTarget => "set_target",
            CommandKind::Reset => "reset",
            CommandKind::Calibrate => "calibrate",
            CommandKind::Log => "log",
            CommandKind::Status => "status",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Commands that move the chassis, as opposed to stop, tuning and queries.
    #[must_use]
    pub const fn is_motion(self) -> bool {
        matches!(
            self,
            CommandKind::MoveForward
                | CommandKind::MoveBackward
                | CommandKind::RotateClockwise
                | CommandKind::RotateCounterclockwise
                | CommandKind::TurnLeft
                | CommandKind::TurnRight
                | CommandKind::TurnAround
                | CommandKind::Square
                | CommandKind::Circle
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Turning sense for patterns that accept one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TurnDirection {
    Left,
    Right,
}

impl TurnDirection {
    fn from_wire(text: &str) -> Option<Self> {
        match text {
            "left" | "counterclockwise" => Some(TurnDirection::Left),
            "right" | "clockwise" => Some(TurnDirection::Right),
            _ => None,
        }
    }

    /// `+1.0` for clockwise, `-1.0` for counterclockwise.
    #[must_use]
    pub const fn sign(self) -> f32 {
        match self {
            TurnDirection::Left => -1.0,
            TurnDirection::Right => 1.0,
        }
    }
}

/// Recognised `parameters` members, already range checked.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Parameters {
    /// Fraction of full speed in `[0, 1]`.
    pub speed: Option<f32>,
    pub duration_s: Option<f32>,
    pub angle_deg: Option<f32>,
    pub side_s: Option<f32>,
    pub direction: Option<TurnDirection>,
    pub kp: Option<f32>,
    pub ki: Option<f32>,
    pub kd: Option<f32>,
    pub samples: Option<u16>,
}

impl Parameters {
    fn from_message(message: &Message<'_>) -> Result<Self, ProtocolError> {
        let mut params = Parameters::default();
        for field in message.fields() {
            let value = field.value;
            match field.key {
                "speed" => params.speed = Some(bounded(value, "speed", 0.0, 1.0)?),
                "duration" => params.duration_s = Some(positive(value, "duration", MAX_DURATION_S)?),
                "angle" => params.angle_deg = Some(bounded(value, "angle", -MAX_ANGLE_DEG, MAX_ANGLE_DEG)?),
                "side" => params.side_s = Some(positive(value, "side", MAX_SIDE_S)?),
                "direction" => {
                    let text = value.as_str().ok_or(ProtocolError::WrongType("direction"))?;
                    params.direction = Some(
                        TurnDirection::from_wire(text).ok_or(ProtocolError::OutOfRange("direction"))?,
                    );
                }
                "kp" => params.kp = Some(bounded(value, "kp", 0.0, MAX_GAIN)?),
                "ki" => params.ki = Some(bounded(value, "ki", 0.0, MAX_GAIN)?),
                "kd" => params.kd = Some(bounded(value, "kd", 0.0, MAX_GAIN)?),
                "samples" => {
                    let samples = integer(value, "samples")?;
                    if !(1..=i64::from(MAX_SAMPLES)).contains(&samples) {
                        return Err(ProtocolError::OutOfRange("samples"));
                    }
                    params.samples = u16::try_from(samples).ok();
                }
                // Unrecognised members are ignored.
                _ => {}
            }
        }
        Ok(params)
    }

    fn has_gain(&self) -> bool {
        self.kp.is_some() || self.ki.is_some() || self.kd.is_some()
    }
}

/// Fully validated inbound request.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Request {
    pub kind: CommandKind,
    pub priority: u8,
    pub params: Parameters,
}

impl Request {
    /// Decodes and validates one protocol line.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProtocolError`] found.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        Self::from_message(&parse_message(line)?)
    }

    /// Validates an already decoded message.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProtocolError`] found.
    pub fn from_message(message: &Message<'_>) -> Result<Self, ProtocolError> {
        let name = match message.get("command") {
            None => return Err(ProtocolError::MissingField("command")),
            Some(JsonValue::Str(name)) => name,
            Some(_) => return Err(ProtocolError::WrongType("command")),
        };

        let priority = match message.get("priority") {
            None | Some(JsonValue::Null) => PRIORITY_NORMAL,
            Some(value) => {
                let priority = integer(value, "priority")?;
                u8::try_from(priority)
                    .ok()
                    .filter(|priority| *priority <= PRIORITY_STOP)
                    .ok_or(ProtocolError::OutOfRange("priority"))?
            }
        };

        let kind = CommandKind::from_name(name).ok_or(ProtocolError::UnknownCommand)?;

        let params = match message.get("parameters") {
            None | Some(JsonValue::Null) => Parameters::default(),
            Some(JsonValue::Object(raw)) => Parameters::from_message(&parse_object(raw)?)?,
            Some(_) => return Err(ProtocolError::WrongType("parameters")),
        };

        if priority == PRIORITY_STOP && kind != CommandKind::Stop {
            return Err(ProtocolError::ReservedPriority);
        }
        validate_for_kind(kind, &params)?;

        Ok(Self {
            kind,
            priority,
            params,
        })
    }
}

fn validate_for_kind(kind: CommandKind, params: &Parameters) -> Result<(), ProtocolError> {
    match kind {
        CommandKind::RotateClockwise
        | CommandKind::RotateCounterclockwise
        | CommandKind::TurnLeft
        | CommandKind::TurnRight => {
            if params.angle_deg.is_some_and(|angle| angle <= 0.0) {
                return Err(ProtocolError::OutOfRange("angle"));
            }
        }
        CommandKind::SetGains if !params.has_gain() => {
            return Err(ProtocolError::MissingField("kp"));
        }
        CommandKind::SetTarget if params.angle_deg.is_none() => {
            return Err(ProtocolError::MissingField("angle"));
        }
        _ => {}
    }
    Ok(())
}

fn number(value: JsonValue<'_>, field: &'static str) -> Result<f64, ProtocolError> {
    match value {
        JsonValue::Number(number) if number.is_finite() => Ok(number),
        JsonValue::Number(_) => Err(ProtocolError::OutOfRange(field)),
        _ => Err(ProtocolError::WrongType(field)),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn bounded(value: JsonValue<'_>, field: &'static str, min: f32, max: f32) -> Result<f32, ProtocolError> {
    let number = number(value, field)?;
    if number < f64::from(min) || number > f64::from(max) {
        return Err(ProtocolError::OutOfRange(field));
    }
    Ok(number as f32)
}

fn positive(value: JsonValue<'_>, field: &'static str, max: f32) -> Result<f32, ProtocolError> {
    let number = bounded(value, field, 0.0, max)?;
    if number <= 0.0 {
        return Err(ProtocolError::OutOfRange(field));
    }
    Ok(number)
}

#[allow(clippy::cast_possible_truncation)]
fn integer(value: JsonValue<'_>, field: &'static str) -> Result<i64, ProtocolError> {
    let number = number(value, field)?;
    if trunc(number) != number {
        return Err(ProtocolError::WrongType(field));
    }
    if !(-1.0e15..=1.0e15).contains(&number) {
        return Err(ProtocolError::OutOfRange(field));
    }
    Ok(number as i64)
}
