use std::fmt;
use std::io;
use std::time::Duration;

use balance_core::config::WheelSide;
use balance_core::telemetry::{EventId, TelemetryPayload, TelemetryRecord};
use balance_core::{
    BalanceConfig, ConfigError, EdgeBinding, MicrosInstant, PidGains, PulseCounter, Supervisor,
    WheelChannel,
};

use crate::plant::{Plant, PlantParams, QuadratureOutput, SimBridge, SimImu};
use crate::transcript::{TranscriptLogger, TranscriptProfile, TranscriptRole};

pub type SimSupervisor = Supervisor<'static, SimImu, SimBridge, MicrosInstant>;

const DEFAULT_STEP: Duration = Duration::from_millis(1);
const DEFAULT_PUSH_DPS: f32 = 30.0;

/// Longest `:wait`, to keep a typo from hanging the session.
const MAX_WAIT: Duration = Duration::from_secs(600);

pub const USAGE: &str = "Usage: balance-emulator [--tilt <deg>] [--step-ms <ms>] \
[--kp <v>] [--ki <v>] [--kd <v>] [--replay <balance|drive|fall|sensor-fault>]";

pub const HELP_LINES: &[&str] = &[
    "JSON lines are sent to the robot, e.g. {\"command\":\"status\"}",
    ":wait <ms>      - advance simulated time",
    ":tilt <deg>     - place the chassis at a tilt, at rest",
    ":push [dps]     - shove the chassis forward (negative for backward)",
    ":fault <reads>  - fail the next IMU reads",
    ":plant          - print the simulated body state",
    ":help           - show this list",
];

/// Start-up settings gathered from the command line.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SessionOptions {
    pub config: BalanceConfig,
    pub plant: PlantParams,
    pub tilt_deg: f32,
    pub step: Duration,
    /// Script to play back, into its transcript, before reading stdin.
    pub replay: Option<TranscriptProfile>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            config: BalanceConfig::DEFAULT,
            plant: PlantParams::DEFAULT,
            tilt_deg: 0.0,
            step: DEFAULT_STEP,
            replay: None,
        }
    }
}

impl SessionOptions {
    /// Parses `--flag value` pairs in order; unknown flags and bad values are errors.
    ///
    /// `--replay` also sets the profile's starting tilt, so a later `--tilt` wins.
    pub fn from_args<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self::default();
        let mut gains = options.config.gains;
        let mut args = args.into_iter();

        while let Some(flag) = args.next() {
            let value = args
                .next()
                .ok_or_else(|| format!("Expected value after {flag}"))?;
            if flag == "--replay" {
                let profile = TranscriptProfile::from_tag(&value)?;
                options.tilt_deg = profile.initial_tilt();
                options.replay = Some(profile);
                continue;
            }
            let number: f32 = value
                .parse()
                .map_err(|_| format!("Invalid number `{value}` for {flag}"))?;

            match flag.as_str() {
                "--tilt" => options.tilt_deg = number,
                "--step-ms" => {
                    if !(number > 0.0 && number <= 10.0) {
                        return Err(format!("--step-ms must be in (0, 10], got {value}"));
                    }
                    options.step = Duration::from_secs_f32(number / 1_000.0);
                }
                "--kp" => gains.kp = number,
                "--ki" => gains.ki = number,
                "--kd" => gains.kd = number,
                _ => return Err(format!("Unknown option `{flag}`")),
            }
        }

        options.config.gains = PidGains::new(gains.kp, gains.ki, gains.kd);
        Ok(options)
    }
}

/// Emulator-side commands, prefixed with `:` to keep them apart from JSON.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Directive {
    Wait(Duration),
    Tilt(f32),
    Push(f32),
    Fault(u32),
    Plant,
    Help,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DirectiveError {
    Unknown(String),
    MissingArgument(&'static str),
    InvalidArgument(String),
}

impl fmt::Display for DirectiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveError::Unknown(name) => write!(f, "unknown directive `:{name}`"),
            DirectiveError::MissingArgument(name) => write!(f, ":{name} needs an argument"),
            DirectiveError::InvalidArgument(value) => write!(f, "invalid argument `{value}`"),
        }
    }
}

/// Parses `line` if it is a directive; `None` means it goes to the robot.
pub fn parse_directive(line: &str) -> Option<Result<Directive, DirectiveError>> {
    let body = line.trim().strip_prefix(':')?;
    let mut words = body.split_whitespace();
    let name = words.next().unwrap_or_default();
    let argument = words.next();

    let directive = match name {
        "wait" => argument
            .ok_or(DirectiveError::MissingArgument("wait"))
            .and_then(parse_number::<u64>)
            .map(Duration::from_millis)
            .and_then(|wait| {
                if wait <= MAX_WAIT {
                    Ok(Directive::Wait(wait))
                } else {
                    Err(DirectiveError::InvalidArgument(format!("{}ms", wait.as_millis())))
                }
            }),
        "tilt" => argument
            .ok_or(DirectiveError::MissingArgument("tilt"))
            .and_then(parse_number::<f32>)
            .map(Directive::Tilt),
        "push" => argument
            .map_or(Ok(DEFAULT_PUSH_DPS), parse_number::<f32>)
            .map(Directive::Push),
        "fault" => argument
            .ok_or(DirectiveError::MissingArgument("fault"))
            .and_then(parse_number::<u32>)
            .map(Directive::Fault),
        "plant" => Ok(Directive::Plant),
        "help" => Ok(Directive::Help),
        other => Err(DirectiveError::Unknown(other.to_string())),
    };
    Some(directive)
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, DirectiveError> {
    text.parse()
        .map_err(|_| DirectiveError::InvalidArgument(text.to_string()))
}

/// What one input line produced, split by destination stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionOutput {
    /// Robot replies, one JSON object each.
    pub responses: Vec<String>,
    /// Telemetry records and directive feedback.
    pub diagnostics: Vec<String>,
}

/// A supervisor wired to the simulated plant on a simulated clock.
pub struct Session {
    plant: Plant,
    supervisor: SimSupervisor,
    encoders: [QuadratureOutput<'static>; 2],
    clock: MicrosInstant,
    step: Duration,
    cursor: EventId,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Result<Self, ConfigError> {
        // Leaked so the supervisor can borrow them for the rest of the process.
        let left: &'static PulseCounter = Box::leak(Box::new(PulseCounter::new()));
        let right: &'static PulseCounter = Box::leak(Box::new(PulseCounter::new()));

        let supervisor = Supervisor::new(
            options.config,
            SimImu::default(),
            WheelChannel::new(left, SimBridge::new()),
            WheelChannel::new(right, SimBridge::new()),
        )?;

        Ok(Self {
            plant: Plant::new(options.plant, options.config.geometry, options.tilt_deg),
            supervisor,
            encoders: [
                QuadratureOutput::new(EdgeBinding::new(WheelSide::Left, left)),
                QuadratureOutput::new(EdgeBinding::new(WheelSide::Right, right)),
            ],
            clock: MicrosInstant::ZERO,
            step: options.step,
            cursor: 0,
            transcript: None,
        })
    }

    /// Mirrors everything the session sees into the profile's transcript file.
    pub fn record_to(mut self, profile: TranscriptProfile) -> io::Result<Self> {
        self.transcript = Some(TranscriptLogger::new(profile)?);
        Ok(self)
    }

    pub fn handle_line(&mut self, line: &str) -> io::Result<SessionOutput> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(SessionOutput::default());
        }
        self.log(TranscriptRole::Host, trimmed)?;

        let mut output = SessionOutput::default();
        match parse_directive(trimmed) {
            Some(Ok(directive)) => self.apply(directive, &mut output),
            Some(Err(err)) => output.diagnostics.push(format!("ERR {err}")),
            None => output.responses = self.send(trimmed),
        }
        output.diagnostics.extend(self.drain_telemetry());

        for response in &output.responses {
            self.log(TranscriptRole::Robot, response)?;
        }
        for line in &output.diagnostics {
            self.log(TranscriptRole::Emulator, line)?;
        }
        Ok(output)
    }

    /// Streams one line to the robot at the current instant.
    pub fn send(&mut self, line: &str) -> Vec<String> {
        let now = self.clock;
        let mut responses = Vec::new();
        for byte in line.bytes().chain(std::iter::once(b'\n')) {
            if let Some(response) = self.supervisor.ingest(byte, now) {
                match response.to_line() {
                    Ok(encoded) => responses.push(encoded.as_str().to_owned()),
                    Err(_) => responses.push("{\"success\":false}".to_owned()),
                }
            }
        }
        responses
    }

    /// Advances simulated time by at least `duration`, one plant step at a time.
    pub fn run_for(&mut self, duration: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            self.step_once();
            elapsed += self.step;
        }
    }

    fn step_once(&mut self) {
        self.supervisor.sensor_mut().present(self.plant.reading());
        self.supervisor.tick(self.clock);

        let drive = [
            self.supervisor.left_motor().bridge().drive(),
            self.supervisor.right_motor().bridge().drive(),
        ];
        let edges = self.plant.step(self.step, drive);
        for (encoder, count) in self.encoders.iter_mut().zip(edges) {
            encoder.emit(count);
        }
        self.clock = self.clock + self.step;
    }

    fn apply(&mut self, directive: Directive, output: &mut SessionOutput) {
        match directive {
            Directive::Wait(duration) => self.run_for(duration),
            Directive::Tilt(tilt_deg) => self.plant.set_tilt(tilt_deg),
            Directive::Push(rate_dps) => self.plant.push(rate_dps),
            Directive::Fault(reads) => self.supervisor.sensor_mut().inject_failures(reads),
            Directive::Plant => output.diagnostics.push(self.describe_plant()),
            Directive::Help => output
                .diagnostics
                .extend(HELP_LINES.iter().map(|line| (*line).to_string())),
        }
    }

    fn describe_plant(&self) -> String {
        let [left, right] = self.plant.wheel_speeds();
        format!(
            "plant t={}ms pitch={:.2}deg rate={:.2}dps wheels={:.3}/{:.3}m/s heading={:.1}deg{}{}",
            self.clock.as_millis(),
            self.plant.pitch_deg(),
            self.plant.pitch_rate_dps(),
            left,
            right,
            self.plant.heading_deg(),
            if self.plant.is_lying() { " lying" } else { "" },
            match self.supervisor.sensor().failures_pending() {
                0 => String::new(),
                reads => format!(" faults-pending={reads}"),
            },
        )
    }

    fn drain_telemetry(&mut self) -> Vec<String> {
        let telemetry = self.supervisor.telemetry();
        let lines = telemetry.records_since(self.cursor).map(describe_record).collect();
        self.cursor = telemetry.next_id();
        lines
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let elapsed = Duration::from_micros(self.clock.as_micros());
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }

    #[must_use]
    pub const fn plant(&self) -> &Plant {
        &self.plant
    }

    #[must_use]
    pub const fn supervisor(&self) -> &SimSupervisor {
        &self.supervisor
    }
}

fn describe_record(record: &TelemetryRecord<MicrosInstant>) -> String {
    let head = format!(
        "telemetry t={}ms #{} {}",
        record.timestamp.as_millis(),
        record.id,
        record.event
    );
    match record.details {
        TelemetryPayload::None => head,
        details => format!("{head} {details:?}"),
    }
}
