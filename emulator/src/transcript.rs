//! Transcript files written while replaying scripted sessions.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// Scripted sessions, replayed by `capture_transcripts` or `--replay`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Balance,
    Drive,
    Fall,
    SensorFault,
}

impl TranscriptProfile {
    pub const ALL: [Self; 4] = [Self::Balance, Self::Drive, Self::Fall, Self::SensorFault];

    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Balance => "target/transcripts/emulator-balance.log",
            TranscriptProfile::Drive => "target/transcripts/emulator-drive.log",
            TranscriptProfile::Fall => "target/transcripts/emulator-fall.log",
            TranscriptProfile::SensorFault => "target/transcripts/emulator-sensor-fault.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Balance => "Balance emulator: recovery from a small tilt",
            TranscriptProfile::Drive => "Balance emulator: queued motion commands",
            TranscriptProfile::Fall => "Balance emulator: fall detection and recovery",
            TranscriptProfile::SensorFault => "Balance emulator: IMU fault handling",
        }
    }

    /// Starting tilt handed to the plant.
    pub fn initial_tilt(self) -> f32 {
        match self {
            TranscriptProfile::Balance => 3.0,
            _ => 0.0,
        }
    }

    pub fn script(self) -> &'static [&'static str] {
        match self {
            TranscriptProfile::Balance => &[
                ":plant",
                ":wait 500",
                ":plant",
                ":push 40",
                ":wait 1500",
                ":plant",
                "{\"command\":\"log\",\"parameters\":{\"samples\":5}}",
                ":wait 100",
                "{\"command\":\"status\"}",
            ],
            TranscriptProfile::Drive => &[
                ":wait 200",
                "{\"command\":\"turn_left\",\"parameters\":{\"angle\":45}}",
                "{\"command\":\"move_forward\",\"parameters\":{\"duration\":0.5,\"speed\":0.2}}",
                "{\"command\":\"status\"}",
                ":wait 3000",
                ":plant",
                "{\"command\":\"circle\",\"parameters\":{\"speed\":0.2,\"direction\":\"right\"}}",
                ":wait 1000",
                "{\"command\":\"stop\",\"priority\":100}",
                ":wait 500",
                "{\"command\":\"status\"}",
            ],
            TranscriptProfile::Fall => &[
                ":wait 200",
                "{\"command\":\"square\"}",
                ":tilt 60",
                ":wait 1000",
                "{\"command\":\"status\"}",
                "{\"command\":\"turn_left\"}",
                ":tilt 0",
                ":wait 500",
                ":plant",
                "{\"command\":\"status\"}",
            ],
            TranscriptProfile::SensorFault => &[
                ":wait 200",
                ":fault 3",
                ":wait 100",
                ":fault 15",
                ":wait 300",
                ":plant",
                "{\"command\":\"status\"}",
            ],
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| format!("Unknown transcript profile `{tag}`"))
    }

    pub fn tag(self) -> &'static str {
        match self {
            TranscriptProfile::Balance => "balance",
            TranscriptProfile::Drive => "drive",
            TranscriptProfile::Fall => "fall",
            TranscriptProfile::SensorFault => "sensor-fault",
        }
    }
}

pub struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    pub fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since power-on"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    pub fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TranscriptRole {
    Host,
    Robot,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Robot => "BOT <",
            TranscriptRole::Emulator => "EMU  ",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_round_trip_their_tags() {
        for profile in TranscriptProfile::ALL {
            assert_eq!(TranscriptProfile::from_tag(profile.tag()), Ok(profile));
            assert!(!profile.script().is_empty());
        }
        assert!(TranscriptProfile::from_tag("reboot").is_err());
    }
}
