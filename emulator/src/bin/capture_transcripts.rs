use std::io;

#[allow(dead_code)]
#[path = "../plant.rs"]
mod plant;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;
#[allow(dead_code)]
#[path = "../transcript.rs"]
mod transcript;

use session::{Session, SessionOptions};
use transcript::TranscriptProfile;

fn main() -> io::Result<()> {
    for profile in TranscriptProfile::ALL {
        record_profile(profile)?;
        println!("wrote {}", profile.log_path());
    }
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let options = SessionOptions {
        tilt_deg: profile.initial_tilt(),
        ..SessionOptions::default()
    };
    let session = Session::new(options)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let mut session = session.record_to(profile)?;

    for line in profile.script() {
        let _ = session.handle_line(line)?;
    }
    Ok(())
}
