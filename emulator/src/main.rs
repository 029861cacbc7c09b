mod plant;
mod session;
mod transcript;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{Session, SessionOptions, SessionOutput, USAGE};

fn main() -> io::Result<()> {
    let options = SessionOptions::from_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });
    let mut session = Session::new(options).unwrap_or_else(|err| {
        eprintln!("invalid configuration: {err}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let stderr = io::stderr();
    let mut diagnostics = stderr.lock();
    let mut line = String::new();

    if let Some(profile) = options.replay {
        session = session.record_to(profile)?;
        for script_line in profile.script() {
            writeln!(diagnostics, "> {script_line}")?;
            let output = session.handle_line(script_line)?;
            print_output(&mut writer, &mut diagnostics, &output)?;
        }
        writeln!(diagnostics, "Replay written to {}", profile.log_path())?;
    }

    writeln!(
        diagnostics,
        "Balance emulator ready at tilt {:.1} deg. Type `:help` for directives or `exit` to quit.",
        session.plant().pitch_deg()
    )?;

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }

        let trimmed = line.trim();
        if should_terminate(trimmed) {
            writeln!(diagnostics, "Session closed.")?;
            break;
        }

        let output = session.handle_line(trimmed)?;
        print_output(&mut writer, &mut diagnostics, &output)?;
    }

    Ok(())
}

fn print_output(
    writer: &mut impl Write,
    diagnostics: &mut impl Write,
    output: &SessionOutput,
) -> io::Result<()> {
    for response in &output.responses {
        writeln!(writer, "{response}")?;
    }
    writer.flush()?;
    for note in &output.diagnostics {
        writeln!(diagnostics, "{note}")?;
    }
    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}
