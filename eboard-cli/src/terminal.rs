use std::io::Write;

use eboard_sync::clock::{ClockDisplay, ClockOutcome};

/// Two-line clock rendered in place on stderr.
#[derive(Debug, Default)]
pub struct TerminalClock;

impl ClockDisplay for TerminalClock {
    fn display(&self, line1: &str, line2: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{} | {}", line1, line2);
        let _ = stderr.flush();
    }

    fn signal_outcome(&self, outcome: ClockOutcome) {
        let text = match outcome {
            ClockOutcome::WhiteWon => "1-0",
            ClockOutcome::BlackWon => "0-1",
            ClockOutcome::Drawn => "1/2-1/2",
            ClockOutcome::GameOver => "game over"
        };
        eprintln!("\n{}", text);
    }
}
