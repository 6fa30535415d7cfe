//! Live countdown between authoritative clock updates from the server.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use cozy_chess::Color;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::time_control::{deserialize_duration, TimeControl};

/// External clock display: two text lines and a few canned end-of-game screens.
pub trait ClockDisplay: Send + Sync + 'static {
    fn display(&self, line1: &str, line2: &str);

    fn signal_outcome(&self, outcome: ClockOutcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOutcome {
    WhiteWon,
    BlackWon,
    Drawn,
    GameOver
}

impl ClockOutcome {
    pub fn from_winner(winner: Option<Color>) -> Self {
        match winner {
            Some(Color::White) => ClockOutcome::WhiteWon,
            Some(Color::Black) => ClockOutcome::BlackWon,
            None => ClockOutcome::Drawn
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub refresh: Duration,
    /// Characters per display line.
    pub line_width: usize
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            refresh: Duration::from_millis(300),
            line_width: 16
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClockState {
    white: Duration,
    black: Duration,
    /// Side whose time is running.
    running: Option<Color>,
    recorded_at: Option<Instant>,
    flagged: Option<Color>,
    stopped: bool
}

impl ClockState {
    pub fn recorded(&self, side: Color) -> Duration {
        match side {
            Color::White => self.white,
            Color::Black => self.black
        }
    }

    pub fn running(&self) -> Option<Color> {
        self.running
    }

    pub fn flagged(&self) -> Option<Color> {
        self.flagged
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Remaining time as of `now`. Only the running side counts down.
    pub fn display_time(&self, side: Color, now: Instant) -> Duration {
        let recorded = self.recorded(side);
        match (self.running, self.recorded_at) {
            (Some(running), Some(at)) if running == side && !self.stopped => {
                recorded.saturating_sub(now.saturating_duration_since(at))
            }
            _ => recorded
        }
    }
}

/// What a refresh tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No move recorded yet.
    Waiting,
    Displayed,
    Flagged(Color),
    Halted
}

#[derive(Debug)]
pub struct ClockSync {
    config: ClockConfig,
    state: Mutex<ClockState>
}

impl ClockSync {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ClockState::default())
        }
    }

    /// Fresh state for a new game; nothing runs until the first move.
    pub fn start_game(&self, time_control: Option<TimeControl>) {
        let mut state = self.state.lock();
        *state = ClockState::default();
        if let Some(tc) = time_control {
            state.white = tc.time;
            state.black = tc.time;
        }
        debug!(?time_control, "clock reset");
    }

    /// Records the server's remaining times. `to_move` defaults to the side
    /// after the previously running one (black after the first move).
    pub fn on_move(&self, wtime: Duration, btime: Duration, to_move: Option<Color>) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        let to_move = to_move.unwrap_or_else(|| state.running.map_or(Color::Black, |c| !c));
        state.white = wtime;
        state.black = btime;
        state.running = Some(to_move);
        state.recorded_at = Some(Instant::now());
        debug!(?wtime, ?btime, ?to_move, "clock baseline recorded");
    }

    pub fn stop(&self) {
        self.state.lock().stopped = true;
    }

    pub fn snapshot(&self) -> ClockState {
        self.state.lock().clone()
    }

    pub fn display_time(&self, side: Color) -> Duration {
        self.state.lock().display_time(side, Instant::now())
    }

    /// One refresh: derive the live times, push them to `display`, and detect flag-fall.
    pub fn tick<D: ClockDisplay + ?Sized>(&self, display: &D) -> Tick {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.stopped {
            return Tick::Halted;
        }
        let (Some(running), Some(_)) = (state.running, state.recorded_at) else {
            return Tick::Waiting;
        };
        let white = state.display_time(Color::White, now);
        let black = state.display_time(Color::Black, now);
        let remaining = if running == Color::White { white } else { black };
        if remaining.is_zero() {
            state.flagged = Some(running);
            state.stopped = true;
            drop(state);
            info!(side = ?running, "flag fell");
            display.display(
                &clock_line('W', white, self.config.line_width),
                &clock_line('B', black, self.config.line_width)
            );
            display.signal_outcome(ClockOutcome::from_winner(Some(!running)));
            return Tick::Flagged(running);
        }
        drop(state);
        display.display(
            &clock_line('W', white, self.config.line_width),
            &clock_line('B', black, self.config.line_width)
        );
        Tick::Displayed
    }

    /// Refreshes `display` until a flag falls (returning the flagged side) or
    /// [`ClockSync::stop`] is called.
    pub async fn run_countdown<D: ClockDisplay + ?Sized>(self: Arc<Self>, display: Arc<D>) -> Option<Color> {
        let mut interval = tokio::time::interval(self.config.refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.tick(&*display) {
                Tick::Flagged(side) => return Some(side),
                Tick::Halted => return None,
                Tick::Waiting | Tick::Displayed => {}
            }
        }
    }
}

/// `W: 0:03:00` padded or cut to `width`.
pub fn clock_line(prefix: char, time: Duration, width: usize) -> String {
    let secs = time.as_secs();
    let mut line = String::with_capacity(width);
    let _ = write!(line, "{}: {}:{:02}:{:02}", prefix, secs / 3600, secs / 60 % 60, secs % 60);
    if secs < 10 && !time.is_zero() {
        let _ = write!(line, ".{}", time.subsec_millis() / 100);
    }
    let mut line: String = line.chars().take(width).collect();
    while line.chars().count() < width {
        line.push(' ');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDisplay;

    #[test]
    fn clock_lines_are_fixed_width() {
        assert_eq!(clock_line('W', Duration::from_secs(180), 16), "W: 0:03:00      ");
        assert_eq!(clock_line('B', Duration::from_millis(4300), 16), "B: 0:00:04.3    ");
        assert_eq!(clock_line('W', Duration::from_secs(3 * 3600 + 61), 8), "W: 3:01:");
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_runs_before_the_first_move() {
        let clock = ClockSync::new(ClockConfig::default());
        clock.start_game(Some(TimeControl::new(Duration::from_secs(60), Duration::ZERO)));
        let display = MockDisplay::default();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(clock.tick(&display), Tick::Waiting);
        assert_eq!(clock.display_time(Color::White), Duration::from_secs(60));
        assert!(display.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_side_to_move_counts_down() {
        let clock = ClockSync::new(ClockConfig::default());
        clock.start_game(None);
        clock.on_move(Duration::from_secs(24), Duration::from_secs(13), Some(Color::White));
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(clock.display_time(Color::White), Duration::from_secs(4));
        assert_eq!(clock.display_time(Color::Black), Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn mover_alternates_when_not_given() {
        let clock = ClockSync::new(ClockConfig::default());
        clock.start_game(None);
        clock.on_move(Duration::from_secs(60), Duration::from_secs(60), None);
        assert_eq!(clock.snapshot().running(), Some(Color::Black));
        clock.on_move(Duration::from_secs(60), Duration::from_secs(58), None);
        assert_eq!(clock.snapshot().running(), Some(Color::White));
    }

    #[tokio::test(start_paused = true)]
    async fn flag_falls_exactly_once() {
        let clock = Arc::new(ClockSync::new(ClockConfig::default()));
        let display = Arc::new(MockDisplay::default());
        clock.start_game(None);
        let start = Instant::now();
        clock.on_move(Duration::from_secs(24), Duration::from_secs(13), Some(Color::White));

        let countdown = tokio::spawn(clock.clone().run_countdown(display.clone()));
        tokio::time::sleep(Duration::from_secs(20)).await;
        let (white, black) = display.lines().last().cloned().unwrap();
        assert!(white.starts_with("W: 0:00:0"), "{}", white);
        assert!(black.starts_with("B: 0:00:13"), "{}", black);
        assert!(display.outcomes().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(countdown.await.unwrap(), Some(Color::White));
        assert!(Instant::now() - start <= Duration::from_secs(25));
        assert_eq!(display.outcomes(), vec![ClockOutcome::BlackWon]);
        assert_eq!(clock.snapshot().flagged(), Some(Color::White));

        // Halted: later ticks and moves change nothing.
        assert_eq!(clock.tick(&*display), Tick::Halted);
        clock.on_move(Duration::from_secs(10), Duration::from_secs(10), None);
        assert_eq!(display.outcomes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_the_countdown() {
        let clock = Arc::new(ClockSync::new(ClockConfig::default()));
        let display = Arc::new(MockDisplay::default());
        clock.start_game(None);
        clock.on_move(Duration::from_secs(60), Duration::from_secs(60), Some(Color::Black));
        let countdown = tokio::spawn(clock.clone().run_countdown(display.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        clock.stop();
        assert_eq!(countdown.await.unwrap(), None);
        assert!(display.outcomes().is_empty());
    }
}
