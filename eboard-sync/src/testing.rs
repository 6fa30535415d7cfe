//! In-memory stand-ins for the board, the server and the clock display.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use cozy_chess::{Board, Square};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::board_link::{BoardTransport, LedPattern, Tone, TransportError};
use crate::clock::{ClockDisplay, ClockOutcome};
use crate::occupancy::OccupancySnapshot;
use crate::remote::{EventStream, OngoingGame, RemoteError, RemoteEvent, RemoteSession};

#[derive(Debug)]
struct BoardState {
    occupancy: OccupancySnapshot,
    /// Errors returned by the next reads, before `occupancy` is reported again.
    read_errors: VecDeque<TransportError>,
    refuse_connect: bool,
    leds: LedPattern,
    led_writes: usize,
    beeps: usize,
    reads: usize,
    connected: bool
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            occupancy: OccupancySnapshot::EMPTY,
            read_errors: VecDeque::new(),
            refuse_connect: false,
            leds: LedPattern::OFF,
            led_writes: 0,
            beeps: 0,
            reads: 0,
            connected: false
        }
    }
}

/// A board whose sensors report whatever the test last placed on it.
#[derive(Debug, Clone, Default)]
pub struct MockBoard(Arc<Mutex<BoardState>>);

impl MockBoard {
    pub fn new(board: &Board) -> Self {
        let mock = Self::default();
        mock.place(board);
        mock
    }

    pub fn place(&self, board: &Board) {
        self.set_occupancy(OccupancySnapshot::of(board));
    }

    pub fn set_occupancy(&self, occupancy: OccupancySnapshot) {
        self.0.lock().occupancy = occupancy;
    }

    /// Lifts the piece on `from` and puts it down on `to`.
    pub fn slide(&self, from: Square, to: Square) {
        let mut state = self.0.lock();
        let squares = (state.occupancy.squares() & !from.bitboard()) | to.bitboard();
        state.occupancy = OccupancySnapshot::new(squares);
    }

    pub fn fail_next_read(&self, err: TransportError) {
        self.0.lock().read_errors.push_back(err);
    }

    pub fn refuse_connect(&self) {
        self.0.lock().refuse_connect = true;
    }

    pub fn leds(&self) -> LedPattern {
        self.0.lock().leds
    }

    pub fn led_writes(&self) -> usize {
        self.0.lock().led_writes
    }

    pub fn beeps(&self) -> usize {
        self.0.lock().beeps
    }

    pub fn reads(&self) -> usize {
        self.0.lock().reads
    }

    pub fn is_connected(&self) -> bool {
        self.0.lock().connected
    }
}

impl BoardTransport for MockBoard {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.0.lock();
        if state.refuse_connect {
            return Err(TransportError::ConnectionFailed);
        }
        state.connected = true;
        Ok(())
    }

    fn read_occupancy(&mut self) -> Result<OccupancySnapshot, TransportError> {
        let mut state = self.0.lock();
        state.reads += 1;
        match state.read_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(state.occupancy)
        }
    }

    fn set_indicator(&mut self, square: Square, on: bool) -> Result<(), TransportError> {
        let mut state = self.0.lock();
        let squares = if on {
            state.leds.squares() | square.bitboard()
        } else {
            state.leds.squares() & !square.bitboard()
        };
        state.leds = LedPattern(squares);
        state.led_writes += 1;
        Ok(())
    }

    fn set_all_indicators(&mut self, pattern: LedPattern) -> Result<(), TransportError> {
        let mut state = self.0.lock();
        state.leds = pattern;
        state.led_writes += 1;
        Ok(())
    }

    fn signal(&mut self, tone: Tone) -> Result<(), TransportError> {
        match tone {
            Tone::Beep => self.0.lock().beeps += 1
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.0.lock().connected = false;
    }
}

#[derive(Debug, Default)]
pub struct MockDisplay {
    lines: Mutex<Vec<(String, String)>>,
    outcomes: Mutex<Vec<ClockOutcome>>
}

impl MockDisplay {
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().clone()
    }

    pub fn outcomes(&self) -> Vec<ClockOutcome> {
        self.outcomes.lock().clone()
    }
}

impl ClockDisplay for MockDisplay {
    fn display(&self, line1: &str, line2: &str) {
        self.lines.lock().push((line1.to_owned(), line2.to_owned()));
    }

    fn signal_outcome(&self, outcome: ClockOutcome) {
        self.outcomes.lock().push(outcome);
    }
}

type Feed = mpsc::UnboundedSender<Result<RemoteEvent, RemoteError>>;

#[derive(Default)]
struct RemoteState {
    /// Streams queued for the next callers of `stream_events`.
    streams: VecDeque<Result<EventStream, RemoteError>>,
    submitted: Vec<(String, String)>,
    submit_results: VecDeque<Result<(), RemoteError>>,
    ongoing: Vec<OngoingGame>,
    connects: usize
}

/// A server scripted by the test: events go in through [`MockRemote::connect_feed`],
/// submissions are recorded.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<RemoteState>
}

impl MockRemote {
    /// Queues a stream for the next `stream_events` call and returns its sender.
    /// Dropping the sender ends the stream.
    pub fn connect_feed(&self) -> Feed {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        let stream: EventStream = Box::pin(stream);
        self.state.lock().streams.push_back(Ok(stream));
        tx
    }

    pub fn fail_next_connect(&self, err: RemoteError) {
        self.state.lock().streams.push_back(Err(err));
    }

    pub fn push_submit_result(&self, result: Result<(), RemoteError>) {
        self.state.lock().submit_results.push_back(result);
    }

    pub fn set_ongoing(&self, games: Vec<OngoingGame>) {
        self.state.lock().ongoing = games;
    }

    pub fn submitted(&self) -> Vec<(String, String)> {
        self.state.lock().submitted.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }
}

#[async_trait]
impl RemoteSession for MockRemote {
    async fn stream_events(&self) -> Result<EventStream, RemoteError> {
        let mut state = self.state.lock();
        state.connects += 1;
        state.streams.pop_front()
            .unwrap_or_else(|| Err(RemoteError::Unavailable("no stream scripted".into())))
    }

    async fn submit_move(&self, game_id: &str, mv: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.submitted.push((game_id.to_owned(), mv.to_owned()));
        state.submit_results.pop_front().unwrap_or(Ok(()))
    }

    async fn ongoing_games(&self) -> Result<Vec<OngoingGame>, RemoteError> {
        Ok(self.state.lock().ongoing.clone())
    }
}
