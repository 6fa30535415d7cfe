//! The reconciliation loop between the physical board and the [`GameModel`].

use std::time::Duration;

use cozy_chess::{BitBoard, Color, Move};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::game::GameModel;
use crate::occupancy::OccupancySnapshot;
use crate::resolver::{resolve_with, CandidateMove, Resolution};
use crate::time_control::deserialize_duration;
use crate::uci_convert::move_to_uci;

mod error;
mod transport;

pub use error::{LinkError, TransportError};
pub use transport::{BoardTransport, LedPattern, Signal, Tone};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Sleep between occupancy reads while nothing is happening.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    /// Sleep after an illegal or ambiguous read, while the player fixes the board.
    #[serde(deserialize_with = "deserialize_duration")]
    pub illegal_retry_delay: Duration
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            illegal_retry_delay: Duration::from_millis(500)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    Polling,
    Applying,
    /// The board shows something no legal move produces; mismatched squares are lit.
    AwaitingCorrection,
    /// The board still shows the position before the opponent's move.
    AwaitingReplay,
    Cancelled
}

/// A move the player completed on the board, already applied to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMove {
    pub candidate: CandidateMove,
    /// Standard UCI, ready to submit.
    pub uci: String
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    Moved(LocalMove),
    /// The game ended while waiting.
    GameOver,
    TimedOut
}

/// Result of a single poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    NotOurTurn,
    NoSignal,
    NoChange,
    AwaitingReplay,
    Moved(LocalMove),
    Ambiguous,
    Illegal
}

#[derive(Debug)]
struct LinkState {
    game: GameModel,
    local: Color,
    last_move: Option<Move>,
    last_move_remote: bool,
    /// Squares seen empty since the current position became current.
    vacated: BitBoard,
    phase: LinkPhase,
    diagnostic: Option<String>,
    lit: LedPattern
}

impl LinkState {
    fn new(game: GameModel, local: Color) -> Self {
        Self {
            game,
            local,
            last_move: None,
            last_move_remote: false,
            vacated: BitBoard::EMPTY,
            phase: LinkPhase::Idle,
            diagnostic: None,
            lit: LedPattern::OFF
        }
    }

    fn last_move_pattern(&self) -> LedPattern {
        self.last_move.map_or(LedPattern::OFF, |mv| {
            LedPattern(mv.from.bitboard() | mv.to.bitboard())
        })
    }
}

/// Owns the game model and the board transport for one game at a time.
///
/// Lock order is always `state` then `transport`. Neither lock is held across
/// an `.await`.
#[derive(Debug)]
pub struct BoardLink<T> {
    config: LinkConfig,
    state: Mutex<LinkState>,
    transport: Mutex<T>,
    game_over: watch::Sender<bool>
}

impl<T: BoardTransport> BoardLink<T> {
    pub fn new(mut transport: T, config: LinkConfig) -> Result<Self, TransportError> {
        transport.connect()?;
        let probe = transport.read_occupancy()?;
        info!("board connected, {} squares occupied", probe.squares().len());
        transport.clear_indicators()?;
        let (game_over, _) = watch::channel(false);
        Ok(Self {
            config,
            state: Mutex::new(LinkState::new(GameModel::default(), Color::White)),
            transport: Mutex::new(transport),
            game_over
        })
    }

    /// Starts a new game. Any pending [`BoardLink::await_local_move`] from the
    /// previous game must have been cancelled first.
    pub fn reset(&self, game: GameModel, local: Color) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        *state = LinkState::new(game, local);
        self.game_over.send_replace(false);
        self.transport.lock().clear_indicators()?;
        debug!(?local, "board link reset");
        Ok(())
    }

    pub fn game(&self) -> GameModel {
        self.state.lock().game.clone()
    }

    pub fn phase(&self) -> LinkPhase {
        self.state.lock().phase
    }

    pub fn last_move(&self) -> Option<Move> {
        self.state.lock().last_move
    }

    /// Description of the last illegal or ambiguous read, if any.
    pub fn last_diagnostic(&self) -> Option<String> {
        self.state.lock().diagnostic.clone()
    }

    pub fn lit(&self) -> LedPattern {
        self.state.lock().lit
    }

    /// Applies an authoritative remote move and highlights it. The physical
    /// board is not consulted; it catches up during the next local turn.
    pub fn inject_remote_move(&self, mv: Move) -> Result<(), LinkError> {
        self.inject_remote_moves(&[mv])
    }

    /// Applies a backlog of remote moves under one lock, highlighting only the
    /// last. Nothing is applied if any move is illegal.
    pub fn inject_remote_moves(&self, moves: &[Move]) -> Result<(), LinkError> {
        let Some(&last) = moves.last() else {
            return Ok(());
        };
        let mut state = self.state.lock();
        let mut game = state.game.clone();
        for &mv in moves {
            game.apply(mv)?;
        }
        state.game = game;
        state.last_move = Some(last);
        state.last_move_remote = true;
        state.vacated = BitBoard::EMPTY;
        state.diagnostic = None;
        info!(mv = %last, backlog = moves.len() - 1, "remote move injected");
        let pattern = state.last_move_pattern();
        self.highlight(&mut state, pattern)?;
        Ok(())
    }

    /// Replaces the model wholesale, for when the local history disagrees with the server.
    pub fn adopt(&self, game: GameModel) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        warn!(local = state.game.len(), remote = game.len(), "adopting remote history");
        state.last_move = game.last_move();
        state.last_move_remote = game.turn() == state.local;
        state.game = game;
        state.vacated = BitBoard::EMPTY;
        state.diagnostic = None;
        let pattern = state.last_move_pattern();
        self.highlight(&mut state, pattern)
    }

    /// Unblocks any pending [`BoardLink::await_local_move`] with [`AwaitOutcome::GameOver`].
    pub fn cancel(&self) {
        self.state.lock().phase = LinkPhase::Cancelled;
        self.game_over.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.game_over.borrow()
    }

    /// Resolves once [`BoardLink::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut game_over = self.game_over.subscribe();
        while !*game_over.borrow() {
            if game_over.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn show_signal(&self, signal: Signal) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.light(&mut state, signal.pattern())
    }

    pub fn clear_indicators(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.lit = LedPattern::OFF;
        self.transport.lock().clear_indicators()
    }

    pub fn beep(&self) -> Result<(), TransportError> {
        self.transport.lock().signal(Tone::Beep)
    }

    pub fn disconnect(&self) {
        self.cancel();
        let mut transport = self.transport.lock();
        if let Err(err) = transport.clear_indicators() {
            warn!("could not clear indicators on disconnect: {}", err);
        }
        transport.disconnect();
        info!("board disconnected");
    }

    /// Waits until the player completes a legal move on the board, applies it
    /// and returns it. Illegal and ambiguous reads are shown on the indicators
    /// and retried. Returns early with [`AwaitOutcome::GameOver`] once
    /// [`BoardLink::cancel`] is called.
    pub async fn await_local_move(&self, timeout: Option<Duration>) -> Result<AwaitOutcome, TransportError> {
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.poll_until_move()).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(AwaitOutcome::TimedOut)
            },
            None => self.poll_until_move().await
        }
    }

    async fn poll_until_move(&self) -> Result<AwaitOutcome, TransportError> {
        let mut game_over = self.game_over.subscribe();
        let mut attempts = 0u32;
        loop {
            if *game_over.borrow() {
                debug!("await cancelled by game over");
                return Ok(AwaitOutcome::GameOver);
            }
            attempts += 1;
            let delay = match self.poll_once()? {
                Poll::Moved(local) => {
                    info!(mv = %local.uci, attempts, "move made on board");
                    return Ok(AwaitOutcome::Moved(local));
                }
                Poll::Illegal | Poll::Ambiguous => self.config.illegal_retry_delay,
                _ => self.config.poll_interval
            };
            tokio::select! {
                _ = game_over.changed() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One read-compare-apply cycle.
    pub fn poll_once(&self) -> Result<Poll, TransportError> {
        let mut state = self.state.lock();
        if state.phase == LinkPhase::Cancelled {
            return Ok(Poll::NotOurTurn);
        }
        if state.game.turn() != state.local || state.game.outcome().is_some() {
            return Ok(Poll::NotOurTurn);
        }
        let corrected = matches!(state.phase, LinkPhase::AwaitingCorrection | LinkPhase::AwaitingReplay);
        state.phase = LinkPhase::Polling;

        let observed = match self.transport.lock().read_occupancy() {
            Ok(observed) => observed,
            Err(err) if err.is_recoverable() => {
                warn!("{}", err);
                state.phase = LinkPhase::Idle;
                return Ok(Poll::NoSignal);
            }
            Err(err) => return Err(err)
        };
        let reference = state.game.board().clone();

        if state.last_move_remote {
            let stale = state.game.previous_board()
                .map_or(false, |prev| OccupancySnapshot::of(prev) == observed);
            if stale {
                state.phase = LinkPhase::AwaitingReplay;
                let pattern = state.last_move_pattern();
                self.light(&mut state, pattern)?;
                return Ok(Poll::AwaitingReplay);
            }
        }
        state.vacated |= reference.occupied() & !observed.squares();

        match resolve_with(&reference, &observed, state.vacated) {
            Resolution::NoChange => {
                state.phase = LinkPhase::Idle;
                state.vacated = BitBoard::EMPTY;
                if corrected {
                    state.diagnostic = None;
                    let pattern = state.last_move_pattern();
                    self.light(&mut state, pattern)?;
                }
                Ok(Poll::NoChange)
            }
            Resolution::Move(candidate) => {
                state.phase = LinkPhase::Applying;
                if let Err(err) = state.game.apply(candidate.mv) {
                    // Generated from the same position, so this is a bug rather than a player error.
                    warn!("resolved move rejected by model: {}", err);
                    state.phase = LinkPhase::AwaitingCorrection;
                    return Ok(Poll::Illegal);
                }
                if candidate.promotion_defaulted {
                    info!(mv = %candidate.mv, "promotion piece not observable, assuming queen");
                }
                state.last_move = Some(candidate.mv);
                state.last_move_remote = false;
                state.vacated = BitBoard::EMPTY;
                state.diagnostic = None;
                self.highlight(&mut state, LedPattern(candidate.squares()))?;
                state.phase = LinkPhase::Idle;
                let uci = move_to_uci(&reference, candidate.mv);
                Ok(Poll::Moved(LocalMove { candidate, uci }))
            }
            Resolution::Ambiguous(ambiguity) => {
                debug!("{}", ambiguity);
                state.diagnostic = Some(ambiguity.to_string());
                state.phase = LinkPhase::AwaitingCorrection;
                self.light(&mut state, LedPattern(ambiguity.squares()))?;
                Ok(Poll::Ambiguous)
            }
            Resolution::Illegal(mismatch) => {
                debug!("{}", mismatch);
                state.diagnostic = Some(mismatch.to_string());
                state.phase = LinkPhase::AwaitingCorrection;
                self.light(&mut state, LedPattern(mismatch.squares))?;
                Ok(Poll::Illegal)
            }
        }
    }

    /// Clear-then-set, so a new move never shows alongside the previous one.
    fn highlight(&self, state: &mut LinkState, pattern: LedPattern) -> Result<(), TransportError> {
        let mut transport = self.transport.lock();
        transport.clear_indicators()?;
        transport.set_all_indicators(pattern)?;
        state.lit = pattern;
        Ok(())
    }

    /// Updates only what changed; a single square is toggled on its own.
    fn light(&self, state: &mut LinkState, pattern: LedPattern) -> Result<(), TransportError> {
        let changed = state.lit.squares() ^ pattern.squares();
        if changed.is_empty() {
            return Ok(());
        }
        let mut transport = self.transport.lock();
        if changed.len() == 1 {
            for square in changed {
                transport.set_indicator(square, pattern.is_lit(square))?;
            }
        } else {
            transport.set_all_indicators(pattern)?;
        }
        state.lit = pattern;
        Ok(())
    }
}
