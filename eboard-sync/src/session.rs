//! One account on the server, one board on the table: game lifecycle, moves
//! relayed both ways and the clock kept in step.

use std::sync::Arc;
use std::time::Duration;

use cozy_chess::{Board, Color, Move};
use futures_util::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::board_link::{AwaitOutcome, BoardLink, BoardTransport, LinkError, Signal, TransportError};
use crate::clock::{ClockDisplay, ClockOutcome, ClockSync};
use crate::game::{GameModel, Outcome, Termination};
use crate::remote::{GameStart, GameState, GameStatus, RemoteError, RemoteEvent, RemoteSession, Speed};
use crate::time_control::deserialize_duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Play correspondence games on the board too. They can last for weeks.
    pub allow_correspondence: bool,
    pub submit_attempts: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub submit_backoff: Duration,
    /// Consecutive failed stream connections before giving up.
    pub reconnect_attempts: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub reconnect_delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub rate_limit_backoff: Duration,
    /// How long the game-over lights stay on.
    #[serde(deserialize_with = "deserialize_duration")]
    pub game_over_linger: Duration
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_correspondence: false,
            submit_attempts: 5,
            submit_backoff: Duration::from_secs(3),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(20),
            rate_limit_backoff: Duration::from_secs(10),
            game_over_linger: Duration::from_secs(3)
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("board transport failed")]
    Transport(#[from] TransportError),
    #[error("remote server unavailable after {attempts} attempts")]
    RemoteUnavailable {
        attempts: u32,
        #[source]
        last_error: Option<RemoteError>
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingGameStart,
    Active,
    /// Presenting the result; back to [`SessionPhase::AwaitingGameStart`] afterwards.
    GameOver,
    Terminated
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSession {
    pub game_id: String,
    pub local: Color,
    pub correspondence: bool
}

/// What a server move list did to the local model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    UpToDate,
    /// The local model holds moves the server has not echoed yet.
    LocalAhead,
    /// New moves were applied; only `injected` was highlighted.
    Applied {
        fast_forwarded: usize,
        injected: Move
    },
    /// Histories disagreed and the server's replaced the local one.
    Adopted
}

#[derive(Debug)]
struct TaskReport {
    game_id: String,
    kind: ReportKind
}

#[derive(Debug)]
enum ReportKind {
    Submitted { uci: String },
    Abandoned,
    GaveUp { uci: String },
    BoardFailed(TransportError),
    FlagFell(Color)
}

#[derive(Debug)]
struct ActiveGame {
    info: GameSession,
    /// The server's history as of the last state event.
    remote: GameModel,
    local_task: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>
}

pub struct SessionCoordinator<T, R> {
    config: SessionConfig,
    link: Arc<BoardLink<T>>,
    clock: Arc<ClockSync>,
    remote: Arc<R>,
    display: Arc<dyn ClockDisplay>,
    phase: SessionPhase,
    active: Option<ActiveGame>,
    report_tx: mpsc::UnboundedSender<TaskReport>,
    reports: Option<mpsc::UnboundedReceiver<TaskReport>>
}

impl<T: BoardTransport, R: RemoteSession> SessionCoordinator<T, R> {
    pub fn new(
        link: Arc<BoardLink<T>>,
        clock: Arc<ClockSync>,
        remote: Arc<R>,
        display: Arc<dyn ClockDisplay>,
        config: SessionConfig
    ) -> Self {
        let (report_tx, reports) = mpsc::unbounded_channel();
        Self {
            config,
            link,
            clock,
            remote,
            display,
            phase: SessionPhase::AwaitingGameStart,
            active: None,
            report_tx,
            reports: Some(reports)
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn game_session(&self) -> Option<&GameSession> {
        self.active.as_ref().map(|active| &active.info)
    }

    pub fn link(&self) -> &Arc<BoardLink<T>> {
        &self.link
    }

    /// Consumes server events until `shutdown` flips or the server stays
    /// unreachable. Always leaves the session [`SessionPhase::Terminated`] and
    /// the board disconnected.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SessionError> {
        let mut reports = match self.reports.take() {
            Some(reports) => reports,
            None => {
                let (report_tx, reports) = mpsc::unbounded_channel();
                self.report_tx = report_tx;
                reports
            }
        };
        let result = self.run_streams(&mut reports, &mut shutdown).await;
        self.reports = Some(reports);
        if let Err(err) = &result {
            error!("session ended: {}", err);
        }
        self.terminate();
        result
    }

    async fn run_streams(
        &mut self,
        reports: &mut mpsc::UnboundedReceiver<TaskReport>,
        shutdown: &mut watch::Receiver<bool>
    ) -> Result<(), SessionError> {
        let mut failures = 0;
        while !*shutdown.borrow() {
            let delay = match self.remote.stream_events().await {
                Ok(mut events) => {
                    info!("event stream connected");
                    let mut received = false;
                    let failure = loop {
                        tokio::select! {
                            _ = shutdown.changed() => return Ok(()),
                            Some(report) = reports.recv() => self.handle_report(report)?,
                            event = events.next() => match event {
                                Some(Ok(event)) => {
                                    received = true;
                                    self.handle_event(event).await?;
                                }
                                Some(Err(RemoteError::Decode(err))) => warn!("skipping undecodable event: {}", err),
                                Some(Err(err)) => break Some(err),
                                None => break None
                            }
                        }
                    };
                    if received {
                        failures = 0;
                    }
                    match failure {
                        Some(err) => {
                            warn!("event stream failed: {}", err);
                            self.retry_delay(Some(err), &mut failures)?
                        }
                        None if received => {
                            info!("event stream ended, reconnecting");
                            self.config.reconnect_delay
                        }
                        None => self.retry_delay(None, &mut failures)?
                    }
                }
                Err(err) => {
                    warn!("could not open event stream: {}", err);
                    self.retry_delay(Some(err), &mut failures)?
                }
            };
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                Some(report) = reports.recv() => self.handle_report(report)?,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(())
    }

    fn retry_delay(&self, err: Option<RemoteError>, failures: &mut u32) -> Result<Duration, SessionError> {
        if matches!(err, Some(RemoteError::RateLimited)) {
            return Ok(self.config.rate_limit_backoff);
        }
        *failures += 1;
        if *failures >= self.config.reconnect_attempts {
            return Err(SessionError::RemoteUnavailable {
                attempts: *failures,
                last_error: err
            });
        }
        Ok(self.config.reconnect_delay)
    }

    /// Dispatches one server event. Only board failures are errors.
    pub async fn handle_event(&mut self, event: RemoteEvent) -> Result<(), SessionError> {
        match event {
            RemoteEvent::Challenge { challenge } => {
                info!(id = %challenge.id, speed = ?challenge.speed, "challenge received");
            }
            RemoteEvent::GameStart { game } => self.start_game(game).await?,
            RemoteEvent::GameState(state) => self.on_state(&state).await?,
            RemoteEvent::ChatLine(line) => {
                info!(room = %line.room, "{}: {}", line.username, line.text);
                self.link.beep()?;
            }
            RemoteEvent::GameFull(full) => {
                let current = self.active.as_ref().map(|active| active.info.game_id.as_str());
                if current != Some(full.id.as_str()) {
                    debug!(id = %full.id, "full state for an inactive game ignored");
                } else if !full.is_standard_start() {
                    warn!(id = %full.id, fen = ?full.initial_fen, "game did not start from the standard position, releasing the board");
                    self.finish_game(Outcome { termination: Termination::Aborted, winner: None }).await?;
                } else {
                    debug!(id = %full.id, "full game state, resynchronizing");
                    self.on_state(&full.state).await?;
                }
            }
            RemoteEvent::Unknown => debug!("ignoring unknown event")
        }
        Ok(())
    }

    async fn start_game(&mut self, game: GameStart) -> Result<(), SessionError> {
        if let Some(active) = &self.active {
            if active.info.game_id == game.game_id {
                debug!(id = %game.game_id, "repeated game start ignored");
            } else {
                warn!(id = %game.game_id, playing = %active.info.game_id, "board busy, ignoring new game");
            }
            return Ok(());
        }
        if !game.is_standard() {
            warn!(id = %game.game_id, variant = ?game.variant, "only standard chess can be played on the board");
            return Ok(());
        }
        let correspondence = self.is_correspondence(&game).await;
        if correspondence && !self.config.allow_correspondence {
            info!(id = %game.game_id, "skipping correspondence game");
            return Ok(());
        }

        info!(id = %game.game_id, local = ?game.color, "game started");
        self.link.reset(GameModel::default(), game.color)?;
        let countdown = if correspondence {
            None
        } else {
            self.clock.start_game(game.time_control());
            Some(self.spawn_countdown(game.game_id.clone()))
        };
        self.active = Some(ActiveGame {
            info: GameSession {
                game_id: game.game_id,
                local: game.color,
                correspondence
            },
            remote: GameModel::default(),
            local_task: None,
            countdown
        });
        self.phase = SessionPhase::Active;
        self.ensure_local_task();
        Ok(())
    }

    async fn is_correspondence(&self, game: &GameStart) -> bool {
        if let Some(speed) = game.speed {
            return speed == Speed::Correspondence;
        }
        match self.remote.ongoing_games().await {
            Ok(games) => games.iter()
                .any(|ongoing| ongoing.id == game.game_id && ongoing.speed == Speed::Correspondence),
            Err(err) => {
                warn!("could not look up game speed: {}", err);
                false
            }
        }
    }

    async fn on_state(&mut self, state: &GameState) -> Result<(), SessionError> {
        let Some(active) = self.active.as_mut() else {
            debug!("state for no active game ignored");
            return Ok(());
        };
        let remote = match GameModel::replay(Board::default(), &state.moves) {
            Ok(remote) => remote,
            Err(err) => {
                warn!("ignoring undecodable move list: {}", err);
                return Ok(());
            }
        };
        active.remote = remote.clone();
        if !active.info.correspondence && !remote.is_empty() {
            self.clock.on_move(state.wtime, state.btime, Some(remote.turn()));
        }

        self.reconcile(remote)?;

        let local = self.link.game().outcome();
        let reported = state.is_finished().then(|| Outcome {
            termination: match state.status {
                GameStatus::Aborted | GameStatus::NoStart => Termination::Aborted,
                _ => Termination::Remote
            },
            winner: state.winner
        });
        match local.or(reported) {
            Some(outcome) => self.finish_game(outcome).await,
            None => {
                self.ensure_local_task();
                Ok(())
            }
        }
    }

    /// Brings the local model up to the server's move list.
    ///
    /// All new moves are applied but only the newest is highlighted, so
    /// replaying a list already seen changes nothing.
    pub fn reconcile(&mut self, remote: GameModel) -> Result<Reconciled, SessionError> {
        let local = self.link.game();
        if local.is_ahead_of(&remote) {
            debug!(local = local.len(), remote = remote.len(), "waiting for the server to echo local moves");
            return Ok(Reconciled::LocalAhead);
        }
        let pending = match local.pending_from(&remote) {
            Ok(pending) => pending,
            Err(err) => {
                warn!("{}", err);
                self.link.adopt(remote)?;
                return Ok(Reconciled::Adopted);
            }
        };
        let Some((&injected, backlog)) = pending.split_last() else {
            return Ok(Reconciled::UpToDate);
        };
        match self.link.inject_remote_moves(&pending) {
            Ok(()) => Ok(Reconciled::Applied {
                fast_forwarded: backlog.len(),
                injected
            }),
            Err(LinkError::Transport(err)) => Err(err.into()),
            Err(LinkError::Game(err)) => {
                warn!("{}, adopting server history", err);
                self.link.adopt(remote)?;
                Ok(Reconciled::Adopted)
            }
        }
    }

    fn handle_report(&mut self, report: TaskReport) -> Result<(), SessionError> {
        let Some(active) = &self.active else {
            return Ok(());
        };
        if active.info.game_id != report.game_id {
            debug!(id = %report.game_id, "report from a finished game ignored");
            return Ok(());
        }
        match report.kind {
            ReportKind::Submitted { uci } => debug!(%uci, "move accepted"),
            ReportKind::Abandoned => debug!("local move abandoned"),
            ReportKind::GaveUp { uci } => {
                error!(%uci, "move never reached the server, resynchronizing");
                let remote = active.remote.clone();
                self.link.adopt(remote)?;
                self.ensure_local_task();
            }
            ReportKind::BoardFailed(err) => return Err(err.into()),
            ReportKind::FlagFell(side) => info!(?side, "flag fell, waiting for the server's verdict")
        }
        Ok(())
    }

    fn ensure_local_task(&mut self) {
        if self.phase != SessionPhase::Active {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let game = self.link.game();
        if game.turn() != active.info.local || game.outcome().is_some() {
            return;
        }
        if active.local_task.as_ref().map_or(false, |task| !task.is_finished()) {
            return;
        }

        let link = self.link.clone();
        let remote = self.remote.clone();
        let report_tx = self.report_tx.clone();
        let game_id = active.info.game_id.clone();
        let attempts = self.config.submit_attempts;
        let backoff = self.config.submit_backoff;
        active.local_task = Some(tokio::spawn(async move {
            let kind = match link.await_local_move(None).await {
                Ok(AwaitOutcome::Moved(local)) => {
                    submit_with_retry(&*link, &*remote, &game_id, &local.uci, attempts, backoff).await
                }
                Ok(AwaitOutcome::GameOver | AwaitOutcome::TimedOut) => ReportKind::Abandoned,
                Err(err) => ReportKind::BoardFailed(err)
            };
            let _ = report_tx.send(TaskReport { game_id, kind });
        }));
    }

    fn spawn_countdown(&self, game_id: String) -> JoinHandle<()> {
        let clock = self.clock.clone();
        let display = self.display.clone();
        let report_tx = self.report_tx.clone();
        tokio::spawn(async move {
            if let Some(side) = clock.run_countdown(display).await {
                let _ = report_tx.send(TaskReport { game_id, kind: ReportKind::FlagFell(side) });
            }
        })
    }

    async fn finish_game(&mut self, outcome: Outcome) -> Result<(), SessionError> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        info!(id = %active.info.game_id, %outcome, "game over");
        self.phase = SessionPhase::GameOver;
        self.link.cancel();
        let shown = self.clock.snapshot().flagged().map(|side| ClockOutcome::from_winner(Some(!side)));
        self.clock.stop();
        if let Some(countdown) = active.countdown.take() {
            countdown.abort();
        }
        if let Some(task) = active.local_task.take() {
            if let Err(err) = task.await {
                warn!("local move task failed: {}", err);
            }
        }
        let verdict = clock_outcome(&outcome);
        if shown != Some(verdict) {
            self.display.signal_outcome(verdict);
        }

        self.link.beep()?;
        self.link.show_signal(Signal::GameOver)?;
        tokio::time::sleep(self.config.game_over_linger).await;
        self.link.clear_indicators()?;
        self.phase = SessionPhase::AwaitingGameStart;
        Ok(())
    }

    fn terminate(&mut self) {
        if let Some(active) = self.active.take() {
            info!(id = %active.info.game_id, "abandoning game on shutdown");
            for task in active.local_task.into_iter().chain(active.countdown) {
                task.abort();
            }
        }
        self.clock.stop();
        self.link.disconnect();
        self.phase = SessionPhase::Terminated;
        info!("session terminated");
    }
}

fn clock_outcome(outcome: &Outcome) -> ClockOutcome {
    match outcome.termination {
        Termination::Aborted => ClockOutcome::GameOver,
        _ => ClockOutcome::from_winner(outcome.winner)
    }
}

async fn submit_with_retry<T: BoardTransport, R: RemoteSession>(
    link: &BoardLink<T>,
    remote: &R,
    game_id: &str,
    uci: &str,
    attempts: u32,
    backoff: Duration
) -> ReportKind {
    for attempt in 1..=attempts {
        if link.is_cancelled() {
            return ReportKind::Abandoned;
        }
        match remote.submit_move(game_id, uci).await {
            Ok(()) => return ReportKind::Submitted { uci: uci.to_owned() },
            Err(err) if err.is_game_finished() => {
                debug!(%uci, "game already over, dropping move");
                return ReportKind::Abandoned;
            }
            Err(err) => {
                warn!(%uci, attempt, "move submission failed: {}", err);
                if attempt < attempts {
                    tokio::select! {
                        _ = link.cancelled() => return ReportKind::Abandoned,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
    ReportKind::GaveUp { uci: uci.to_owned() }
}
