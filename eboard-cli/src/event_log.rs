use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eboard_sync::remote::{EventStream, OngoingGame, RemoteError, RemoteEvent, RemoteSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::debug;

/// Server replayed from a JSON-lines file of recorded events. Submitted moves
/// are printed to stdout.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    /// Pause before each event, so the board has time to react.
    pace: Duration,
    replayed: AtomicBool,
    finished: Arc<Notify>
}

impl EventLog {
    pub fn new(path: PathBuf, pace: Duration) -> Self {
        Self {
            path,
            pace,
            replayed: AtomicBool::new(false),
            finished: Arc::new(Notify::new())
        }
    }

    /// Notified once the last event has been delivered and one more `pace` has passed.
    pub fn finished(&self) -> Arc<Notify> {
        self.finished.clone()
    }
}

#[async_trait]
impl RemoteSession for EventLog {
    async fn stream_events(&self) -> Result<EventStream, RemoteError> {
        if self.replayed.swap(true, Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("event log already replayed".into()));
        }
        let file = tokio::fs::File::open(&self.path).await
            .map_err(|err| RemoteError::Unavailable(err.to_string()))?;
        let pace = self.pace;
        let finished = self.finished.clone();
        let stream = async_stream::stream! {
            let mut lines = BufReader::new(file).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(RemoteError::Unavailable(err.to_string()));
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                tokio::time::sleep(pace).await;
                debug!("replaying {}", line);
                yield RemoteEvent::from_json(&line);
            }
            tokio::time::sleep(pace).await;
            finished.notify_one();
            futures_util::future::pending::<()>().await;
        };
        let stream: EventStream = Box::pin(stream);
        Ok(stream)
    }

    async fn submit_move(&self, game_id: &str, mv: &str) -> Result<(), RemoteError> {
        println!("{} {}", game_id, mv);
        Ok(())
    }

    async fn ongoing_games(&self) -> Result<Vec<OngoingGame>, RemoteError> {
        Ok(Vec::new())
    }
}
