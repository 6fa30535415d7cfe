use std::path::PathBuf;

use cozy_chess::Square;
use eboard_sync::board_link::{BoardTransport, LedPattern, Tone, TransportError};
use eboard_sync::occupancy::OccupancySnapshot;
use tracing::{info, warn};

/// A board whose sensors are a text file, re-read on every poll. The file
/// holds either a 0/1 grid or a FEN piece placement.
#[derive(Debug)]
pub struct FileBoard {
    path: PathBuf,
    leds: LedPattern
}

impl FileBoard {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            leds: LedPattern::OFF
        }
    }
}

pub fn parse_occupancy(text: &str) -> Option<OccupancySnapshot> {
    text.parse()
        .or_else(|_| OccupancySnapshot::from_board_fen(text.trim()))
        .ok()
}

impl BoardTransport for FileBoard {
    fn connect(&mut self) -> Result<(), TransportError> {
        if !self.path.is_file() {
            return Err(TransportError::ConnectionFailed);
        }
        info!(path = %self.path.display(), "reading board from file");
        Ok(())
    }

    fn read_occupancy(&mut self) -> Result<OccupancySnapshot, TransportError> {
        let text = std::fs::read_to_string(&self.path).map_err(|err| {
            warn!("board file unreadable: {}", err);
            TransportError::NoSignal
        })?;
        // A half-written file reads as garbage; the next poll sees it whole.
        parse_occupancy(&text).ok_or(TransportError::NoSignal)
    }

    fn set_indicator(&mut self, square: Square, on: bool) -> Result<(), TransportError> {
        let squares = if on {
            self.leds.squares() | square.bitboard()
        } else {
            self.leds.squares() & !square.bitboard()
        };
        self.set_all_indicators(LedPattern(squares))
    }

    fn set_all_indicators(&mut self, pattern: LedPattern) -> Result<(), TransportError> {
        if pattern != self.leds {
            self.leds = pattern;
            if pattern == LedPattern::OFF {
                info!("leds off");
            } else {
                info!("leds:\n{}", pattern);
            }
        }
        Ok(())
    }

    fn signal(&mut self, tone: Tone) -> Result<(), TransportError> {
        match tone {
            Tone::Beep => info!("beep")
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.leds = LedPattern::OFF;
    }
}
