use std::fmt;

use cozy_chess::{BitBoard, File, Rank, Square};

use crate::occupancy::{write_grid, OccupancySnapshot};

use super::error::TransportError;

/// The physical board: a presence sensor grid with one LED per square and a buzzer.
///
/// Implementations are hardware drivers and are expected to return quickly;
/// callers serialize all access, so no method is ever invoked concurrently.
pub trait BoardTransport: Send + 'static {
    /// Opens the link, failing with [`TransportError::ConnectionFailed`] if the
    /// board does not answer a probe read.
    fn connect(&mut self) -> Result<(), TransportError>;

    fn read_occupancy(&mut self) -> Result<OccupancySnapshot, TransportError>;

    fn set_indicator(&mut self, square: Square, on: bool) -> Result<(), TransportError>;

    fn set_all_indicators(&mut self, pattern: LedPattern) -> Result<(), TransportError>;

    fn clear_indicators(&mut self) -> Result<(), TransportError> {
        self.set_all_indicators(LedPattern::OFF)
    }

    fn signal(&mut self, tone: Tone) -> Result<(), TransportError>;

    fn disconnect(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Beep
}

/// Which LEDs are lit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedPattern(pub BitBoard);

impl LedPattern {
    pub const OFF: Self = Self(BitBoard::EMPTY);

    pub fn squares(&self) -> BitBoard {
        self.0
    }

    pub fn is_lit(&self, square: Square) -> bool {
        self.0.has(square)
    }
}

impl From<BitBoard> for LedPattern {
    fn from(squares: BitBoard) -> Self {
        Self(squares)
    }
}

impl fmt::Display for LedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_grid(f, self.0)
    }
}

/// Canned light shows used to talk to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Ring,
    LeftHalf,
    RightHalf,
    CenterLine,
    CenterCross,
    GameOver
}

fn files(range: std::ops::RangeInclusive<usize>) -> BitBoard {
    range.fold(BitBoard::EMPTY, |acc, i| acc | File::index(i).bitboard())
}

fn ranks(range: std::ops::RangeInclusive<usize>) -> BitBoard {
    range.fold(BitBoard::EMPTY, |acc, i| acc | Rank::index(i).bitboard())
}

impl Signal {
    pub fn pattern(self) -> LedPattern {
        let edge = files(0..=0) | files(7..=7) | ranks(0..=0) | ranks(7..=7);
        let center_line = ranks(3..=4);
        let cross = center_line | files(3..=4);
        LedPattern(match self {
            Signal::Ring => edge,
            Signal::LeftHalf => files(0..=3),
            Signal::RightHalf => files(4..=7),
            Signal::CenterLine => center_line,
            Signal::CenterCross => cross,
            Signal::GameOver => edge | cross
        })
    }
}
