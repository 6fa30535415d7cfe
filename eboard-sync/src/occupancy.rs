//! Presence-only reads of the physical board.
//!
//! The sensor layer cannot tell pieces apart, so everything in this module is a
//! set of squares. Grids are written rank 8 first, file a first, matching how a
//! board looks from white's side.

use std::fmt;
use std::str::FromStr;

use cozy_chess::{BitBoard, Board, File, Rank, Square};
use thiserror::Error;

/// One read of all 64 squares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OccupancySnapshot(BitBoard);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OccupancyParseError {
    #[error("expected 8 ranks, found {0}")]
    RankCount(usize),
    #[error("rank {rank} does not describe 8 files")]
    RankWidth { rank: usize },
    #[error("unexpected character {0:?}")]
    InvalidChar(char)
}

impl OccupancySnapshot {
    pub const EMPTY: Self = Self(BitBoard::EMPTY);

    pub fn new(squares: BitBoard) -> Self {
        Self(squares)
    }

    /// Occupancy projection of a full position.
    pub fn of(board: &Board) -> Self {
        Self(board.occupied())
    }

    pub fn squares(&self) -> BitBoard {
        self.0
    }

    pub fn is_occupied(&self, square: Square) -> bool {
        self.0.has(square)
    }

    pub fn diff(&self, observed: &OccupancySnapshot) -> OccupancyDiff {
        OccupancyDiff {
            appeared: observed.0 & !self.0,
            vanished: self.0 & !observed.0
        }
    }

    /// Parses the piece-placement field of a FEN, which is what most
    /// electronic boards report. Piece letters only count as "occupied".
    pub fn from_board_fen(placement: &str) -> Result<Self, OccupancyParseError> {
        let placement = placement.split_whitespace().next().unwrap_or("");
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return Err(OccupancyParseError::RankCount(ranks.len()));
        }
        let mut squares = BitBoard::EMPTY;
        for (row, text) in ranks.iter().enumerate() {
            let rank = Rank::index(7 - row);
            let mut file = 0;
            for c in text.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file += skip as usize;
                } else if "pnbrqkPNBRQK".contains(c) {
                    if file >= 8 {
                        return Err(OccupancyParseError::RankWidth { rank: row });
                    }
                    squares |= Square::new(File::index(file), rank).bitboard();
                    file += 1;
                } else {
                    return Err(OccupancyParseError::InvalidChar(c));
                }
            }
            if file != 8 {
                return Err(OccupancyParseError::RankWidth { rank: row });
            }
        }
        Ok(Self(squares))
    }
}

/// Parses 64 `0`/`1` cells, rank 8 first. Whitespace and `/` separators are ignored,
/// so both `"11111111/11111111/..."` and eight newline-separated rows work.
impl FromStr for OccupancySnapshot {
    type Err = OccupancyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cells: Vec<char> = s.chars()
            .filter(|c| !c.is_whitespace() && *c != '/')
            .collect();
        if cells.len() != 64 {
            return Err(OccupancyParseError::RankCount(cells.len() / 8));
        }
        let mut squares = BitBoard::EMPTY;
        for (i, c) in cells.into_iter().enumerate() {
            let square = Square::new(File::index(i % 8), Rank::index(7 - i / 8));
            match c {
                '1' | 'x' | 'X' => squares |= square.bitboard(),
                '0' | '.' => {}
                c => return Err(OccupancyParseError::InvalidChar(c))
            }
        }
        Ok(Self(squares))
    }
}

impl fmt::Display for OccupancySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_grid(f, self.0)
    }
}

/// Squares whose presence changed between two reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyDiff {
    pub appeared: BitBoard,
    pub vanished: BitBoard
}

impl OccupancyDiff {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.vanished.is_empty()
    }

    pub fn changed(&self) -> BitBoard {
        self.appeared | self.vanished
    }
}

impl fmt::Display for OccupancyDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "appeared [")?;
        write_squares(f, self.appeared)?;
        write!(f, "] vanished [")?;
        write_squares(f, self.vanished)?;
        write!(f, "]")
    }
}

pub(crate) fn write_squares(f: &mut impl fmt::Write, squares: BitBoard) -> fmt::Result {
    for (i, square) in squares.into_iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", square)?;
    }
    Ok(())
}

pub(crate) fn write_grid(f: &mut impl fmt::Write, squares: BitBoard) -> fmt::Result {
    for row in 0..8 {
        let rank = Rank::index(7 - row);
        for file in File::ALL {
            let cell = if squares.has(Square::new(file, rank)) { '1' } else { '0' };
            write!(f, "{}", cell)?;
        }
        if row < 7 {
            writeln!(f)?;
        }
    }
    Ok(())
}
