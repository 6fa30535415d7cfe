//! Infers the move a player made from a presence-only read of the board.
//!
//! Every legal move from the reference position is played on a scratch copy
//! and its occupancy compared to the observation. Because the sensors carry no
//! piece identity, two outcomes can look alike:
//!
//! - a non-capturing promotion: the promoted piece is unknowable, so the queen
//!   promotion is chosen;
//! - one piece able to capture on two different squares: both leave the same
//!   occupancy. The caller may pass the squares it has seen empty during the turn
//!   (the captured piece is normally lifted first), which breaks the tie. Without
//!   that evidence the result is [`Resolution::Ambiguous`].

use std::fmt;

use cozy_chess::*;

use crate::occupancy::{write_squares, OccupancyDiff, OccupancySnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveFlag {
    Quiet,
    Capture,
    EnPassant,
    Castle
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateMove {
    pub mv: Move,
    pub flag: MoveFlag,
    /// The promotion piece was not observable and queen was assumed.
    pub promotion_defaulted: bool
}

impl CandidateMove {
    fn classify(board: &Board, mv: Move, promotion_defaulted: bool) -> Self {
        let stm = board.side_to_move();
        let flag = match board.color_on(mv.to) {
            Some(color) if color == stm => MoveFlag::Castle,
            Some(_) => MoveFlag::Capture,
            None if board.piece_on(mv.from) == Some(Piece::Pawn) && mv.from.file() != mv.to.file() => {
                MoveFlag::EnPassant
            }
            None => MoveFlag::Quiet
        };
        Self { mv, flag, promotion_defaulted }
    }

    /// Squares to light for this move: origin and destination.
    pub fn squares(&self) -> BitBoard {
        self.mv.from.bitboard() | self.mv.to.bitboard()
    }
}

/// More than one legal move explains the observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    pub candidates: Vec<Move>
}

impl Ambiguity {
    pub fn squares(&self) -> BitBoard {
        self.candidates.iter().fold(BitBoard::EMPTY, |acc, mv| acc | mv.to.bitboard())
    }
}

impl fmt::Display for Ambiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "occupancy matches")?;
        for mv in &self.candidates {
            write!(f, " {}", mv)?;
        }
        Ok(())
    }
}

/// No legal move explains the observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub observed: OccupancySnapshot,
    /// How the observation differs from the reference position itself.
    pub reference_diff: OccupancyDiff,
    /// The legal move whose result is closest to the observation.
    pub nearest: Option<Move>,
    /// Squares where the observation disagrees with `nearest`'s result. These are
    /// what the player has to fix.
    pub squares: BitBoard
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no legal move explains {}", self.reference_diff)?;
        if let Some(nearest) = self.nearest {
            write!(f, "; closest is {} which disagrees at [", nearest)?;
            write_squares(f, self.squares)?;
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NoChange,
    Move(CandidateMove),
    Ambiguous(Ambiguity),
    Illegal(Mismatch)
}

pub fn resolve(reference: &Board, observed: &OccupancySnapshot) -> Resolution {
    resolve_with(reference, observed, BitBoard::EMPTY)
}

/// [`resolve`] with the set of squares seen empty since `reference` was current,
/// used only to split occupancy-equivalent captures.
pub fn resolve_with(reference: &Board, observed: &OccupancySnapshot, vacated: BitBoard) -> Resolution {
    let before = OccupancySnapshot::of(reference);
    if before == *observed {
        return Resolution::NoChange;
    }

    let target = observed.squares();
    let mut matches: Vec<Move> = Vec::new();
    let mut nearest: Option<(u32, Move, BitBoard)> = None;
    reference.generate_moves(|moves| {
        for mv in moves {
            let mut scratch = reference.clone();
            scratch.play_unchecked(mv);
            let wrong = scratch.occupied() ^ target;
            if wrong.is_empty() {
                matches.push(mv);
            } else if nearest.map_or(true, |(best, _, _)| wrong.len() < best) {
                nearest = Some((wrong.len(), mv, wrong));
            }
        }
        false
    });

    // Promotions to different pieces are indistinguishable; keep the queen.
    let promotion_defaulted = matches.iter().any(|mv| mv.promotion.is_some());
    matches.retain(|mv| matches!(mv.promotion, None | Some(Piece::Queen)));

    match matches.len() {
        0 => {
            let (nearest, squares) = match nearest {
                Some((_, mv, wrong)) => (Some(mv), wrong),
                None => (None, before.diff(observed).changed())
            };
            Resolution::Illegal(Mismatch {
                observed: *observed,
                reference_diff: before.diff(observed),
                nearest,
                squares
            })
        }
        1 => Resolution::Move(CandidateMove::classify(reference, matches[0], promotion_defaulted)),
        _ => {
            let witnessed: Vec<Move> = matches.iter()
                .copied()
                .filter(|mv| vacated.has(mv.to))
                .collect();
            if let [mv] = witnessed[..] {
                Resolution::Move(CandidateMove::classify(reference, mv, promotion_defaulted))
            } else {
                Resolution::Ambiguous(Ambiguity { candidates: matches })
            }
        }
    }
}
