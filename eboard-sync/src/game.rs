use std::fmt;

use cozy_chess::*;
use thiserror::Error;

use crate::uci_convert::{move_to_uci, parse_uci_move};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("illegal move {0}")]
    Illegal(Move),
    #[error("unparseable move {0:?}")]
    Parse(String),
    #[error("invalid position {0:?}")]
    InvalidFen(String),
    #[error("local history is not a prefix of the remote move list")]
    Diverged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FivefoldRepetition,
    SeventyFiveMoves,
    /// Reported by the server (resign, timeout, draw agreement, ...).
    Remote,
    /// Called off by the server before it counted.
    Aborted,
    /// A clock reached zero locally.
    FlagFall
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub termination: Termination,
    pub winner: Option<Color>
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.winner {
            Some(Color::White) => write!(f, "{:?}, white wins", self.termination),
            Some(Color::Black) => write!(f, "{:?}, black wins", self.termination),
            None => write!(f, "{:?}, drawn", self.termination)
        }
    }
}

#[derive(Debug, Clone)]
struct Ply {
    mv: Move,
    board: Board,
    /// Half-moves since the last capture or pawn move. Tracked here because the
    /// board's own counter stops at the fifty-move mark.
    halfmoves: u32
}

/// The authoritative move-ordered game: an initial position plus every board reached.
#[derive(Debug, Clone)]
pub struct GameModel {
    init_pos: Board,
    init_halfmoves: u32,
    stack: Vec<Ply>
}

impl Default for GameModel {
    fn default() -> Self {
        Self::new(Board::default())
    }
}

impl GameModel {
    pub fn new(init_pos: Board) -> Self {
        Self {
            init_halfmoves: init_pos.halfmove_clock() as u32,
            init_pos,
            stack: Vec::new()
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, GameError> {
        let board = fen.parse().map_err(|_| GameError::InvalidFen(fen.to_owned()))?;
        Ok(Self::new(board))
    }

    /// Plays a space-separated UCI move list onto a fresh copy of `init_pos`.
    pub fn replay(init_pos: Board, moves: &str) -> Result<Self, GameError> {
        let mut game = Self::new(init_pos);
        for uci in moves.split_whitespace() {
            let mv = parse_uci_move(game.board(), uci)?;
            game.apply(mv)?;
        }
        Ok(game)
    }

    pub fn init_pos(&self) -> &Board {
        &self.init_pos
    }

    pub fn board(&self) -> &Board {
        self.stack.last().map_or(&self.init_pos, |ply| &ply.board)
    }

    /// The position before the most recent move.
    pub fn previous_board(&self) -> Option<&Board> {
        match self.stack.len() {
            0 => None,
            1 => Some(&self.init_pos),
            n => Some(&self.stack[n - 2].board)
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn moves(&self) -> impl Iterator<Item = Move> + '_ {
        self.stack.iter().map(|ply| ply.mv)
    }

    pub fn last_move(&self) -> Option<Move> {
        self.stack.last().map(|ply| ply.mv)
    }

    pub fn turn(&self) -> Color {
        self.board().side_to_move()
    }

    pub fn is_standard_start(&self) -> bool {
        self.init_pos.same_position(&Board::default())
    }

    /// Moves in the server's notation, oldest first.
    pub fn uci_moves(&self) -> Vec<String> {
        let mut board = &self.init_pos;
        let mut moves = Vec::with_capacity(self.stack.len());
        for ply in &self.stack {
            moves.push(move_to_uci(board, ply.mv));
            board = &ply.board;
        }
        moves
    }

    pub fn apply(&mut self, mv: Move) -> Result<(), GameError> {
        let board = self.board();
        if !board.is_legal(mv) {
            return Err(GameError::Illegal(mv));
        }
        let resets_clock = board.piece_on(mv.from) == Some(Piece::Pawn)
            || board.colors(!board.side_to_move()).has(mv.to);
        let halfmoves = if resets_clock { 0 } else { self.halfmoves() + 1 };
        let mut child = board.clone();
        child.play_unchecked(mv);
        self.stack.push(Ply { mv, board: child, halfmoves });
        Ok(())
    }

    /// Scratch evaluation: the position after `mv`, leaving the history untouched.
    pub fn peek(&self, mv: Move) -> Result<Board, GameError> {
        let mut child = self.board().clone();
        child.try_play(mv).map_err(|_| GameError::Illegal(mv))?;
        Ok(child)
    }

    fn halfmoves(&self) -> u32 {
        self.stack.last().map_or(self.init_halfmoves, |ply| ply.halfmoves)
    }

    fn repetitions(&self) -> usize {
        let current = self.board();
        std::iter::once(&self.init_pos)
            .chain(self.stack.iter().map(|ply| &ply.board))
            .filter(|board| board.same_position(current))
            .count()
    }

    /// Automatic game endings, in precedence order. Pure function of the history.
    pub fn outcome(&self) -> Option<Outcome> {
        let board = self.board();
        let stm = board.side_to_move();
        let has_moves = board.generate_moves(|_| true);
        if !has_moves {
            return Some(if board.checkers().is_empty() {
                Outcome { termination: Termination::Stalemate, winner: None }
            } else {
                Outcome { termination: Termination::Checkmate, winner: Some(!stm) }
            });
        }
        let drawn = |termination| Some(Outcome { termination, winner: None });
        if insufficient_material(board) {
            return drawn(Termination::InsufficientMaterial);
        }
        if self.repetitions() >= 5 {
            return drawn(Termination::FivefoldRepetition);
        }
        if self.halfmoves() >= 150 {
            return drawn(Termination::SeventyFiveMoves);
        }
        None
    }

    /// The suffix of `remote` not yet in this model.
    ///
    /// `remote` is a full re-derivation of the server's move list; the local
    /// history must be a prefix of it, otherwise [`GameError::Diverged`].
    /// Replaying an already-seen list yields nothing.
    pub fn pending_from(&self, remote: &GameModel) -> Result<Vec<Move>, GameError> {
        if !self.init_pos.same_position(&remote.init_pos) || remote.len() < self.len() {
            return Err(GameError::Diverged);
        }
        if self.moves().zip(remote.moves()).any(|(ours, theirs)| ours != theirs) {
            return Err(GameError::Diverged);
        }
        Ok(remote.moves().skip(self.len()).collect())
    }

    /// This model extends `remote` with moves the server has not echoed yet.
    pub fn is_ahead_of(&self, remote: &GameModel) -> bool {
        self.init_pos.same_position(&remote.init_pos)
            && remote.len() < self.len()
            && self.moves().zip(remote.moves()).all(|(ours, theirs)| ours == theirs)
    }
}

fn same_colored(squares: BitBoard) -> bool {
    let light = squares.into_iter()
        .filter(|sq| (sq.file() as usize + sq.rank() as usize) % 2 == 1)
        .count();
    light == 0 || light == squares.len() as usize
}

fn side_insufficient(board: &Board, color: Color) -> bool {
    let ours = board.colors(color);
    let theirs = board.colors(!color);
    let heavy = board.pieces(Piece::Pawn) | board.pieces(Piece::Rook) | board.pieces(Piece::Queen);
    if !(ours & heavy).is_empty() {
        return false;
    }
    if !(ours & board.pieces(Piece::Knight)).is_empty() {
        // A lone knight can only mate with the help of opposing pieces other than queens.
        let helpers = theirs & !board.pieces(Piece::King) & !board.pieces(Piece::Queen);
        return ours.len() <= 2 && helpers.is_empty();
    }
    let bishops = board.pieces(Piece::Bishop);
    if !(ours & bishops).is_empty() {
        return same_colored(bishops)
            && board.pieces(Piece::Pawn).is_empty()
            && board.pieces(Piece::Knight).is_empty();
    }
    true
}

fn insufficient_material(board: &Board) -> bool {
    side_insufficient(board, Color::White) && side_insufficient(board, Color::Black)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    #[test]
    fn apply_tracks_turn_and_history() {
        let mut game = GameModel::default();
        assert_eq!(game.turn(), Color::White);
        game.apply(mv("e2e4")).unwrap();
        assert_eq!(game.turn(), Color::Black);
        assert_eq!(game.len(), 1);
        assert_eq!(game.last_move(), Some(mv("e2e4")));
        assert!(game.previous_board().unwrap().same_position(&Board::default()));
    }

    #[test]
    fn apply_rejects_illegal_moves_without_mutating() {
        let mut game = GameModel::default();
        assert_eq!(game.apply(mv("e2e5")), Err(GameError::Illegal(mv("e2e5"))));
        assert!(game.is_empty());
    }

    #[test]
    fn peek_leaves_history_alone() {
        let game = GameModel::default();
        let child = game.peek(mv("g1f3")).unwrap();
        assert_eq!(child.side_to_move(), Color::Black);
        assert!(game.is_empty());
        assert!(game.peek(mv("g1g3")).is_err());
    }

    #[test]
    fn rebuilding_from_the_pre_move_history_reproduces_the_position() {
        let mut game = GameModel::replay(Board::default(), "e2e4 c7c5 g1f3 d7d6 d2d4").unwrap();
        let before = game.uci_moves().join(" ");
        game.apply(mv("c5d4")).unwrap();

        let rebuilt = GameModel::replay(Board::default(), &before).unwrap();
        let previous = game.previous_board().unwrap();
        assert!(rebuilt.board().same_position(previous));
        assert_eq!(rebuilt.board().hash(), previous.hash());
        assert_eq!(rebuilt.board().to_string(), previous.to_string());

        let mut replayed = rebuilt.clone();
        replayed.apply(mv("c5d4")).unwrap();
        assert_eq!(replayed.board().hash(), game.board().hash());
        assert_eq!(replayed.board().to_string(), game.board().to_string());
        assert_eq!(replayed.uci_moves(), game.uci_moves());
    }

    #[test]
    fn detects_checkmate() {
        let game = GameModel::replay(Board::default(), "f2f3 e7e5 g2g4 d8h4").unwrap();
        assert_eq!(
            game.outcome(),
            Some(Outcome { termination: Termination::Checkmate, winner: Some(Color::Black) })
        );
    }

    #[test]
    fn detects_stalemate() {
        let game = GameModel::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(game.outcome().map(|o| o.termination), Some(Termination::Stalemate));
    }

    #[test]
    fn detects_insufficient_material() {
        let bare = GameModel::from_fen("8/8/4k3/8/8/3K4/8/8 w - - 0 1").unwrap();
        assert_eq!(bare.outcome().map(|o| o.termination), Some(Termination::InsufficientMaterial));
        let knight = GameModel::from_fen("8/8/4k3/8/8/3KN3/8/8 w - - 0 1").unwrap();
        assert_eq!(knight.outcome().map(|o| o.termination), Some(Termination::InsufficientMaterial));
        let rook = GameModel::from_fen("8/8/7k/8/8/3KR3/8/8 w - - 0 1").unwrap();
        assert_eq!(rook.outcome(), None);
    }

    #[test]
    fn detects_fivefold_repetition() {
        let shuffle = "g1f3 g8f6 f3g1 f6g8 ".repeat(4);
        let game = GameModel::replay(Board::default(), &shuffle).unwrap();
        assert_eq!(game.outcome().map(|o| o.termination), Some(Termination::FivefoldRepetition));
        let game = GameModel::replay(Board::default(), &"g1f3 g8f6 f3g1 f6g8 ".repeat(3)).unwrap();
        assert_eq!(game.outcome(), None);
    }

    #[test]
    fn detects_seventy_five_move_rule() {
        let mut game = GameModel::from_fen("8/8/7k/8/8/3KR3/8/8 w - - 100 100").unwrap();
        game.init_halfmoves = 148;
        game.apply(mv("e3e1")).unwrap();
        assert_eq!(game.outcome(), None);
        game.apply(mv("h6h7")).unwrap();
        assert_eq!(game.outcome().map(|o| o.termination), Some(Termination::SeventyFiveMoves));
    }

    #[test]
    fn captures_reset_the_move_counter() {
        let mut game = GameModel::from_fen("8/8/4k3/8/4r3/3KR3/8/8 w - - 0 1").unwrap();
        game.init_halfmoves = 148;
        game.apply(mv("e3e4")).unwrap();
        assert_eq!(game.halfmoves(), 0);
    }

    #[test]
    fn pending_is_the_unseen_suffix() {
        let mut local = GameModel::default();
        let remote = GameModel::replay(Board::default(), "e2e4 e7e5").unwrap();
        assert_eq!(local.pending_from(&remote).unwrap(), vec![mv("e2e4"), mv("e7e5")]);
        local.apply(mv("e2e4")).unwrap();
        assert_eq!(local.pending_from(&remote).unwrap(), vec![mv("e7e5")]);
        local.apply(mv("e7e5")).unwrap();
        assert!(local.pending_from(&remote).unwrap().is_empty());
    }

    #[test]
    fn pending_refuses_divergent_histories() {
        let local = GameModel::replay(Board::default(), "d2d4").unwrap();
        let remote = GameModel::replay(Board::default(), "e2e4 e7e5").unwrap();
        assert_eq!(local.pending_from(&remote), Err(GameError::Diverged));
        let shorter = GameModel::default();
        assert_eq!(local.pending_from(&shorter), Err(GameError::Diverged));
        assert!(local.is_ahead_of(&shorter));
        assert!(!local.is_ahead_of(&remote));
        assert!(!remote.is_ahead_of(&GameModel::replay(Board::default(), "d2d4").unwrap()));
    }

    #[test]
    fn uci_moves_use_standard_castling() {
        let game = GameModel::replay(Board::default(), "e2e4 e7e5 g1f3 b8c6 f1c4 g8f6 e1g1").unwrap();
        assert_eq!(game.uci_moves().last().map(String::as_str), Some("e1g1"));
    }
}
