use cozy_chess::*;

use crate::game::GameError;

/// Standard UCI castling (`e1g1`) to the king-takes-rook form the move generator uses.
pub fn canonicalize_move(board: &Board, mut mv: Move) -> Move {
    let convert_castle = board.piece_on(mv.from) == Some(Piece::King)
        && mv.from.file() == File::E
        && matches!(mv.to.file(), File::C | File::G)
        && board.color_on(mv.to).is_none()
        && mv.from.rank() == mv.to.rank();
    if convert_castle {
        let file = if mv.to.file() == File::C {
            File::A
        } else {
            File::H
        };
        mv.to = Square::new(file, mv.to.rank());
    }
    mv
}

/// Inverse of [`canonicalize_move`], for anything sent to the server.
pub fn decanonicalize_move(board: &Board, mut mv: Move) -> Move {
    if board.color_on(mv.from).is_some() && board.color_on(mv.from) == board.color_on(mv.to) {
        let rights = board.castle_rights(board.side_to_move());
        let file = if Some(mv.to.file()) == rights.short {
            File::G
        } else {
            File::C
        };
        mv.to = Square::new(file, mv.to.rank());
    }
    mv
}

/// Parses one remote move and checks it is playable on `board`.
pub fn parse_uci_move(board: &Board, uci: &str) -> Result<Move, GameError> {
    let mv: Move = uci.parse().map_err(|_| GameError::Parse(uci.to_owned()))?;
    let mv = canonicalize_move(board, mv);
    if !board.is_legal(mv) {
        return Err(GameError::Illegal(mv));
    }
    Ok(mv)
}

pub fn move_to_uci(board: &Board, mv: Move) -> String {
    decanonicalize_move(board, mv).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn castling_position() -> Board {
        "r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1".parse().unwrap()
    }

    #[test]
    fn castling_converts_both_ways() {
        let board = castling_position();
        let short = parse_uci_move(&board, "e1g1").unwrap();
        assert_eq!(short, "e1h1".parse::<Move>().unwrap());
        assert_eq!(move_to_uci(&board, short), "e1g1");

        let long = parse_uci_move(&board, "e1c1").unwrap();
        assert_eq!(long, "e1a1".parse::<Move>().unwrap());
        assert_eq!(move_to_uci(&board, long), "e1c1");
    }

    #[test]
    fn ordinary_moves_pass_through() {
        let board = Board::default();
        let mv = parse_uci_move(&board, "e2e4").unwrap();
        assert_eq!(move_to_uci(&board, mv), "e2e4");
    }

    #[test]
    fn rejects_garbage_and_illegal_moves() {
        let board = Board::default();
        assert!(matches!(parse_uci_move(&board, "zz"), Err(GameError::Parse(_))));
        assert!(matches!(parse_uci_move(&board, "e2e5"), Err(GameError::Illegal(_))));
    }
}
