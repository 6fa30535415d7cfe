pub mod occupancy;
pub mod resolver;
pub mod game;
pub mod uci_convert;
pub mod time_control;
pub mod board_link;
pub mod clock;
pub mod remote;
pub mod session;

#[cfg(test)]
mod testing;
