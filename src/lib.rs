pub mod board;
pub mod frame;
pub mod game;
pub mod lobby;
pub mod logger;
pub mod placement;
pub mod server;
pub mod session;
pub mod spectate;
pub mod turn;
