pub mod player;
pub mod preview;
