pub mod auth;
pub mod client;
pub mod models;
pub mod player;
pub mod previews;
