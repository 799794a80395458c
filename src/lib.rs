pub mod broadcast;
pub mod chunks;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod hash;
pub mod models;
pub mod progress;
pub mod server;
pub mod session;
pub mod state;
pub mod store;
pub mod utils;
pub mod writer;
