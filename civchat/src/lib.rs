//! `CivChat` — real-time chat and presence client core.

pub mod api;
pub mod bus;
pub mod chat;
pub mod client;
pub mod config;
pub mod connection;
pub mod session;
pub mod transport;
