//! Shared protocol definitions for the `CivChat` push channel and REST API.

pub mod chat;
pub mod codec;
pub mod event;
pub mod message;
pub mod presence;
pub mod typing;
