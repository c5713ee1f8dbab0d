//! Relays group chat messages to each member as a phonetic transliteration
//! in the language they are learning.

pub mod cache;
pub mod commands;
pub mod config;
pub mod membership;
pub mod router;
pub mod security;
pub mod server;
pub mod settings;
pub mod store;
pub mod strings;
pub mod telegram;
pub mod translation;
