//! Browser bridge for remote Neovim UI sessions.
//!
//! Each websocket client gets a [`session::ClientSession`] that owns one
//! msgpack-rpc connection to an editor, forwards `redraw` batches to the
//! browser and relays input, commands and clipboard traffic back.

pub mod clipboard;
pub mod config;
pub mod decoder;
pub mod grid;
pub mod input;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod session;
pub mod telemetry;
