//! The remote editor connection.
//!
//! Sessions talk to the editor only through [`EditorRpc`] and obtain
//! connections through a [`Dialer`], so the msgpack-rpc client in
//! [`client`] can be swapped for an in-memory double in tests.

use std::sync::Arc;

use async_trait::async_trait;
use rmpv::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod client;
pub mod codec;
#[cfg(test)]
pub mod testing;

pub use client::{NvimClient, TcpDialer};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("session closed")]
    SessionClosed,
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("{message}")]
    Remote { message: String },
}

impl RpcError {
    /// True when the connection is gone. The structured variant is
    /// authoritative; remote error text is only consulted as a fallback.
    pub fn is_session_closed(&self) -> bool {
        match self {
            RpcError::SessionClosed => true,
            RpcError::Remote { message } => message.contains("session closed"),
            _ => false,
        }
    }

    pub fn is_ui_not_attached(&self) -> bool {
        matches!(self, RpcError::Remote { message } if message.contains("UI not attached"))
    }
}

/// A notification pushed by the editor, e.g. `redraw` or `clipboard_copy`.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Vec<Value>,
}

/// Extension options passed to `nvim_ui_attach`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UiOptions {
    pub ext_linegrid: bool,
    pub ext_multigrid: bool,
    pub rgb: bool,
}

impl Default for UiOptions {
    fn default() -> Self {
        Self {
            ext_linegrid: true,
            ext_multigrid: false,
            rgb: true,
        }
    }
}

impl UiOptions {
    pub fn to_value(self) -> Value {
        Value::Map(vec![
            (Value::from("ext_linegrid"), Value::from(self.ext_linegrid)),
            (Value::from("ext_multigrid"), Value::from(self.ext_multigrid)),
            (Value::from("rgb"), Value::from(self.rgb)),
        ])
    }
}

#[async_trait]
pub trait EditorRpc: Send + Sync {
    /// Channel id the editor assigned to this connection, when known.
    fn channel_id(&self) -> Option<i64>;

    async fn input(&self, keys: &str) -> Result<(), RpcError>;

    async fn command(&self, command: &str) -> Result<(), RpcError>;

    async fn exec_lua(&self, code: &str, args: Vec<Value>) -> Result<Value, RpcError>;

    async fn attach_ui(&self, width: u32, height: u32, options: UiOptions) -> Result<(), RpcError>;

    async fn try_resize_ui(&self, width: u32, height: u32) -> Result<(), RpcError>;

    async fn set_var(&self, name: &str, value: Value) -> Result<(), RpcError>;

    async fn subscribe(&self, event: &str) -> Result<(), RpcError>;

    /// Pumps inbound traffic until the connection ends, forwarding every
    /// notification into `sink` in arrival order.
    async fn serve(&self, sink: mpsc::Sender<Notification>) -> Result<(), RpcError>;

    /// Idempotent; unblocks a running [`EditorRpc::serve`].
    async fn close(&self);
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Arc<dyn EditorRpc>, RpcError>;
}
