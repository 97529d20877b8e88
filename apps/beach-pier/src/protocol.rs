use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent from the browser to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ClientMessage {
    /// Dial an editor listening at `address`
    Connect { address: String },
    AttachUi { width: u32, height: u32 },
    /// Raw key notation, forwarded untouched
    Input { data: String },
    Command { data: String },
    Resize { width: u32, height: u32 },
    Mouse {
        action: String,
        button: i64,
        row: i64,
        col: i64,
    },
    Scroll { direction: String, row: i64, col: i64 },
    /// Reply to `clipboard_get`; empty when the browser could not read
    ClipboardContent {
        #[serde(default)]
        data: String,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Connect { .. } => "connect",
            ClientMessage::AttachUi { .. } => "attach_ui",
            ClientMessage::Input { .. } => "input",
            ClientMessage::Command { .. } => "command",
            ClientMessage::Resize { .. } => "resize",
            ClientMessage::Mouse { .. } => "mouse",
            ClientMessage::Scroll { .. } => "scroll",
            ClientMessage::ClipboardContent { .. } => "clipboard_content",
        }
    }
}

pub const KNOWN_TYPES: &[&str] = &[
    "connect",
    "attach_ui",
    "input",
    "command",
    "resize",
    "mouse",
    "scroll",
    "clipboard_content",
];

/// Messages sent from the bridge to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ready { data: String },
    Connected { data: String },
    Error { data: String },
    SessionClosed { data: String },
    /// One editor redraw batch, passed through as JSON
    Redraw { data: serde_json::Value },
    ClipboardSet { data: String },
    ClipboardGet,
}

impl ServerMessage {
    pub fn error(data: impl Into<String>) -> Self {
        ServerMessage::Error { data: data.into() }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("message has no type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid server address")]
    InvalidAddress,
    #[error("malformed {kind} request: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("width and height must be at least 1")]
    InvalidDimensions,
}

/// A decoded transport frame. `kind` survives even when the body is bad so
/// the session can decide between "not connected" and "malformed".
#[derive(Debug)]
pub struct Inbound {
    pub kind: Option<String>,
    pub message: Result<ClientMessage, RequestError>,
}

/// Parses one JSON text frame. Errors here mean the frame is not JSON at
/// all, which ends the transport stream.
pub fn parse_client_frame(text: &str) -> Result<Inbound, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let message = match kind.as_deref() {
        None => Err(RequestError::MissingType),
        Some(kind) if !KNOWN_TYPES.contains(&kind) => {
            Err(RequestError::UnknownType(kind.to_string()))
        }
        Some(kind) => serde_json::from_value::<ClientMessage>(value)
            .map_err(|err| {
                if kind == "connect" {
                    RequestError::InvalidAddress
                } else {
                    RequestError::Malformed {
                        kind: kind.to_string(),
                        reason: err.to_string(),
                    }
                }
            })
            .and_then(validate),
    };

    Ok(Inbound { kind, message })
}

fn validate(message: ClientMessage) -> Result<ClientMessage, RequestError> {
    match &message {
        ClientMessage::AttachUi { width, height } | ClientMessage::Resize { width, height }
            if *width == 0 || *height == 0 =>
        {
            Err(RequestError::InvalidDimensions)
        }
        _ => Ok(message),
    }
}
