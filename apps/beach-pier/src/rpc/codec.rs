use std::io::{Cursor, ErrorKind};

use rmpv::Value;

use super::RpcError;

const TYPE_REQUEST: u64 = 0;
const TYPE_RESPONSE: u64 = 1;
const TYPE_NOTIFICATION: u64 = 2;

/// One msgpack-rpc frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Request {
        id: u64,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: u64,
        error: Value,
        result: Value,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

impl Message {
    pub fn into_value(self) -> Value {
        match self {
            Message::Request { id, method, params } => Value::Array(vec![
                Value::from(TYPE_REQUEST),
                Value::from(id),
                Value::from(method),
                Value::Array(params),
            ]),
            Message::Response { id, error, result } => Value::Array(vec![
                Value::from(TYPE_RESPONSE),
                Value::from(id),
                error,
                result,
            ]),
            Message::Notification { method, params } => Value::Array(vec![
                Value::from(TYPE_NOTIFICATION),
                Value::from(method),
                Value::Array(params),
            ]),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let Value::Array(mut items) = value else {
            return Err(RpcError::Protocol("frame is not an array".into()));
        };
        let kind = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Protocol("frame type missing".into()))?;

        match (kind, items.len()) {
            (TYPE_REQUEST, 4) => {
                let params = take_params(items.pop());
                let method = take_string(items.pop())?;
                let id = items[1]
                    .as_u64()
                    .ok_or_else(|| RpcError::Protocol("request id is not an integer".into()))?;
                Ok(Message::Request { id, method, params })
            }
            (TYPE_RESPONSE, 4) => {
                let result = items.pop().unwrap_or(Value::Nil);
                let error = items.pop().unwrap_or(Value::Nil);
                let id = items[1]
                    .as_u64()
                    .ok_or_else(|| RpcError::Protocol("response id is not an integer".into()))?;
                Ok(Message::Response { id, error, result })
            }
            (TYPE_NOTIFICATION, 3) => {
                let params = take_params(items.pop());
                let method = take_string(items.pop())?;
                Ok(Message::Notification { method, params })
            }
            (kind, len) => Err(RpcError::Protocol(format!(
                "unexpected frame type {kind} with {len} elements"
            ))),
        }
    }
}

fn take_params(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(params)) => params,
        Some(Value::Nil) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn take_string(value: Option<Value>) -> Result<String, RpcError> {
    value
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::Protocol("method name is not a string".into()))
}

pub fn encode(message: Message) -> Result<Vec<u8>, RpcError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &message.into_value())
        .map_err(|err| RpcError::Encode(err.to_string()))?;
    Ok(buf)
}

/// Accumulates stream bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns `Ok(None)` until a whole frame is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Message>, RpcError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let mut cursor = Cursor::new(self.buf.as_slice());
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buf.drain(..consumed);
                Message::from_value(value).map(Some)
            }
            Err(err) if is_incomplete(&err) => Ok(None),
            Err(err) => Err(RpcError::Decode(err.to_string())),
        }
    }
}

fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(io) | rmpv::decode::Error::InvalidDataRead(io) => {
            io.kind() == ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Text of an error slot in a response. The editor sends `[type, message]`.
pub fn remote_error_message(error: &Value) -> String {
    match error {
        Value::Array(parts) => parts
            .iter()
            .find_map(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::String(text) => text.as_str().unwrap_or_default().to_string(),
        other => other.to_string(),
    }
}

/// Converts an editor value into JSON for the browser.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(flag) => serde_json::Value::Bool(*flag),
        Value::Integer(int) => {
            if let Some(signed) = int.as_i64() {
                serde_json::Value::from(signed)
            } else if let Some(unsigned) = int.as_u64() {
                serde_json::Value::from(unsigned)
            } else {
                serde_json::Value::Null
            }
        }
        Value::F32(float) => float_to_json(f64::from(*float)),
        Value::F64(float) => float_to_json(*float),
        Value::String(text) => match text.as_str() {
            Some(text) => serde_json::Value::String(text.to_string()),
            None => {
                serde_json::Value::String(String::from_utf8_lossy(text.as_bytes()).into_owned())
            }
        },
        Value::Binary(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Map(entries) => {
            let mut map = serde_json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match key.as_str() {
                    Some(key) => key.to_string(),
                    None => key.to_string(),
                };
                map.insert(key, value_to_json(value));
            }
            serde_json::Value::Object(map)
        }
        // Buffer, window and tabpage handles carry a msgpack integer payload.
        Value::Ext(_, payload) => match rmpv::decode::read_value(&mut payload.as_slice()) {
            Ok(handle @ Value::Integer(_)) => value_to_json(&handle),
            _ => serde_json::Value::Null,
        },
    }
}

fn float_to_json(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
