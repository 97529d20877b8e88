//! Clipboard exchange between the editor and a browser client.
//!
//! The editor side is a Lua clipboard provider installed on connect. Copies
//! notify us with the joined text. Pastes clear a global variable, notify us,
//! then poll that variable every 10ms for up to 300 iterations; we answer by
//! setting the variable once the browser replies with its clipboard. The
//! timeout lives entirely in that poll loop.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rmpv::Value;
use tracing::{debug, warn};

use crate::protocol::ServerMessage;
use crate::rpc::{EditorRpc, RpcError};

pub const COPY_NOTIFICATION: &str = "clipboard_copy";
pub const PASTE_NOTIFICATION: &str = "clipboard_paste";
pub const CLIPBOARD_VAR: &str = "beach_pier_clipboard";

/// How long the editor-side poll loop waits (300 x 10ms).
pub const PASTE_TIMEOUT: Duration = Duration::from_millis(3_000);

const PROVIDER_LUA: &str = r#"
local chan = ...
local var = 'beach_pier_clipboard'

local function copy(lines, _regtype)
  vim.rpcnotify(chan, 'clipboard_copy', table.concat(lines, '\n'))
end

local function paste()
  vim.g[var] = nil
  vim.rpcnotify(chan, 'clipboard_paste')
  for _ = 1, 300 do
    local content = vim.g[var]
    if content ~= nil then
      vim.g[var] = nil
      return vim.split(content, '\n', { plain = true })
    end
    vim.wait(10)
  end
  return {}
end

vim.g.clipboard = {
  name = 'beach-pier',
  copy = { ['+'] = copy, ['*'] = copy },
  paste = { ['+'] = paste, ['*'] = paste },
  cache_enabled = 0,
}
"#;

/// Per-session bridge state: at most one paste request is in flight.
#[derive(Debug, Default)]
pub struct ClipboardBridge {
    pending: Mutex<Option<Instant>>,
}

impl ClipboardBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the Lua provider on the editor. Needs the channel id so the
    /// provider notifies this connection only.
    pub async fn install(&self, rpc: &dyn EditorRpc) -> Result<(), RpcError> {
        let Some(channel) = rpc.channel_id() else {
            return Err(RpcError::Protocol("editor channel id is unknown".into()));
        };
        rpc.exec_lua(PROVIDER_LUA, vec![Value::from(channel)]).await?;
        debug!(channel, "clipboard provider installed");
        Ok(())
    }

    /// Maps a clipboard notification to the message for the client. Returns
    /// `None` for methods this bridge does not own.
    pub fn on_notification(&self, method: &str, params: &[Value]) -> Option<ServerMessage> {
        match method {
            COPY_NOTIFICATION => {
                let text = params
                    .first()
                    .map(clipboard_text)
                    .unwrap_or_default();
                Some(ServerMessage::ClipboardSet { data: text })
            }
            PASTE_NOTIFICATION => {
                let previous = self.pending.lock().replace(Instant::now() + PASTE_TIMEOUT);
                if previous.is_some() {
                    debug!("paste requested while another was outstanding; re-arming");
                }
                Some(ServerMessage::ClipboardGet)
            }
            _ => None,
        }
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Hands the client's clipboard to the editor's waiting poll loop.
    /// Content with no outstanding request is dropped.
    pub async fn deliver(&self, rpc: &dyn EditorRpc, content: String) -> Result<bool, RpcError> {
        let pending = self.pending.lock().take();
        let Some(deadline) = pending else {
            debug!("clipboard content without an outstanding paste request");
            return Ok(false);
        };
        if Instant::now() > deadline {
            warn!("clipboard content arrived after the editor stopped waiting");
        }
        rpc.set_var(CLIPBOARD_VAR, Value::from(content)).await?;
        Ok(true)
    }
}

fn clipboard_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.as_str().unwrap_or_default().to_string(),
        Value::Array(lines) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
