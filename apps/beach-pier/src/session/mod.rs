//! One browser connection and the editor it drives.
//!
//! A session moves `Idle -> Connecting -> Active -> Closed` and may go back
//! to `Connecting` from `Idle` or `Closed` on a fresh `connect`. The
//! transport read loop and the editor listener task both touch the same
//! session, so lifecycle fields sit behind one short-lived lock and every
//! editor connection carries a generation number: work started for an older
//! connection is dropped once a newer one exists.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::clipboard::{ClipboardBridge, COPY_NOTIFICATION, PASTE_NOTIFICATION};
use crate::decoder::{EventDecoder, UiEvent};
use crate::grid::{CursorShape, ModeStyle};
use crate::input::{mouse_input, scroll_input};
use crate::protocol::{parse_client_frame, ClientMessage, Inbound, RequestError, ServerMessage};
use crate::rpc::codec::value_to_json;
use crate::rpc::{Dialer, EditorRpc, Notification, RpcError, UiOptions};

mod registry;

pub use registry::{RegistryStats, SessionRegistration, SessionRegistry};

pub const CONNECTED_NOTICE: &str = "Successfully connected to Neovim";
pub const NOT_CONNECTED: &str = "Not connected to Neovim";
pub const SESSION_CLOSED_NOTICE: &str = "Neovim session has been closed";

/// Dimensions used when a `command` asks for `nvim_ui_attach` itself.
const COMMAND_ATTACH_SIZE: (u32, u32) = (80, 24);

const DEFAULT_OUTBOUND_BUFFER: usize = 256;
const DEFAULT_NOTIFICATION_BUFFER: usize = 64;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub outbound_buffer: usize,
    pub notification_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closed,
}

/// The last flushed grid, reported on the debug endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GridSummary {
    pub rows: usize,
    pub cols: usize,
    pub cursor_row: usize,
    pub cursor_col: usize,
    pub cursor_visible: bool,
    pub mode: String,
    pub cursor_shape: String,
    /// Visible then hidden phase in milliseconds; absent for a steady cursor.
    pub cursor_blink_ms: Option<(u64, u64)>,
    /// Bumped on every `mode_change`, each of which restarts the blink cycle.
    pub blink_restarts: u64,
    pub font: Option<String>,
    pub font_size: Option<f32>,
    pub linespace: i64,
    pub flushes: u64,
}

/// The decoder plus the presentation settings carried by its side effects.
#[derive(Default)]
struct RedrawState {
    decoder: EventDecoder,
    cursor_style: Option<ModeStyle>,
    blink_restarts: u64,
    font: Option<String>,
    font_size: Option<f32>,
    linespace: i64,
}

impl RedrawState {
    /// Folds side effects in; returns whether a flush was among them.
    fn absorb(&mut self, events: Vec<UiEvent>) -> bool {
        let mut flushed = false;
        for event in events {
            match event {
                UiEvent::Flush => flushed = true,
                UiEvent::CursorStyle { style, .. } => {
                    self.cursor_style = Some(style);
                    self.blink_restarts += 1;
                }
                UiEvent::FontChanged { font, size } => {
                    if size.is_some() && size != self.font_size {
                        debug!(font = %font, size = ?size, "font size changed");
                    }
                    self.font = Some(font);
                    self.font_size = size;
                }
                UiEvent::LineSpace(space) => self.linespace = space,
            }
        }
        flushed
    }

    fn summarize(&self) -> GridSummary {
        let grid = self.decoder.grid();
        let cursor = grid.cursor();
        let shape = self
            .cursor_style
            .as_ref()
            .map(|style| style.shape)
            .unwrap_or_else(|| CursorShape::for_mode_name(grid.mode()));
        let blink = self
            .cursor_style
            .as_ref()
            .and_then(ModeStyle::blink_phases)
            .map(|(on, off)| (on.as_millis() as u64, off.as_millis() as u64));
        GridSummary {
            rows: grid.rows(),
            cols: grid.cols(),
            cursor_row: cursor.row,
            cursor_col: cursor.col,
            cursor_visible: cursor.visible,
            mode: grid.mode().to_string(),
            cursor_shape: shape.as_str().to_string(),
            cursor_blink_ms: blink,
            blink_restarts: self.blink_restarts,
            font: self.font.clone(),
            font_size: self.font_size,
            linespace: self.linespace,
            flushes: self.decoder.flush_count(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub address: Option<String>,
    pub state: SessionState,
    pub ui_attached: bool,
    pub grid: Option<GridSummary>,
}

struct Lifecycle {
    state: SessionState,
    generation: u64,
    rpc: Option<Arc<dyn EditorRpc>>,
    address: Option<String>,
    ui_attached: bool,
    grid: Option<GridSummary>,
    /// Set once the transport is gone; nothing may revive the session.
    shut_down: bool,
}

/// The editor connection a request was issued against.
#[derive(Clone)]
struct Link {
    generation: u64,
    rpc: Arc<dyn EditorRpc>,
}

pub struct ClientSession {
    id: Uuid,
    outbound: mpsc::Sender<ServerMessage>,
    dialer: Arc<dyn Dialer>,
    registry: SessionRegistry,
    config: SessionConfig,
    clipboard: ClipboardBridge,
    redraw: Mutex<RedrawState>,
    lifecycle: Mutex<Lifecycle>,
}

impl ClientSession {
    fn new(
        id: Uuid,
        outbound: mpsc::Sender<ServerMessage>,
        dialer: Arc<dyn Dialer>,
        registry: SessionRegistry,
        config: SessionConfig,
    ) -> Self {
        Self {
            id,
            outbound,
            dialer,
            registry,
            config,
            clipboard: ClipboardBridge::new(),
            redraw: Mutex::new(RedrawState::default()),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Idle,
                generation: 0,
                rpc: None,
                address: None,
                ui_attached: false,
                grid: None,
                shut_down: false,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().state
    }

    pub fn ui_attached(&self) -> bool {
        self.lifecycle.lock().ui_attached
    }

    pub fn address(&self) -> Option<String> {
        self.lifecycle.lock().address.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let lifecycle = self.lifecycle.lock();
        SessionSnapshot {
            id: self.id,
            address: lifecycle.address.clone(),
            state: lifecycle.state,
            ui_attached: lifecycle.ui_attached,
            grid: lifecycle.grid.clone(),
        }
    }

    /// Handles one text frame from the browser. A frame that is not JSON is
    /// returned as an error and ends the transport stream.
    pub async fn handle_frame(self: &Arc<Self>, text: &str) -> Result<(), serde_json::Error> {
        let inbound = parse_client_frame(text)?;
        self.handle(inbound).await;
        Ok(())
    }

    pub async fn handle(self: &Arc<Self>, inbound: Inbound) {
        let Inbound { kind, message } = inbound;
        match message {
            Ok(ClientMessage::Connect { address }) => self.connect(address).await,
            Err(RequestError::InvalidAddress) => {
                self.send(ServerMessage::error(RequestError::InvalidAddress.to_string()))
                    .await;
            }
            Ok(message) => match self.link() {
                Some(link) => self.apply(link, message).await,
                None => self.send(ServerMessage::error(NOT_CONNECTED)).await,
            },
            Err(err @ (RequestError::MissingType | RequestError::UnknownType(_))) => {
                if self.link().is_none() {
                    self.send(ServerMessage::error(NOT_CONNECTED)).await;
                } else {
                    warn!(
                        session_id = %self.id,
                        kind = ?kind,
                        error = %err,
                        "ignoring client message"
                    );
                }
            }
            Err(err) => {
                if self.link().is_none() {
                    self.send(ServerMessage::error(NOT_CONNECTED)).await;
                } else {
                    debug!(session_id = %self.id, error = %err, "rejecting client message");
                    self.send(ServerMessage::error(err.to_string())).await;
                }
            }
        }
    }

    /// Starts dialing `address`. Any previous editor connection is closed
    /// first; the dial runs on its own task so the read loop keeps going.
    pub async fn connect(self: &Arc<Self>, address: String) {
        let address = address.trim().to_string();
        if address.is_empty() {
            self.send(ServerMessage::error(RequestError::InvalidAddress.to_string()))
                .await;
            return;
        }

        let (generation, previous) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.shut_down {
                return;
            }
            lifecycle.generation += 1;
            lifecycle.state = SessionState::Connecting;
            lifecycle.address = Some(address.clone());
            lifecycle.ui_attached = false;
            lifecycle.grid = None;
            (lifecycle.generation, lifecycle.rpc.take())
        };

        if let Some(previous) = previous {
            debug!(session_id = %self.id, "closing previous editor connection");
            previous.close().await;
        }

        info!(session_id = %self.id, address = %address, "connecting to editor");
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = session.dialer.dial(&address).await;
            session.finish_dial(generation, address, outcome).await;
        });
    }

    async fn finish_dial(
        self: Arc<Self>,
        generation: u64,
        address: String,
        outcome: Result<Arc<dyn EditorRpc>, RpcError>,
    ) {
        let rpc = match outcome {
            Ok(rpc) => rpc,
            Err(err) => {
                let current = {
                    let mut lifecycle = self.lifecycle.lock();
                    let current = lifecycle.generation == generation && !lifecycle.shut_down;
                    if current {
                        lifecycle.state = SessionState::Idle;
                    }
                    current
                };
                if current {
                    counter!("beach_pier_dial_failures_total", 1);
                    warn!(
                        session_id = %self.id,
                        address = %address,
                        error = %err,
                        "failed to connect to editor"
                    );
                    self.send(ServerMessage::error(format!("Failed to connect to Neovim: {err}")))
                        .await;
                }
                return;
            }
        };

        let current = {
            let mut lifecycle = self.lifecycle.lock();
            let current = lifecycle.generation == generation && !lifecycle.shut_down;
            if current {
                lifecycle.state = SessionState::Active;
                lifecycle.rpc = Some(Arc::clone(&rpc));
            }
            current
        };
        if !current {
            debug!(
                session_id = %self.id,
                address = %address,
                "discarding superseded editor connection"
            );
            rpc.close().await;
            return;
        }

        *self.redraw.lock() = RedrawState::default();
        let link = Link { generation, rpc };
        tokio::spawn(Arc::clone(&self).listen(link.clone()));

        if let Err(err) = link.rpc.subscribe("redraw").await {
            warn!(session_id = %self.id, error = %err, "redraw subscription failed");
        }
        if let Err(err) = self.clipboard.install(link.rpc.as_ref()).await {
            warn!(session_id = %self.id, error = %err, "clipboard provider not installed");
        }

        let still_active = {
            let lifecycle = self.lifecycle.lock();
            lifecycle.generation == generation
                && lifecycle.state == SessionState::Active
                && !lifecycle.shut_down
        };
        if !still_active {
            debug!(
                session_id = %self.id,
                address = %address,
                "editor connection ended during setup"
            );
            return;
        }
        info!(session_id = %self.id, address = %address, "editor connection active");
        self.send(ServerMessage::Connected {
            data: CONNECTED_NOTICE.to_string(),
        })
        .await;
    }

    /// Runs the editor's service loop and handles its notifications until
    /// the connection ends.
    async fn listen(self: Arc<Self>, link: Link) {
        let (tx, mut rx) = mpsc::channel(self.config.notification_buffer);
        let serve = link.rpc.serve(tx);
        tokio::pin!(serve);

        let result = loop {
            tokio::select! {
                result = &mut serve => break result,
                Some(notification) = rx.recv() => self.on_notification(notification).await,
            }
        };
        while let Ok(notification) = rx.try_recv() {
            self.on_notification(notification).await;
        }

        match &result {
            Ok(()) => debug!(session_id = %self.id, "editor service loop finished"),
            Err(err) => debug!(session_id = %self.id, error = %err, "editor service loop failed"),
        }
        self.mark_closed(link.generation).await;
        link.rpc.close().await;
    }

    async fn on_notification(&self, notification: Notification) {
        let Notification { method, params } = notification;
        match method.as_str() {
            "redraw" => self.on_redraw(&params).await,
            COPY_NOTIFICATION | PASTE_NOTIFICATION => {
                if let Some(message) = self.clipboard.on_notification(&method, &params) {
                    if matches!(message, ServerMessage::ClipboardSet { .. }) {
                        counter!("beach_pier_clipboard_copies_total", 1);
                    } else {
                        counter!("beach_pier_clipboard_paste_requests_total", 1);
                    }
                    self.send(message).await;
                }
            }
            other => trace!(session_id = %self.id, method = other, "unhandled editor notification"),
        }
    }

    /// Forwards each batch to the browser as-is and folds it into the
    /// session's grid model.
    async fn on_redraw(&self, params: &[rmpv::Value]) {
        let mut messages = Vec::with_capacity(params.len());
        let summary = {
            let mut redraw = self.redraw.lock();
            let mut events = Vec::new();
            for batch in params {
                redraw.decoder.apply_batch(batch, &mut events);
                messages.push(ServerMessage::Redraw {
                    data: value_to_json(batch),
                });
            }
            if redraw.absorb(events) {
                Some(redraw.summarize())
            } else {
                None
            }
        };

        if let Some(summary) = summary {
            self.lifecycle.lock().grid = Some(summary);
        }
        counter!("beach_pier_redraw_batches_total", messages.len() as u64);
        for message in messages {
            self.send(message).await;
        }
    }

    async fn apply(&self, link: Link, message: ClientMessage) {
        match message {
            ClientMessage::AttachUi { width, height } => self.attach_ui(&link, width, height).await,
            ClientMessage::Input { data } => {
                if let Err(err) = link.rpc.input(&data).await {
                    self.on_rpc_error(&link, "input", err).await;
                }
            }
            ClientMessage::Command { data } => self.send_command(&link, &data).await,
            ClientMessage::Resize { width, height } => self.resize(&link, width, height).await,
            ClientMessage::Mouse {
                action,
                button,
                row,
                col,
            } => match mouse_input(button, &action, row, col) {
                Some(keys) => {
                    if let Err(err) = link.rpc.input(&keys).await {
                        self.on_rpc_error(&link, "mouse", err).await;
                    }
                }
                None => trace!(session_id = %self.id, button, "ignoring unmapped mouse button"),
            },
            ClientMessage::Scroll {
                direction,
                row,
                col,
            } => {
                let keys = scroll_input(&direction, row, col);
                if let Err(err) = link.rpc.input(&keys).await {
                    self.on_rpc_error(&link, "scroll", err).await;
                }
            }
            ClientMessage::ClipboardContent { data } => {
                match self.clipboard.deliver(link.rpc.as_ref(), data).await {
                    Ok(true) => {
                        counter!("beach_pier_clipboard_pastes_total", 1);
                    }
                    Ok(false) => {}
                    Err(err) => self.on_rpc_error(&link, "clipboard", err).await,
                }
            }
            ClientMessage::Connect { .. } => {}
        }
    }

    async fn attach_ui(&self, link: &Link, width: u32, height: u32) {
        match link.rpc.attach_ui(width, height, UiOptions::default()).await {
            Ok(()) => {
                self.set_ui_attached(link, true);
                info!(session_id = %self.id, width, height, "ui attached");
            }
            Err(err) => {
                self.set_ui_attached(link, false);
                self.on_rpc_error(link, "attach_ui", err).await;
            }
        }
    }

    async fn send_command(&self, link: &Link, command: &str) {
        if command.contains("nvim_ui_attach") {
            let (width, height) = COMMAND_ATTACH_SIZE;
            self.attach_ui(link, width, height).await;
            return;
        }

        let result = match command.strip_prefix("lua ") {
            Some(code) => link.rpc.exec_lua(code, Vec::new()).await.map(|_| ()),
            None => link.rpc.command(command).await,
        };
        if let Err(err) = result {
            self.on_rpc_error(link, "command", err).await;
        }
    }

    /// Dropped while no UI is attached. A "UI not attached" failure clears
    /// the flag so later resizes are dropped until the next attach.
    async fn resize(&self, link: &Link, width: u32, height: u32) {
        if !self.ui_attached() {
            trace!(session_id = %self.id, "resize ignored; ui not attached");
            return;
        }
        match link.rpc.try_resize_ui(width, height).await {
            Ok(()) => {}
            Err(err) if err.is_ui_not_attached() => {
                self.set_ui_attached(link, false);
                info!(session_id = %self.id, "ui detached; ignoring resizes until reattached");
            }
            Err(err) => self.on_rpc_error(link, "resize", err).await,
        }
    }

    async fn on_rpc_error(&self, link: &Link, operation: &'static str, err: RpcError) {
        if err.is_session_closed() {
            debug!(session_id = %self.id, operation, "editor reported session closed");
            self.mark_closed(link.generation).await;
        } else {
            warn!(session_id = %self.id, operation, error = %err, "editor call failed");
        }
    }

    /// Moves an active session to `Closed` and tells the browser. Only the
    /// first caller for a given connection gets through.
    async fn mark_closed(&self, generation: u64) {
        let rpc = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.generation != generation
                || lifecycle.state != SessionState::Active
                || lifecycle.shut_down
            {
                return;
            }
            lifecycle.state = SessionState::Closed;
            lifecycle.ui_attached = false;
            lifecycle.rpc.take()
        };

        info!(session_id = %self.id, "editor session closed");
        self.send(ServerMessage::SessionClosed {
            data: SESSION_CLOSED_NOTICE.to_string(),
        })
        .await;
        if let Some(rpc) = rpc {
            rpc.close().await;
        }
    }

    /// Releases the editor connection and leaves the registry. Safe to call
    /// any number of times.
    pub async fn close(&self) {
        let rpc = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.shut_down {
                return;
            }
            lifecycle.shut_down = true;
            lifecycle.generation += 1;
            lifecycle.state = SessionState::Closed;
            lifecycle.ui_attached = false;
            lifecycle.rpc.take()
        };

        self.registry.unregister(self.id);
        if let Some(rpc) = rpc {
            rpc.close().await;
        }
        counter!("beach_pier_sessions_closed_total", 1);
        debug!(session_id = %self.id, "session closed");
    }

    fn link(&self) -> Option<Link> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.state != SessionState::Active {
            return None;
        }
        lifecycle.rpc.as_ref().map(|rpc| Link {
            generation: lifecycle.generation,
            rpc: Arc::clone(rpc),
        })
    }

    fn set_ui_attached(&self, link: &Link, attached: bool) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation == link.generation && lifecycle.state == SessionState::Active {
            lifecycle.ui_attached = attached;
        }
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            trace!(session_id = %self.id, "client writer gone; dropping message");
        }
    }
}
