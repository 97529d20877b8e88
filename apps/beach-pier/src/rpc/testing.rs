//! In-memory editor double for session and clipboard tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rmpv::Value;
use tokio::sync::{mpsc, oneshot, watch};

use super::codec::value_to_json;
use super::{Dialer, EditorRpc, Notification, RpcError, UiOptions};

pub struct FakeEditor {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, VecDeque<String>>>,
    feed_tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    feed_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    closed: watch::Sender<bool>,
    closes: AtomicUsize,
    holds: Mutex<HashMap<&'static str, watch::Receiver<bool>>>,
    waiting: Mutex<HashMap<&'static str, usize>>,
}

impl FakeEditor {
    pub fn new() -> Self {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            feed_tx: Mutex::new(Some(feed_tx)),
            feed_rx: Mutex::new(Some(feed_rx)),
            closed,
            closes: AtomicUsize::new(0),
            holds: Mutex::new(HashMap::new()),
            waiting: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// The next call to `method` fails with `message` as remote error text.
    pub fn fail_next(&self, method: &'static str, message: &str) {
        self.failures
            .lock()
            .entry(method)
            .or_default()
            .push_back(message.to_string());
    }

    pub fn notify(&self, method: &str, params: Vec<Value>) {
        if let Some(feed) = self.feed_tx.lock().as_ref() {
            let _ = feed.send(Notification {
                method: method.to_string(),
                params,
            });
        }
    }

    /// Calls to `method` wait until the returned gate is set to `true` or
    /// dropped. Failures scripted with `fail_next` are taken after the wait.
    pub fn hold(&self, method: &'static str) -> watch::Sender<bool> {
        let (gate, rx) = watch::channel(false);
        self.holds.lock().insert(method, rx);
        gate
    }

    /// How many calls to `method` are currently parked on a `hold` gate.
    pub fn waiting(&self, method: &'static str) -> usize {
        self.waiting.lock().get(method).copied().unwrap_or(0)
    }

    /// Ends `serve` as if the editor went away.
    pub fn hang_up(&self) {
        self.feed_tx.lock().take();
    }

    async fn record(&self, method: &'static str, call: String) -> Result<(), RpcError> {
        let gate = self.holds.lock().get(method).cloned();
        if let Some(mut gate) = gate {
            *self.waiting.lock().entry(method).or_default() += 1;
            let _ = gate.wait_for(|open| *open).await;
            *self.waiting.lock().entry(method).or_default() -= 1;
        }
        self.calls.lock().push(call);
        if *self.closed.borrow() {
            return Err(RpcError::SessionClosed);
        }
        match self.failures.lock().get_mut(method).and_then(VecDeque::pop_front) {
            Some(message) => Err(RpcError::Remote { message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EditorRpc for FakeEditor {
    fn channel_id(&self) -> Option<i64> {
        Some(7)
    }

    async fn input(&self, keys: &str) -> Result<(), RpcError> {
        self.record("input", format!("input {keys}")).await
    }

    async fn command(&self, command: &str) -> Result<(), RpcError> {
        self.record("command", format!("command {command}")).await
    }

    async fn exec_lua(&self, code: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let args = value_to_json(&Value::Array(args));
        self.record("exec_lua", format!("exec_lua {code} {args}")).await?;
        Ok(Value::Nil)
    }

    async fn attach_ui(&self, width: u32, height: u32, options: UiOptions) -> Result<(), RpcError> {
        let options = value_to_json(&options.to_value());
        self.record("attach_ui", format!("attach_ui {width}x{height} {options}")).await
    }

    async fn try_resize_ui(&self, width: u32, height: u32) -> Result<(), RpcError> {
        self.record("try_resize_ui", format!("try_resize_ui {width}x{height}")).await
    }

    async fn set_var(&self, name: &str, value: Value) -> Result<(), RpcError> {
        let value = value_to_json(&value);
        self.record("set_var", format!("set_var {name}={value}")).await
    }

    async fn subscribe(&self, event: &str) -> Result<(), RpcError> {
        self.record("subscribe", format!("subscribe {event}")).await
    }

    async fn serve(&self, sink: mpsc::Sender<Notification>) -> Result<(), RpcError> {
        let feed = self.feed_rx.lock().take();
        let Some(mut feed) = feed else {
            return Err(RpcError::Protocol("already serving".into()));
        };
        let mut closed = self.closed.subscribe();
        loop {
            tokio::select! {
                _ = async { let _ = closed.wait_for(|closed| *closed).await; } => return Ok(()),
                next = feed.recv() => match next {
                    Some(notification) => {
                        let _ = sink.send(notification).await;
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

/// Hands out queued editors in order; an empty queue refuses the dial.
#[derive(Default)]
pub struct FakeDialer {
    editors: Mutex<VecDeque<Arc<FakeEditor>>>,
    dialed: Mutex<Vec<String>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, editor: Arc<FakeEditor>) {
        self.editors.lock().push_back(editor);
    }

    /// The next dial waits until the returned sender fires or is dropped.
    pub fn hold_next_dial(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, address: &str) -> Result<Arc<dyn EditorRpc>, RpcError> {
        self.dialed.lock().push(address.to_string());
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match self.editors.lock().pop_front() {
            Some(editor) => Ok(editor as Arc<dyn EditorRpc>),
            None => Err(RpcError::Dial {
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            }),
        }
    }
}
