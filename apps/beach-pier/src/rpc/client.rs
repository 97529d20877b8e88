use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rmpv::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use super::codec::{encode, remote_error_message, FrameDecoder, Message};
use super::{Dialer, EditorRpc, Notification, RpcError, UiOptions};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PendingCalls = HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

const READ_CHUNK: usize = 64 * 1024;

/// msgpack-rpc client for a Neovim `--listen` socket.
///
/// Responses are only read while [`EditorRpc::serve`] runs, so the owner
/// must drive `serve` before issuing calls.
pub struct NvimClient {
    address: String,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader: Mutex<Option<(BoxedReader, FrameDecoder)>>,
    backlog: Mutex<Vec<Notification>>,
    pending: Mutex<PendingCalls>,
    next_id: AtomicU64,
    channel_id: Option<i64>,
    call_timeout: Duration,
    closed: watch::Sender<bool>,
}

impl NvimClient {
    /// Connects and learns the channel id via `nvim_get_api_info`.
    pub async fn connect(
        address: &str,
        dial_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, RpcError> {
        let (reader, writer) = tokio::time::timeout(dial_timeout, open_stream(address))
            .await
            .map_err(|_| RpcError::Dial {
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::TimedOut, "connection timed out"),
            })?
            .map_err(|source| RpcError::Dial {
                address: address.to_string(),
                source,
            })?;

        let mut client = Self::from_parts(address, reader, writer, call_timeout);
        client.channel_id = client.handshake(dial_timeout).await?;
        debug!(address, channel_id = ?client.channel_id, "editor connection established");
        Ok(client)
    }

    /// Wraps an already connected byte stream. No handshake is performed.
    pub fn from_parts<R, W>(address: &str, reader: R, writer: W, call_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            address: address.to_string(),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            reader: Mutex::new(Some((Box::new(reader), FrameDecoder::new()))),
            backlog: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            channel_id: None,
            call_timeout,
            closed,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn handshake(&self, limit: Duration) -> Result<Option<i64>, RpcError> {
        let parts = self.reader.lock().take();
        let Some((mut reader, mut decoder)) = parts else {
            return Err(RpcError::Protocol("reader already taken".into()));
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write(Message::Request {
            id,
            method: "nvim_get_api_info".into(),
            params: Vec::new(),
        })
        .await?;

        let mut chunk = vec![0u8; READ_CHUNK];
        let outcome = tokio::time::timeout(limit, async {
            loop {
                while let Some(message) = decoder.next_frame()? {
                    match message {
                        Message::Response { id: got, error, result } if got == id => {
                            if !error.is_nil() {
                                return Err(RpcError::Remote {
                                    message: remote_error_message(&error),
                                });
                            }
                            let channel = result
                                .as_array()
                                .and_then(|info| info.first())
                                .and_then(Value::as_i64);
                            return Ok(channel);
                        }
                        Message::Notification { method, params } => {
                            self.backlog.lock().push(Notification { method, params });
                        }
                        other => trace!(?other, "ignoring frame during handshake"),
                    }
                }
                let read = reader.read(&mut chunk).await?;
                if read == 0 {
                    return Err(RpcError::SessionClosed);
                }
                decoder.extend(&chunk[..read]);
            }
        })
        .await
        .map_err(|_| RpcError::Timeout(limit))?;

        *self.reader.lock() = Some((reader, decoder));
        outcome
    }

    async fn write(&self, message: Message) -> Result<(), RpcError> {
        let bytes = encode(message)?;
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(RpcError::SessionClosed);
        };
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = result {
            debug!(address = %self.address, error = %err, "editor write failed");
            *guard = None;
            return Err(RpcError::SessionClosed);
        }
        Ok(())
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::SessionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        if self.is_closed() {
            self.pending.lock().remove(&id);
            return Err(RpcError::SessionClosed);
        }

        if let Err(err) = self
            .write(Message::Request {
                id,
                method: method.to_string(),
                params,
            })
            .await
        {
            self.pending.lock().remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::SessionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(RpcError::Timeout(self.call_timeout))
            }
        }
    }

    async fn dispatch(&self, message: Message, sink: &mpsc::Sender<Notification>) {
        match message {
            Message::Response { id, error, result } => {
                let waiter = self.pending.lock().remove(&id);
                let Some(waiter) = waiter else {
                    trace!(id, "response for unknown request");
                    return;
                };
                let outcome = if error.is_nil() {
                    Ok(result)
                } else {
                    Err(RpcError::Remote {
                        message: remote_error_message(&error),
                    })
                };
                let _ = waiter.send(outcome);
            }
            Message::Notification { method, params } => {
                if sink.send(Notification { method, params }).await.is_err() {
                    trace!("notification sink dropped");
                }
            }
            Message::Request { id, method, .. } => {
                debug!(%method, "rejecting request from editor");
                let reply = Message::Response {
                    id,
                    error: Value::Array(vec![
                        Value::from(0),
                        Value::from(format!("method not found: {method}")),
                    ]),
                    result: Value::Nil,
                };
                if let Err(err) = self.write(reply).await {
                    debug!(error = %err, "failed to answer editor request");
                }
            }
        }
    }

    fn fail_pending(&self) {
        let waiters: Vec<_> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(RpcError::SessionClosed));
        }
    }
}

#[async_trait]
impl EditorRpc for NvimClient {
    fn channel_id(&self) -> Option<i64> {
        self.channel_id
    }

    async fn input(&self, keys: &str) -> Result<(), RpcError> {
        self.request("nvim_input", vec![Value::from(keys)]).await?;
        Ok(())
    }

    async fn command(&self, command: &str) -> Result<(), RpcError> {
        self.request("nvim_command", vec![Value::from(command)]).await?;
        Ok(())
    }

    async fn exec_lua(&self, code: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.request("nvim_exec_lua", vec![Value::from(code), Value::Array(args)])
            .await
    }

    async fn attach_ui(&self, width: u32, height: u32, options: UiOptions) -> Result<(), RpcError> {
        self.request(
            "nvim_ui_attach",
            vec![Value::from(width), Value::from(height), options.to_value()],
        )
        .await?;
        Ok(())
    }

    async fn try_resize_ui(&self, width: u32, height: u32) -> Result<(), RpcError> {
        self.request("nvim_ui_try_resize", vec![Value::from(width), Value::from(height)])
            .await?;
        Ok(())
    }

    async fn set_var(&self, name: &str, value: Value) -> Result<(), RpcError> {
        self.request("nvim_set_var", vec![Value::from(name), value])
            .await?;
        Ok(())
    }

    async fn subscribe(&self, event: &str) -> Result<(), RpcError> {
        self.request("nvim_subscribe", vec![Value::from(event)]).await?;
        Ok(())
    }

    async fn serve(&self, sink: mpsc::Sender<Notification>) -> Result<(), RpcError> {
        let parts = self.reader.lock().take();
        let Some((mut reader, mut decoder)) = parts else {
            return Err(RpcError::Protocol("connection is already being served".into()));
        };

        let backlog = std::mem::take(&mut *self.backlog.lock());
        for notification in backlog {
            let _ = sink.send(notification).await;
        }

        let mut closed = self.closed.subscribe();
        let mut chunk = vec![0u8; READ_CHUNK];
        let result = 'pump: loop {
            loop {
                match decoder.next_frame() {
                    Ok(Some(message)) => self.dispatch(message, &sink).await,
                    Ok(None) => break,
                    Err(err) => break 'pump Err(err),
                }
            }

            tokio::select! {
                _ = closed.wait_for(|closed| *closed) => break Ok(()),
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => decoder.extend(&chunk[..n]),
                    Err(err) => break Err(RpcError::Io(err)),
                },
            }
        };

        self.closed.send_replace(true);
        self.fail_pending();
        if let Err(err) = &result {
            warn!(address = %self.address, error = %err, "editor connection ended with error");
        }
        result
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.fail_pending();
    }
}

/// Dials editors over TCP, or Unix sockets for filesystem paths.
#[derive(Clone, Debug)]
pub struct TcpDialer {
    pub dial_timeout: Duration,
    pub call_timeout: Duration,
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, address: &str) -> Result<Arc<dyn EditorRpc>, RpcError> {
        let client = NvimClient::connect(address, self.dial_timeout, self.call_timeout).await?;
        Ok(Arc::new(client) as Arc<dyn EditorRpc>)
    }
}

async fn open_stream(address: &str) -> io::Result<(BoxedReader, BoxedWriter)> {
    #[cfg(unix)]
    {
        if is_socket_path(address) {
            let stream = tokio::net::UnixStream::connect(address).await?;
            let (reader, writer) = stream.into_split();
            return Ok((Box::new(reader), Box::new(writer)));
        }
    }

    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    Ok((Box::new(reader), Box::new(writer)))
}

#[cfg_attr(not(unix), allow(dead_code))]
fn is_socket_path(address: &str) -> bool {
    address.starts_with('/') || address.starts_with("./") || address.ends_with(".sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    async fn read_frame(stream: &mut DuplexStream, decoder: &mut FrameDecoder) -> Message {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(message) = decoder.next_frame().unwrap() {
                return message;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client hung up");
            decoder.extend(&chunk[..n]);
        }
    }

    async fn write_frame(stream: &mut DuplexStream, message: Message) {
        stream.write_all(&encode(message).unwrap()).await.unwrap();
    }

    fn client_pair() -> (Arc<NvimClient>, DuplexStream) {
        let (local, remote) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let client = NvimClient::from_parts("test", reader, writer, Duration::from_secs(2));
        (Arc::new(client), remote)
    }

    #[tokio::test]
    async fn request_resolves_with_matching_response() {
        let (client, mut remote) = client_pair();
        let (sink, _notifications) = mpsc::channel(8);
        let server = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.serve(sink).await }
        });

        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.command("echo 1").await }
        });

        let mut decoder = FrameDecoder::new();
        let Message::Request { id, method, params } = read_frame(&mut remote, &mut decoder).await
        else {
            panic!("expected request");
        };
        assert_eq!(method, "nvim_command");
        assert_eq!(params, vec![Value::from("echo 1")]);
        write_frame(
            &mut remote,
            Message::Response {
                id,
                error: Value::Nil,
                result: Value::Nil,
            },
        )
        .await;

        call.await.unwrap().unwrap();
        client.close().await;
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn remote_errors_surface_with_text() {
        let (client, mut remote) = client_pair();
        let (sink, _notifications) = mpsc::channel(8);
        tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.serve(sink).await }
        });
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.try_resize_ui(10, 10).await }
        });

        let mut decoder = FrameDecoder::new();
        let Message::Request { id, .. } = read_frame(&mut remote, &mut decoder).await else {
            panic!("expected request");
        };
        write_frame(
            &mut remote,
            Message::Response {
                id,
                error: Value::Array(vec![
                    Value::from(0),
                    Value::from("UI not attached to channel: 1"),
                ]),
                result: Value::Nil,
            },
        )
        .await;

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_ui_not_attached());
    }

    #[tokio::test]
    async fn notifications_are_forwarded_in_order() {
        let (client, mut remote) = client_pair();
        let (sink, mut notifications) = mpsc::channel(8);
        tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.serve(sink).await }
        });

        for method in ["first", "second", "third"] {
            write_frame(
                &mut remote,
                Message::Notification {
                    method: method.into(),
                    params: vec![],
                },
            )
            .await;
        }

        for expected in ["first", "second", "third"] {
            let notification = notifications.recv().await.unwrap();
            assert_eq!(notification.method, expected);
        }
    }

    #[tokio::test]
    async fn remote_hangup_fails_pending_calls() {
        let (client, remote) = client_pair();
        let (sink, _notifications) = mpsc::channel(8);
        let server = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.serve(sink).await }
        });
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.input("i").await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(remote);

        server.await.unwrap().unwrap();
        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_session_closed());
        assert!(client.input("x").await.unwrap_err().is_session_closed());
    }

    #[tokio::test]
    async fn close_unblocks_serve() {
        let (client, _remote) = client_pair();
        let (sink, _notifications) = mpsc::channel(8);
        let server = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.serve(sink).await }
        });
        client.close().await;
        client.close().await;
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .expect("serve did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn dial_failure_names_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let timeout = Duration::from_secs(1);
        let err = match NvimClient::connect(&address, timeout, timeout).await {
            Ok(_) => panic!("dial unexpectedly succeeded"),
            Err(err) => err,
        };
        assert!(matches!(err, RpcError::Dial { .. }));
        assert!(err.to_string().contains(&address));
    }

    #[test]
    fn socket_paths_are_detected() {
        assert!(is_socket_path("/tmp/nvim.sock"));
        assert!(is_socket_path("./nvim.sock"));
        assert!(!is_socket_path("127.0.0.1:6666"));
    }
}
