//! Connection to the market data server
//!
//! Owns one TCP session at a time. In synchronous mode every call reads its
//! own response inline. In asynchronous mode a background receive loop owns
//! the read half and dispatches frames to registered requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use super::ReconnectPolicy;
use crate::config::Config;
use crate::error::{DataserError, Result};
use crate::metrics::ClientMetrics;
use crate::params;
use crate::protocol::api::actions;
use crate::protocol::{frame, ApiRegistry, ApiRequest, ApiResult, Subscription};

/// Call mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Calls block and return decoded results directly
    Sync,
    /// Calls return immediately; results arrive through the receive loop
    Async,
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    LoginPending,
    Connected,
    /// Async mode with the receive loop running
    Streaming,
    Reconnecting,
    Closing,
    Closed,
}

/// Shared handle to one client connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    metrics: ClientMetrics,
    registry: Arc<ApiRegistry>,
    /// Mode chosen at construction; `connect()` restores it
    configured_mode: Mode,
    async_mode: AtomicBool,
    /// Compression flag, updated from every received header
    compressed: AtomicBool,
    /// Set by an explicit `close()`; stops the reconnect policy
    halted: AtomicBool,
    closing: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    /// Read half; the receive loop holds this lock for each header/body read
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    receive_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(config: Config, mode: Mode) -> Result<Self> {
        Ok(Self::with_metrics(config, mode, ClientMetrics::new()?))
    }

    pub fn with_metrics(config: Config, mode: Mode, metrics: ClientMetrics) -> Self {
        let compressed = config.compress;
        Self {
            inner: Arc::new(Inner {
                config,
                metrics,
                registry: Arc::new(ApiRegistry::new()),
                configured_mode: mode,
                async_mode: AtomicBool::new(mode == Mode::Async),
                compressed: AtomicBool::new(compressed),
                halted: AtomicBool::new(false),
                closing: watch::Sender::new(false),
                state: watch::Sender::new(ConnectionState::Disconnected),
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                receive_task: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.inner.metrics
    }

    pub fn registry(&self) -> &Arc<ApiRegistry> {
        &self.inner.registry
    }

    pub fn mode(&self) -> Mode {
        if self.inner.async_mode.load(Ordering::SeqCst) {
            Mode::Async
        } else {
            Mode::Sync
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Wait until the connection reaches `target`, giving up after `within`
    pub async fn wait_for_state(&self, target: ConnectionState, within: Duration) -> bool {
        let mut rx = self.inner.state.subscribe();
        let reached = matches!(
            timeout(within, rx.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Streaming
        )
    }

    pub fn is_closing(&self) -> bool {
        *self.inner.closing.borrow()
    }

    /// Whether outbound bodies are currently gzip'd
    pub fn compression(&self) -> bool {
        self.inner.compressed.load(Ordering::SeqCst)
    }

    /// Open the TCP session, log in if credentials are configured, and in
    /// async mode send one heartbeat and start the receive loop.
    pub async fn connect(&self) -> Result<()> {
        self.prepare_connect().await;
        self.establish(true).await
    }

    /// Same as `connect()` but never logs in
    pub async fn connect_without_login(&self) -> Result<()> {
        self.prepare_connect().await;
        self.establish(false).await
    }

    /// A loop still winding down after `close()` must exit before its
    /// closing flag is cleared, or it would keep the old stream alive.
    async fn prepare_connect(&self) {
        if self.is_closing() || self.is_halted() {
            self.join_receive_loop().await;
        }
        self.inner.halted.store(false, Ordering::SeqCst);
        self.inner
            .async_mode
            .store(self.inner.configured_mode == Mode::Async, Ordering::SeqCst);
        self.inner.closing.send_replace(false);
    }

    async fn establish(&self, login: bool) -> Result<()> {
        if self.receive_loop_running() {
            debug!("Receive loop already running, connect skipped");
            return Ok(());
        }

        self.open_stream(login).await?;

        if self.mode() == Mode::Async {
            if let Err(e) = self.heartbeat().await {
                error!(error = %e, "Initial heartbeat failed");
                self.teardown().await;
                return Err(e);
            }
            self.spawn_receive_loop();
            self.set_state(ConnectionState::Streaming);
        }

        info!(address = %self.inner.config.address(), mode = ?self.mode(), "Connected");
        Ok(())
    }

    /// Rebuild the session after a reconnect delay: no login, heartbeat only
    pub(crate) async fn reopen(&self) -> Result<()> {
        if self.is_halted() {
            return Err(DataserError::Cancelled("connection closed".to_string()));
        }
        self.inner.async_mode.store(true, Ordering::SeqCst);
        self.inner.closing.send_replace(false);

        self.open_stream(false).await?;

        // close() may have run while the stream was opening
        if self.is_halted() {
            self.teardown().await;
            self.release_stream().await;
            return Err(DataserError::Cancelled("connection closed".to_string()));
        }

        if let Err(e) = self.send_heartbeat(Mode::Async).await {
            self.teardown().await;
            return Err(e);
        }
        self.set_state(ConnectionState::Streaming);
        Ok(())
    }

    async fn open_stream(&self, login: bool) -> Result<()> {
        let address = self.inner.config.address();
        let limit = self.inner.config.connect_timeout();

        self.set_state(ConnectionState::Connecting);
        debug!(address = %address, mode = ?self.mode(), "Connecting to market data server");

        let stream = match timeout(limit, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!(address = %address, error = %e, "Connection failed");
                self.set_state(ConnectionState::Disconnected);
                return Err(DataserError::Connection(format!("{}: {}", address, e)));
            }
            Err(_) => {
                error!(address = %address, timeout_ms = limit.as_millis() as u64, "Connection timed out");
                self.set_state(ConnectionState::Disconnected);
                return Err(DataserError::Timeout(limit));
            }
        };

        if self.is_halted() {
            debug!(address = %address, "Connection closed while connecting");
            self.set_state(ConnectionState::Closed);
            return Err(DataserError::Cancelled("connection closed".to_string()));
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        *self.inner.reader.lock().await = Some(reader);
        *self.inner.writer.lock().await = Some(writer);
        self.inner
            .compressed
            .store(self.inner.config.compress, Ordering::SeqCst);

        if login && self.inner.config.has_credentials() {
            self.set_state(ConnectionState::LoginPending);
            match self.login().await {
                Ok(result) if result.success => {
                    info!("Login accepted");
                }
                Ok(result) => {
                    warn!(msg = %result.msg, "Login rejected");
                    self.release_stream().await;
                    self.set_state(ConnectionState::Disconnected);
                    return Err(DataserError::Authentication(result.msg));
                }
                Err(e) => {
                    error!(error = %e, "Login failed");
                    self.release_stream().await;
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
            }
        }

        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Send the configured credentials and wait for the verdict
    pub async fn login(&self) -> Result<ApiResult> {
        let request = ApiRequest::immediate(
            actions::LOGIN,
            params! {
                "app_id" => self.inner.config.app_id,
                "app_secret" => self.inner.config.app_secret,
            },
        );
        self.call_immediate(&request).await
    }

    /// Send one heartbeat. In async mode the reply is registered and
    /// swallowed by the receive loop; in sync mode it is read inline.
    pub async fn heartbeat(&self) -> Result<()> {
        self.send_heartbeat(self.mode()).await
    }

    async fn send_heartbeat(&self, mode: Mode) -> Result<()> {
        let params = params! {
            "app_id" => self.inner.config.app_id,
            "app_secret" => self.inner.config.app_secret,
        };

        match mode {
            Mode::Async => {
                let request = Arc::new(ApiRequest::delivered(actions::HEARTBEAT, params, |result| {
                    trace!(success = result.success, "Heartbeat acknowledged");
                }));
                self.inner.registry.register(request.clone()).await;
                self.send(&request).await?;
            }
            Mode::Sync => {
                self.call_immediate(&ApiRequest::immediate(actions::HEARTBEAT, params))
                    .await?;
            }
        }

        self.inner.metrics.heartbeats_sent.inc();
        debug!("Heartbeat sent");
        Ok(())
    }

    /// Write one request frame
    pub async fn send(&self, request: &ApiRequest) -> Result<()> {
        let frame = frame::encode(&request.payload(), self.compression())?;

        let mut writer = self.inner.writer.lock().await;
        let stream = writer.as_mut().ok_or(DataserError::NotConnected)?;
        stream.write_all(&frame).await?;

        debug!(action = %request.action(), bytes = frame.len(), "Request sent");
        Ok(())
    }

    /// Send and read the next frame on the calling flow
    async fn call_immediate(&self, request: &ApiRequest) -> Result<ApiResult> {
        self.send(request).await?;

        let limit = self.inner.config.read_timeout();
        let mut reader = self.inner.reader.lock().await;
        let stream = reader.as_mut().ok_or(DataserError::NotConnected)?;

        let (header, envelope) = timeout(limit, frame::read_frame(stream))
            .await
            .map_err(|_| DataserError::Timeout(limit))??;
        drop(reader);

        self.set_compression(header.compressed);
        let result = ApiResult::from_envelope(envelope);
        request.record(result.clone());
        Ok(result)
    }

    /// One-shot call. Sync mode reads the response inline; async mode waits
    /// for the receive loop to deliver the first response for `action`, then
    /// puts back any subscription it displaced.
    pub async fn request(&self, action: &str, params: Map<String, Value>) -> Result<ApiResult> {
        if !self.is_connected() {
            return Err(DataserError::NotConnected);
        }

        match self.mode() {
            Mode::Sync => {
                self.call_immediate(&ApiRequest::immediate(action, params))
                    .await
            }
            Mode::Async => {
                let (tx, rx) = oneshot::channel();
                let slot = std::sync::Mutex::new(Some(tx));
                let request = Arc::new(ApiRequest::delivered(action, params, move |result| {
                    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some(sender) = sender {
                        let _ = sender.send(result.clone());
                    }
                }));

                let displaced = self.inner.registry.register(request.clone()).await;

                let limit = self.inner.config.read_timeout();
                let outcome = match self.send(&request).await {
                    Ok(()) => match timeout(limit, rx).await {
                        Ok(Ok(result)) => Ok(result),
                        Ok(Err(_)) => Err(DataserError::Cancelled(action.to_string())),
                        Err(_) => Err(DataserError::Timeout(limit)),
                    },
                    Err(e) => Err(e),
                };

                if self.inner.registry.remove(&request).await {
                    if let Some(subscription) = displaced {
                        self.inner.registry.reinstate(subscription).await;
                    }
                }
                outcome
            }
        }
    }

    /// Subscribing call. In async mode the callback is registered under
    /// `action` and fires for every later response or push. Sync mode has no
    /// receive loop, so the callback fires once with the inline response.
    pub async fn subscribe<F>(
        &self,
        action: &str,
        params: Map<String, Value>,
        callback: F,
    ) -> Result<Option<Subscription>>
    where
        F: Fn(&ApiResult) + Send + Sync + 'static,
    {
        if !self.is_connected() {
            return Err(DataserError::NotConnected);
        }

        let request = Arc::new(ApiRequest::delivered(action, params, callback));

        match self.mode() {
            Mode::Async => {
                self.inner.registry.register(request.clone()).await;
                if let Err(e) = self.send(&request).await {
                    self.inner.registry.remove(&request).await;
                    return Err(e);
                }
                info!(action = %action, "Subscribed");
                Ok(Some(Subscription::new(self.inner.registry.clone(), request)))
            }
            Mode::Sync => {
                let result = self.call_immediate(&request).await?;
                request.deliver(result);
                Ok(None)
            }
        }
    }

    /// Orderly bidirectional shutdown. The read half is dropped here only if
    /// no receive loop owns it; otherwise the loop releases it on exit.
    pub async fn disconnect(&self) {
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            debug!("Disconnecting");
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Shutdown of write half failed");
            }
        }

        if !self.receive_loop_running() {
            self.release_stream().await;
        }
    }

    /// Close the connection for good. Idempotent.
    pub async fn close(&self) {
        self.inner.halted.store(true, Ordering::SeqCst);
        self.teardown().await;
    }

    /// Close, wait the reconnect delay, and reconnect in async mode without
    /// logging in again.
    pub async fn reconnect(&self) -> Result<()> {
        self.close().await;
        self.join_receive_loop().await;

        sleep(self.inner.config.reconnect_delay()).await;

        self.inner.halted.store(false, Ordering::SeqCst);
        self.inner.async_mode.store(true, Ordering::SeqCst);
        self.inner.closing.send_replace(false);
        self.establish(false).await
    }

    /// Force sync mode, raise the closing flag, and disconnect
    pub(crate) async fn teardown(&self) {
        self.inner.async_mode.store(false, Ordering::SeqCst);
        let was_closing = self.inner.closing.send_replace(true);
        if !was_closing {
            debug!("Closing connection");
        }

        if self.state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Closing);
        }
        self.disconnect().await;
    }

    /// Drop the read half and mark the session closed
    pub(crate) async fn release_stream(&self) {
        let reader = self.inner.reader.lock().await.take();
        let writer = self.inner.writer.lock().await.take();
        if reader.is_some() || writer.is_some() {
            debug!("Stream released");
        }
        if self.is_closing() {
            self.set_state(ConnectionState::Closed);
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn closing_signal(&self) -> watch::Receiver<bool> {
        self.inner.closing.subscribe()
    }

    pub(crate) fn reader(&self) -> &Mutex<Option<OwnedReadHalf>> {
        &self.inner.reader
    }

    pub(crate) fn set_compression(&self, compressed: bool) {
        self.inner.compressed.store(compressed, Ordering::SeqCst);
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    fn receive_loop_running(&self) -> bool {
        self.inner
            .receive_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn spawn_receive_loop(&self) {
        let mut slot = self
            .inner
            .receive_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let policy = ReconnectPolicy::new(self.inner.config.reconnect_delay());
        let connection = self.clone();
        *slot = Some(tokio::spawn(policy.supervise(connection)));
    }

    async fn join_receive_loop(&self) {
        let task = self
            .inner
            .receive_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Receive loop ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.config.address())
            .field("mode", &self.mode())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> Config {
        Config {
            server_ip: "127.0.0.1".to_string(),
            // Port 1 on loopback refuses immediately
            port: 1,
            connect_timeout_ms: 500,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_refused_connect_stays_disconnected() {
        let conn = Connection::new(unreachable_config(), Mode::Sync).unwrap();
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(
            err,
            DataserError::Connection(_) | DataserError::Timeout(_)
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_calls_require_connection() {
        let conn = Connection::new(Config::default(), Mode::Async).unwrap();
        assert!(matches!(
            conn.request(actions::FACTORS, Map::new()).await,
            Err(DataserError::NotConnected)
        ));
        assert!(matches!(
            conn.subscribe(actions::QUOTES, Map::new(), |_| {}).await,
            Err(DataserError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_reopen_refused_after_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = Connection::new(
            Config {
                port,
                ..Config::default()
            },
            Mode::Async,
        )
        .unwrap();

        conn.close().await;
        assert!(matches!(
            conn.reopen().await,
            Err(DataserError::Cancelled(_))
        ));
        assert!(conn.is_closing());
        assert_eq!(conn.mode(), Mode::Sync);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conn = Connection::new(Config::default(), Mode::Async).unwrap();
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closing());
        assert_eq!(conn.mode(), Mode::Sync);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
