/// Live-update listener.
///
/// Holds one push connection to the backend for as long as a view is mounted.
/// The payload of a push is never inspected: any data message means
/// "something changed", and triggers one full refresh through the sync
/// engine. Refreshes are spawned, not queued, so N messages produce N
/// fetches even if earlier ones are still in flight.
///
/// State machine:
///   Connecting ──ok──▶ Open ──close/error──▶ Closed
///        ▲                                     │
///        └──────── backoff (if enabled) ───────┘
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::TaskGateway;
use crate::sync::SyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What the transport delivered, stripped of any payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveFrame {
    /// A data message: refetch.
    Signal,
    /// Ping/pong and other transport plumbing.
    Control,
    /// The peer closed the connection.
    Close,
}

pub type FrameStream = BoxStream<'static, Result<LiveFrame, String>>;

/// Opens the push channel. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<FrameStream>;
}

// ── WebSocket transport ───────────────────────────────────────────────────────

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<FrameStream> {
        let (ws, _resp) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("WebSocket connect to {} failed", self.url))?;
        // Polled as a whole (not split) so pongs are flushed while reading
        let frames = ws.map(|msg| match msg {
            Ok(Message::Text(_)) | Ok(Message::Binary(_)) => Ok(LiveFrame::Signal),
            Ok(Message::Close(_)) => Ok(LiveFrame::Close),
            Ok(_) => Ok(LiveFrame::Control),
            Err(e) => Err(e.to_string()),
        });
        Ok(frames.boxed())
    }
}

// ── Reconnect policy ──────────────────────────────────────────────────────────

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Owner of a running listener. Dropping it closes the connection.
pub struct LiveHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    signals: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl LiveHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Data messages acted on so far.
    pub fn signals_handled(&self) -> u64 {
        self.signals.load(Ordering::SeqCst)
    }

    /// Ask the listener to stop. Nothing received after this is processed.
    pub fn request_close(&self) {
        self.cancel.cancel();
    }

    /// Close the connection and wait for the listener task to finish.
    pub async fn close(mut self) {
        self.request_close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Wait for the listener to stop on its own (reconnect disabled or exhausted).
    #[cfg(test)]
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Start listening. Must be called from within a tokio runtime.
pub fn spawn_listener<C, G>(
    connector: C,
    engine: Arc<SyncEngine<G>>,
    policy: ReconnectPolicy,
) -> LiveHandle
where
    C: Connector,
    G: TaskGateway + 'static,
{
    let cancel = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let signals = Arc::new(AtomicU64::new(0));

    let task = tokio::spawn(run(
        connector,
        engine,
        policy,
        cancel.clone(),
        state_tx,
        signals.clone(),
    ));

    LiveHandle {
        cancel,
        state: state_rx,
        signals,
        task: Some(task),
    }
}

enum Ended {
    Cancelled,
    ClosedByPeer,
    Failed(String),
}

async fn run<C, G>(
    connector: C,
    engine: Arc<SyncEngine<G>>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
    signals: Arc<AtomicU64>,
) where
    C: Connector,
    G: TaskGateway + 'static,
{
    let mut backoff = policy.initial_backoff;
    let mut failures: u32 = 0;
    let mut opened_before = false;

    loop {
        state.send_replace(ConnectionState::Connecting);
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = connector.connect() => res,
        };

        match connected {
            Ok(mut frames) => {
                state.send_replace(ConnectionState::Open);
                info!("live updates connected");
                backoff = policy.initial_backoff;
                failures = 0;
                if opened_before {
                    // Pushes sent while we were away are lost; catch up once
                    spawn_refresh(&engine);
                }
                opened_before = true;

                let ended = pump(&mut frames, &engine, &cancel, &signals).await;
                drop(frames);
                state.send_replace(ConnectionState::Closed);
                match ended {
                    Ended::Cancelled => break,
                    Ended::ClosedByPeer => info!("live updates closed by server"),
                    Ended::Failed(e) => warn!(error = %e, "live updates connection lost"),
                }
            }
            Err(e) => {
                state.send_replace(ConnectionState::Closed);
                warn!(error = %format!("{e:#}"), "live updates connect failed");
            }
        }

        if !policy.enabled {
            break;
        }
        failures += 1;
        if policy.max_attempts.is_some_and(|max| failures > max) {
            warn!(attempts = failures - 1, "live updates: giving up reconnecting");
            break;
        }
        debug!(?backoff, "live updates: reconnecting after backoff");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = policy.next_backoff(backoff);
    }

    state.send_replace(ConnectionState::Closed);
}

async fn pump<G>(
    frames: &mut FrameStream,
    engine: &Arc<SyncEngine<G>>,
    cancel: &CancellationToken,
    signals: &AtomicU64,
) -> Ended
where
    G: TaskGateway + 'static,
{
    loop {
        // Cancellation is checked first on every poll, so frames already
        // buffered are dropped once close has been requested.
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ended::Cancelled,
            frame = frames.next() => frame,
        };
        match next {
            Some(Ok(LiveFrame::Signal)) => {
                signals.fetch_add(1, Ordering::SeqCst);
                debug!("live update received; refreshing");
                spawn_refresh(engine);
            }
            Some(Ok(LiveFrame::Control)) => {}
            Some(Ok(LiveFrame::Close)) | None => return Ended::ClosedByPeer,
            Some(Err(e)) => return Ended::Failed(e),
        }
    }
}

/// Fire-and-forget refresh; failures are logged by the engine.
fn spawn_refresh<G>(engine: &Arc<SyncEngine<G>>)
where
    G: TaskGateway + 'static,
{
    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        let _ = engine.refresh().await;
    });
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use futures_util::SinkExt;
    use tokio::sync::{Notify, mpsc};

    use super::*;
    use crate::error::SyncResult;
    use crate::store::TaskStore;
    use crate::sync::OrderingPolicy;
    use crate::sync::testing::{FakeBackend, task};
    use crate::task::{NewTask, Task, TaskUpdate};

    type FrameTx = mpsc::UnboundedSender<Result<LiveFrame, String>>;

    /// Hands out pre-made in-memory connections, one per connect call.
    #[derive(Default)]
    struct ScriptedConnector {
        connections: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<LiveFrame, String>>>>,
        attempts: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn push_connection(&self) -> FrameTx {
            let (tx, rx) = mpsc::unbounded_channel();
            self.connections.lock().unwrap().push_back(rx);
            tx
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<FrameStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let rx = self.connections.lock().unwrap().pop_front();
            let Some(rx) = rx else {
                anyhow::bail!("connection refused");
            };
            let frames = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            });
            Ok(frames.boxed())
        }
    }

    fn fast_retry(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_attempts,
        }
    }

    fn engine(backend: FakeBackend) -> Arc<SyncEngine<FakeBackend>> {
        Arc::new(SyncEngine::new(backend, TaskStore::new(), OrderingPolicy::default()))
    }

    async fn wait_for_state(handle: &LiveHandle, want: ConnectionState) {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for connection state")
            .expect("listener dropped state channel");
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[tokio::test]
    async fn test_every_message_triggers_one_refresh() {
        let connector = ScriptedConnector::default();
        let tx = connector.push_connection();
        let engine = engine(FakeBackend::with_tasks(vec![task("1", "A")]));
        let handle = spawn_listener(connector, engine.clone(), ReconnectPolicy::disabled());
        wait_for_state(&handle, ConnectionState::Open).await;

        for _ in 0..3 {
            tx.send(Ok(LiveFrame::Signal)).unwrap();
        }
        tx.send(Ok(LiveFrame::Control)).unwrap();

        wait_until(|| engine.gateway().fetch_count() == 3).await;
        assert_eq!(handle.signals_handled(), 3);
        assert_eq!(engine.store().get_all(), vec![task("1", "A")]);
        handle.close().await;
        assert_eq!(engine.gateway().fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_state_goes_closed_when_server_closes() {
        let connector = ScriptedConnector::default();
        let attempts = connector.attempts.clone();
        let tx = connector.push_connection();
        let handle = spawn_listener(connector, engine(FakeBackend::default()), ReconnectPolicy::disabled());
        wait_for_state(&handle, ConnectionState::Open).await;

        tx.send(Ok(LiveFrame::Close)).unwrap();
        wait_for_state(&handle, ConnectionState::Closed).await;
        tokio::time::timeout(Duration::from_secs(5), handle.join()).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_network_error_is_treated_like_close() {
        let connector = ScriptedConnector::default();
        let tx = connector.push_connection();
        let engine = engine(FakeBackend::default());
        let handle = spawn_listener(connector, engine.clone(), ReconnectPolicy::disabled());
        wait_for_state(&handle, ConnectionState::Open).await;

        tx.send(Err("connection reset by peer".to_string())).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.join()).await.unwrap();
        assert_eq!(engine.gateway().fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_nothing_processed_after_close_requested() {
        let connector = ScriptedConnector::default();
        let tx = connector.push_connection();
        // Already buffered before the listener ever runs
        for _ in 0..3 {
            tx.send(Ok(LiveFrame::Signal)).unwrap();
        }
        let engine = engine(FakeBackend::default());
        let handle = spawn_listener(connector, engine.clone(), ReconnectPolicy::default());
        handle.request_close();
        handle.close().await;

        assert_eq!(engine.gateway().fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_close_stops_an_open_connection() {
        let connector = ScriptedConnector::default();
        let tx = connector.push_connection();
        let engine = engine(FakeBackend::default());
        let handle = spawn_listener(connector, engine.clone(), ReconnectPolicy::default());
        wait_for_state(&handle, ConnectionState::Open).await;
        let mut state = handle.subscribe();

        handle.close().await;
        assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
        // The receiving end is gone with the connection
        let _ = tx.send(Ok(LiveFrame::Signal));
        tokio::task::yield_now().await;
        assert_eq!(engine.gateway().fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnects_with_catch_up_refresh() {
        let connector = ScriptedConnector::default();
        let first = connector.push_connection();
        let _second = connector.push_connection();
        let engine = engine(FakeBackend::with_tasks(vec![task("1", "A")]));
        let handle = spawn_listener(connector, engine.clone(), fast_retry(None));
        wait_for_state(&handle, ConnectionState::Open).await;
        assert_eq!(engine.gateway().fetch_count(), 0);

        drop(first);
        wait_until(|| engine.gateway().fetch_count() == 1).await;
        assert_eq!(handle.state(), ConnectionState::Open);
        assert_eq!(engine.store().get_all().len(), 1);
        handle.close().await;
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let connector = ScriptedConnector::default();
        let attempts = connector.attempts.clone();
        let handle = spawn_listener(connector, engine(FakeBackend::default()), fast_retry(Some(2)));
        let mut state = handle.subscribe();

        tokio::time::timeout(Duration::from_secs(5), handle.join()).await.unwrap();
        // First attempt plus two retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            enabled: true,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
            max_attempts: None,
        };
        let b1 = policy.next_backoff(policy.initial_backoff);
        let b2 = policy.next_backoff(b1);
        let b3 = policy.next_backoff(b2);
        assert_eq!(b1, Duration::from_secs(1));
        assert_eq!(b2, Duration::from_secs(2));
        assert_eq!(b3, Duration::from_secs(2));
    }

    // ── Push during an in-flight manual fetch ────────────────────────────────

    /// Counts fetches; the first one is held until released.
    struct HeldFetch {
        fetches: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl TaskGateway for HeldFetch {
        async fn fetch_tasks(&self) -> SyncResult<Vec<Task>> {
            let idx = self.fetches.fetch_add(1, Ordering::SeqCst);
            if idx == 0 {
                self.release.notified().await;
            }
            Ok(vec![task("1", "A")])
        }
        async fn create_task(&self, _: &NewTask) -> SyncResult<()> { Ok(()) }
        async fn delete_task(&self, _: &str) -> SyncResult<()> { Ok(()) }
        async fn set_done(&self, _: &str) -> SyncResult<()> { Ok(()) }
        async fn update_task(&self, _: &str, _: &TaskUpdate) -> SyncResult<()> { Ok(()) }
    }

    #[tokio::test]
    async fn test_push_while_manual_fetch_in_flight_fetches_twice() {
        let gateway = HeldFetch { fetches: AtomicUsize::new(0), release: Notify::new() };
        let engine = Arc::new(SyncEngine::new(gateway, TaskStore::new(), OrderingPolicy::default()));
        let connector = ScriptedConnector::default();
        let tx = connector.push_connection();
        let handle = spawn_listener(connector, engine.clone(), ReconnectPolicy::disabled());
        wait_for_state(&handle, ConnectionState::Open).await;

        let manual = tokio::spawn({
            let engine = engine.clone();
            async move { engine.refresh().await }
        });
        wait_until(|| engine.gateway().fetches.load(Ordering::SeqCst) == 1).await;

        tx.send(Ok(LiveFrame::Signal)).unwrap();
        wait_until(|| engine.gateway().fetches.load(Ordering::SeqCst) == 2).await;

        engine.gateway().release.notify_one();
        assert!(manual.await.unwrap().is_ok());
        handle.close().await;

        assert_eq!(engine.gateway().fetches.load(Ordering::SeqCst), 2);
        assert_eq!(engine.store().get_all().len(), 1);
    }

    // ── Real WebSocket transport ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_ws_connector_maps_messages_to_signals() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("Task updated!".into())).await.unwrap();
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut frames = WsConnector::new(format!("ws://{addr}/ws")).connect().await.unwrap();
        let mut signals = 0;
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(LiveFrame::Signal) => signals += 1,
                Ok(LiveFrame::Control) => {}
                Ok(LiveFrame::Close) | Err(_) => break,
            }
        }
        assert_eq!(signals, 2);
    }

    #[tokio::test]
    async fn test_ws_connector_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(WsConnector::new(format!("ws://{addr}/ws")).connect().await.is_err());
    }
}
