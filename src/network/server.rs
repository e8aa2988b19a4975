//! WebSocket Game Server
//!
//! Accepts WebSocket connections and bridges them to the [`Router`].
//! Each connection gets a reader loop (frames → [`RouterEvent`]s) and a
//! writer task draining its bounded outbound channel.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::router::{Router, RouterConfig, RouterEvent};
use crate::network::ConnectionId;
use crate::stats::{JsonFileStatsStore, MemoryStatsStore, StatsStore, StoreError};

/// Router inbox capacity.
const EVENT_BUFFER: usize = 1024;

/// How long a closing connection may spend flushing queued frames.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// How long shutdown waits for the router to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound queue length.
    pub outbound_buffer: usize,
    /// JSON stats file. `None` keeps stats in memory.
    pub stats_path: Option<PathBuf>,
    /// Matchmaking and session settings.
    pub router: RouterConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            max_connections: 1000,
            outbound_buffer: 64,
            stats_path: None,
            router: RouterConfig::default(),
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, GameServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GameServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(
            key: &'static str,
            raw: Option<String>,
        ) -> Result<Option<T>, GameServerError> {
            match raw {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| GameServerError::InvalidConfig { key, value }),
            }
        }

        let mut config = Self::default();

        if let Some(addr) = parse::<SocketAddr>("BIND_ADDR", lookup("BIND_ADDR"))? {
            config.bind_addr = addr;
        }
        if let Some(port) = parse::<u16>("PORT", lookup("PORT"))? {
            config.bind_addr.set_port(port);
        }
        if let Some(max) = parse("MAX_CONNECTIONS", lookup("MAX_CONNECTIONS"))? {
            config.max_connections = max;
        }
        config.stats_path = lookup("STATS_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        if let Some(secs) = parse::<u64>("QUEUE_TIMEOUT_SECS", lookup("QUEUE_TIMEOUT_SECS"))? {
            config.router.queue_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(len) = parse("MAX_NAME_LEN", lookup("MAX_NAME_LEN"))? {
            config.router.max_name_len = len;
        }
        if let Some(limit) = parse("LEADERBOARD_LIMIT", lookup("LEADERBOARD_LIMIT"))? {
            config.router.leaderboard_limit = limit;
        }

        Ok(config)
    }

    /// Open the configured statistics backend.
    pub fn open_stats_store(&self) -> Result<Arc<dyn StatsStore>, StoreError> {
        let store: Arc<dyn StatsStore> = match &self.stats_path {
            Some(path) => {
                let store = JsonFileStatsStore::open(path)?;
                info!("Statistics persisted to {}", store.path().display());
                Arc::new(store)
            }
            None => {
                info!("STATS_PATH not set, keeping statistics in memory");
                Arc::new(MemoryStatsStore::new())
            }
        };
        Ok(store)
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// A configuration value did not parse.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidConfig {
        /// Variable name.
        key: &'static str,
        /// Rejected value.
        value: String,
    },

    /// Statistics backend could not be opened.
    #[error("Stats store error: {0}")]
    Stats(#[from] StoreError),
}

/// Holds one slot of the connection limit until dropped.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Statistics backend handed to the router.
    stats: Arc<dyn StatsStore>,
    /// Open connections.
    connections: Arc<AtomicUsize>,
    /// Next connection handle.
    next_conn: AtomicU64,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, stats: Arc<dyn StatsStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            stats,
            connections: Arc::new(AtomicUsize::new(0)),
            next_conn: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Code Duel server v{} listening on {}",
            self.config.version,
            listener.local_addr()?
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let router = Router::new(self.config.router.clone(), self.stats.clone());
        let router_handle = tokio::spawn(router.run(event_rx));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(reject_connection(stream, addr));
                                continue;
                            }

                            let conn = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
                            info!("New connection {} from {}", conn, addr);
                            tokio::spawn(handle_connection(
                                stream,
                                conn,
                                ConnectionGuard::new(self.connections.clone()),
                                event_tx.clone(),
                                self.shutdown_tx.subscribe(),
                                self.config.outbound_buffer,
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // The router stops once every connection has reported its disconnect.
        drop(event_tx);
        if timeout(SHUTDOWN_GRACE, router_handle).await.is_err() {
            warn!("Router still busy after {:?}, exiting anyway", SHUTDOWN_GRACE);
        }

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Complete the handshake only to say the server is full.
async fn reject_connection(stream: TcpStream, addr: SocketAddr) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Handshake with rejected client {} failed: {}", addr, e);
            return;
        }
    };

    let msg = ServerMessage::error(ErrorCode::ServerOverloaded, "connection limit reached");
    if let Ok(text) = msg.to_json() {
        let _ = ws.send(Message::Text(text)).await;
    }
    let _ = ws.close(None).await;
}

/// Drive one WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    conn: ConnectionId,
    _guard: ConnectionGuard,
    events: mpsc::Sender<RouterEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
    outbound_buffer: usize,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {}: {}", conn, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(outbound_buffer);

    if events
        .send(RouterEvent::Connected { conn, sender: out_tx.clone() })
        .await
        .is_err()
    {
        warn!("Router unavailable, dropping {}", conn);
        return;
    }

    // Spawn message sender task
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                        Ok(msg) => {
                            if events.send(RouterEvent::Message { conn, msg }).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("Invalid message from {}: {}", conn, e);
                            reply(&out_tx, conn, ServerMessage::error(
                                ErrorCode::InvalidInput,
                                "invalid message format",
                            ));
                        }
                    },
                    Some(Ok(Message::Binary(_))) => {
                        reply(&out_tx, conn, ServerMessage::error(
                            ErrorCode::InvalidInput,
                            "expected a JSON text frame",
                        ));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} closed the connection", conn);
                        break;
                    }
                    // Ping/pong is answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error for {}: {}", conn, e);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                reply(&out_tx, conn, ServerMessage::Shutdown {
                    reason: "server shutting down".to_string(),
                });
                break;
            }
        }
    }

    // Exactly one disconnect per connection.
    let _ = events.send(RouterEvent::Disconnected { conn }).await;

    // Writer ends once the router and this task have dropped their senders.
    drop(out_tx);
    let abort = sender_task.abort_handle();
    if timeout(FLUSH_GRACE, sender_task).await.is_err() {
        debug!("Client {} did not drain in time", conn);
        abort.abort();
    }

    info!("Client {} cleaned up", conn);
}

fn reply(out: &mpsc::Sender<ServerMessage>, conn: ConnectionId, msg: ServerMessage) {
    if let Err(e) = out.try_send(msg) {
        warn!("Dropping message for {}: {}", conn, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Slot;
    use std::collections::BTreeMap;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start(
        config: ServerConfig,
    ) -> (Arc<GameServer>, SocketAddr, JoinHandle<Result<(), GameServerError>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(config, Arc::new(MemoryStatsStore::new())));
        let s = server.clone();
        let handle = tokio::spawn(async move { s.serve(listener).await });
        (server, addr, handle)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, msg: ClientMessage) {
        ws.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return ServerMessage::from_json(&text).unwrap();
            }
        }
    }

    async fn joined(addr: SocketAddr, name: &str) -> Client {
        let mut ws = connect(addr).await;
        send(&mut ws, ClientMessage::Join { username: name.into() }).await;
        assert!(matches!(recv(&mut ws).await, ServerMessage::Joined { .. }));
        ws
    }

    fn error_code(msg: ServerMessage) -> ErrorCode {
        match msg {
            ServerMessage::Error(e) => e.code,
            other => panic!("expected error, got {:?}", other),
        }
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.max_connections, 1000);
        assert!(config.stats_path.is_none());
        assert!(config.router.queue_timeout.is_none());
        assert_eq!(config.router.leaderboard_limit, 100);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: BTreeMap<&str, &str> = [
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("PORT", "4000"),
            ("MAX_CONNECTIONS", "5"),
            ("STATS_PATH", "/tmp/stats.json"),
            ("QUEUE_TIMEOUT_SECS", "30"),
            ("MAX_NAME_LEN", "16"),
        ]
        .into_iter()
        .collect();

        let config =
            ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.stats_path, Some(PathBuf::from("/tmp/stats.json")));
        assert_eq!(config.router.queue_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.router.max_name_len, 16);
        assert_eq!(config.router.leaderboard_limit, 100);
    }

    #[test]
    fn test_config_rejects_garbage() {
        let err = ServerConfig::from_lookup(|k| (k == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, GameServerError::InvalidConfig { key: "PORT", .. }));
    }

    #[test]
    fn test_zero_queue_timeout_disables_expiry() {
        let config = ServerConfig::from_lookup(|k| {
            (k == "QUEUE_TIMEOUT_SECS").then(|| "0".to_string())
        })
        .unwrap();
        assert!(config.router.queue_timeout.is_none());
    }

    #[test]
    fn test_in_memory_store_without_path() {
        let store = ServerConfig::default().open_stats_store().unwrap();
        assert!(store.leaderboard(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(local_config(), Arc::new(MemoryStatsStore::new()));
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_match_over_websocket() {
        let (server, addr, handle) = start(local_config()).await;

        let mut alice = joined(addr, "alice").await;
        send(&mut alice, ClientMessage::FindMatch).await;
        assert_eq!(recv(&mut alice).await, ServerMessage::Searching);

        let mut bob = joined(addr, "bob").await;
        send(&mut bob, ClientMessage::FindMatch).await;
        match recv(&mut bob).await {
            ServerMessage::MatchFound(info) => assert_eq!(info.your_slot, Slot::Two),
            other => panic!("unexpected {:?}", other),
        }
        match recv(&mut alice).await {
            ServerMessage::MatchFound(info) => assert_eq!(info.your_slot, Slot::One),
            other => panic!("unexpected {:?}", other),
        }

        send(&mut alice, ClientMessage::SetSecret { secret: "1234".into(), slot: 1 }).await;
        assert_eq!(
            recv(&mut bob).await,
            ServerMessage::OpponentSecretSet { slot: Slot::One }
        );
        send(&mut bob, ClientMessage::SetSecret { secret: "5678".into(), slot: 2 }).await;
        assert!(matches!(recv(&mut alice).await, ServerMessage::GameStarted { your_slot: Slot::One, .. }));
        assert!(matches!(recv(&mut bob).await, ServerMessage::GameStarted { your_slot: Slot::Two, .. }));

        send(&mut alice, ClientMessage::SubmitGuess { guess: "5678".into(), slot: 1 }).await;
        for ws in [&mut alice, &mut bob] {
            assert!(matches!(
                recv(ws).await,
                ServerMessage::GameFinished { winner: Slot::One, .. }
            ));
        }

        send(&mut bob, ClientMessage::Stats { username: "alice".into() }).await;
        match recv(&mut bob).await {
            ServerMessage::Stats { stats } => assert_eq!(stats.wins, 1),
            other => panic!("unexpected {:?}", other),
        }

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frames_get_invalid_input() {
        let (server, addr, handle) = start(local_config()).await;
        let mut ws = connect(addr).await;

        ws.send(Message::Text("not json".into())).await.unwrap();
        assert_eq!(error_code(recv(&mut ws).await), ErrorCode::InvalidInput);

        ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        assert_eq!(error_code(recv(&mut ws).await), ErrorCode::InvalidInput);

        // Connection is still usable.
        send(&mut ws, ClientMessage::Ping { timestamp: 7 }).await;
        assert!(matches!(recv(&mut ws).await, ServerMessage::Pong { timestamp: 7, .. }));

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_notifies_opponent() {
        let (server, addr, handle) = start(local_config()).await;
        let mut alice = joined(addr, "alice").await;
        let mut bob = joined(addr, "bob").await;

        send(&mut alice, ClientMessage::FindMatch).await;
        assert_eq!(recv(&mut alice).await, ServerMessage::Searching);
        send(&mut bob, ClientMessage::FindMatch).await;
        assert!(matches!(recv(&mut alice).await, ServerMessage::MatchFound(_)));
        assert!(matches!(recv(&mut bob).await, ServerMessage::MatchFound(_)));

        bob.close(None).await.unwrap();
        drop(bob);
        assert_eq!(recv(&mut alice).await, ServerMessage::OpponentDisconnected);

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (server, addr, handle) = start(ServerConfig {
            max_connections: 1,
            ..local_config()
        })
        .await;

        let mut first = connect(addr).await;
        send(&mut first, ClientMessage::Ping { timestamp: 1 }).await;
        assert!(matches!(recv(&mut first).await, ServerMessage::Pong { .. }));
        assert_eq!(server.connection_count(), 1);

        let mut second = connect(addr).await;
        assert_eq!(error_code(recv(&mut second).await), ErrorCode::ServerOverloaded);

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_notifies_clients() {
        let (server, addr, handle) = start(local_config()).await;
        let mut ws = connect(addr).await;
        send(&mut ws, ClientMessage::Ping { timestamp: 1 }).await;
        assert!(matches!(recv(&mut ws).await, ServerMessage::Pong { .. }));

        server.shutdown();
        assert!(matches!(recv(&mut ws).await, ServerMessage::Shutdown { .. }));
        handle.await.unwrap().unwrap();
    }
}
