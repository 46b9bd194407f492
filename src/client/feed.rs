//! Upstream feed client
//!
//! Two worker threads: the socket thread (auth, subscriptions, room diffs)
//! and the HTTP worker (terrain, PvP, map stats, tick duration). Both talk
//! to the main loop over bounded channels; nothing here touches world state.
//!
//! A lost connection is reported once as `FeedEvent::Disconnected` and is
//! not retried.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};

use super::config::{FeedSettings, ServerSettings};
use super::http::ApiClient;
use crate::core::constants::PVP_QUERY_INTERVAL;
use crate::core::io_traits::{ConnectionStatus, FeedError, FeedEvent, FeedEventReceiver, FeedSink};
use crate::core::protocol::{parse_socket_frame, shard_topic, SocketCommand, SocketFrame};
use crate::core::room::RoomName;

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

// =============================================================================
// TYPES
// =============================================================================

/// Commands for the socket thread
#[derive(Debug)]
enum SocketRequest {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

/// Commands for the HTTP worker
#[derive(Debug)]
enum HttpRequest {
    FetchTerrain(RoomName),
    QueryPvp,
    QueryMapStats(Vec<RoomName>),
    Shutdown,
}

// =============================================================================
// FEED CLIENT
// =============================================================================

pub struct FeedClient {
    server: ServerSettings,
    feed: FeedSettings,
    socket_tx: Option<Sender<SocketRequest>>,
    http_tx: Option<Sender<HttpRequest>>,
    rx: Option<Receiver<FeedEvent>>,
    threads: Vec<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
}

impl FeedClient {
    pub fn new(server: ServerSettings, feed: FeedSettings) -> Self {
        Self {
            server,
            feed,
            socket_tx: None,
            http_tx: None,
            rx: None,
            threads: Vec::new(),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Authenticate and start the worker threads
    ///
    /// Sign-in happens here so a bad credential fails the start-up instead of
    /// surfacing later as a disconnect.
    pub fn connect(&mut self) -> Result<(), FeedError> {
        if !self.threads.is_empty() {
            warn!("[FEED] Already running");
            return Ok(());
        }

        let mut api = ApiClient::new(&self.server)?;
        api.authenticate(&self.server.password)?;

        let capacity = self.feed.channel_capacity;
        let (socket_tx, socket_rx) = bounded::<SocketRequest>(capacity);
        let (http_tx, http_rx) = bounded::<HttpRequest>(capacity);
        let (event_tx, event_rx) = bounded::<FeedEvent>(capacity);

        self.shutdown_flag.store(false, Ordering::SeqCst);

        let socket_api = api.clone();
        let shutdown_flag = Arc::clone(&self.shutdown_flag);
        let events = event_tx.clone();
        self.threads.push(spawn_guarded("socket", event_tx.clone(), move || {
            socket_thread(socket_api, socket_rx, events, shutdown_flag);
        }));

        let refresh = Duration::from_secs(self.feed.tick_refresh_secs.max(1));
        let events = event_tx.clone();
        self.threads.push(spawn_guarded("http", event_tx, move || {
            http_thread(api, http_rx, events, refresh);
        }));

        self.socket_tx = Some(socket_tx);
        self.http_tx = Some(http_tx);
        self.rx = Some(event_rx);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(tx) = &self.socket_tx {
            let _ = tx.try_send(SocketRequest::Shutdown);
        }
        if let Some(tx) = &self.http_tx {
            let _ = tx.try_send(HttpRequest::Shutdown);
        }
        // Closing every queue unblocks workers waiting on either side
        self.socket_tx = None;
        self.http_tx = None;
        self.rx = None;
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// Room topics go to the configured shard
    fn wire_topic(&self, topic: &str) -> String {
        shard_topic(topic, self.server.shard())
    }

    fn queue_socket(&self, request: SocketRequest) -> Result<(), FeedError> {
        let tx = self.socket_tx.as_ref().ok_or(FeedError::NotConnected)?;
        tx.try_send(request).map_err(queue_error)
    }

    fn queue_http(&self, request: HttpRequest) -> Result<(), FeedError> {
        let tx = self.http_tx.as_ref().ok_or(FeedError::NotConnected)?;
        tx.try_send(request).map_err(queue_error)
    }
}

fn queue_error<T>(e: TrySendError<T>) -> FeedError {
    match e {
        TrySendError::Full(_) => {
            warn!("[FEED] Command queue full");
            FeedError::QueueFull
        }
        TrySendError::Disconnected(_) => FeedError::NotConnected,
    }
}

impl FeedSink for FeedClient {
    fn subscribe(&self, topic: &str) -> Result<(), FeedError> {
        self.queue_socket(SocketRequest::Subscribe(self.wire_topic(topic)))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), FeedError> {
        self.queue_socket(SocketRequest::Unsubscribe(self.wire_topic(topic)))
    }

    fn request_terrain(&self, room: &RoomName) -> Result<(), FeedError> {
        self.queue_http(HttpRequest::FetchTerrain(room.clone()))
    }

    fn request_pvp(&self) -> Result<(), FeedError> {
        self.queue_http(HttpRequest::QueryPvp)
    }

    fn request_map_stats(&self, rooms: &[RoomName]) -> Result<(), FeedError> {
        self.queue_http(HttpRequest::QueryMapStats(rooms.to_vec()))
    }
}

impl FeedEventReceiver for FeedClient {
    fn poll_event(&mut self) -> Option<FeedEvent> {
        let rx = self.rx.as_ref()?;
        rx.try_recv().ok()
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Spawn a worker that reports a panic as a fatal disconnect
fn spawn_guarded<F>(name: &'static str, events: Sender<FeedEvent>, body: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));

        if let Err(panic_info) = result {
            let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                format!("{} thread panic: {}", name, s)
            } else {
                format!("{} thread panic", name)
            };
            error!("{}", msg);
            let _ = events.send(FeedEvent::StatusChanged(ConnectionStatus::Error));
            let _ = events.send(FeedEvent::Disconnected(msg));
        }
    })
}

// =============================================================================
// SOCKET THREAD
// =============================================================================

fn socket_thread(
    api: ApiClient,
    requests: Receiver<SocketRequest>,
    events: Sender<FeedEvent>,
    shutdown_flag: Arc<AtomicBool>,
) {
    let url = api.socket_url();
    info!(url = %url, "[FEED] Connecting...");
    let _ = events.send(FeedEvent::StatusChanged(ConnectionStatus::Connecting));

    let mut socket = match connect_and_auth(&url, api.token().unwrap_or_default()) {
        Ok(socket) => socket,
        Err(e) => {
            error!(error = %e, "[FEED] Connection failed");
            let _ = events.send(FeedEvent::StatusChanged(ConnectionStatus::Error));
            let _ = events.send(FeedEvent::Disconnected(e.to_string()));
            return;
        }
    };

    info!("[FEED] Connected and authenticated");
    let _ = events.send(FeedEvent::StatusChanged(ConnectionStatus::Connected));

    let result = message_loop(&mut socket, &requests, &events, &shutdown_flag);
    let _ = socket.close(None);

    match result {
        Ok(()) => {
            info!("[FEED] Socket closed");
            let _ = events.send(FeedEvent::StatusChanged(ConnectionStatus::Disconnected));
        }
        Err(e) if shutdown_flag.load(Ordering::SeqCst) => {
            debug!(error = %e, "[FEED] Socket error during shutdown");
        }
        Err(e) => {
            error!(error = %e, "[FEED] Disconnected");
            let _ = events.send(FeedEvent::StatusChanged(ConnectionStatus::Error));
            let _ = events.send(FeedEvent::Disconnected(e.to_string()));
        }
    }
}

fn connect_and_auth(url: &str, token: &str) -> Result<Socket, FeedError> {
    let (mut socket, _) = connect(url).map_err(|e| FeedError::Socket(format!("connect failed: {}", e)))?;

    send_command(&mut socket, &SocketCommand::Auth(token.to_string()))?;

    // The server sends banners before answering the auth command
    loop {
        let message = socket
            .read()
            .map_err(|e| FeedError::Socket(format!("read: {}", e)))?;
        let Message::Text(text) = message else {
            continue;
        };
        match parse_socket_frame(&text)? {
            SocketFrame::AuthOk(_) => return Ok(socket),
            SocketFrame::AuthFailed => return Err(FeedError::Auth("socket rejected token".to_string())),
            other => debug!(frame = ?other, "[FEED] Pre-auth frame"),
        }
    }
}

fn message_loop(
    socket: &mut Socket,
    requests: &Receiver<SocketRequest>,
    events: &Sender<FeedEvent>,
    shutdown_flag: &Arc<AtomicBool>,
) -> Result<(), FeedError> {
    // Set non-blocking
    match socket.get_ref() {
        MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_nonblocking(true);
        }
        MaybeTlsStream::NativeTls(tls) => {
            let _ = tls.get_ref().set_nonblocking(true);
        }
        _ => {}
    }

    loop {
        if shutdown_flag.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Handle outgoing
        match requests.try_recv() {
            Ok(SocketRequest::Subscribe(topic)) => {
                debug!(topic = %topic, "[FEED] Subscribe");
                send_command(socket, &SocketCommand::Subscribe(topic))?;
            }
            Ok(SocketRequest::Unsubscribe(topic)) => {
                debug!(topic = %topic, "[FEED] Unsubscribe");
                send_command(socket, &SocketCommand::Unsubscribe(topic))?;
            }
            Ok(SocketRequest::Shutdown) => return Ok(()),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return Ok(()),
        }

        // Handle incoming
        match socket.read() {
            Ok(Message::Text(text)) => match parse_socket_frame(&text) {
                Ok(SocketFrame::Room(batch)) => {
                    if events.send(FeedEvent::RoomBatch(batch)).is_err() {
                        return Ok(());
                    }
                }
                Ok(SocketFrame::Compressed) => {
                    warn!("[FEED] Compressed frame ignored");
                }
                Ok(SocketFrame::AuthFailed) => {
                    return Err(FeedError::Auth("socket rejected token".to_string()));
                }
                Ok(other) => debug!(frame = ?other, "[FEED] Frame ignored"),
                Err(e) => {
                    warn!(error = %e, "[FEED] Malformed frame");
                    let _ = events.send(FeedEvent::Error(e.to_string()));
                }
            },
            Ok(Message::Close(_)) => return Err(FeedError::Socket("server closed".to_string())),
            Err(tungstenite::Error::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(FeedError::Socket(format!("read error: {}", e))),
            _ => {}
        }

        thread::sleep(Duration::from_millis(10));
    }
}

fn send_command(socket: &mut Socket, command: &SocketCommand) -> Result<(), FeedError> {
    socket
        .send(Message::Text(command.to_text()))
        .map_err(|e| FeedError::Socket(format!("send: {}", e)))
}

// =============================================================================
// HTTP WORKER
// =============================================================================

fn http_thread(api: ApiClient, requests: Receiver<HttpRequest>, events: Sender<FeedEvent>, refresh: Duration) {
    let mut next_tick_query = Instant::now();

    loop {
        let now = Instant::now();
        if now >= next_tick_query {
            match api.tick_duration() {
                Ok(ms) => {
                    debug!(ms, "[HTTP] Tick duration");
                    if events.send(FeedEvent::TickDuration(ms)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "[HTTP] Tick query failed"),
            }
            next_tick_query = now + refresh;
        }

        let request = match requests.recv_timeout(next_tick_query.saturating_duration_since(Instant::now())) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        let event = match request {
            HttpRequest::FetchTerrain(room) => match api.room_terrain(&room) {
                Ok(terrain) => {
                    debug!(room = %room, "[HTTP] Terrain loaded");
                    FeedEvent::TerrainLoaded(terrain)
                }
                Err(e) => FeedEvent::TerrainFailed {
                    room,
                    reason: e.to_string(),
                },
            },
            HttpRequest::QueryPvp => match api.pvp(PVP_QUERY_INTERVAL) {
                Ok((game_time, rooms)) => FeedEvent::PvpRooms { game_time, rooms },
                Err(e) => FeedEvent::Error(format!("pvp query: {}", e)),
            },
            HttpRequest::QueryMapStats(rooms) => match api.map_stats(&rooms) {
                Ok(stats) => FeedEvent::MapStats(stats),
                Err(e) => FeedEvent::Error(format!("map stats: {}", e)),
            },
            HttpRequest::Shutdown => return,
        };

        if events.send(event).is_err() {
            return;
        }
    }
}
