//! WebSocket server: accepts connections and routes them to the client or
//! worker handler based on the first frame.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{SinkExt, StreamExt};
use tgp_proto::{ClientMessage, SchedulerMessage, WorkerMessage};
use tgp_scheduler::{LivenessMonitor, SchedulerService};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::client_handler::handle_client_connection;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::session::{SessionExecutor, WorkerSession, WorkerSessions, session_channel};

/// The scheduler daemon.
#[derive(Debug)]
pub struct SchedulerServer {
    config: Arc<ServerConfig>,
    scheduler: Arc<SchedulerService>,
    sessions: WorkerSessions,
    connections: Arc<AtomicUsize>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl SchedulerServer {
    /// Create a server whose scheduler dispatches over worker sessions.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let sessions = WorkerSessions::new();
        let scheduler = SchedulerService::new(config.scheduler.clone())
            .with_executor(Arc::new(SessionExecutor::new(sessions.clone())));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            config: Arc::new(config),
            scheduler: Arc::new(scheduler),
            sessions,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The scheduler behind the server.
    #[must_use]
    pub fn scheduler(&self) -> Arc<SchedulerService> {
        Arc::clone(&self.scheduler)
    }

    /// Connected worker sessions.
    #[must_use]
    pub const fn sessions(&self) -> &WorkerSessions {
        &self.sessions
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// A sender that stops [`serve`](Self::serve) when signalled.
    #[must_use]
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the configured address and serve until shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn serve(&mut self) -> ServerResult<()> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed { addr, source: e })?;
        self.serve_listener(listener).await
    }

    /// Serve on an already bound listener until shut down.
    ///
    /// The liveness monitor runs for as long as this call does.
    ///
    /// # Errors
    ///
    /// Returns an error if the server was already started.
    pub async fn serve_listener(&mut self, listener: TcpListener) -> ServerResult<()> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| ServerError::Internal("server already started".into()))?;

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Scheduler listening");
        }
        let monitor = LivenessMonitor::start(Arc::clone(&self.scheduler));

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => self.handle_connection(stream, peer_addr),
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        monitor.stop().await;
        info!("Scheduler server shutting down");
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let open = self.connections.load(Ordering::Relaxed);
        if open >= self.config.max_connections {
            warn!(
                peer = %peer_addr,
                current = open,
                max = self.config.max_connections,
                "Connection rejected: max connections reached"
            );
            return;
        }

        let scheduler = Arc::clone(&self.scheduler);
        let config = Arc::clone(&self.config);
        let sessions = self.sessions.clone();
        let connections = Arc::clone(&self.connections);

        tokio::spawn(async move {
            connections.fetch_add(1, Ordering::Relaxed);
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
                    connections.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };
            debug!(peer = %peer_addr, "WebSocket connection established");

            match detect_and_handle_connection(ws_stream, scheduler, config, sessions).await {
                Ok(()) => debug!(peer = %peer_addr, "Connection closed normally"),
                Err(e) => debug!(peer = %peer_addr, error = %e, "Connection ended with error"),
            }
            connections.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

/// Detect the connection type from the first message and route it.
///
/// Clients open with `Hello`; workers open with `Register`.
async fn detect_and_handle_connection(
    mut ws_stream: WebSocketStream<TcpStream>,
    scheduler: Arc<SchedulerService>,
    config: Arc<ServerConfig>,
    sessions: WorkerSessions,
) -> ServerResult<()> {
    let first_msg = match ws_stream.next().await {
        Some(Ok(WsMessage::Text(text))) => text,
        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
        Some(Ok(_)) => {
            return Err(ServerError::Protocol(
                "expected text message as first message".into(),
            ));
        }
        Some(Err(e)) => return Err(e.into()),
    };

    if let Ok(ClientMessage::Hello {
        protocol_version, ..
    }) = ClientMessage::from_json(&first_msg)
    {
        debug!("Detected client connection");
        return handle_client_connection(ws_stream, scheduler, config, protocol_version).await;
    }

    if let Ok(first @ WorkerMessage::Register { .. }) = WorkerMessage::from_json(&first_msg) {
        debug!("Detected worker connection");
        return run_worker_session(ws_stream, scheduler, config, sessions, first).await;
    }

    Err(ServerError::Protocol(format!(
        "unrecognized first message: {}",
        first_msg.chars().take(100).collect::<String>()
    )))
}

/// Drive one worker connection.
///
/// Replies and scheduler orders share one outbound queue, so the worker sees
/// them in the order they were produced.
async fn run_worker_session(
    ws_stream: WebSocketStream<TcpStream>,
    scheduler: Arc<SchedulerService>,
    config: Arc<ServerConfig>,
    sessions: WorkerSessions,
    first: WorkerMessage,
) -> ServerResult<()> {
    let (mut ws_sink, mut ws_read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = session_channel();
    let mut session = WorkerSession::new(outbound_tx.clone(), sessions, config.heartbeat_interval_secs());

    if let Some(reply) = session.handle(first, &scheduler) {
        outbound_tx.send(reply).await.map_err(|_| ServerError::SessionClosed)?;
    }

    let read_task = async {
        while let Some(msg_result) = ws_read.next().await {
            let text = match msg_result {
                Ok(WsMessage::Text(t)) => t,
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "WebSocket read error");
                    break;
                }
            };
            if text.len() > config.max_message_size {
                warn!(size = text.len(), "Dropping oversized worker message");
                continue;
            }
            let msg = match WorkerMessage::from_json(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "Failed to parse worker message");
                    continue;
                }
            };
            if let Some(reply) = session.handle(msg, &scheduler) {
                if outbound_tx.send(reply).await.is_err() {
                    break;
                }
            }
        }
        session.close();
    };

    let write_task = async {
        while let Some(msg) = outbound_rx.recv().await {
            match to_ws(&msg) {
                Ok(ws_msg) => {
                    if ws_sink.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize scheduler message"),
            }
        }
    };

    tokio::select! {
        () = read_task => {}
        () = write_task => {}
    }
    Ok(())
}

/// Encode a scheduler message as a WebSocket text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_ws(msg: &SchedulerMessage) -> ServerResult<WsMessage> {
    Ok(WsMessage::Text(msg.to_json()?))
}
