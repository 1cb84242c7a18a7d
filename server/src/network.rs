//! Server network layer handling WebSocket connections and the coordinator loop

use crate::collaborators::Collaborators;
use crate::config::ServerConfig;
use crate::connection::{ConnectionId, ConnectionTable};
use crate::coordinator::{Coordinator, NetworkEvent};
use crate::countdown::{TimerDriver, TimerFired, TokioTimerDriver};
use crate::registry::SessionRegistry;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ErrorCode, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Time given to connection tasks to write their last messages on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Cloneable handle for stopping a running server.
#[derive(Clone)]
pub struct ServerHandle {
    events: mpsc::UnboundedSender<NetworkEvent>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.events.send(NetworkEvent::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Main server: accepts WebSocket connections and feeds the coordinator
pub struct Server {
    listener: TcpListener,
    coordinator: Coordinator,
    reap_interval: Duration,

    // Communication channels
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    events_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    timers_rx: mpsc::UnboundedReceiver<TimerFired>,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_collaborators(config, Collaborators::from_config(config)).await
    }

    pub async fn with_collaborators(
        config: &ServerConfig,
        collaborators: Collaborators,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let timers: Arc<dyn TimerDriver> = Arc::new(TokioTimerDriver::new(timers_tx));

        let coordinator = Coordinator::new(
            SessionRegistry::new(timers, config.defaults, config.max_sessions),
            ConnectionTable::new(config.max_connections),
            collaborators,
            events_tx.clone(),
            config.idle_timeout,
        );

        Ok(Server {
            listener,
            coordinator,
            reap_interval: config.reap_interval,
            events_tx,
            events_rx,
            timers_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Runs until a shutdown event arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let Server {
            listener,
            mut coordinator,
            reap_interval,
            events_tx,
            mut events_rx,
            mut timers_rx,
        } = self;

        tokio::spawn(accept_connections(listener, events_tx));

        let mut reaper = interval(reap_interval);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        reaper.tick().await;

        info!(
            "Coordinator running, server instance {}",
            coordinator.server_instance()
        );

        loop {
            tokio::select! {
                // Handle connection and collaborator events
                event = events_rx.recv() => {
                    match event {
                        Some(event) => {
                            if !coordinator.handle_event(event) {
                                break;
                            }
                        }
                        None => break,
                    }
                },

                // Handle countdown expiries
                Some(fired) = timers_rx.recv() => {
                    coordinator.handle_event(NetworkEvent::TimerExpired(fired));
                },

                // Drop sessions nobody came back to
                _ = reaper.tick() => {
                    coordinator.handle_event(NetworkEvent::ReapIdle);
                    debug!(
                        "{} sessions, {} connections",
                        coordinator.registry().len(),
                        coordinator.connections().len()
                    );
                }
            }
        }

        info!("Server shutting down");
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        Ok(())
    }
}

/// Accepts TCP connections and spawns one task per WebSocket.
async fn accept_connections(listener: TcpListener, events: mpsc::UnboundedSender<NetworkEvent>) {
    let mut next_id: u64 = 0;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                next_id += 1;
                tokio::spawn(serve_connection(
                    stream,
                    addr,
                    ConnectionId(next_id),
                    events.clone(),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        if events.is_closed() {
            break;
        }
    }
}

/// Pumps one WebSocket: inbound text goes to the coordinator, outbound
/// messages are written as JSON text frames. The socket closes once the
/// coordinator drops its sender.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection: ConnectionId,
    events: mpsc::UnboundedSender<NetworkEvent>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    debug!("Connection {} opened from {}", connection, addr);

    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    if events
        .send(NetworkEvent::NewConnection {
            connection,
            addr,
            sender: tx,
        })
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(message) = outbound else {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!("Connection {}: close failed: {}", connection, e);
                    }
                    break;
                };
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if let Err(e) = write.send(Message::Text(json)).await {
                            debug!("Connection {}: write failed: {}", connection, e);
                            break;
                        }
                    }
                    Err(e) => error!("Connection {}: failed to encode message: {}", connection, e),
                }
            },

            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let event = NetworkEvent::MessageReceived { connection, text };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::error(
                            ErrorCode::InvalidMessage,
                            "binary frames are not supported",
                        );
                        if let Ok(json) = serde_json::to_string(&reply) {
                            if let Err(e) = write.send(Message::Text(json)).await {
                                debug!("Connection {}: write failed: {}", connection, e);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Connection {}: read failed: {}", connection, e);
                        break;
                    }
                }
            }
        }
    }

    debug!("Connection {} closed", connection);
    if events
        .send(NetworkEvent::ConnectionClosed { connection })
        .is_err()
    {
        debug!("Coordinator gone before connection {} closed", connection);
    }
}
