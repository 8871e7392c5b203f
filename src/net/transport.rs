//! WebTransport server
//!
//! Each client opens one reliable bidirectional stream. The read half feeds
//! [`ConnectionContext`]; the write half is owned by a writer task draining a
//! bounded queue that the tick fills with `try_send`.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, RwLock};

use crate::anticheat::rate_limiter::ConnectionRateLimits;
use crate::config::ServerConfig;
use crate::game::input_buffer::{InputBufferError, InputKind, InputSender};
use crate::game::state::ConnectionId;
use crate::metrics::Metrics;
use crate::net::auth::Authenticator;
use crate::net::framing::{read_client_message, write_server_message, FramingError};
use crate::net::game_session::{
    authorize_join, start_full_sync, start_game_loop, unix_millis, GameSession,
};
#[cfg(feature = "npc_roaming")]
use crate::net::game_session::start_roaming;
use crate::net::protocol::{ClientMessage, ServerMessage};
use crate::net::tls::TlsConfig;
use crate::persistence::bridge::PersistenceBridge;
use crate::persistence::store::CharacterStore;

/// Services every connection needs
#[derive(Clone)]
pub struct ServerContext {
    pub game_session: Arc<RwLock<GameSession>>,
    pub auth: Arc<dyn Authenticator>,
    pub store: Arc<dyn CharacterStore>,
    pub persistence: Arc<PersistenceBridge>,
    pub metrics: Arc<Metrics>,
}

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    context: ServerContext,
}

impl WebTransportServer {
    pub async fn new(config: ServerConfig, context: ServerContext) -> anyhow::Result<Self> {
        let tls_config = TlsConfig::load(&config).await?;
        Ok(Self {
            config,
            tls_config,
            context,
        })
    }

    pub fn cert_hash(&self) -> &str {
        &self.tls_config.cert_hash
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Start the world tasks and accept connections forever
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;

        let bind_addr = self.bind_addr();
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_address(bind_addr)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)?;

        tracing::info!("WebTransport server listening on {}", bind_addr);
        tracing::info!("Certificate hash: {}", self.tls_config.cert_hash);

        let (tick_interval, full_sync_interval, _roam_interval) = {
            let session = self.context.game_session.read().await;
            let config = session.config();
            (config.tick_interval, config.full_sync_interval, config.roam_interval)
        };

        start_game_loop(
            self.context.game_session.clone(),
            self.context.persistence.clone(),
            self.context.metrics.clone(),
            tick_interval,
        );
        start_full_sync(
            self.context.game_session.clone(),
            self.context.persistence.clone(),
            full_sync_interval,
        );
        #[cfg(feature = "npc_roaming")]
        start_roaming(self.context.game_session.clone(), _roam_interval);

        loop {
            let incoming = server.accept().await;
            let context = self.context.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, context).await {
                    tracing::debug!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Whether the read loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Per-connection message handling, independent of the transport
pub struct ConnectionContext {
    connection_id: ConnectionId,
    server: ServerContext,
    outbound: mpsc::Sender<ServerMessage>,
    inputs: InputSender,
    limits: ConnectionRateLimits,
    joined: bool,
}

impl ConnectionContext {
    /// Register the connection's outbound queue with the world
    pub async fn open(
        connection_id: ConnectionId,
        server: ServerContext,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let mut session = server.game_session.write().await;
        let config = session.config();
        let (tx, rx) = mpsc::channel(config.outbound_queue_size);
        let limits = ConnectionRateLimits::new(config.max_events_per_second, config.max_rate_violations);
        let inputs = session.input_sender();
        session.register_connection(connection_id, tx.clone());
        drop(session);

        server.metrics.connections_active.fetch_add(1, Ordering::Relaxed);

        (
            Self {
                connection_id,
                server,
                outbound: tx,
                inputs,
                limits,
                joined: false,
            },
            rx,
        )
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Handle one decoded client message received at `now`
    pub async fn on_message(&mut self, message: ClientMessage, now: Instant) -> Flow {
        if let Err(violation) = self.limits.check_event(now) {
            self.server.metrics.inputs_rate_limited.fetch_add(1, Ordering::Relaxed);
            if ConnectionRateLimits::is_fatal(&violation) {
                tracing::warn!("Disconnecting {}: {}", self.connection_id, violation);
                return Flow::Close;
            }
            tracing::debug!("Dropping message from {}: {}", self.connection_id, violation);
            return Flow::Continue;
        }

        match message {
            ClientMessage::Join {
                credential,
                character_id,
            } => self.join(&credential, character_id).await,
            ClientMessage::KeyDown(key) => self.queue_input(InputKind::KeyDown(key), now),
            ClientMessage::KeyUp(key) => self.queue_input(InputKind::KeyUp(key), now),
            ClientMessage::SubmitPosition { position } => {
                self.queue_input(InputKind::SubmitPosition(position), now)
            }
            ClientMessage::SetZoom { zoom } => self.queue_input(InputKind::SetZoom(zoom), now),
            ClientMessage::Ping { timestamp } => {
                self.reply(ServerMessage::Pong {
                    client_timestamp: timestamp,
                    server_timestamp: unix_millis(),
                });
                Flow::Continue
            }
            ClientMessage::Leave => {
                tracing::debug!("Connection {} requested leave", self.connection_id);
                Flow::Close
            }
        }
    }

    async fn join(&mut self, credential: &str, character_id: u32) -> Flow {
        let authorized = authorize_join(
            self.server.auth.as_ref(),
            self.server.store.as_ref(),
            credential,
            character_id,
        )
        .await;

        // Store lookups happen before taking the world lock
        let joined = match authorized {
            Ok((verified, record)) => {
                let mut session = self.server.game_session.write().await;
                session
                    .join(self.connection_id, &verified, record, Instant::now(), unix_millis())
                    .map(|outcome| {
                        session.dispatch(outcome.outbound);
                        outcome.displaced
                    })
            }
            Err(e) => Err(e),
        };

        match joined {
            Ok(displaced) => {
                self.joined = true;
                for state in displaced {
                    self.server.persistence.persist_final(state);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Join of character {} rejected on {}: {}",
                    character_id,
                    self.connection_id,
                    e
                );
                self.server.metrics.joins_rejected.fetch_add(1, Ordering::Relaxed);
                self.reply(ServerMessage::JoinRejected {
                    reason: e.client_reason().to_string(),
                });
            }
        }
        Flow::Continue
    }

    fn queue_input(&mut self, kind: InputKind, now: Instant) -> Flow {
        if !self.joined {
            tracing::debug!("Ignoring input from {} before join", self.connection_id);
            return Flow::Continue;
        }
        match self.inputs.try_send(self.connection_id, kind, now) {
            Ok(()) => Flow::Continue,
            Err(InputBufferError::Full) => {
                self.server.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Input buffer full, dropping input from {}", self.connection_id);
                Flow::Continue
            }
            Err(InputBufferError::Disconnected) => Flow::Close,
        }
    }

    fn reply(&self, message: ServerMessage) {
        if self.outbound.try_send(message).is_err() {
            self.server.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove the connection from the world and write its final state
    pub async fn close(self) {
        let final_state = self
            .server
            .game_session
            .write()
            .await
            .disconnect(self.connection_id, unix_millis());

        if let Some(state) = final_state {
            if let Err(e) = self.server.persistence.persist_final(state).await {
                tracing::warn!("Final write task for {} failed: {}", self.connection_id, e);
            }
        }
        self.server.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!("Connection closed (conn_id: {})", self.connection_id);
    }
}

/// Drain a connection's outbound queue into its stream; stops after a kick
pub async fn run_writer<W: AsyncWrite + Unpin>(
    writer: &mut W,
    mut queue: mpsc::Receiver<ServerMessage>,
    metrics: &Metrics,
) {
    while let Some(message) = queue.recv().await {
        let kicked = matches!(message, ServerMessage::Kicked { .. });
        match write_server_message(writer, &message).await {
            Ok(bytes) => {
                metrics.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::debug!("Stream write error: {}", e);
                break;
            }
        }
        if kicked {
            break;
        }
    }
}

/// Handle a single WebTransport connection
async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    server: ServerContext,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    tracing::debug!(
        "New session request: authority {}, path {}",
        session_request.authority(),
        session_request.path()
    );

    let connection = session_request.accept().await?;
    let (mut send, mut recv) = connection.accept_bi().await?;

    let connection_id = uuid::Uuid::new_v4();
    tracing::debug!(
        "Connection {} from {}",
        connection_id,
        connection.remote_address()
    );

    let metrics = server.metrics.clone();
    let (mut context, queue) = ConnectionContext::open(connection_id, server).await;

    let writer_metrics = metrics.clone();
    let mut writer = tokio::spawn(async move {
        run_writer(&mut send, queue, &writer_metrics).await;
    });

    loop {
        tokio::select! {
            read = read_client_message(&mut recv) => {
                match read {
                    Ok((message, bytes)) => {
                        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        metrics.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
                        if context.on_message(message, Instant::now()).await == Flow::Close {
                            break;
                        }
                    }
                    // Whole frame consumed; skip it
                    Err(FramingError::Decode(e)) => {
                        tracing::debug!("Undecodable message from {}: {}", connection_id, e);
                    }
                    Err(FramingError::ConnectionClosed) => break,
                    Err(e) => {
                        tracing::debug!("Stream read error on {}: {}", connection_id, e);
                        break;
                    }
                }
            }
            // Writer ends on kick or a dead stream
            _ = &mut writer => break,
        }
    }

    context.close().await;
    writer.abort();
    Ok(())
}
