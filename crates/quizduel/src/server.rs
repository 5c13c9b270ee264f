//! `QuizDuelServer` builder and server loop.
//!
//! This is the entry point for running a QuizDuel server. It ties the
//! layers together: transport → protocol → hub → lobby.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quizduel_hub::{AccountStore, ConnectionHub};
use quizduel_lobby::{LobbyConfig, LobbyRegistry};
use quizduel_protocol::{Codec, JsonCodec};
use quizduel_transport::{Transport, WebSocketTransport};

use crate::QuizDuelError;
use crate::handler::handle_connection;

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// A connection that sends nothing (not even a heartbeat) for this
    /// long is closed. Always longer than the question timeout, see
    /// [`ServerConfig::validated`].
    pub idle_timeout: Duration,

    /// How long a new connection has to send `Hello`.
    pub handshake_timeout: Duration,

    /// Settings for every lobby and session.
    pub lobby: LobbyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let lobby = LobbyConfig::default();
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            idle_timeout: lobby.question_timeout + Self::IDLE_MARGIN,
            handshake_timeout: Duration::from_secs(5),
            lobby,
        }
    }
}

impl ServerConfig {
    /// How much longer than a question a silent connection is kept.
    pub const IDLE_MARGIN: Duration = Duration::from_secs(30);

    /// Fixes values that would break the game rules.
    ///
    /// Called by [`QuizDuelServerBuilder::build`]. A player who says
    /// nothing on a question must still be connected when the question
    /// times out, so `idle_timeout` is raised to at least
    /// `lobby.question_timeout + IDLE_MARGIN`.
    pub fn validated(mut self) -> Self {
        let floor = self.lobby.question_timeout + Self::IDLE_MARGIN;
        if self.idle_timeout < floor {
            tracing::warn!(
                idle_ms = self.idle_timeout.as_millis() as u64,
                question_ms = self.lobby.question_timeout.as_millis() as u64,
                "idle_timeout shorter than a question, raising it"
            );
            self.idle_timeout = floor;
        }
        self
    }
}

/// Shared server state passed to each connection handler task.
///
/// The hub and the registry synchronize internally, so the state itself
/// needs no lock.
pub(crate) struct ServerState<S: AccountStore, C: Codec> {
    pub(crate) hub: Arc<ConnectionHub>,
    pub(crate) lobbies: LobbyRegistry<S>,
    pub(crate) store: Arc<S>,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
    started: Instant,
}

impl<S: AccountStore, C: Codec> ServerState<S, C> {
    /// Milliseconds since the server started. Used for envelope
    /// timestamps and `server_time`.
    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Builder for configuring and starting a QuizDuel server.
///
/// # Example
///
/// ```rust,ignore
/// let server = QuizDuelServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .idle_timeout(Duration::from_secs(60))
///     .build(store)
///     .await?;
/// server.run().await
/// ```
pub struct QuizDuelServerBuilder {
    config: ServerConfig,
}

impl QuizDuelServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Sets the lobby and session configuration.
    pub fn lobby_config(mut self, config: LobbyConfig) -> Self {
        self.config.lobby = config;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Checks the account store, binds the listener, and returns a server
    /// ready to [`run`](QuizDuelServer::run).
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    ///
    /// # Errors
    /// Fails if the store's `ping` fails or the address can't be bound.
    pub async fn build<S: AccountStore>(
        self,
        store: Arc<S>,
    ) -> Result<QuizDuelServer<S, JsonCodec>, QuizDuelError> {
        let config = self.config.validated();
        store.ping().await?;
        let transport = WebSocketTransport::bind(&config.bind_addr).await?;

        let hub = Arc::new(ConnectionHub::new());
        let lobbies = LobbyRegistry::with_config(
            Arc::clone(&hub),
            Arc::clone(&store),
            config.lobby.clone(),
        );
        let state = Arc::new(ServerState {
            hub,
            lobbies,
            store,
            codec: JsonCodec,
            config,
            started: Instant::now(),
        });

        Ok(QuizDuelServer { transport, state })
    }
}

impl Default for QuizDuelServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound QuizDuel server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct QuizDuelServer<S: AccountStore, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, C>>,
}

impl<S, C> QuizDuelServer<S, C>
where
    S: AccountStore,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The connection hub, for embedding and tests.
    pub fn hub(&self) -> Arc<ConnectionHub> {
        Arc::clone(&self.state.hub)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), QuizDuelError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs the accept loop until `shutdown` resolves.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// The WebSocket upgrade runs inside that task, so a peer that stalls
    /// mid-upgrade only ties up its own task. On shutdown the listener is
    /// dropped; tasks already running are left to the runtime.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), QuizDuelError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            addr = %self.state.config.bind_addr,
            "QuizDuel server running"
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(pending, state).await {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, accept loop stopped");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.lobby.win_bonus, 30);
    }

    #[test]
    fn test_server_config_default_is_already_valid() {
        let config = ServerConfig::default();
        let idle = config.idle_timeout;
        assert!(idle > config.lobby.question_timeout);
        assert_eq!(config.validated().idle_timeout, idle);
    }

    #[test]
    fn test_validated_idle_shorter_than_question_raised() {
        let config = ServerConfig {
            idle_timeout: Duration::from_secs(30),
            ..ServerConfig::default()
        }
        .validated();

        assert_eq!(config.idle_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_validated_idle_follows_short_question_timeout() {
        let config = ServerConfig {
            idle_timeout: Duration::from_millis(300),
            lobby: LobbyConfig {
                question_timeout: Duration::from_millis(600),
                ..LobbyConfig::default()
            },
            ..ServerConfig::default()
        }
        .validated();

        assert_eq!(
            config.idle_timeout,
            Duration::from_millis(600) + ServerConfig::IDLE_MARGIN
        );
    }

    #[test]
    fn test_validated_longer_idle_kept() {
        let config = ServerConfig {
            idle_timeout: Duration::from_secs(300),
            ..ServerConfig::default()
        }
        .validated();

        assert_eq!(config.idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_setters_override_defaults() {
        let builder = QuizDuelServerBuilder::new()
            .bind("0.0.0.0:9000")
            .idle_timeout(Duration::from_secs(5))
            .lobby_config(LobbyConfig {
                question_timeout: Duration::from_secs(1),
                ..LobbyConfig::default()
            });
        assert_eq!(builder.config.bind_addr, "0.0.0.0:9000");
        assert_eq!(builder.config.idle_timeout, Duration::from_secs(5));
        assert_eq!(builder.config.lobby.question_timeout, Duration::from_secs(1));
    }
}
