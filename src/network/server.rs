//! Listening servers and the port registry
//!
//! A `Server` owns one listening port and the set of protocol services
//! eligible on it. The `ServerRegistry` maps ports to servers and enforces
//! the single-socket exclusivity rule: a port hosts either exactly one
//! speaks-first protocol or any number of multiplexed protocols.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::connection::{ConnectionRegistry, ServiceList};
use super::service::ProtocolService;
use super::ConnectionSettings;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid port {port} for service \"{service}\"; service has not been added")]
    InvalidPort { port: u16, service: String },

    #[error("service \"{service}\" cannot share port {port} with \"{bound}\"")]
    AddressInUse {
        port: u16,
        service: String,
        bound: String,
    },
}

pub type ServerResult<T> = Result<T, ServerError>;

/// One bound listening port
pub struct Server {
    id: Uuid,
    port: u16,
    services: ServiceList,
    connections: Arc<ConnectionRegistry>,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(
        port: u16,
        connections: Arc<ConnectionRegistry>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            port,
            services: Arc::new(RwLock::new(Vec::new())),
            connections,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Append a service to the multiplexing set. Exclusivity checks are the
    /// caller's responsibility (see [`ServerRegistry::add`]).
    pub async fn add_service(&self, service: Arc<dyn ProtocolService>) {
        self.services.write().await.push(service);
    }

    /// True iff the first registered service speaks first; such a server
    /// hosts exactly one service
    pub async fn is_single_socket(&self) -> bool {
        let services = self.services.read().await;
        services
            .first()
            .map(|service| service.server_sends_first())
            .unwrap_or(false)
    }

    /// Find the service registered for an on-wire protocol identifier
    pub async fn resolve_protocol(&self, identifier: u8) -> Option<Arc<dyn ProtocolService>> {
        let services = self.services.read().await;
        services
            .iter()
            .find(|service| service.protocol_identifier() == identifier)
            .cloned()
    }

    /// Comma-separated service names, for logs and error messages
    pub async fn protocol_names(&self) -> String {
        let services = self.services.read().await;
        services
            .iter()
            .map(|service| service.protocol_name().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Bind the listener and spawn the accept loop
    pub async fn open(&self) -> ServerResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        tracing::info!(
            "[Server] {} - Running {} on port {}",
            self.id,
            self.protocol_names().await,
            self.port
        );

        let services = self.services.clone();
        let connections = self.connections.clone();
        let settings = self.settings.clone();
        let shutdown = self.shutdown.clone();
        let server_id = self.id;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("[Server] {} - accept loop stopped", server_id);
                        break;
                    }
                    result = listener.accept() => match result {
                        Ok((stream, addr)) => {
                            let mut connection = connections
                                .create(stream, services.clone(), settings.clone())
                                .await;
                            tracing::info!(
                                "[Server] {} - connection {} accepted from {}",
                                server_id,
                                connection.id(),
                                addr
                            );

                            // A speaks-first service owns the socket from the
                            // start; multiplexed ports resolve on the first frame
                            let single = {
                                let services = services.read().await;
                                services
                                    .first()
                                    .filter(|service| service.server_sends_first())
                                    .cloned()
                            };
                            if let Some(service) = single {
                                connection.accept_protocol(service);
                            }

                            tokio::spawn(connection.run());
                        }
                        Err(e) => {
                            tracing::error!("[Server] {} - accept error: {}", server_id, e);
                        }
                    },
                }
            }
        });

        Ok(())
    }

    /// Stop accepting. Live connections are closed separately through the
    /// connection registry.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// Maps listening ports to servers.
///
/// The composition root owns one registry; it also owns the process-wide
/// [`ConnectionRegistry`] used for bulk shutdown.
pub struct ServerRegistry {
    servers: RwLock<HashMap<u16, Server>>,
    connections: Arc<ConnectionRegistry>,
    settings: ConnectionSettings,
}

impl ServerRegistry {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            connections: Arc::new(ConnectionRegistry::new()),
            settings,
        }
    }

    /// The live connection set shared by every server in this registry
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Register a service on a port, creating and opening the port's server
    /// on first use.
    ///
    /// Fails with `InvalidPort` for port 0, and with `AddressInUse` when the
    /// port is already owned by a speaks-first service, when the new service
    /// speaks first on a shared port, or when the identifier byte is already
    /// taken on that port.
    pub async fn add(&self, service: Arc<dyn ProtocolService>, port: u16) -> ServerResult<()> {
        if port == 0 {
            return Err(ServerError::InvalidPort {
                port,
                service: service.protocol_name().to_string(),
            });
        }

        let mut servers = self.servers.write().await;

        if let Some(server) = servers.get(&port) {
            let conflict = server.is_single_socket().await
                || service.server_sends_first()
                || server
                    .resolve_protocol(service.protocol_identifier())
                    .await
                    .is_some();
            if conflict {
                return Err(ServerError::AddressInUse {
                    port,
                    service: service.protocol_name().to_string(),
                    bound: server.protocol_names().await,
                });
            }

            server.add_service(service).await;
            return Ok(());
        }

        let server = Server::new(port, self.connections.clone(), self.settings.clone());
        server.add_service(service).await;
        server.open().await?;
        servers.insert(port, server);

        Ok(())
    }

    /// Close every live connection, stop every listener, clear the port map.
    /// No-op if nothing is running.
    pub async fn stop(&self) {
        let mut servers = self.servers.write().await;
        if servers.is_empty() {
            return;
        }

        self.connections.close_all().await;

        for server in servers.values() {
            server.stop();
        }
        servers.clear();

        tracing::info!("All servers stopped");
    }

    pub async fn is_running(&self) -> bool {
        !self.servers.read().await.is_empty()
    }
}
