//! HTTP server for the upload-session emulator.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::router::{create_router, AppState};
use crate::store::MemoryObjectStore;

/// Emulator server exposing a [`MemoryObjectStore`] over HTTP.
pub struct UploadServer {
    config: Arc<Config>,
    store: Arc<MemoryObjectStore>,
}

impl UploadServer {
    /// Creates a server with an empty in-memory store.
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryObjectStore::with_session_ttl(chrono::Duration::seconds(
            config.session_ttl_secs,
        )));
        Self::with_store(config, store)
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: Config, store: Arc<MemoryObjectStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// The store served by this emulator.
    pub fn store(&self) -> Arc<MemoryObjectStore> {
        self.store.clone()
    }

    /// Runs the server.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_address().parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let state = AppState {
            config: self.config.clone(),
            store: self.store.clone(),
        };
        let app = create_router(state).layer(TraceLayer::new_for_http());

        info!(
            "Upload emulator listening at http://{} (root folder {})",
            listener.local_addr()?,
            self.store.root_id()
        );

        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Returns the bind address.
    pub fn bind_address(&self) -> String {
        self.config.bind_address()
    }

    /// Returns the base URL for the emulator.
    pub fn base_url(&self) -> String {
        self.config.base_url()
    }
}

/// Builder for creating an emulator server.
pub struct UploadServerBuilder {
    config: Config,
    store: Option<Arc<MemoryObjectStore>>,
}

impl UploadServerBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            store: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the upload session lifetime, in seconds.
    pub fn session_ttl_secs(mut self, secs: i64) -> Self {
        self.config.session_ttl_secs = secs;
        self
    }

    pub fn store(mut self, store: Arc<MemoryObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the server.
    pub fn build(self) -> UploadServer {
        match self.store {
            Some(store) => UploadServer::with_store(self.config, store),
            None => UploadServer::new(self.config),
        }
    }
}

impl Default for UploadServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
