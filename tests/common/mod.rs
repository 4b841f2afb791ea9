//! Common test utilities.

#![allow(dead_code)]

use std::sync::Arc;
use tokio::net::TcpListener;

use seekstream_rs::{Config, HttpObjectStore, MemoryObjectStore, UploadServerBuilder};

/// Test server wrapper.
pub struct TestServer {
    pub base_url: String,
    pub store: Arc<MemoryObjectStore>,
}

impl TestServer {
    /// Creates and starts a test server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = Config {
            host: "127.0.0.1".to_string(),
            port,
            ..Config::default()
        };
        let base_url = config.base_url();
        let store = Arc::new(MemoryObjectStore::new());

        let server = UploadServerBuilder::new()
            .config(config)
            .store(store.clone())
            .build();

        // Start server in background
        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });

        Self { base_url, store }
    }

    /// Returns an HTTP client store pointed at this server.
    pub fn client(&self) -> HttpObjectStore {
        HttpObjectStore::new(&self.base_url).unwrap()
    }

    /// Returns the URL for an item.
    pub fn item_url(&self, id: &str) -> String {
        format!("{}/items/{}", self.base_url, id)
    }
}
