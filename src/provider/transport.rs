//! JSON-RPC transport seam.
//!
//! Controllers never talk to `ethers` directly; they go through
//! [`RpcTransport`] so tests can script node behaviour per method.

use async_trait::async_trait;
use ethers::providers::{Http, HttpClientError, JsonRpcClient};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::domain::Network;
use crate::core::errors::WalletError;

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Sends one JSON-RPC call. Transport failures map to
    /// `NetworkUnavailable`; error responses map through [`WalletError::from_rpc`].
    async fn request(&self, method: &str, params: Value) -> Result<Value, WalletError>;
}

/// Builds a transport for a network. Called on every network switch.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, network: &Network) -> Result<Arc<dyn RpcTransport>, WalletError>;
}

/// HTTP transport backed by `ethers`' JSON-RPC client.
pub struct HttpTransport {
    inner: Http,
}

impl HttpTransport {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, WalletError> {
        let rpc_url_clean = rpc_url.trim();
        let parsed_url = reqwest::Url::parse(rpc_url_clean)
            .map_err(|e| WalletError::Config(format!("Invalid RPC URL '{}': {}", rpc_url_clean, e)))?;

        // Allow proxy environment vars, same as any other outbound client.
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Ok(proxy) = std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("HTTP_PROXY")) {
            if let Ok(p) = reqwest::Proxy::all(proxy) {
                builder = builder.proxy(p);
            }
        }
        let client = builder
            .build()
            .map_err(|e| WalletError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { inner: Http::new_with_client(parsed_url, client) })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        debug!(method, "rpc request");
        self.inner.request::<Value, Value>(method, params).await.map_err(|e| match e {
            HttpClientError::JsonRpcError(err) => WalletError::from_rpc(err.code, err.message),
            other => WalletError::NetworkUnavailable(other.to_string()),
        })
    }
}

pub struct HttpTransportFactory {
    timeout: Duration,
}

impl HttpTransportFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, network: &Network) -> Result<Arc<dyn RpcTransport>, WalletError> {
        Ok(Arc::new(HttpTransport::new(&network.rpc_url, self.timeout)?))
    }
}
