//! JSON line client for the local content daemon.
//!
//! One request per connection: write `{"method": M, "params": {...}}` on a
//! single line, read a single `{"result": ...}` or
//! `{"error": {"code", "message"}}` line back. The daemon owns the DHT,
//! wallet, and chunk storage; this client only ferries the narrow service
//! calls across. Blob payloads travel hex-encoded.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::blob::DescriptorBlob;
use crate::services::{
    BlobStore, Claim, ClaimMetadata, ClaimRegistry, PeerTracker, ServiceError,
};

/// Default port of the daemon's JSON socket.
pub const DEFAULT_DAEMON_PORT: u16 = 5279;

/// Client for the daemon's line-oriented JSON socket.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    addr: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: String,
    /// Carries the offending name or hash for the typed error codes.
    message: String,
}

impl From<WireError> for ServiceError {
    fn from(err: WireError) -> Self {
        match err.code.as_str() {
            "invalid_metadata" => ServiceError::InvalidMetadata { name: err.message },
            "not_found" => ServiceError::NotFound { hash: err.message },
            _ => ServiceError::Protocol(format!("{}: {}", err.code, err.message)),
        }
    }
}

impl DaemonClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call<T>(&self, method: &str, params: serde_json::Value) -> Result<T, ServiceError>
    where
        T: DeserializeOwned,
    {
        debug!(addr = %self.addr, method, "daemon call");
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|err| ServiceError::Unavailable(format!("{}: {err}", self.addr)))?;
        let mut request = serde_json::to_vec(&json!({"method": method, "params": params}))
            .map_err(|err| ServiceError::Protocol(err.to_string()))?;
        request.push(b'\n');
        stream.write_all(&request).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            return Err(ServiceError::Protocol(format!("empty reply to {method}")));
        }
        let envelope: Envelope<T> = serde_json::from_str(reply.trim())
            .map_err(|err| ServiceError::Protocol(format!("{err} in reply to {method}")))?;
        if let Some(error) = envelope.error {
            return Err(error.into());
        }
        envelope.result.ok_or_else(|| {
            ServiceError::Protocol(format!("reply to {method} carries neither result nor error"))
        })
    }

    async fn call_for_bytes(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Vec<u8>, ServiceError> {
        let encoded: String = self.call(method, params).await?;
        hex::decode(&encoded)
            .map_err(|err| ServiceError::Protocol(format!("bad hex payload from {method}: {err}")))
    }
}

#[async_trait]
impl ClaimRegistry for DaemonClient {
    async fn enumerate_claims(&self) -> Result<Vec<Claim>, ServiceError> {
        self.call("enumerate_claims", json!({})).await
    }

    async fn get_metadata(&self, name: &str) -> Result<ClaimMetadata, ServiceError> {
        self.call("get_metadata", json!({"name": name})).await
    }
}

#[async_trait]
impl PeerTracker for DaemonClient {
    async fn peer_counts(&self, hash: &str) -> Result<HashMap<String, usize>, ServiceError> {
        self.call("peer_counts", json!({"hashes": [hash]})).await
    }
}

#[async_trait]
impl BlobStore for DaemonClient {
    async fn fetch_blob(&self, hash: &str) -> Result<Vec<u8>, ServiceError> {
        self.call_for_bytes("fetch_blob", json!({"hash": hash})).await
    }

    async fn persist(&self, blob: &DescriptorBlob) -> Result<(), ServiceError> {
        let _: bool = self.call("persist_blob", json!({"hash": blob.hash()})).await?;
        Ok(())
    }

    async fn read_blob(&self, hash: &str) -> Result<Vec<u8>, ServiceError> {
        self.call_for_bytes("read_blob", json!({"hash": hash})).await
    }
}
