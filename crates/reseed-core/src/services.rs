//! Interfaces to the network collaborators: claim registry, peer tracker,
//! and blob store.
//!
//! The pipeline depends only on these traits; the wallet, DHT, and chunk
//! storage behind them belong to the content daemon. Concrete
//! implementations live in [`crate::rpc`] and in test fakes.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blob::DescriptorBlob;

/// A name-to-content binding record from the content registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub name: String,
    pub txid: String,
}

/// Stream metadata resolved for a claimed name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimMetadata {
    pub sources: StreamSource,
}

/// Content-addressed source info inside claim metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSource {
    pub descriptor_hash: String,
}

/// Failures surfaced by the collaborator services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The claim exists but its metadata does not describe a valid stream.
    /// Expected-absent data: swallowed by the item operation.
    #[error("invalid stream metadata for {name}")]
    InvalidMetadata { name: String },
    /// The requested blob is not known to the store.
    #[error("blob {hash} not found")]
    NotFound { hash: String },
    /// The service answered with something this client does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The daemon cannot be reached at all.
    #[error("daemon unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// True for failures that poison the whole run rather than one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }
}

/// Read access to the name claim registry.
#[async_trait]
pub trait ClaimRegistry: Send + Sync {
    /// All current name claims, in registry order.
    async fn enumerate_claims(&self) -> Result<Vec<Claim>, ServiceError>;

    /// Stream metadata for one claimed name.
    async fn get_metadata(&self, name: &str) -> Result<ClaimMetadata, ServiceError>;
}

/// Peer availability lookups against the network tracker.
#[async_trait]
pub trait PeerTracker: Send + Sync {
    /// Number of peers currently observed holding the given blob, keyed by
    /// its hash. A hash missing from the map counts as zero peers.
    async fn peer_counts(&self, hash: &str) -> Result<HashMap<String, usize>, ServiceError>;
}

/// The blob store: network fetch plus the local copy the reflector push
/// reads from.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetches a blob's raw payload from the network.
    async fn fetch_blob(&self, hash: &str) -> Result<Vec<u8>, ServiceError>;

    /// Records that a fetched descriptor is now held locally.
    async fn persist(&self, blob: &DescriptorBlob) -> Result<(), ServiceError>;

    /// Reads a locally stored blob's payload.
    async fn read_blob(&self, hash: &str) -> Result<Vec<u8>, ServiceError>;
}
