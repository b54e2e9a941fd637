//! In-memory service implementations for integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use reseed_core::blob::DescriptorBlob;
use reseed_core::services::{
    BlobStore, Claim, ClaimMetadata, ClaimRegistry, PeerTracker, ServiceError, StreamSource,
};

/// A deterministic 96-hex-char blob hash.
pub fn test_hash(seed: u8) -> String {
    hex::encode([seed; 48])
}

#[derive(Default)]
pub struct MemoryRegistry {
    claims: Vec<Claim>,
    hashes: HashMap<String, String>,
    invalid: Vec<String>,
}

impl MemoryRegistry {
    pub fn with_claim(mut self, name: &str, hash: Option<&str>) -> Self {
        self.claims.push(Claim {
            name: name.to_string(),
            txid: format!("tx-{name}"),
        });
        match hash {
            Some(hash) => {
                self.hashes.insert(name.to_string(), hash.to_string());
            }
            None => self.invalid.push(name.to_string()),
        }
        self
    }
}

#[async_trait]
impl ClaimRegistry for MemoryRegistry {
    async fn enumerate_claims(&self) -> Result<Vec<Claim>, ServiceError> {
        Ok(self.claims.clone())
    }

    async fn get_metadata(&self, name: &str) -> Result<ClaimMetadata, ServiceError> {
        if self.invalid.iter().any(|n| n == name) {
            return Err(ServiceError::InvalidMetadata {
                name: name.to_string(),
            });
        }
        match self.hashes.get(name) {
            Some(hash) => Ok(ClaimMetadata {
                sources: StreamSource {
                    descriptor_hash: hash.clone(),
                },
            }),
            None => Err(ServiceError::Protocol(format!("no claim for {name}"))),
        }
    }
}

#[derive(Default)]
pub struct MemoryTracker {
    counts: HashMap<String, usize>,
}

impl MemoryTracker {
    pub fn with_count(mut self, hash: &str, count: usize) -> Self {
        self.counts.insert(hash.to_string(), count);
        self
    }
}

#[async_trait]
impl PeerTracker for MemoryTracker {
    async fn peer_counts(&self, hash: &str) -> Result<HashMap<String, usize>, ServiceError> {
        let count = self.counts.get(hash).copied().unwrap_or(0);
        Ok(HashMap::from([(hash.to_string(), count)]))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    payloads: HashMap<String, Vec<u8>>,
    persisted: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn with_payload(mut self, hash: &str, payload: Vec<u8>) -> Self {
        self.payloads.insert(hash.to_string(), payload);
        self
    }

    pub fn persisted_hashes(&self) -> Vec<String> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn fetch_blob(&self, hash: &str) -> Result<Vec<u8>, ServiceError> {
        self.payloads
            .get(hash)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                hash: hash.to_string(),
            })
    }

    async fn persist(&self, blob: &DescriptorBlob) -> Result<(), ServiceError> {
        self.persisted.lock().unwrap().push(blob.hash().to_string());
        Ok(())
    }

    async fn read_blob(&self, hash: &str) -> Result<Vec<u8>, ServiceError> {
        self.payloads
            .get(hash)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                hash: hash.to_string(),
            })
    }
}
