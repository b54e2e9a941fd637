//! In-memory service fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::blob::DescriptorBlob;
use crate::services::{
    BlobStore, Claim, ClaimMetadata, ClaimRegistry, PeerTracker, ServiceError, StreamSource,
};

/// A deterministic 96-hex-char blob hash for tests.
pub(crate) fn test_hash(seed: u8) -> String {
    hex::encode([seed; 48])
}

#[derive(Default)]
pub(crate) struct FakeRegistry {
    pub claims: Vec<Claim>,
    /// name -> descriptor hash.
    pub hashes: HashMap<String, String>,
    /// Names whose claims carry broken stream metadata.
    pub invalid: Vec<String>,
    /// When set, every call fails as if the daemon were down.
    pub down: bool,
}

impl FakeRegistry {
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
impl ClaimRegistry for FakeRegistry {
    async fn enumerate_claims(&self) -> Result<Vec<Claim>, ServiceError> {
        if self.down {
            return Err(ServiceError::Unavailable("fake daemon down".into()));
        }
        Ok(self.claims.clone())
    }

    async fn get_metadata(&self, name: &str) -> Result<ClaimMetadata, ServiceError> {
        if self.down {
            return Err(ServiceError::Unavailable("fake daemon down".into()));
        }
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

/// Scripted peer counts: the nth query for a hash returns the nth entry of
/// its response list (the last entry repeats once exhausted).
#[derive(Default)]
pub(crate) struct FakeTracker {
    responses: HashMap<String, Vec<usize>>,
    calls: Mutex<HashMap<String, usize>>,
    total_queries: AtomicUsize,
}

impl FakeTracker {
    pub fn with_counts(mut self, hash: &str, counts: &[usize]) -> Self {
        self.responses.insert(hash.to_string(), counts.to_vec());
        self
    }

    pub fn queries(&self) -> usize {
        self.total_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTracker for FakeTracker {
    async fn peer_counts(&self, hash: &str) -> Result<HashMap<String, usize>, ServiceError> {
        self.total_queries.fetch_add(1, Ordering::SeqCst);
        let mut calls = self.calls.lock().unwrap();
        let n = calls.entry(hash.to_string()).or_insert(0);
        let count = self
            .responses
            .get(hash)
            .map(|counts| counts[(*n).min(counts.len().saturating_sub(1))])
            .unwrap_or(0);
        *n += 1;
        Ok(HashMap::from([(hash.to_string(), count)]))
    }
}

#[derive(Default)]
pub(crate) struct FakeStore {
    /// hash -> payload served by fetch_blob and read_blob.
    pub payloads: HashMap<String, Vec<u8>>,
    /// Artificial latency before fetch_blob returns.
    pub fetch_delay: Option<Duration>,
    pub persisted: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn with_payload(mut self, hash: &str, payload: Vec<u8>) -> Self {
        self.payloads.insert(hash.to_string(), payload);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn persisted_hashes(&self) -> Vec<String> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FakeStore {
    async fn fetch_blob(&self, hash: &str) -> Result<Vec<u8>, ServiceError> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
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
