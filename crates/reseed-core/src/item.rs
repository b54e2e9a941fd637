//! A single content item moving through the pipeline: a claimed name, its
//! descriptor hash, its observed availability, and the downloaded
//! descriptor.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::blob::{self, DescriptorBlob};
use crate::services::{BlobStore, ClaimRegistry, PeerTracker, ServiceError};

/// A claimed name and everything the pipeline has learned about it so far.
///
/// Mutated only by its own operations; filter stages drop items whose
/// required attribute never got set.
#[derive(Debug)]
pub struct ContentItem {
    name: String,
    descriptor_hash: Option<String>,
    available: Option<bool>,
    attempts: u32,
    descriptor: Option<DescriptorBlob>,
}

impl ContentItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor_hash: None,
            available: None,
            attempts: 0,
            descriptor: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor_hash(&self) -> Option<&str> {
        self.descriptor_hash.as_deref()
    }

    /// True only once a probe has actually seen a peer.
    pub fn is_available(&self) -> bool {
        self.available == Some(true)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn descriptor(&self) -> Option<&DescriptorBlob> {
        self.descriptor.as_ref()
    }

    /// Looks up claim metadata and records the descriptor hash.
    ///
    /// A claim without a valid stream leaves the hash unset and is not an
    /// error; anything else propagates for the caller to classify.
    pub async fn resolve_descriptor_hash<R>(&mut self, registry: &R) -> Result<(), ServiceError>
    where
        R: ClaimRegistry + ?Sized,
    {
        match registry.get_metadata(&self.name).await {
            Ok(metadata) => {
                let hash = metadata.sources.descriptor_hash;
                if blob::is_blob_hash(&hash) {
                    self.descriptor_hash = Some(hash);
                } else {
                    debug!(name = %self.name, "metadata carries a malformed descriptor hash");
                }
                Ok(())
            }
            Err(ServiceError::InvalidMetadata { .. }) => {
                debug!(name = %self.name, "claim has no valid stream");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Asks the tracker for peers until the item is seen or the attempt
    /// budget is spent. Retries are strictly sequential.
    ///
    /// No-op when the descriptor hash is unset. Leaves availability false
    /// when every attempt comes back empty.
    pub async fn probe_availability<T>(
        &mut self,
        tracker: &T,
        max_attempts: u32,
    ) -> Result<(), ServiceError>
    where
        T: PeerTracker + ?Sized,
    {
        let Some(hash) = self.descriptor_hash.clone() else {
            return Ok(());
        };
        while self.available != Some(true) && self.attempts < max_attempts {
            self.attempts += 1;
            if self.attempts > 1 {
                debug!(name = %self.name, attempt = self.attempts, "retrying availability probe");
            }
            let counts = tracker.peer_counts(&hash).await?;
            let peers = counts.get(&hash).copied().unwrap_or(0);
            self.available = Some(peers > 0);
            if peers > 0 {
                info!(name = %self.name, peers, "available");
            }
        }
        Ok(())
    }

    /// Downloads and validates the descriptor blob, bounded by `timeout`.
    ///
    /// A timeout cancels the fetch and leaves the descriptor unset; any
    /// other per-item failure is logged and likewise leaves it unset.
    /// Neither surfaces as an error. On success the store is told the blob
    /// is held locally.
    pub async fn download_descriptor<S>(&mut self, store: &S, timeout: Duration)
    where
        S: BlobStore + ?Sized,
    {
        let Some(hash) = self.descriptor_hash.clone() else {
            return;
        };
        debug!(name = %self.name, hash = %hash, "fetching descriptor");
        let payload = match tokio::time::timeout(timeout, store.fetch_blob(&hash)).await {
            Err(_elapsed) => {
                info!(name = %self.name, "descriptor fetch timed out");
                return;
            }
            Ok(Err(err)) => {
                warn!(name = %self.name, "descriptor fetch failed: {err}");
                return;
            }
            Ok(Ok(payload)) => payload,
        };
        let descriptor = match DescriptorBlob::parse(&hash, &payload) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(name = %self.name, "descriptor rejected: {err}");
                return;
            }
        };
        if let Err(err) = store.persist(&descriptor).await {
            warn!(name = %self.name, "could not record descriptor locally: {err}");
        }
        self.descriptor = Some(descriptor);
    }
}
