//! Stream descriptors: the content-addressed JSON blobs that enumerate a
//! stream's chunks.
//!
//! A descriptor is fetched by its hash (hex SHA-384 of the payload) and
//! lists one entry per encrypted chunk plus a terminator entry carrying no
//! chunk hash. Parsing verifies the content address before trusting any of
//! the fields.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use thiserror::Error;

/// Blob hashes are lowercase hex SHA-384 digests.
pub const BLOB_HASH_LEN: usize = 96;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("descriptor payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload digest {actual} does not match descriptor hash {expected}")]
    DigestMismatch { expected: String, actual: String },
    #[error("malformed chunk hash {0:?}")]
    BadChunkHash(String),
}

/// One chunk of an encrypted stream, as listed by its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub hash: String,
    pub length: u64,
    /// Initialization vector for the chunk's cipher, hex-encoded.
    pub iv: String,
}

/// A parsed, validated stream descriptor.
///
/// Immutable once constructed; owned by the item that downloaded it.
#[derive(Debug, Clone)]
pub struct DescriptorBlob {
    hash: String,
    chunks: Vec<ChunkDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "blobs", default)]
    chunks: Vec<RawChunk>,
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    // The stream terminator entry has no hash.
    #[serde(rename = "blob_hash")]
    hash: Option<String>,
    #[serde(default)]
    length: u64,
    #[serde(default)]
    iv: String,
}

impl DescriptorBlob {
    /// Parses and validates a descriptor payload fetched for `hash`.
    ///
    /// The terminator entry is dropped; the remaining chunk list keeps the
    /// payload's order.
    pub fn parse(hash: &str, payload: &[u8]) -> Result<Self, BlobError> {
        let digest = hex::encode(Sha384::digest(payload));
        if digest != hash {
            return Err(BlobError::DigestMismatch {
                expected: hash.to_string(),
                actual: digest,
            });
        }
        let raw: RawDescriptor = serde_json::from_slice(payload)?;
        let mut chunks = Vec::with_capacity(raw.chunks.len());
        for chunk in raw.chunks {
            let Some(chunk_hash) = chunk.hash else {
                continue;
            };
            if !is_blob_hash(&chunk_hash) {
                return Err(BlobError::BadChunkHash(chunk_hash));
            }
            chunks.push(ChunkDescriptor {
                hash: chunk_hash,
                length: chunk.length,
                iv: chunk.iv,
            });
        }
        Ok(Self {
            hash: hash.to_string(),
            chunks,
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }
}

/// True if `s` looks like a blob hash: 96 chars of lowercase hex.
pub fn is_blob_hash(s: &str) -> bool {
    s.len() == BLOB_HASH_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
