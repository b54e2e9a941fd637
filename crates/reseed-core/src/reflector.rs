//! Reflector push client: streams locally stored blobs to a destination
//! over a newline-delimited JSON protocol.
//!
//! Framing, one JSON object per line:
//!   client `{"version": 1}`                       server `{"version": 1}`
//!   client `{"blob_hash": H, "blob_size": N}`     server `{"send_blob": bool}`
//!   client <N raw payload bytes, if requested>    server `{"received_blob": bool}`
//!   client `{"end_of_batch": true}`               server `{"batch_received": bool}`
//!
//! `send_blob: false` means the reflector already holds the blob; the blob
//! still counts as attempted.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info, warn};

use crate::services::BlobStore;

pub const DEFAULT_REFLECTOR_PORT: u16 = 5566;
pub const PROTOCOL_VERSION: u32 = 1;

/// A reflector endpoint, as given on the command line or in config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    /// Parses `"host"` or `"host:port"`; the port defaults to 5566.
    pub fn parse(s: &str) -> Result<Self, ReflectorError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ReflectorError::BadDestination(s.to_string()));
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(ReflectorError::BadDestination(s.to_string()));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ReflectorError::BadDestination(s.to_string()))?;
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(Self {
                host: s.to_string(),
                port: DEFAULT_REFLECTOR_PORT,
            }),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum ReflectorError {
    #[error("invalid destination {0:?} (expected host[:port])")]
    BadDestination(String),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("connect to {dest}: {source}")]
    Connect {
        dest: String,
        #[source]
        source: std::io::Error,
    },
    #[error("reflector speaks protocol version {0}")]
    Version(u32),
    #[error("connection closed mid-protocol")]
    Disconnected,
    #[error("unexpected reply: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct Handshake {
    version: u32,
}

#[derive(Deserialize)]
struct HandshakeReply {
    version: u32,
}

#[derive(Serialize)]
struct BlobOffer<'a> {
    blob_hash: &'a str,
    blob_size: u64,
}

#[derive(Deserialize)]
struct OfferReply {
    send_blob: bool,
}

#[derive(Deserialize)]
struct TransferReply {
    received_blob: bool,
}

#[derive(Serialize)]
struct EndOfBatch {
    end_of_batch: bool,
}

#[derive(Deserialize)]
struct BatchReply {
    batch_received: bool,
}

/// Pushes locally stored blobs to one reflector destination.
#[derive(Debug, Clone)]
pub struct ReflectorClient {
    destination: Destination,
    completion_timeout: Option<Duration>,
}

impl ReflectorClient {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            completion_timeout: None,
        }
    }

    /// Bounds the wait for the final batch acknowledgement; on expiry the
    /// destination counts as failed instead of hanging the run.
    pub fn with_completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn resolve(&self) -> Result<SocketAddr, ReflectorError> {
        let mut addrs = lookup_host((self.destination.host.as_str(), self.destination.port))
            .await
            .map_err(|_| ReflectorError::Resolve(self.destination.to_string()))?;
        addrs
            .next()
            .ok_or_else(|| ReflectorError::Resolve(self.destination.to_string()))
    }

    /// Pushes every listed blob, calling `on_blob(sent, hash)` as each
    /// transfer finishes. `sent` is false when the reflector declined the
    /// blob (it already holds it) or the blob was locally unreadable.
    ///
    /// Returns the reflector's batch acknowledgement; `false` when the
    /// acknowledgement never arrived within the completion timeout.
    pub async fn push_blobs<S, F>(
        &self,
        store: &S,
        hashes: &[String],
        mut on_blob: F,
    ) -> Result<bool, ReflectorError>
    where
        S: BlobStore + ?Sized,
        F: FnMut(bool, &str),
    {
        let addr = self.resolve().await?;
        info!(dest = %self.destination, %addr, blobs = hashes.len(), "connecting to reflector");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ReflectorError::Connect {
                dest: self.destination.to_string(),
                source,
            })?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_frame(&mut writer, &Handshake { version: PROTOCOL_VERSION }).await?;
        let reply: HandshakeReply = read_frame(&mut reader).await?;
        if reply.version != PROTOCOL_VERSION {
            return Err(ReflectorError::Version(reply.version));
        }

        for hash in hashes {
            let payload = match store.read_blob(hash).await {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%hash, "skipping unreadable blob: {err}");
                    on_blob(false, hash);
                    continue;
                }
            };
            let sent = self.push_one(&mut reader, &mut writer, hash, &payload).await?;
            on_blob(sent, hash);
        }

        write_frame(&mut writer, &EndOfBatch { end_of_batch: true }).await?;
        let received = match self.completion_timeout {
            Some(bound) => {
                match tokio::time::timeout(bound, read_frame::<_, BatchReply>(&mut reader)).await {
                    Ok(reply) => reply?.batch_received,
                    Err(_elapsed) => {
                        warn!(dest = %self.destination, "batch acknowledgement timed out");
                        false
                    }
                }
            }
            None => read_frame::<_, BatchReply>(&mut reader).await?.batch_received,
        };
        Ok(received)
    }

    async fn push_one<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        hash: &str,
        payload: &[u8],
    ) -> Result<bool, ReflectorError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_frame(
            writer,
            &BlobOffer {
                blob_hash: hash,
                blob_size: payload.len() as u64,
            },
        )
        .await?;
        let offer: OfferReply = read_frame(reader).await?;
        if !offer.send_blob {
            debug!(%hash, "reflector already holds blob");
            return Ok(false);
        }
        writer.write_all(payload).await?;
        writer.flush().await?;
        let transfer: TransferReply = read_frame(reader).await?;
        Ok(transfer.received_blob)
    }
}

async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ReflectorError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line =
        serde_json::to_vec(value).map_err(|err| ReflectorError::Protocol(err.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R, T>(reader: &mut R) -> Result<T, ReflectorError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(ReflectorError::Disconnected);
    }
    serde_json::from_str(line.trim())
        .map_err(|err| ReflectorError::Protocol(format!("{err} in {:?}", line.trim())))
}
