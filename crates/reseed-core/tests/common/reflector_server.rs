//! Minimal in-process reflector for integration tests.
//!
//! Speaks the newline-delimited JSON push protocol: handshake, per-blob
//! offer/ack with raw payload bytes in between, end-of-batch ack. Runs
//! until the test process exits.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, Default)]
pub struct ReflectorServerOptions {
    /// Hashes the server claims to already hold; their offers are answered
    /// with `send_blob: false`.
    pub already_held: HashSet<String>,
    /// Answer end-of-batch with `batch_received: false`.
    pub refuse_batch: bool,
    /// Sleep this long before acknowledging the batch.
    pub batch_ack_delay: Option<Duration>,
}

/// Payloads the fake reflector accepted, keyed by blob hash.
#[derive(Debug, Default)]
pub struct Received {
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
}

/// Starts the server on an ephemeral port; returns its address and the
/// shared record of accepted blobs.
pub async fn start(options: ReflectorServerOptions) -> (SocketAddr, Arc<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let received = Arc::new(Received::default());
    let state = Arc::clone(&received);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let options = options.clone();
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let _ = handle(stream, options, state).await;
            });
        }
    });
    (addr, received)
}

async fn handle(
    stream: TcpStream,
    options: ReflectorServerOptions,
    state: Arc<Received>,
) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    writer.write_all(b"{\"version\": 1}\n").await?;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let frame: Value = match serde_json::from_str(line.trim()) {
            Ok(frame) => frame,
            Err(_) => return Ok(()),
        };
        if frame.get("end_of_batch").is_some() {
            if let Some(delay) = options.batch_ack_delay {
                tokio::time::sleep(delay).await;
            }
            let ack = json!({"batch_received": !options.refuse_batch});
            writer.write_all(format!("{ack}\n").as_bytes()).await?;
            return Ok(());
        }

        let hash = frame["blob_hash"].as_str().unwrap_or_default().to_string();
        let size = frame["blob_size"].as_u64().unwrap_or(0) as usize;
        if options.already_held.contains(&hash) {
            writer.write_all(b"{\"send_blob\": false}\n").await?;
            continue;
        }
        writer.write_all(b"{\"send_blob\": true}\n").await?;
        let mut payload = vec![0u8; size];
        reader.read_exact(&mut payload).await?;
        state.blobs.lock().unwrap().insert(hash, payload);
        writer.write_all(b"{\"received_blob\": true}\n").await?;
    }
}
