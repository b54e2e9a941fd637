//! Integration test: full replication run against an in-process reflector,
//! with one dead destination that must not poison the batch.

mod common;

use std::sync::Arc;

use common::reflector_server::{self, ReflectorServerOptions};
use common::services::{test_hash, MemoryRegistry, MemoryStore, MemoryTracker};
use reseed_core::pipeline::{ClaimSelection, Pipeline, PipelineOptions};
use reseed_core::reflector::Destination;
use sha2::{Digest, Sha384};

fn descriptor_payload() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "blobs": [
            {"blob_hash": test_hash(9), "length": 4096, "iv": "a1b2c3d4"},
            {"length": 0, "iv": "a1b2c3d4"},
        ]
    }))
    .expect("serialize descriptor")
}

#[tokio::test]
async fn replication_survives_a_dead_destination() {
    let payload = descriptor_payload();
    let hash = hex::encode(Sha384::digest(&payload));

    let registry = MemoryRegistry::default()
        .with_claim("kept", Some(&hash))
        .with_claim("broken", None);
    let store = MemoryStore::default().with_payload(&hash, payload.clone());
    let pipeline = Pipeline::new(
        Arc::new(registry),
        Arc::new(MemoryTracker::default()),
        Arc::new(store),
        PipelineOptions::default(),
    );

    // First destination: a port nothing listens on. Second: a live server.
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Destination {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    };
    let (addr, received) = reflector_server::start(ReflectorServerOptions::default()).await;
    let live = Destination {
        host: addr.ip().to_string(),
        port: addr.port(),
    };

    let report = pipeline
        .run_replication(&ClaimSelection::default(), &[dead.clone(), live])
        .await
        .expect("run completes despite the dead destination");

    assert_eq!(report.stats.get("descriptor_hash"), Some(1));
    assert_eq!(report.stats.get("descriptor"), Some(1));
    assert_eq!(report.destinations.len(), 2);
    assert_eq!(report.destinations[0].destination, dead);
    assert!(!report.destinations[0].delivered);
    assert!(report.destinations[1].delivered);

    let blobs = received.blobs.lock().unwrap();
    assert_eq!(blobs.get(&hash).expect("blob pushed"), &payload);
}
