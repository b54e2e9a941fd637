//! Stage orchestration: fan per-item operations out through the bounded
//! pool, filter the survivors, and keep running stats.
//!
//! Two stage orders are exposed: [`Pipeline::run_availability`] (resolve →
//! filter → probe → filter) and [`Pipeline::run_replication`] (resolve →
//! filter → download → filter → push). A pipeline instance holds no state
//! beyond one run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::item::ContentItem;
use crate::pool::{BoundedPool, PoolOutcome};
use crate::reflector::{Destination, ReflectorClient};
use crate::services::{BlobStore, ClaimRegistry, PeerTracker, ServiceError};

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Concurrency window for fan-out stages.
    pub window: usize,
    /// Availability probe budget per item.
    pub max_attempts: u32,
    /// Per-item descriptor download timeout.
    pub download_timeout: Duration,
    /// Upper bound on waiting for a reflector's batch acknowledgement.
    pub completion_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            window: 10,
            max_attempts: 3,
            download_timeout: Duration::from_secs(60),
            completion_timeout: None,
        }
    }
}

/// Which claims a run processes: explicit names, or the whole registry
/// truncated to `limit`.
#[derive(Debug, Clone, Default)]
pub struct ClaimSelection {
    pub names: Vec<String>,
    pub limit: Option<usize>,
}

/// Append-only per-stage counts of items that survived each filter.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    entries: Vec<(String, usize)>,
}

impl PipelineStats {
    pub fn record(&mut self, stage: &str, survivors: usize) {
        self.entries.push((stage.to_string(), survivors));
    }

    pub fn get(&self, stage: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, count)| *count)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(name, count)| (name.as_str(), *count))
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, count) in self.entries() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {count}")?;
            first = false;
        }
        Ok(())
    }
}

/// Outcome of pushing one batch to one destination.
#[derive(Debug, Clone)]
pub struct DestinationReport {
    pub destination: Destination,
    pub delivered: bool,
}

/// Result of a pipeline run: stats, the surviving items, and (for
/// replication runs) per-destination outcomes.
#[derive(Debug)]
pub struct PipelineReport {
    pub stats: PipelineStats,
    pub items: Vec<ContentItem>,
    /// probe attempt count -> how many items took that many attempts.
    pub attempts: BTreeMap<u32, usize>,
    pub destinations: Vec<DestinationReport>,
}

/// Drives ordered stages over a collection of [`ContentItem`]s.
pub struct Pipeline<R, T, S> {
    registry: Arc<R>,
    tracker: Arc<T>,
    store: Arc<S>,
    options: PipelineOptions,
}

impl<R, T, S> Pipeline<R, T, S>
where
    R: ClaimRegistry + 'static,
    T: PeerTracker + 'static,
    S: BlobStore + 'static,
{
    pub fn new(registry: Arc<R>, tracker: Arc<T>, store: Arc<S>, options: PipelineOptions) -> Self {
        Self {
            registry,
            tracker,
            store,
            options,
        }
    }

    /// Availability run: resolve descriptor hashes, keep the items that
    /// have one, probe the tracker with bounded retries, keep the items a
    /// peer was seen for.
    pub async fn run_availability(&self, selection: &ClaimSelection) -> Result<PipelineReport> {
        let mut stats = PipelineStats::default();
        let items = self.enumerate(selection).await?;
        let items = self.resolve_stage(items).await?;
        let items = filter_items(&mut stats, items, "descriptor_hash", |item| {
            item.descriptor_hash().is_some()
        });
        let items = self.probe_stage(items).await?;
        let attempts = attempts_histogram(&items);
        for (probe_attempts, item_count) in &attempts {
            info!("{item_count} item(s) took {probe_attempts} probe attempt(s)");
        }
        let items = filter_items(&mut stats, items, "available", ContentItem::is_available);
        Ok(PipelineReport {
            stats,
            items,
            attempts,
            destinations: Vec::new(),
        })
    }

    /// Replication run: resolve, download descriptors under the timeout,
    /// then push every surviving descriptor to each destination in turn.
    /// One destination failing is logged and skipped, never fatal.
    pub async fn run_replication(
        &self,
        selection: &ClaimSelection,
        destinations: &[Destination],
    ) -> Result<PipelineReport> {
        let mut stats = PipelineStats::default();
        let items = self.enumerate(selection).await?;
        let items = self.resolve_stage(items).await?;
        let items = filter_items(&mut stats, items, "descriptor_hash", |item| {
            item.descriptor_hash().is_some()
        });
        let items = self.download_stage(items).await;
        let items = filter_items(&mut stats, items, "descriptor", |item| {
            item.descriptor().is_some()
        });

        let hashes: Vec<String> = items
            .iter()
            .filter_map(|item| item.descriptor_hash())
            .map(str::to_string)
            .collect();
        info!("pushing {} descriptor blob(s)", hashes.len());

        let mut reports = Vec::with_capacity(destinations.len());
        for destination in destinations {
            let client = ReflectorClient::new(destination.clone())
                .with_completion_timeout(self.options.completion_timeout);
            let delivered = match client
                .push_blobs(self.store.as_ref(), &hashes, |sent, hash| {
                    if sent {
                        info!(%hash, "blob sent");
                    } else {
                        info!(%hash, "blob done");
                    }
                })
                .await
            {
                Ok(received) => received,
                Err(err) => {
                    warn!(dest = %destination, "push failed: {err}");
                    false
                }
            };
            reports.push(DestinationReport {
                destination: destination.clone(),
                delivered,
            });
        }

        Ok(PipelineReport {
            stats,
            items,
            attempts: BTreeMap::new(),
            destinations: reports,
        })
    }

    async fn enumerate(&self, selection: &ClaimSelection) -> Result<Vec<ContentItem>, ServiceError> {
        let mut names: Vec<String> = if selection.names.is_empty() {
            self.registry
                .enumerate_claims()
                .await?
                .into_iter()
                .map(|claim| claim.name)
                .collect()
        } else {
            selection.names.clone()
        };
        if let Some(limit) = selection.limit {
            names.truncate(limit);
        }
        info!("processing {} name claim(s)", names.len());
        Ok(names.into_iter().map(ContentItem::new).collect())
    }

    async fn resolve_stage(&self, items: Vec<ContentItem>) -> Result<Vec<ContentItem>> {
        let pool = BoundedPool::new(self.options.window);
        let outcomes = pool
            .run(items.into_iter().map(|mut item| {
                let registry = Arc::clone(&self.registry);
                async move {
                    let result = item.resolve_descriptor_hash(registry.as_ref()).await;
                    (item, result)
                }
            }))
            .await;
        collect_stage("resolve descriptor hash", outcomes)
    }

    async fn probe_stage(&self, items: Vec<ContentItem>) -> Result<Vec<ContentItem>> {
        let pool = BoundedPool::new(self.options.window);
        let max_attempts = self.options.max_attempts;
        let outcomes = pool
            .run(items.into_iter().map(|mut item| {
                let tracker = Arc::clone(&self.tracker);
                async move {
                    let result = item.probe_availability(tracker.as_ref(), max_attempts).await;
                    (item, result)
                }
            }))
            .await;
        collect_stage("probe availability", outcomes)
    }

    async fn download_stage(&self, items: Vec<ContentItem>) -> Vec<ContentItem> {
        let pool = BoundedPool::new(self.options.window);
        let timeout = self.options.download_timeout;
        let outcomes = pool
            .run(items.into_iter().map(|mut item| {
                let store = Arc::clone(&self.store);
                async move {
                    item.download_descriptor(store.as_ref(), timeout).await;
                    item
                }
            }))
            .await;
        outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!("download descriptor task lost: {err}");
                    None
                }
            })
            .collect()
    }
}

/// Folds fan-out outcomes back into the live collection. A per-item error
/// is logged and the item keeps moving (its attribute stays unset, so the
/// next filter drops it); a fatal service error aborts the run.
fn collect_stage(
    stage: &str,
    outcomes: Vec<PoolOutcome<(ContentItem, Result<(), ServiceError>)>>,
) -> Result<Vec<ContentItem>> {
    let mut items = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok((item, Ok(()))) => items.push(item),
            Ok((_, Err(err))) if err.is_fatal() => return Err(err.into()),
            Ok((item, Err(err))) => {
                warn!(name = %item.name(), "{stage} failed: {err}");
                items.push(item);
            }
            Err(err) => warn!("{stage} task lost: {err}"),
        }
    }
    Ok(items)
}

/// Retains items where `keep` holds, recording the surviving count under
/// `attr`.
fn filter_items(
    stats: &mut PipelineStats,
    items: Vec<ContentItem>,
    attr: &str,
    keep: impl Fn(&ContentItem) -> bool,
) -> Vec<ContentItem> {
    let items: Vec<ContentItem> = items.into_iter().filter(|item| keep(item)).collect();
    stats.record(attr, items.len());
    info!("{} item(s) have {attr}", items.len());
    for item in &items {
        debug!(name = %item.name(), "retained after {attr} filter");
    }
    items
}

fn attempts_histogram(items: &[ContentItem]) -> BTreeMap<u32, usize> {
    let mut histogram = BTreeMap::new();
    for item in items {
        *histogram.entry(item.attempts()).or_insert(0) += 1;
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_hash, FakeRegistry, FakeStore, FakeTracker};
    use sha2::{Digest, Sha384};

    fn pipeline_with(
        registry: FakeRegistry,
        tracker: FakeTracker,
        store: FakeStore,
        options: PipelineOptions,
    ) -> Pipeline<FakeRegistry, FakeTracker, FakeStore> {
        Pipeline::new(Arc::new(registry), Arc::new(tracker), Arc::new(store), options)
    }

    #[test]
    fn stats_preserve_recording_order() {
        let mut stats = PipelineStats::default();
        stats.record("descriptor_hash", 2);
        stats.record("available", 1);
        assert_eq!(stats.get("descriptor_hash"), Some(2));
        assert_eq!(stats.get("available"), Some(1));
        assert_eq!(stats.to_string(), "descriptor_hash: 2, available: 1");
    }

    #[tokio::test]
    async fn filter_retains_items_with_attribute_and_records_count() {
        let registry = FakeRegistry::default()
            .with_claim("a", Some(&test_hash(1)))
            .with_claim("c", Some(&test_hash(2)));
        let mut a = ContentItem::new("a");
        let b = ContentItem::new("b");
        let mut c = ContentItem::new("c");
        a.resolve_descriptor_hash(&registry).await.unwrap();
        c.resolve_descriptor_hash(&registry).await.unwrap();

        let mut stats = PipelineStats::default();
        let survivors = filter_items(&mut stats, vec![a, b, c], "descriptor_hash", |item| {
            item.descriptor_hash().is_some()
        });
        let names: Vec<&str> = survivors.iter().map(|item| item.name()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(stats.get("descriptor_hash"), Some(2));
    }

    #[tokio::test]
    async fn availability_end_to_end() {
        // foo resolves to a hash the tracker sees 2 peers for; bar has
        // invalid metadata and drops out at the first filter.
        let h1 = test_hash(1);
        let registry = FakeRegistry::default()
            .with_claim("foo", Some(&h1))
            .with_claim("bar", None);
        let tracker = FakeTracker::default().with_counts(&h1, &[2]);
        let pipeline = pipeline_with(
            registry,
            tracker,
            FakeStore::default(),
            PipelineOptions::default(),
        );

        let report = pipeline
            .run_availability(&ClaimSelection::default())
            .await
            .unwrap();
        let names: Vec<&str> = report.items.iter().map(|item| item.name()).collect();
        assert_eq!(names, vec!["foo"]);
        assert_eq!(report.stats.get("descriptor_hash"), Some(1));
        assert_eq!(report.stats.get("available"), Some(1));
        assert_eq!(report.attempts.get(&1), Some(&1));
    }

    #[tokio::test]
    async fn availability_exhausts_attempts_for_unseen_items() {
        let h1 = test_hash(1);
        let registry = FakeRegistry::default().with_claim("ghost", Some(&h1));
        let tracker = FakeTracker::default().with_counts(&h1, &[0]);
        let options = PipelineOptions {
            max_attempts: 3,
            ..PipelineOptions::default()
        };
        let pipeline = pipeline_with(registry, tracker, FakeStore::default(), options);

        let report = pipeline
            .run_availability(&ClaimSelection::default())
            .await
            .unwrap();
        assert!(report.items.is_empty());
        assert_eq!(report.stats.get("descriptor_hash"), Some(1));
        assert_eq!(report.stats.get("available"), Some(0));
        assert_eq!(report.attempts.get(&3), Some(&1));
    }

    #[tokio::test]
    async fn selection_names_override_enumeration() {
        let h1 = test_hash(1);
        let h2 = test_hash(2);
        let registry = FakeRegistry::default()
            .with_claim("keep", Some(&h1))
            .with_claim("skip", Some(&h2));
        let tracker = FakeTracker::default().with_counts(&h1, &[1]).with_counts(&h2, &[1]);
        let pipeline = pipeline_with(
            registry,
            tracker,
            FakeStore::default(),
            PipelineOptions::default(),
        );

        let selection = ClaimSelection {
            names: vec!["keep".to_string()],
            limit: None,
        };
        let report = pipeline.run_availability(&selection).await.unwrap();
        let names: Vec<&str> = report.items.iter().map(|item| item.name()).collect();
        assert_eq!(names, vec!["keep"]);
    }

    #[tokio::test]
    async fn selection_limit_truncates_enumeration() {
        let h1 = test_hash(1);
        let registry = FakeRegistry::default()
            .with_claim("one", Some(&h1))
            .with_claim("two", Some(&h1))
            .with_claim("three", Some(&h1));
        let tracker = FakeTracker::default().with_counts(&h1, &[1]);
        let pipeline = pipeline_with(
            registry,
            tracker,
            FakeStore::default(),
            PipelineOptions::default(),
        );

        let selection = ClaimSelection {
            names: Vec::new(),
            limit: Some(2),
        };
        let report = pipeline.run_availability(&selection).await.unwrap();
        assert_eq!(report.items.len(), 2);
    }

    #[tokio::test]
    async fn unreachable_daemon_aborts_the_run() {
        let registry = FakeRegistry {
            down: true,
            ..FakeRegistry::default()
        };
        let pipeline = pipeline_with(
            registry,
            FakeTracker::default(),
            FakeStore::default(),
            PipelineOptions::default(),
        );

        let err = pipeline
            .run_availability(&ClaimSelection::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn replication_drops_items_whose_descriptor_never_arrives() {
        // "fast" has a descriptor in the store; "slow" has none and is
        // dropped at the descriptor filter without failing the run.
        let payload = serde_json::to_vec(&serde_json::json!({
            "blobs": [
                {"blob_hash": test_hash(9), "length": 64, "iv": "00ff00ff"},
                {"length": 0, "iv": "00ff00ff"},
            ]
        }))
        .unwrap();
        let fast_hash = hex::encode(Sha384::digest(&payload));
        let slow_hash = test_hash(5);

        let registry = FakeRegistry::default()
            .with_claim("fast", Some(&fast_hash))
            .with_claim("slow", Some(&slow_hash));
        let store = FakeStore::default().with_payload(&fast_hash, payload);
        let options = PipelineOptions {
            download_timeout: Duration::from_millis(100),
            ..PipelineOptions::default()
        };
        let pipeline = pipeline_with(registry, FakeTracker::default(), store, options);

        let report = pipeline
            .run_replication(&ClaimSelection::default(), &[])
            .await
            .unwrap();
        let names: Vec<&str> = report.items.iter().map(|item| item.name()).collect();
        assert_eq!(names, vec!["fast"]);
        assert_eq!(report.stats.get("descriptor_hash"), Some(2));
        assert_eq!(report.stats.get("descriptor"), Some(1));
        assert!(report.destinations.is_empty());
    }
}
