//! Category sync orchestrator: list → normalize → (extend) → cache → emit.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use catalogsync_shared::{
    CatalogSyncError, CategoryId, CategoryNode, EntityKind, Result, SyncOptions, SyncRunId,
};
use catalogsync_source::{CatalogSource, NotificationSink};
use catalogsync_storage::{CategoryCache, category_key};

use crate::enrich::Enricher;
use crate::limiter::RateLimiter;
use crate::normalize::{merge_extended, normalize};
use crate::walker;

// ---------------------------------------------------------------------------
// Progress + results
// ---------------------------------------------------------------------------

/// Progress callback for reporting sync status.
pub trait SyncObserver: Send + Sync {
    /// Called once the listing returned `roots` root categories.
    fn listed(&self, roots: usize);
    /// Called as each descendant enrichment settles.
    fn node_enriched(&self, root_id: &CategoryId, id: &CategoryId, ok: bool);
    /// Called when a root is ready for indexing.
    fn emitted(&self, node: &CategoryNode);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl SyncObserver for SilentObserver {
    fn listed(&self, _roots: usize) {}
    fn node_enriched(&self, _root_id: &CategoryId, _id: &CategoryId, _ok: bool) {}
    fn emitted(&self, _node: &CategoryNode) {}
}

/// Counters over every descendant enrichment of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// A root category that could not be emitted.
#[derive(Debug)]
pub struct RootFailure {
    pub id: CategoryId,
    pub error: CatalogSyncError,
}

/// Summary of one sync run.
#[derive(Debug)]
pub struct SyncReport {
    pub run_id: SyncRunId,
    /// Emitted roots, in listing order, with their subtrees enriched in place.
    pub categories: Vec<CategoryNode>,
    pub failures: Vec<RootFailure>,
    pub enrichment: EnrichmentStats,
    /// Set when the listing call itself failed; nothing else ran.
    pub listing_error: Option<CatalogSyncError>,
    pub duration: Duration,
}

impl SyncReport {
    fn empty(run_id: SyncRunId) -> Self {
        Self {
            run_id,
            categories: Vec::new(),
            failures: Vec::new(),
            enrichment: EnrichmentStats::default(),
            listing_error: None,
            duration: Duration::ZERO,
        }
    }
}

/// Where a root category is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootPhase {
    Listed,
    Shallow,
    Extended,
    Cached,
    Emitted,
}

impl RootPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Listed => "listed",
            Self::Shallow => "shallow",
            Self::Extended => "extended",
            Self::Cached => "cached",
            Self::Emitted => "emitted",
        }
    }
}

// ---------------------------------------------------------------------------
// CategorySync
// ---------------------------------------------------------------------------

/// Public entry point of the pipeline.
pub struct CategorySync {
    source: Arc<dyn CatalogSource>,
    cache: Arc<dyn CategoryCache>,
    notifier: Arc<dyn NotificationSink>,
    limiter: Arc<RateLimiter>,
    /// Handles of detached invalidations not yet known to have finished.
    notifications: Mutex<Vec<JoinHandle<()>>>,
}

impl CategorySync {
    /// Wire the pipeline to its collaborators. Enrichment calls go through
    /// the process-wide [`RateLimiter::global`] gate unless replaced with
    /// [`CategorySync::with_rate_limiter`].
    pub fn new(
        source: Arc<dyn CatalogSource>,
        cache: Arc<dyn CategoryCache>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            source,
            cache,
            notifier,
            limiter: RateLimiter::global(),
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Run one synchronization pass.
    ///
    /// Never fails as a whole: listing errors are reported in
    /// [`SyncReport::listing_error`], per-root data errors in
    /// [`SyncReport::failures`], and enrichment, cache and notification
    /// errors are logged and absorbed.
    pub async fn sync(&self, options: &SyncOptions, observer: &dyn SyncObserver) -> SyncReport {
        self.run(SyncRunId::new(), options, observer).await
    }

    #[instrument(skip_all, fields(run_id = %run_id))]
    async fn run(
        &self,
        run_id: SyncRunId,
        options: &SyncOptions,
        observer: &dyn SyncObserver,
    ) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport::empty(run_id);

        info!(
            extended = options.extended_categories,
            unique_url_keys = options.generate_unique_url_keys,
            "starting category sync"
        );

        let roots = match self.source.list_categories().await {
            Ok(roots) => roots,
            Err(e) => {
                error!(error = %e, "category listing failed");
                report.listing_error = Some(e);
                report.duration = start.elapsed();
                return report;
            }
        };
        observer.listed(roots.len());

        for root in roots {
            let id = root.id.clone();
            match self
                .process_root(root, options, observer, &mut report.enrichment)
                .await
            {
                Ok(node) => {
                    observer.emitted(&node);
                    self.dispatch_invalidation(node.id.clone());
                    report.categories.push(node);
                }
                Err(e) => {
                    error!(category_id = %id, error = %e, "root category skipped");
                    report.failures.push(RootFailure { id, error: e });
                }
            }
        }

        report.duration = start.elapsed();
        info!(
            emitted = report.categories.len(),
            failed_roots = report.failures.len(),
            enriched = report.enrichment.succeeded,
            enrichment_failures = report.enrichment.failed,
            duration_ms = report.duration.as_millis(),
            "category sync completed"
        );
        report
    }

    /// Drive one root through its lifecycle. Only data-integrity errors on
    /// the root itself are returned.
    #[instrument(skip_all, fields(root_id = %root.id))]
    async fn process_root(
        &self,
        mut root: CategoryNode,
        options: &SyncOptions,
        observer: &dyn SyncObserver,
        stats: &mut EnrichmentStats,
    ) -> Result<CategoryNode> {
        debug!(label = %root.label(), phase = RootPhase::Listed.as_str(), "processing root");
        normalize(&mut root, options.generate_unique_url_keys)?;

        if !options.extended_categories {
            debug!(phase = RootPhase::Shallow.as_str(), "normalized without extended fetch");
            self.write_cache(&root).await;
            debug!(phase = RootPhase::Emitted.as_str(), "root ready");
            return Ok(root);
        }

        debug!(phase = RootPhase::Extended.as_str(), "fetching root record");
        let fetched = self
            .limiter
            .schedule(self.source.get_single_category(&root.id))
            .await
            .and_then(|mut record| {
                normalize(&mut record, options.generate_unique_url_keys)?;
                Ok(record)
            });
        match fetched {
            Ok(record) => merge_extended(&mut root, record),
            Err(e) => error!(error = %e, "root extended fetch failed, keeping listed data"),
        }

        self.write_cache(&root).await;
        debug!(phase = RootPhase::Cached.as_str(), "root cached");

        if root.has_children() {
            self.enrich_descendants(&mut root, options, observer, stats)
                .await;
        }

        debug!(phase = RootPhase::Emitted.as_str(), "root ready");
        Ok(root)
    }

    /// Enrich every descendant of `root` and wait until all have settled.
    async fn enrich_descendants(
        &self,
        root: &mut CategoryNode,
        options: &SyncOptions,
        observer: &dyn SyncObserver,
        stats: &mut EnrichmentStats,
    ) {
        let root_id = root.id.clone();
        let Some(children) = root.children.as_mut() else {
            return;
        };

        let mut tasks = Vec::new();
        walker::extend_children(&root_id, children, &mut tasks);

        let enricher = Enricher::new(
            self.source.as_ref(),
            &self.limiter,
            options.generate_unique_url_keys,
        );
        let mut pending: FuturesUnordered<_> = tasks
            .into_iter()
            .map(|task| enricher.enrich_node(&root_id, task))
            .collect();

        stats.scheduled += pending.len();
        info!(scheduled = pending.len(), "enriching descendants");

        // All-settled: every outcome is applied as it arrives and the loop
        // only ends once the last one is in.
        while let Some(outcome) = pending.next().await {
            let id = outcome.task.id.clone();
            let merged = outcome.apply(children);
            observer.node_enriched(&root_id, &id, merged);
            if merged {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        }
    }

    async fn write_cache(&self, node: &CategoryNode) {
        let key = category_key(&node.id);
        let value = match serde_json::to_string(node) {
            Ok(value) => value,
            Err(e) => {
                warn!(%key, error = %e, "failed to serialize category for cache");
                return;
            }
        };

        debug!(%key, "storing category data in cache");
        if let Err(e) = self.cache.set(&key, &value).await {
            warn!(%key, error = %e, "cache write failed");
        }
    }

    /// Fire-and-forget storefront cache invalidation. The task is detached:
    /// it runs to completion even if this pipeline is dropped first.
    fn dispatch_invalidation(&self, id: CategoryId) {
        let notifier = Arc::clone(&self.notifier);
        let handle = tokio::spawn(async move {
            if let Err(e) = notifier.invalidate(EntityKind::Category, &id).await {
                warn!(category_id = %id, error = %e, "cache invalidation failed");
            }
        });

        let mut notifications = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        notifications.retain(|handle| !handle.is_finished());
        notifications.push(handle);
    }

    /// Wait for in-flight invalidations. Returns how many handles were
    /// awaited; calling it is optional.
    pub async fn drain_notifications(&self) -> usize {
        let pending = std::mem::take(
            &mut *self
                .notifications
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let outstanding = pending.len();
        for handle in pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "invalidation task did not complete");
            }
        }
        outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use catalogsync_storage::MemoryCache;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Fakes
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct FakeCatalog {
        roots: Vec<CategoryNode>,
        /// Extended records by id; ids missing here answer with a 404.
        records: HashMap<CategoryId, CategoryNode>,
        fail_listing: bool,
        calls: Mutex<Vec<(CategoryId, tokio::time::Instant)>>,
    }

    impl FakeCatalog {
        fn new(roots: Vec<CategoryNode>) -> Self {
            Self {
                roots,
                ..Default::default()
            }
        }

        /// Serve an extended record, with a `description` attribute, for
        /// every node in the listed trees.
        fn with_records(mut self) -> Self {
            fn collect(node: &CategoryNode, records: &mut HashMap<CategoryId, CategoryNode>) {
                let name = node.name.clone().unwrap_or_default();
                let record = CategoryNode::new(node.id.clone(), name.clone())
                    .with_attribute("description", format!("about {name}"));
                records.insert(node.id.clone(), record);
                for child in node.children.iter().flatten() {
                    collect(child, records);
                }
            }
            for root in &self.roots {
                collect(root, &mut self.records);
            }
            self
        }

        fn without_record(mut self, id: i64) -> Self {
            self.records.remove(&CategoryId::Int(id));
            self
        }

        fn called_ids(&self) -> Vec<CategoryId> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _)| id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl CatalogSource for FakeCatalog {
        async fn list_categories(&self) -> Result<Vec<CategoryNode>> {
            if self.fail_listing {
                return Err(CatalogSyncError::Network("connection refused".into()));
            }
            Ok(self.roots.clone())
        }

        async fn get_single_category(&self, id: &CategoryId) -> Result<CategoryNode> {
            self.calls
                .lock()
                .unwrap()
                .push((id.clone(), tokio::time::Instant::now()));
            self.records
                .get(id)
                .cloned()
                .ok_or_else(|| CatalogSyncError::Network(format!("HTTP 404 for {id}")))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        seen: Mutex<Vec<(EntityKind, CategoryId)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn invalidate(&self, kind: EntityKind, id: &CategoryId) -> Result<()> {
            self.seen.lock().unwrap().push((kind, id.clone()));
            if self.fail {
                return Err(CatalogSyncError::Notification("HTTP 500".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        listed: AtomicUsize,
        enriched: AtomicUsize,
        enrich_failed: AtomicUsize,
        emitted: AtomicUsize,
    }

    impl SyncObserver for CountingObserver {
        fn listed(&self, roots: usize) {
            self.listed.store(roots, Ordering::SeqCst);
        }

        fn node_enriched(&self, _root_id: &CategoryId, _id: &CategoryId, ok: bool) {
            let counter = if ok { &self.enriched } else { &self.enrich_failed };
            counter.fetch_add(1, Ordering::SeqCst);
        }

        fn emitted(&self, _node: &CategoryNode) {
            self.emitted.fetch_add(1, Ordering::SeqCst);
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// 2 Default Category
    /// ├── 3 Gear
    /// │   ├── 5 Bags
    /// │   └── 6 Fitness Equipment
    /// │       └── 8 Yoga
    /// └── 4 Sale (empty children)
    fn catalog_tree() -> CategoryNode {
        CategoryNode::new(2, "Default Category").with_children(vec![
            CategoryNode::new(3, "Gear").with_children(vec![
                CategoryNode::new(5, "Bags"),
                CategoryNode::new(6, "Fitness Equipment")
                    .with_children(vec![CategoryNode::new(8, "Yoga")]),
            ]),
            CategoryNode::new(4, "Sale").with_children(vec![]),
        ])
    }

    fn descendants(node: &CategoryNode) -> Vec<&CategoryNode> {
        let mut out = Vec::new();
        for child in node.children.iter().flatten() {
            out.push(child);
            out.extend(descendants(child));
        }
        out
    }

    fn find(node: &CategoryNode, id: i64) -> &CategoryNode {
        descendants(node)
            .into_iter()
            .find(|n| n.id == CategoryId::Int(id))
            .expect("node in tree")
    }

    fn pipeline(
        catalog: &Arc<FakeCatalog>,
        cache: &Arc<MemoryCache>,
        notifier: &Arc<RecordingNotifier>,
    ) -> CategorySync {
        CategorySync::new(catalog.clone(), cache.clone(), notifier.clone())
            .with_rate_limiter(Arc::new(RateLimiter::unlimited()))
    }

    fn extended() -> SyncOptions {
        SyncOptions {
            generate_unique_url_keys: true,
            extended_categories: true,
        }
    }

    fn shallow() -> SyncOptions {
        SyncOptions {
            generate_unique_url_keys: true,
            extended_categories: false,
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn shallow_sync_normalizes_caches_and_emits() {
        let catalog = Arc::new(FakeCatalog::new(vec![
            CategoryNode::new(5, "Shoes").with_attribute("color", "red"),
        ]));
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let sync = pipeline(&catalog, &cache, &notifier);

        let report = sync.sync(&shallow(), &SilentObserver).await;

        assert!(catalog.called_ids().is_empty());
        assert_eq!(report.categories.len(), 1);
        let expected = json!({
            "id": 5, "name": "Shoes", "url_key": "shoes-5", "slug": "shoes-5", "color": "red"
        });
        assert_eq!(
            serde_json::to_value(&report.categories[0]).unwrap(),
            expected
        );

        let cached = cache.get("category:5").await.unwrap().expect("cached");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&cached).unwrap(),
            expected
        );

        sync.drain_notifications().await;
        assert_eq!(
            *notifier.seen.lock().unwrap(),
            vec![(EntityKind::Category, CategoryId::Int(5))]
        );
    }

    #[tokio::test]
    async fn shallow_sync_keeps_existing_url_key_when_not_unique() {
        let mut root = CategoryNode::new(5, "Shoes");
        root.url_key = Some("shoes".into());
        let catalog = Arc::new(FakeCatalog::new(vec![root]));
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let options = SyncOptions {
            generate_unique_url_keys: false,
            extended_categories: false,
        };
        let report = pipeline(&catalog, &cache, &notifier)
            .sync(&options, &SilentObserver)
            .await;

        assert_eq!(report.categories[0].url_key.as_deref(), Some("shoes"));
        assert_eq!(report.categories[0].slug.as_deref(), Some("shoes"));
    }

    #[tokio::test]
    async fn extended_sync_enriches_every_descendant() {
        let catalog = Arc::new(FakeCatalog::new(vec![catalog_tree()]).with_records());
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let observer = CountingObserver::default();

        let report = pipeline(&catalog, &cache, &notifier)
            .sync(&extended(), &observer)
            .await;

        // One call for the root plus one per descendant, not just leaves.
        assert_eq!(catalog.called_ids().len(), 1 + 5);
        assert_eq!(
            report.enrichment,
            EnrichmentStats {
                scheduled: 5,
                succeeded: 5,
                failed: 0
            }
        );

        let root = &report.categories[0];
        assert!(root.extended);
        assert_eq!(root.fields["description"], "about Default Category");
        for node in descendants(root) {
            assert!(node.extended, "{} not extended", node.label());
            assert_eq!(node.slug, node.url_key);
            assert!(node.custom_attributes.is_none());
            assert!(node.fields.contains_key("description"));
        }
        assert_eq!(
            find(root, 6).url_key.as_deref(),
            Some("fitness-equipment-6")
        );

        assert_eq!(observer.listed.load(Ordering::SeqCst), 1);
        assert_eq!(observer.enriched.load(Ordering::SeqCst), 5);
        assert_eq!(observer.emitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enrichment_preserves_child_order_and_cardinality() {
        let catalog = Arc::new(FakeCatalog::new(vec![catalog_tree()]).with_records());
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let report = pipeline(&catalog, &cache, &notifier)
            .sync(&extended(), &SilentObserver)
            .await;

        let root = &report.categories[0];
        let ids = |node: &CategoryNode| -> Vec<CategoryId> {
            node.children
                .iter()
                .flatten()
                .map(|c| c.id.clone())
                .collect()
        };
        assert_eq!(ids(root), vec![CategoryId::Int(3), CategoryId::Int(4)]);
        assert_eq!(
            ids(find(root, 3)),
            vec![CategoryId::Int(5), CategoryId::Int(6)]
        );
        assert_eq!(find(root, 4).children, Some(vec![]));
        assert_eq!(find(root, 5).children, None);
    }

    #[tokio::test]
    async fn failing_descendant_does_not_stop_the_rest() {
        let catalog = Arc::new(
            FakeCatalog::new(vec![catalog_tree()])
                .with_records()
                .without_record(6),
        );
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let observer = CountingObserver::default();

        let report = pipeline(&catalog, &cache, &notifier)
            .sync(&extended(), &observer)
            .await;

        assert_eq!(catalog.called_ids().len(), 6);
        assert_eq!(report.enrichment.failed, 1);
        assert_eq!(report.enrichment.succeeded, 4);
        assert_eq!(observer.enrich_failed.load(Ordering::SeqCst), 1);

        let root = &report.categories[0];
        let failed = find(root, 6);
        assert!(!failed.extended);
        assert_eq!(failed.name.as_deref(), Some("Fitness Equipment"));
        assert!(failed.fields.get("description").is_none());

        // Child, sibling and ancestors of the failed node are still enriched.
        assert!(find(root, 8).extended);
        assert!(find(root, 5).extended);
        assert!(find(root, 3).extended);
        assert!(root.extended);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn root_fetch_failure_still_emits_and_enriches_children() {
        let catalog = Arc::new(
            FakeCatalog::new(vec![catalog_tree()])
                .with_records()
                .without_record(2),
        );
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let sync = pipeline(&catalog, &cache, &notifier);

        let report = sync.sync(&extended(), &SilentObserver).await;

        let root = &report.categories[0];
        assert!(!root.extended);
        assert_eq!(root.url_key.as_deref(), Some("default-category-2"));
        assert_eq!(report.enrichment.succeeded, 5);
        assert!(cache.get("category:2").await.unwrap().is_some());
        sync.drain_notifications().await;
        assert_eq!(notifier.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cache_holds_merged_root() {
        let catalog = Arc::new(FakeCatalog::new(vec![catalog_tree()]).with_records());
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());

        pipeline(&catalog, &cache, &notifier)
            .sync(&extended(), &SilentObserver)
            .await;

        let cached = cache.get("category:2").await.unwrap().expect("cached root");
        let value: serde_json::Value = serde_json::from_str(&cached).unwrap();
        assert_eq!(value["description"], "about Default Category");
        assert_eq!(value["slug"], "default-category-2");
        assert_eq!(value["children_data"].as_array().unwrap().len(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn listing_failure_is_reported_not_raised() {
        let catalog = Arc::new(FakeCatalog {
            fail_listing: true,
            ..Default::default()
        });
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let sync = pipeline(&catalog, &cache, &notifier);

        let report = sync.sync(&extended(), &SilentObserver).await;

        assert!(matches!(
            report.listing_error,
            Some(CatalogSyncError::Network(_))
        ));
        assert!(report.categories.is_empty());
        assert!(cache.is_empty().await);
        assert_eq!(sync.drain_notifications().await, 0);
    }

    #[tokio::test]
    async fn nameless_root_only_fails_itself() {
        let mut nameless = CategoryNode::new(1, "");
        nameless.name = None;
        let catalog = Arc::new(FakeCatalog::new(vec![
            nameless,
            CategoryNode::new(5, "Shoes"),
        ]));
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let report = pipeline(&catalog, &cache, &notifier)
            .sync(&shallow(), &SilentObserver)
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, CategoryId::Int(1));
        assert!(report.failures[0].error.is_data_integrity());
        assert_eq!(report.categories.len(), 1);
        assert_eq!(cache.keys().await, vec!["category:5"]);
    }

    #[tokio::test]
    async fn notification_failures_are_swallowed() {
        let catalog = Arc::new(FakeCatalog::new(vec![
            CategoryNode::new(5, "Shoes"),
            CategoryNode::new(6, "Boots"),
        ]));
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let sync = pipeline(&catalog, &cache, &notifier);

        let report = sync.sync(&shallow(), &SilentObserver).await;

        assert_eq!(report.categories.len(), 2);
        assert!(report.failures.is_empty());
        sync.drain_notifications().await;
        assert_eq!(notifier.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidations_outlive_the_pipeline() {
        let catalog = Arc::new(FakeCatalog::new(vec![
            CategoryNode::new(5, "Shoes"),
            CategoryNode::new(6, "Boots"),
        ]));
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());

        {
            let sync = pipeline(&catalog, &cache, &notifier);
            let report = sync.sync(&shallow(), &SilentObserver).await;
            assert_eq!(report.categories.len(), 2);
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            *notifier.seen.lock().unwrap(),
            vec![
                (EntityKind::Category, CategoryId::Int(5)),
                (EntityKind::Category, CategoryId::Int(6)),
            ]
        );
    }

    #[tokio::test]
    async fn finished_invalidations_are_not_retained() {
        let catalog = Arc::new(FakeCatalog::new(vec![CategoryNode::new(5, "Shoes")]));
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let sync = pipeline(&catalog, &cache, &notifier);

        for pass in 1..=3 {
            sync.sync(&shallow(), &SilentObserver).await;
            // Let the detached invalidation run before the next pass.
            while notifier.seen.lock().unwrap().len() < pass {
                tokio::task::yield_now().await;
            }
        }

        // Each dispatch prunes the handles of finished invalidations.
        assert_eq!(sync.notifications.lock().unwrap().len(), 1);
        assert_eq!(sync.drain_notifications().await, 1);
        assert_eq!(notifier.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn extended_sync_stays_under_the_rate_limit() {
        let leaves = (10..22).map(|id| CategoryNode::new(id, "Leaf")).collect();
        let root = CategoryNode::new(1, "Root").with_children(leaves);
        let catalog = Arc::new(FakeCatalog::new(vec![root]).with_records());
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let sync = CategorySync::new(catalog.clone(), cache, notifier)
            .with_rate_limiter(Arc::new(RateLimiter::per_second(5)));

        let origin = tokio::time::Instant::now();
        let report = sync.sync(&extended(), &SilentObserver).await;

        // 13 calls at 5/s: the last batch cannot start before t = 2s, and the
        // run only returns once every call has settled.
        assert!(origin.elapsed() >= Duration::from_secs(2));
        assert_eq!(report.enrichment.succeeded, 12);

        let mut starts: Vec<_> = catalog
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| *t)
            .collect();
        starts.sort();
        assert_eq!(starts.len(), 13);
        for window in starts.windows(6) {
            assert!(window[5] - window[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_share_one_rate_limit() {
        let catalog_for = |root_id: i64| {
            let leaves = (1..=6)
                .map(|n| CategoryNode::new(root_id * 100 + n, "Leaf"))
                .collect();
            let root = CategoryNode::new(root_id, "Root").with_children(leaves);
            Arc::new(FakeCatalog::new(vec![root]).with_records())
        };
        let (first, second) = (catalog_for(1), catalog_for(2));
        let limiter = Arc::new(RateLimiter::per_second(5));
        let sync_for = |catalog: &Arc<FakeCatalog>| {
            CategorySync::new(
                catalog.clone(),
                Arc::new(MemoryCache::new()),
                Arc::new(RecordingNotifier::default()),
            )
            .with_rate_limiter(limiter.clone())
        };
        let (a, b) = (sync_for(&first), sync_for(&second));

        let (request_a, request_b) = (extended(), extended());
        let origin = tokio::time::Instant::now();
        let (report_a, report_b) = tokio::join!(
            a.sync(&request_a, &SilentObserver),
            b.sync(&request_b, &SilentObserver)
        );

        assert_eq!(report_a.enrichment.succeeded, 6);
        assert_eq!(report_b.enrichment.succeeded, 6);

        let mut starts: Vec<_> = [&first, &second]
            .iter()
            .flat_map(|catalog| {
                let calls = catalog.calls.lock().unwrap();
                calls.iter().map(|(_, t)| *t).collect::<Vec<_>>()
            })
            .collect();
        starts.sort();
        assert_eq!(starts.len(), 14);
        for window in starts.windows(6) {
            assert!(window[5] - window[0] >= Duration::from_secs(1));
        }
        // 14 starts spaced 200ms apart.
        assert!(origin.elapsed() >= Duration::from_millis(2600));
    }
}
