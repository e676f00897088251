//! Single-node enrichment: fetch one category's full record through the rate
//! limiter and fold it into the tree.

use std::future::Future;

use tracing::{info, warn};

use catalogsync_shared::{CategoryId, CategoryNode, Result};
use catalogsync_source::CatalogSource;

use crate::limiter::RateLimiter;
use crate::normalize::{merge_extended, normalize};
use crate::walker::{EnrichmentTask, locate_mut};

/// A settled enrichment: the task and the normalized record, or the reason
/// it could not be fetched.
#[derive(Debug)]
pub struct EnrichmentOutcome {
    pub task: EnrichmentTask,
    pub result: Result<CategoryNode>,
}

impl EnrichmentOutcome {
    /// Merge a successful fetch into the node addressed by the task.
    ///
    /// Returns `true` when a record was merged. Failed outcomes leave the
    /// tree untouched.
    pub fn apply(self, children: &mut [CategoryNode]) -> bool {
        let Ok(record) = self.result else {
            return false;
        };
        match locate_mut(children, &self.task.path) {
            Some(node) => {
                merge_extended(node, record);
                true
            }
            None => {
                warn!(
                    category_id = %self.task.id,
                    path = ?self.task.path,
                    "enrichment target no longer in tree"
                );
                false
            }
        }
    }
}

/// Fetches extended records for one run.
pub struct Enricher<'a> {
    source: &'a dyn CatalogSource,
    limiter: &'a RateLimiter,
    generate_url_keys: bool,
}

impl<'a> Enricher<'a> {
    pub fn new(
        source: &'a dyn CatalogSource,
        limiter: &'a RateLimiter,
        generate_url_keys: bool,
    ) -> Self {
        Self {
            source,
            limiter,
            generate_url_keys,
        }
    }

    /// Fetch and normalize the record for `task`.
    ///
    /// The rate-limiter slot is reserved by this call; the fetch happens when
    /// the returned future is driven. The future always settles: transport,
    /// not-found and malformed-record failures are logged and returned in the
    /// outcome, never retried.
    pub fn enrich_node(
        &self,
        root_id: &CategoryId,
        task: EnrichmentTask,
    ) -> impl Future<Output = EnrichmentOutcome> + use<'a> {
        let source = self.source;
        let generate_url_keys = self.generate_url_keys;
        let root_id = root_id.clone();
        let id = task.id.clone();

        let fetch = self
            .limiter
            .schedule(async move { source.get_single_category(&id).await });

        async move {
            let result = fetch.await.and_then(|mut record| {
                normalize(&mut record, generate_url_keys)?;
                Ok(record)
            });

            match &result {
                Ok(_) => info!(
                    %root_id,
                    category_id = %task.id,
                    "subcategory data extended"
                ),
                Err(e) => warn!(
                    %root_id,
                    category_id = %task.id,
                    error = %e,
                    "subcategory enrichment failed, keeping listed data"
                ),
            }

            EnrichmentOutcome { task, result }
        }
    }
}
