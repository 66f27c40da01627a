use crate::aggregator::FeedAggregator;
use crate::image::ImageResolver;
use crate::ledger::DedupLedger;
use crate::publisher::Publisher;
use crate::summarizer::SummaryGenerator;
use crate::types::{FeedSource, Item, PipelineSettings, RelayError, Result, RunStats};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Drives one run: connectivity check, fetch, ledger filter, then the
/// per-item image, summary, publish and commit sequence.
///
/// Network resources are released by [`Orchestrator::cleanup`], which runs
/// at the end of [`Orchestrator::run`] and is safe to call again.
pub struct Orchestrator {
    sources: Vec<FeedSource>,
    settings: PipelineSettings,
    ledger: Arc<DedupLedger>,
    aggregator: FeedAggregator,
    images: ImageResolver,
    summarizer: SummaryGenerator,
    publisher: Publisher,
    closed: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<FeedSource>,
        settings: PipelineSettings,
        ledger: Arc<DedupLedger>,
        aggregator: FeedAggregator,
        images: ImageResolver,
        summarizer: SummaryGenerator,
        publisher: Publisher,
    ) -> Self {
        Self {
            sources,
            settings,
            ledger,
            aggregator,
            images,
            summarizer,
            publisher,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn run(&self) -> RunStats {
        let mut stats = RunStats::new();
        info!(run_id = %stats.run_id, "Starting run over {} sources", self.sources.len());

        if self.publisher.test_connectivity().await {
            if let Err(e) = self.execute(&mut stats).await {
                error!(run_id = %stats.run_id, "Run aborted: {}", e);
                stats.errors.push(e.to_string());
            }
            self.purge_expired().await;
        } else {
            error!(run_id = %stats.run_id, "Messaging destination unreachable, skipping run");
            stats.errors.push("messaging connectivity check failed".to_string());
        }

        self.report(&stats).await;
        self.cleanup().await;

        stats.finished_at = Some(Utc::now());
        stats
    }

    async fn execute(&self, stats: &mut RunStats) -> Result<()> {
        let items = self.aggregator.fetch_all(&self.sources).await;
        stats.items_found = items.len();
        if items.is_empty() {
            info!("No items found");
            return Ok(());
        }

        let mut fresh = Vec::new();
        for item in items {
            if !self.ledger.is_known(&item.link).await? {
                fresh.push(item);
            }
        }
        stats.items_new = fresh.len();
        info!("{} of {} items are new", stats.items_new, stats.items_found);

        // Newest first, so this keeps the most recent.
        fresh.truncate(self.settings.max_items_per_run);

        let total = fresh.len();
        for (index, item) in fresh.iter().enumerate() {
            info!("[{}/{}] {}", index + 1, total, item.title);

            let outcome = AssertUnwindSafe(self.deliver(item)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {
                    stats.items_processed += 1;
                    self.commit(item, stats).await;
                }
                Ok(Err(e)) => {
                    stats.items_failed += 1;
                    warn!("Item failed ({}): {}", item.link, e);
                }
                Err(_) => {
                    stats.items_failed += 1;
                    error!("Item processing panicked: {}", item.link);
                }
            }

            if index + 1 < total && !self.settings.publish_pause.is_zero() {
                tokio::time::sleep(self.settings.publish_pause).await;
            }
        }

        Ok(())
    }

    async fn purge_expired(&self) {
        let Some(days) = self.settings.retention_days else {
            return;
        };
        match self.ledger.purge(days).await {
            Ok(removed) => info!("Purged {} ledger records older than {} days", removed, days),
            Err(e) => warn!("Ledger purge failed: {}", e),
        }
    }

    /// Image is optional; summary and publish are not.
    async fn deliver(&self, item: &Item) -> Result<()> {
        let image = self.images.extract(&item.link).await;
        match &image {
            Some(url) => info!("Image found: {}", url),
            None => info!("No image, posting text only"),
        }

        let summary = self
            .summarizer
            .summarize(item)
            .await
            .ok_or_else(|| RelayError::General("summarization produced nothing".to_string()))?;

        if !self.publisher.post(&summary, image.as_deref()).await {
            return Err(RelayError::General("publish failed".to_string()));
        }

        info!("Published {}", item.link);
        Ok(())
    }

    async fn commit(&self, item: &Item, stats: &mut RunStats) {
        // A lost write means the item is delivered again next run.
        if let Err(e) = self.ledger.record(&item.link, &item.title, &item.source).await {
            error!("Delivered but not recorded ({}): {}", item.link, e);
            stats.errors.push(format!("ledger write failed for {}: {}", item.link, e));
        }
    }

    async fn report(&self, stats: &RunStats) {
        info!(run_id = %stats.run_id, "Run summary:");
        info!("  found:     {}", stats.items_found);
        info!("  new:       {}", stats.items_new);
        info!("  processed: {}", stats.items_processed);
        info!("  failed:    {}", stats.items_failed);
        for e in &stats.errors {
            info!("  error:     {}", e);
        }
        match self.ledger.stats().await {
            Ok(ledger) => info!("  ledger:    {} total, {} in last 24h", ledger.total, ledger.last_24h),
            Err(e) => warn!("Ledger stats unavailable: {}", e),
        }
    }

    /// Release network clients. Only the first call does anything.
    pub async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.publisher.close().await;
        self.images.close().await;
        info!("Network resources released");
    }
}
