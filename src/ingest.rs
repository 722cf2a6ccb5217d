//! Ingestion orchestration.
//!
//! One run walks a time window page by page:
//!
//! ```text
//! compute window → fetch page → normalize → write → (full page? next offset : done)
//! ```
//!
//! Each page is written before the next one is fetched, so a failure on
//! page N keeps pages 1..N-1. A fetch failure aborts the rest of the run
//! without retrying; the next scheduled run re-covers the window because
//! consecutive windows overlap and upserts are idempotent.
//!
//! The loop stops when a page comes back empty, when a page is shorter
//! than the page size, or when `max_pages` fetches have been issued (a
//! capped run, logged but not treated as a failure).
//!
//! The run lock is renewed after every page. A cancelled run drops its
//! lock, which releases it.

use anyhow::Result;
use chrono::Duration;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::FetchError;
use crate::feed::{ReliefWebFeed, ReportFeed};
use crate::lock::RunLock;
use crate::models::{lookback_days, lookback_hours, TimeWindow};
use crate::normalize::{Normalizer, RejectionTally};
use crate::store::{format_ts, ReportStore};

const LOCK_NAME: &str = "ingest";

/// Paging and locking knobs for one [`Ingestor`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub page_size: usize,
    pub max_pages: usize,
    pub lookback: Duration,
    pub fetch_timeout: std::time::Duration,
    pub lock_ttl: Duration,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.feed.page_size,
            max_pages: config.feed.max_pages,
            lookback: config.feed.lookback(),
            fetch_timeout: config.feed.timeout(),
            lock_ttl: config.schedule.lock_ttl(),
        }
    }
}

/// What a run did. Returned on success and carried inside [`RunAborted`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub window_start: String,
    pub window_end: String,
    pub pages_fetched: usize,
    pub records_fetched: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub written: usize,
    /// Stopped because `max_pages` was reached, not because data ran out.
    pub capped: bool,
    /// Another run held the lock; nothing was fetched.
    pub skipped: bool,
    #[serde(skip)]
    pub rejections: RejectionTally,
}

/// A page fetch failed. Pages before it were already written.
#[derive(Debug, Error)]
#[error("ingestion aborted at offset {offset}: {source}")]
pub struct RunAborted {
    pub offset: usize,
    #[source]
    pub source: FetchError,
    pub summary: RunSummary,
}

pub struct Ingestor {
    feed: Arc<dyn ReportFeed>,
    normalizer: Normalizer,
    store: Arc<ReportStore>,
    options: IngestOptions,
}

impl Ingestor {
    pub fn new(
        feed: Arc<dyn ReportFeed>,
        normalizer: Normalizer,
        store: Arc<ReportStore>,
        options: IngestOptions,
    ) -> Self {
        Self {
            feed,
            normalizer,
            store,
            options,
        }
    }

    /// Wire up the ReliefWeb feed and a store over `pool` from config.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        let feed = ReliefWebFeed::new(&config.feed)?;
        Ok(Self::new(
            Arc::new(feed),
            Normalizer::from_config(&config.feed),
            Arc::new(ReportStore::new(pool)),
            IngestOptions::from_config(config),
        ))
    }

    pub fn store(&self) -> &Arc<ReportStore> {
        &self.store
    }

    /// The scheduled pass: `[now - lookback, now)`.
    pub async fn run_scheduled(&self) -> Result<RunSummary> {
        self.run_ingestion(TimeWindow::ending_now(self.options.lookback))
            .await
    }

    /// One-off historical load over `[now - lookback, now)`.
    pub async fn run_backfill(&self, lookback: Duration) -> Result<RunSummary> {
        tracing::info!(hours = lookback.num_hours(), "starting backfill");
        self.run_ingestion(TimeWindow::ending_now(lookback)).await
    }

    /// [`run_backfill`](Self::run_backfill) on its own task, so the run
    /// finishes (and releases its lock) even if the caller goes away.
    pub fn spawn_backfill(self: &Arc<Self>, lookback: Duration) -> JoinHandle<Result<RunSummary>> {
        let ingestor = Arc::clone(self);
        tokio::spawn(async move { ingestor.run_backfill(lookback).await })
    }

    /// Run the page loop over `window`.
    ///
    /// Fails with [`RunAborted`] (inside the `anyhow::Error`) when a page
    /// fetch fails, or with a store error if the schema cannot be created.
    pub async fn run_ingestion(&self, window: TimeWindow) -> Result<RunSummary> {
        self.store.ensure_schema().await?;

        let mut summary = RunSummary {
            window_start: format_ts(&window.start),
            window_end: format_ts(&window.end),
            ..Default::default()
        };

        let lock = match RunLock::acquire(self.store.pool(), LOCK_NAME, self.options.lock_ttl).await? {
            Some(lock) => lock,
            None => {
                tracing::info!("another ingestion run holds the lock; skipping");
                summary.skipped = true;
                return Ok(summary);
            }
        };

        tracing::info!(
            start = %summary.window_start,
            end = %summary.window_end,
            holder = lock.holder(),
            "ingestion run started"
        );

        let result = self.page_loop(&window, &lock, &mut summary).await;

        if let Err(e) = lock.release().await {
            tracing::warn!(error = %e, "failed to release ingestion lock");
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    pages = summary.pages_fetched,
                    fetched = summary.records_fetched,
                    written = summary.written,
                    rejected = summary.rejected,
                    rejections = %summary.rejections.summary(),
                    capped = summary.capped,
                    "ingestion run finished"
                );
                Ok(summary)
            }
            Err((offset, source)) => {
                tracing::warn!(offset, error = %source, written = summary.written, "ingestion run aborted");
                Err(RunAborted {
                    offset,
                    source,
                    summary,
                }
                .into())
            }
        }
    }

    async fn page_loop(
        &self,
        window: &TimeWindow,
        lock: &RunLock,
        summary: &mut RunSummary,
    ) -> std::result::Result<(), (usize, FetchError)> {
        let limit = self.options.page_size;

        for page in 0..self.options.max_pages {
            let offset = page * limit;
            tracing::debug!(offset, limit, "fetching page");

            let records = match tokio::time::timeout(
                self.options.fetch_timeout,
                self.feed.fetch(window, offset, limit),
            )
            .await
            {
                Ok(Ok(records)) => records,
                Ok(Err(e)) => return Err((offset, e)),
                Err(_) => {
                    return Err((
                        offset,
                        FetchError::Timeout(self.options.fetch_timeout.as_secs()),
                    ))
                }
            };
            summary.pages_fetched += 1;

            if records.is_empty() {
                return Ok(());
            }
            summary.records_fetched += records.len();

            let (reports, tally) = self.normalizer.normalize_batch(&records);
            summary.normalized += reports.len();
            summary.rejected += tally.total();
            summary.rejections.merge(&tally);

            if !reports.is_empty() {
                // Only schema creation can fail here, and that already succeeded.
                match self.store.upsert_many(&reports).await {
                    Ok(n) => summary.written += n,
                    Err(e) => tracing::warn!(offset, error = %e, "page write failed"),
                }
            }

            if records.len() < limit {
                return Ok(());
            }

            match lock.renew(self.options.lock_ttl).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(offset, "ingestion lock was taken over; continuing"),
                Err(e) => tracing::warn!(offset, error = %e, "failed to renew ingestion lock"),
            }
        }

        summary.capped = true;
        tracing::info!(
            max_pages = self.options.max_pages,
            "page ceiling reached; run capped"
        );
        Ok(())
    }
}

// ============ CLI entry points ============

/// `atlascope ingest`: one scheduled-style pass.
pub async fn run_ingest(config: &Config) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let ingestor = Ingestor::from_config(config, pool)?;
    let result = ingestor.run_scheduled().await;
    ingestor.store().pool().close().await;
    print_outcome(result)
}

/// `atlascope backfill [--days N | --hours N]`.
pub async fn run_backfill_command(
    config: &Config,
    days: Option<i64>,
    hours: Option<i64>,
) -> Result<()> {
    let lookback = match (days, hours) {
        (Some(_), Some(_)) => anyhow::bail!("pass either --days or --hours, not both"),
        (Some(d), None) => lookback_days(d),
        (None, Some(h)) => lookback_hours(h),
        (None, None) => lookback_days(config.feed.backfill_days),
    }
    .map_err(|e| anyhow::anyhow!("invalid backfill lookback: {}", e))?;

    let pool = crate::db::connect(config).await?;
    let ingestor = Ingestor::from_config(config, pool)?;
    let result = ingestor.run_backfill(lookback).await;
    ingestor.store().pool().close().await;
    print_outcome(result)
}

fn print_outcome(result: Result<RunSummary>) -> Result<()> {
    let summary = result?;
    if summary.skipped {
        println!("Another ingestion run is in progress; nothing done.");
        return Ok(());
    }
    println!(
        "Window {} .. {}",
        summary.window_start, summary.window_end
    );
    println!(
        "  pages: {}  fetched: {}  written: {}  rejected: {}",
        summary.pages_fetched, summary.records_fetched, summary.written, summary.rejected
    );
    if summary.rejected > 0 {
        println!("  rejections: {}", summary.rejections.summary());
    }
    if summary.capped {
        println!("  page ceiling reached; window may be incomplete");
    }
    Ok(())
}
