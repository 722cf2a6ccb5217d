//! Periodic ingestion.
//!
//! Runs [`Ingestor::run_scheduled`] once immediately and then every
//! `interval`. A failed run is logged and the loop keeps going; the next
//! run's overlapping window picks up what was missed. Overlap between
//! processes is prevented by the run lock, not here.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::ingest::{Ingestor, RunAborted};

/// Run the schedule until the task is dropped or aborted.
pub async fn run_schedule(ingestor: Arc<Ingestor>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_secs = every.as_secs(), "ingestion schedule started");
    loop {
        ticker.tick().await;
        match ingestor.run_scheduled().await {
            Ok(summary) if summary.skipped => {}
            Ok(summary) => {
                if summary.capped {
                    tracing::warn!(
                        pages = summary.pages_fetched,
                        "scheduled run hit the page ceiling; window may be incomplete"
                    );
                }
            }
            Err(err) => match err.downcast_ref::<RunAborted>() {
                Some(aborted) => tracing::error!(
                    offset = aborted.offset,
                    written = aborted.summary.written,
                    error = %aborted.source,
                    "scheduled ingestion aborted"
                ),
                None => tracing::error!(error = %err, "scheduled ingestion failed"),
            },
        }
    }
}

/// Spawn [`run_schedule`] onto the runtime.
pub fn spawn_schedule(ingestor: Arc<Ingestor>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(run_schedule(ingestor, every))
}
