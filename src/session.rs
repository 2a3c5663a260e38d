use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::DedupPolicy;
use crate::dispatch::{Completed, Outcome};
use crate::filter::DedupFilter;
use crate::store::RecordStore;

/// Operator interrupt. Once raised, no new doctor is started.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raises `stop` on the first interrupt, then waits for a second one.
/// Returns true when the second interrupt arrives and the caller should quit without waiting.
/// `next_interrupt` is usually [`tokio::signal::ctrl_c`].
pub async fn watch_interrupts<F, Fut>(stop: &StopSignal, mut next_interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_interrupt().await {
        warn!("Can't listen for interrupts: {e}");
        return false;
    }
    warn!("Interrupted, finishing in-flight doctors and saving... (interrupt again to quit now)");
    stop.stop();
    next_interrupt().await.is_ok()
}

/// What a run did, reported at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub specialties: usize,
    /// New records collected this run.
    pub collected: usize,
    pub duplicates: usize,
    pub deceased: usize,
    pub unidentified: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Distinct records in the merged store, baseline included.
    pub stored: usize,
    /// Records collected but not on disk because the final flush failed.
    pub unsaved: usize,
    pub interrupted: bool,
}

/// Everything one run mutates: dedup set, record buffer, counters.
/// Built fresh per run and owned by the orchestrator; workers only see the dedup filter.
#[derive(Debug)]
pub struct CrawlSession {
    dedup: Arc<DedupFilter>,
    store: RecordStore,
    stop: StopSignal,
    summary: CrawlSummary,
}

impl CrawlSession {
    pub fn new(store: RecordStore, policy: DedupPolicy, stop: StopSignal) -> Self {
        let dedup = DedupFilter::new(policy.enabled);
        if policy.enabled && policy.seed_from_existing {
            dedup.seed(store.existing().iter().map(|r| r.key()));
            info!("Seeded duplicate check with {} stored license numbers", dedup.len());
        }
        Self {
            dedup: Arc::new(dedup),
            store,
            stop,
            summary: CrawlSummary::default(),
        }
    }

    pub fn dedup(&self) -> &Arc<DedupFilter> {
        &self.dedup
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn count_specialty(&mut self) {
        self.summary.specialties += 1;
    }

    pub fn count_duplicates(&mut self, n: usize) {
        self.summary.duplicates += n;
    }

    /// Books one finished doctor and, when it was collected, buffers it and checks the flush threshold.
    pub async fn record(&mut self, done: Completed) {
        let Completed {
            summary,
            outcome,
            done,
            total,
        } = done;
        match outcome {
            Outcome::Collected(record) => {
                let name = record.display_name();
                self.store.push(record);
                self.summary.collected += 1;
                info!(
                    "[{done}/{total}] Saved: {name} (Total: {})",
                    self.store.collected()
                );
                if self.store.should_flush() {
                    self.store.checkpoint(false).await;
                }
            }
            Outcome::Duplicate(license) => {
                self.summary.duplicates += 1;
                debug!("[{done}/{total}] Skipped duplicate: CMP {license}");
            }
            Outcome::Deceased(name) => {
                self.summary.deceased += 1;
                debug!("[{done}/{total}] Skipped deceased: {name}");
            }
            Outcome::Unidentified => {
                self.summary.unidentified += 1;
                warn!("[{done}/{total}] Skipped {}: no license number on detail page", summary.label());
            }
            Outcome::Failed(reason) => {
                self.summary.failed += 1;
                error!("[{done}/{total}] Error processing {}: {reason}", summary.label());
            }
            Outcome::Cancelled => {
                self.summary.cancelled += 1;
            }
        }
    }

    /// Forces the closing flush and returns the run's report.
    pub async fn finish(mut self) -> CrawlSummary {
        info!("Performing final save...");
        self.store.checkpoint(true).await;
        self.summary.stored = self.store.merged().len();
        self.summary.unsaved = self.store.pending();
        self.summary.interrupted = self.stop.is_stopped();
        self.summary
    }
}
