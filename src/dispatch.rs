use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::{
    sync::{mpsc, Semaphore},
    task::{spawn_blocking, JoinSet},
};
use tracing::{error, info, warn};
use url::Url;

use crate::filter::{is_deceased, DedupFilter};
use crate::parse::parse_doctor_detail;
use crate::record::DoctorSummary;
use crate::request::Fetch;
use crate::session::StopSignal;

/// Progress is logged every this many finished doctors.
const PROGRESS_EVERY: usize = 5;

/// How one doctor's pipeline ended.
#[derive(Debug)]
pub enum Outcome {
    Collected(crate::record::DoctorRecord),
    /// License number already claimed this run.
    Duplicate(String),
    /// Deceased; the license number was still claimed so it isn't fetched again.
    Deceased(String),
    /// Detail page parsed without any license number.
    Unidentified,
    Failed(String),
    /// Never started because the run was stopped.
    Cancelled,
}

/// A finished doctor, in completion order. `done` counts finished doctors of the batch so far.
#[derive(Debug)]
pub struct Completed {
    pub summary: DoctorSummary,
    pub outcome: Outcome,
    pub done: usize,
    pub total: usize,
}

/// What a single doctor's pipeline needs. Shared by every worker.
#[derive(Debug)]
struct Pipeline<F> {
    fetcher: Arc<F>,
    dedup: Arc<DedupFilter>,
    base_url: Url,
}

impl<F: Fetch> Pipeline<F> {
    /// dedup check -> detail fetch -> parse -> liveness check -> dedup claim.
    async fn process_doctor(&self, summary: &DoctorSummary) -> Outcome {
        match self.prepare(summary) {
            ControlFlow::Continue(url) => self.fetch_detail(url, summary).await,
            ControlFlow::Break(outcome) => outcome,
        }
    }

    /// Checks that need no request. Breaks with the outcome when the doctor is settled already.
    fn prepare(&self, summary: &DoctorSummary) -> ControlFlow<Outcome, Url> {
        if self.dedup.is_seen(&summary.license_number) {
            return ControlFlow::Break(Outcome::Duplicate(summary.license_number.clone()));
        }
        match self.base_url.join(&summary.detail_url) {
            Ok(url) => ControlFlow::Continue(url),
            Err(e) => ControlFlow::Break(Outcome::Failed(format!(
                "bad detail link {:?}: {e}",
                summary.detail_url
            ))),
        }
    }

    async fn fetch_detail(&self, url: Url, summary: &DoctorSummary) -> Outcome {
        let html = match self.fetcher.fetch(url.as_str()).await {
            Ok(html) => html,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        let parsed = spawn_blocking({
            let summary = summary.clone();
            move || parse_doctor_detail(&html, &summary)
        })
        .await;
        let record = match parsed {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => return Outcome::Failed(e.to_string()),
            Err(e) => return Outcome::Failed(format!("parser crashed: {e}")),
        };

        let deceased = is_deceased(&record);
        if record.key().is_empty() {
            return Outcome::Unidentified;
        }
        // The detail page's license number is the authoritative one.
        if !self.dedup.claim(record.key()) {
            return Outcome::Duplicate(record.key().to_string());
        }
        if deceased {
            Outcome::Deceased(record.display_name())
        } else {
            Outcome::Collected(record)
        }
    }
}

/// Runs the doctor pipelines of one specialty, `workers` at a time.
pub struct Dispatcher<F> {
    pipeline: Arc<Pipeline<F>>,
    workers: usize,
    sequential: bool,
    delay: Duration,
    stop: StopSignal,
}

impl<F: Fetch> Dispatcher<F> {
    pub fn new(fetcher: Arc<F>, dedup: Arc<DedupFilter>, base_url: Url, stop: StopSignal) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                fetcher,
                dedup,
                base_url,
            }),
            workers: 1,
            sequential: true,
            delay: Duration::ZERO,
            stop,
        }
    }

    /// `workers <= 1` or `sequential` processes doctors one by one, sleeping `delay` after each detail request.
    pub fn with_workers(mut self, workers: usize, sequential: bool, delay: Duration) -> Self {
        self.workers = workers.max(1);
        self.sequential = sequential || self.workers == 1;
        self.delay = delay;
        self
    }

    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    /// Starts the batch and returns a channel yielding each doctor as it finishes.
    /// The channel closes once every doctor is accounted for.
    pub fn spawn(&self, summaries: Vec<DoctorSummary>) -> mpsc::Receiver<Completed> {
        let (done_tx, done_rx) = mpsc::channel(summaries.len().max(1));
        let pipeline = self.pipeline.clone();
        let stop = self.stop.clone();
        if self.sequential {
            let delay = self.delay;
            tokio::spawn(async move { run_sequential(pipeline, summaries, delay, stop, done_tx).await });
        } else {
            let workers = self.workers;
            tokio::spawn(async move { run_concurrent(pipeline, summaries, workers, stop, done_tx).await });
        }
        done_rx
    }
}

async fn run_sequential<F: Fetch>(
    pipeline: Arc<Pipeline<F>>,
    summaries: Vec<DoctorSummary>,
    delay: Duration,
    stop: StopSignal,
    done_tx: mpsc::Sender<Completed>,
) {
    let total = summaries.len();
    for (idx, summary) in summaries.into_iter().enumerate() {
        let done = idx + 1;
        let outcome = if stop.is_stopped() {
            Outcome::Cancelled
        } else {
            info!("[{done}/{total}] Processing: {}", summary.label());
            match pipeline.prepare(&summary) {
                ControlFlow::Break(outcome) => outcome,
                ControlFlow::Continue(url) => {
                    // Own task per doctor: a panic fails this doctor only.
                    let worker = tokio::spawn({
                        let pipeline = pipeline.clone();
                        let summary = summary.clone();
                        async move { pipeline.fetch_detail(url, &summary).await }
                    });
                    let outcome = worker.await.unwrap_or_else(|e| {
                        error!("Worker for {} died: {e}", summary.label());
                        Outcome::Failed(format!("worker died: {e}"))
                    });
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    outcome
                }
            }
        };
        report_progress(done, total);
        let completed = Completed {
            summary,
            outcome,
            done,
            total,
        };
        if done_tx.send(completed).await.is_err() {
            warn!("Result collector went away, dropping the rest of the batch");
            return;
        }
    }
}

async fn run_concurrent<F: Fetch>(
    pipeline: Arc<Pipeline<F>>,
    summaries: Vec<DoctorSummary>,
    workers: usize,
    stop: StopSignal,
    done_tx: mpsc::Sender<Completed>,
) {
    let total = summaries.len();
    info!("Processing {total} doctors with {workers} parallel workers...");

    let permits = Arc::new(Semaphore::new(workers));
    let mut task_set = JoinSet::new();
    let mut in_flight = HashMap::with_capacity(total);

    for summary in summaries {
        let handle = task_set.spawn({
            let pipeline = pipeline.clone();
            let permits = permits.clone();
            let stop = stop.clone();
            let summary = summary.clone();
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (summary, Outcome::Cancelled);
                };
                if stop.is_stopped() {
                    return (summary, Outcome::Cancelled);
                }
                let outcome = pipeline.process_doctor(&summary).await;
                (summary, outcome)
            }
        });
        in_flight.insert(handle.id(), summary);
    }

    let mut done = 0;
    while let Some(joined) = task_set.join_next_with_id().await {
        done += 1;
        let (summary, outcome) = match joined {
            Ok((id, result)) => {
                in_flight.remove(&id);
                result
            }
            Err(e) => {
                let summary = in_flight.remove(&e.id()).unwrap_or_default();
                error!("Worker for {} died: {e}", summary.label());
                (summary, Outcome::Failed(format!("worker died: {e}")))
            }
        };
        report_progress(done, total);
        let completed = Completed {
            summary,
            outcome,
            done,
            total,
        };
        if done_tx.send(completed).await.is_err() {
            warn!("Result collector went away, aborting the rest of the batch");
            task_set.abort_all();
            return;
        }
    }
}

fn report_progress(done: usize, total: usize) {
    if done % PROGRESS_EVERY == 0 || done == total {
        info!("Progress: {done}/{total} doctors ({}%)", done * 100 / total.max(1));
    }
}
