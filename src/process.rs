use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::config::{CrawlConfig, SpecialtySelection, StoreConfig};
use crate::dispatch::Dispatcher;
use crate::filter::is_deceased;
use crate::parse::{parse_doctor_summaries, parse_specialties};
use crate::record::Specialty;
use crate::request::{Fetch, Fetcher};
use crate::session::{CrawlSession, CrawlSummary, StopSignal};
use crate::store::{read_records, write_store, RecordStore};
use crate::{info_time, Error, Result};

/// Drives a crawl: specialties, then each specialty's doctors, persisting as it goes.
pub struct Crawler<F> {
    config: CrawlConfig,
    fetcher: Arc<F>,
    stop: StopSignal,
}

impl Crawler<Fetcher> {
    /// A crawler fetching from the network or from disk, as the config says.
    pub fn from_config(config: CrawlConfig) -> Result<Self> {
        let fetcher = Fetcher::new(&config.mode, &config.fetch)?;
        Ok(Self::new(config, fetcher))
    }
}

impl<F: Fetch> Crawler<F> {
    pub fn new(config: CrawlConfig, fetcher: F) -> Self {
        Self {
            config,
            fetcher: Arc::new(fetcher),
            stop: StopSignal::default(),
        }
    }

    /// Shares an existing stop signal, e.g. one already wired to an interrupt handler.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Raising this signal stops the run after in-flight doctors finish; a final save still happens.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Fetches and parses the landing page. No specialties at all is fatal.
    pub async fn specialties(&self) -> Result<Vec<Specialty>> {
        let locator = self.config.landing_locator()?;
        info!("Parsing specialties from {locator}");
        let html = self.fetcher.fetch(&locator).await?;
        let specialties = parse_specialties(&html)?;
        if specialties.is_empty() {
            return Err(Error::NoSpecialties(locator));
        }
        info!("Found {} specialties", specialties.len());
        Ok(specialties)
    }

    pub async fn run(&self) -> Result<CrawlSummary> {
        let start_time = Local::now();
        info_time!("Started crawling");

        let store = RecordStore::load(self.config.store.clone()).await?;
        let mut session = CrawlSession::new(store, self.config.dedup, self.stop.clone());
        if !self.config.dedup.seed_from_existing {
            info!(
                "Duplicate check is limited to this run; {} stored records will be merged, not skipped",
                session.store().existing().len()
            );
        }

        let specialties = self.specialties().await?;
        let selected = select_specialties(&specialties, &self.config.selection)?;

        let dispatcher = Dispatcher::new(
            self.fetcher.clone(),
            session.dedup().clone(),
            self.config.base_url.clone(),
            self.stop.clone(),
        )
        .with_workers(
            self.config.workers,
            self.config.is_sequential(),
            self.config.politeness_delay(),
        );
        let worker_mode = if dispatcher.is_sequential() {
            "sequential".to_string()
        } else {
            format!("{} parallel workers", self.config.workers)
        };
        info!("Processing {} specialties with {worker_mode}...", selected.len());

        let delay = self.config.politeness_delay();
        for (position, (index, specialty)) in selected.iter().enumerate() {
            if session.is_stopped() {
                warn!("Stopped before specialty index {index}: {}", specialty.name);
                break;
            }
            let start_specialty = Local::now();
            info!(
                "[{}/{}] Processing specialty (index {index}): {}",
                position + 1,
                selected.len(),
                specialty.name
            );
            self.crawl_specialty(&mut session, &dispatcher, specialty).await;
            session.count_specialty();
            info_time!(
                start_specialty,
                "Completed specialty: {} (collected so far: {})",
                specialty.name,
                session.store().collected()
            );

            if !delay.is_zero() && position + 1 < selected.len() {
                tokio::time::sleep(delay).await;
            }
        }

        let summary = session.finish().await;
        info_time!(
            start_time,
            "Crawling complete! Collected {} doctor records ({} in store).",
            summary.collected,
            summary.stored
        );
        Ok(summary)
    }

    /// One specialty: list its doctors, drop the ones already handled, dispatch the rest.
    /// Nothing in here is fatal; a missing page just means no doctors.
    async fn crawl_specialty(
        &self,
        session: &mut CrawlSession,
        dispatcher: &Dispatcher<F>,
        specialty: &Specialty,
    ) {
        let html = match self.config.resolve(&specialty.source_url) {
            Ok(url) => self.fetcher.fetch(&url).await.map_err(Error::from),
            Err(e) => Err(e),
        };
        let mut doctors = match html.and_then(|html| parse_doctor_summaries(&html, specialty)) {
            Ok(doctors) => doctors,
            Err(e) => {
                warn!("Could not read specialty page for {}: {e}", specialty.name);
                return;
            }
        };
        if doctors.is_empty() {
            warn!("No doctors found for {}", specialty.name);
            return;
        }
        info!("Found {} doctors for {}", doctors.len(), specialty.name);

        if session.dedup().is_enabled() {
            let initial = doctors.len();
            doctors.retain(|d| !session.dedup().is_seen(&d.license_number));
            let skipped = initial - doctors.len();
            session.count_duplicates(skipped);
            info!(
                "  {} new doctors to process (after duplicate check, {skipped} duplicates skipped)",
                doctors.len()
            );
        }
        if doctors.is_empty() {
            info!("  All doctors already handled, skipping...");
            return;
        }

        let mut done_rx = dispatcher.spawn(doctors);
        while let Some(done) = done_rx.recv().await {
            session.record(done).await;
        }
    }
}

/// Picks the specialties a run covers, paired with their index in the full list.
/// A single `index` must exist; `start`/`max` just clip the list.
pub fn select_specialties(
    all: &[Specialty],
    selection: &SpecialtySelection,
) -> Result<Vec<(usize, Specialty)>> {
    if let Some(index) = selection.index {
        let specialty = all.get(index).ok_or(Error::SpecialtyIndexOutOfRange {
            index,
            len: all.len(),
        })?;
        info!("Processing single specialty at index {index}: {}", specialty.name);
        return Ok(vec![(index, specialty.clone())]);
    }
    if selection.start >= all.len() {
        warn!(
            "Start index {} is past the last specialty ({})",
            selection.start,
            all.len().saturating_sub(1)
        );
    }
    let take = selection.max.unwrap_or(usize::MAX);
    Ok(all
        .iter()
        .cloned()
        .enumerate()
        .skip(selection.start)
        .take(take)
        .collect())
}

/// What [`prune_deceased`] did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: usize,
    pub removed: usize,
}

/// Rewrites an existing store without its deceased doctors.
/// An unreadable store is left alone and reported.
pub async fn prune_deceased(config: &StoreConfig) -> Result<PruneReport> {
    let records = read_records(config).await?;
    if records.is_empty() {
        warn!("No stored records found at {}", config.csv_path.display());
        return Ok(PruneReport::default());
    }
    let total = records.len();
    let alive: Vec<_> = records.into_iter().filter(|r| !is_deceased(r)).collect();
    let report = PruneReport {
        kept: alive.len(),
        removed: total - alive.len(),
    };
    if report.removed > 0 {
        write_store(config, &alive).await?;
    }
    info!(
        "Filtered store: {} kept, {} deceased removed",
        report.kept, report.removed
    );
    Ok(report)
}
