//! Durable doctor store: a tabular CSV file, optionally mirrored by a structured JSON file.
//!
//! Newly collected records wait in a buffer and are written out together with the loaded
//! baseline once the buffer reaches the flush threshold, or when a flush is forced.
//! Every write goes to a temporary sibling first and is renamed over the destination.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::record::{group_rows, DoctorRecord, TabularRow};
use crate::{info_time, Error, Result};

#[derive(Debug)]
pub struct RecordStore {
    config: StoreConfig,
    /// Loaded at start, never touched afterwards.
    existing: Vec<DoctorRecord>,
    /// Collected this run and already on disk.
    flushed: Vec<DoctorRecord>,
    /// Collected this run, not yet on disk.
    buffer: Vec<DoctorRecord>,
}

impl RecordStore {
    /// Checks the store location is writable and loads whatever the last run left there.
    /// Fails rather than start empty when an existing store can't be read.
    pub async fn load(config: StoreConfig) -> Result<Self> {
        ensure_writable(&config.csv_path).await?;
        if let Some(json_path) = &config.json_path {
            ensure_writable(json_path).await?;
        }
        let existing = read_records(&config).await?;
        Ok(Self::with_existing(config, existing))
    }

    pub fn with_existing(config: StoreConfig, existing: Vec<DoctorRecord>) -> Self {
        Self {
            config,
            existing,
            flushed: Vec::new(),
            buffer: Vec::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn existing(&self) -> &[DoctorRecord] {
        &self.existing
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Records collected this run, flushed or not.
    pub fn collected(&self) -> usize {
        self.flushed.len() + self.buffer.len()
    }

    pub fn push(&mut self, record: DoctorRecord) {
        self.buffer.push(record);
    }

    pub fn should_flush(&self) -> bool {
        self.pending() >= self.config.flush_threshold.max(1)
    }

    /// Baseline followed by this run's records, one per license number; first occurrence wins.
    pub fn merged(&self) -> Vec<DoctorRecord> {
        let mut keys = HashSet::new();
        self.existing
            .iter()
            .chain(&self.flushed)
            .chain(&self.buffer)
            .filter(|r| r.key().is_empty() || keys.insert(r.key().to_string()))
            .cloned()
            .collect()
    }

    /// Flushes if the buffer reached the threshold (or `force` is set).
    /// A failed write is logged and the buffer kept, so the next trigger writes it again.
    pub async fn checkpoint(&mut self, force: bool) -> bool {
        if !(force || self.should_flush()) {
            return false;
        }
        match self.flush().await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Error during save, keeping {} buffered records for the next attempt: {e}",
                    self.pending()
                );
                false
            }
        }
    }

    /// Writes baseline + everything collected so far, then moves the buffer to the flushed set.
    /// Returns the number of records now on disk.
    pub async fn flush(&mut self) -> Result<usize> {
        let start_time = Local::now();
        let all = self.merged();
        if all.is_empty() {
            debug!("Nothing to save yet");
            return Ok(0);
        }
        info!(
            "Starting save: {} new records (Total: {})",
            self.pending(),
            all.len()
        );

        write_store(&self.config, &all).await?;

        self.flushed.append(&mut self.buffer);
        info_time!(start_time, "Saved {} records to {}", all.len(), self.config.csv_path.display());
        Ok(all.len())
    }
}

/// Atomically replaces the configured store files with `records`.
/// Both temporary files are written before either is renamed into place.
pub async fn write_store(config: &StoreConfig, records: &[DoctorRecord]) -> Result<()> {
    let mut staged = Vec::with_capacity(2);

    let result = async {
        let csv = encode_csv(records)?;
        staged.push(stage(&config.csv_path, &csv).await?);
        if let Some(json_path) = &config.json_path {
            let json = serde_json::to_vec_pretty(records)?;
            staged.push(stage(json_path, &json).await?);
        }
        for (tmp, dest) in &staged {
            tokio::fs::rename(tmp, dest).await?;
        }
        Ok::<(), Error>(())
    }
    .await;

    if result.is_err() {
        let tmps = std::iter::once(&config.csv_path)
            .chain(config.json_path.as_ref())
            .map(|dest| tmp_path(dest));
        for tmp in tmps {
            let _ = tokio::fs::remove_file(tmp).await;
        }
    }
    result
}

/// Reads the store as left by a previous run.
/// The structured file is preferred when enabled; otherwise tabular rows are regrouped per doctor.
///
/// A damaged structured file falls back to the tabular one. A store that exists but can't be
/// read at all is an error: starting from an empty baseline would overwrite it on the first flush.
pub async fn read_records(config: &StoreConfig) -> Result<Vec<DoctorRecord>> {
    let mut json_failure = None;
    if let Some(json_path) = &config.json_path {
        match read_json(json_path).await {
            Ok(Some(records)) => {
                info!("Loaded {} existing doctors from {}", records.len(), json_path.display());
                return Ok(records);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Error reading {}, trying {}: {e}", json_path.display(), config.csv_path.display());
                json_failure = Some((json_path.clone(), e));
            }
        }
    }
    match read_csv(&config.csv_path).await {
        Ok(Some(records)) => {
            info!(
                "Loaded {} existing doctors from {}",
                records.len(),
                config.csv_path.display()
            );
            Ok(records)
        }
        Ok(None) => match json_failure {
            Some((path, source)) => Err(Error::StoreUnreadable {
                path,
                source: Box::new(source),
            }),
            None => Ok(Vec::new()),
        },
        Err(source) => Err(Error::StoreUnreadable {
            path: config.csv_path.clone(),
            source: Box::new(source),
        }),
    }
}

/// Like [`read_records`], but an unreadable store is logged and treated as empty.
pub async fn load_records(config: &StoreConfig) -> Vec<DoctorRecord> {
    read_records(config).await.unwrap_or_else(|e| {
        warn!("{e}");
        Vec::new()
    })
}

async fn read_json(path: &Path) -> Result<Option<Vec<DoctorRecord>>> {
    let Some(bytes) = read_if_exists(path).await? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Ragged rows are read with whatever columns they have. Rows that still can't be decoded are
/// skipped, and the file is copied to a `.bak` sibling before anything rewrites it.
async fn read_csv(path: &Path) -> Result<Option<Vec<DoctorRecord>>> {
    let Some(bytes) = read_if_exists(path).await? else {
        return Ok(None);
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());
    reader.headers()?;

    let mut rows = Vec::new();
    let mut skipped = 0;
    for row in reader.deserialize::<TabularRow>() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => {
                skipped += 1;
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                warn!("Skipping unreadable row at {}:{line}: {e}", path.display());
            }
        }
    }
    if skipped > 0 {
        let backup = backup_path(path);
        tokio::fs::write(&backup, &bytes).await?;
        warn!("{skipped} rows skipped; original kept at {}", backup.display());
    }
    Ok(Some(group_rows(rows)))
}

async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn encode_csv(records: &[DoctorRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in records.iter().flat_map(DoctorRecord::to_rows) {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

/// Writes `bytes` next to `dest` and returns (temporary, destination).
async fn stage(dest: &Path, bytes: &[u8]) -> Result<(PathBuf, PathBuf)> {
    let tmp = tmp_path(dest);
    let mut file = File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok((tmp, dest.to_path_buf()))
}

pub(crate) fn tmp_path(dest: &Path) -> PathBuf {
    with_suffix(dest, ".tmp")
}

pub(crate) fn backup_path(dest: &Path) -> PathBuf {
    with_suffix(dest, ".bak")
}

fn with_suffix(dest: &Path, suffix: &str) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    dest.with_file_name(name)
}

/// Creates the parent directory if needed and proves a file can be created in it.
async fn ensure_writable(dest: &Path) -> Result<()> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let unwritable = |source| Error::StoreDirUnwritable {
        path: dir.clone(),
        source,
    };
    tokio::fs::create_dir_all(&dir).await.map_err(unwritable)?;

    let probe = dir.join(format!(".{}.probe", std::process::id()));
    File::create(&probe).await.map_err(unwritable)?;
    let _ = tokio::fs::remove_file(&probe).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Registration;

    fn doctor(license: &str) -> DoctorRecord {
        DoctorRecord {
            license_number: license.into(),
            first_names: format!("DOC {license}"),
            status: "HÁBIL".into(),
            registrations: vec![Registration {
                specialty_label: "PEDIATRÍA".into(),
                registration_code: format!("R{license}"),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn config_in(dir: &Path, json: bool) -> StoreConfig {
        StoreConfig {
            csv_path: dir.join("doctors.csv"),
            json_path: json.then(|| dir.join("doctors.json")),
            flush_threshold: 2,
        }
    }

    #[test]
    fn merge_keeps_first_copy() {
        let mut changed = doctor("B");
        changed.first_names = "CHANGED".into();
        let mut store = RecordStore::with_existing(StoreConfig::default(), vec![doctor("A"), doctor("B")]);
        store.push(changed);
        store.push(doctor("C"));

        let merged = store.merged();
        let keys: Vec<_> = merged.iter().map(|r| r.key()).collect();
        assert_eq!(keys, ["A", "B", "C"]);
        assert_eq!(merged[1].first_names, "DOC B");
    }

    #[test]
    fn threshold_counts_buffer_only() {
        let mut store = RecordStore::with_existing(StoreConfig::default(), vec![doctor("A")]);
        for i in 0..29 {
            store.push(doctor(&i.to_string()));
        }
        assert!(!store.should_flush());
        store.push(doctor("last"));
        assert!(store.should_flush());
    }

    #[tokio::test]
    async fn flush_moves_buffer_and_keeps_earlier_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::load(config_in(dir.path(), true)).await.unwrap();
        store.push(doctor("A"));
        assert!(!store.checkpoint(false).await);
        store.push(doctor("B"));
        assert!(store.checkpoint(false).await);
        assert_eq!(store.pending(), 0);

        store.push(doctor("C"));
        assert!(store.checkpoint(true).await);

        let reloaded = load_records(store.config()).await;
        let keys: Vec<_> = reloaded.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, ["A", "B", "C"]);
        assert!(!tmp_path(&store.config().csv_path).exists());
    }

    #[tokio::test]
    async fn csv_only_store_reloads_grouped() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), false);
        let mut two_regs = doctor("A");
        two_regs.registrations.push(Registration {
            specialty_label: "NEUROLOGÍA".into(),
            ..Default::default()
        });
        write_store(&config, &[two_regs.clone(), doctor("B")]).await.unwrap();

        let text = std::fs::read_to_string(&config.csv_path).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(!dir.path().join("doctors.json").exists());

        let reloaded = load_records(&config).await;
        assert_eq!(reloaded, vec![two_regs, doctor("B")]);
    }

    #[tokio::test]
    async fn corrupt_store_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), true);
        std::fs::write(config.json_path.as_ref().unwrap(), "{ not json").unwrap();
        assert!(load_records(&config).await.is_empty());
        assert!(matches!(
            RecordStore::load(config).await,
            Err(Error::StoreUnreadable { .. })
        ));
    }

    #[tokio::test]
    async fn damaged_json_falls_back_to_csv() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), true);
        write_store(&config, &[doctor("A")]).await.unwrap();
        std::fs::write(config.json_path.as_ref().unwrap(), "[{").unwrap();

        let store = RecordStore::load(config).await.unwrap();
        assert_eq!(store.existing(), [doctor("A")]);
    }

    #[tokio::test]
    async fn bad_csv_rows_do_not_empty_the_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), false);
        write_store(&config, &[doctor("A")]).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&config.csv_path)
            .unwrap();
        std::io::Write::write_all(&mut file, b"B,only,three\nC,\xff\xfe,broken\nD,ok,row\n").unwrap();
        drop(file);
        let original = std::fs::read(&config.csv_path).unwrap();

        let mut store = RecordStore::load(config.clone()).await.unwrap();
        let keys: Vec<_> = store.existing().iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, ["A", "B", "D"]);
        assert_eq!(store.existing()[0], doctor("A"));
        assert_eq!(store.existing()[1].first_names, "three");
        assert_eq!(std::fs::read(backup_path(&config.csv_path)).unwrap(), original);

        store.push(doctor("E"));
        assert!(store.checkpoint(true).await);
        let keys: Vec<_> = load_records(&config)
            .await
            .into_iter()
            .map(|r| r.license_number)
            .collect();
        assert_eq!(keys, ["A", "B", "D", "E"]);
    }
}
