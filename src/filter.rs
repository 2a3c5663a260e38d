use std::collections::HashSet;
use std::sync::RwLock;

use crate::record::DoctorRecord;

/// Status text the directory prints for deceased doctors.
pub const DECEASED_SENTINEL: &str = "FALLECIDO";

/// True iff the record's status, trimmed and case-folded, is the deceased sentinel.
pub fn is_deceased(record: &DoctorRecord) -> bool {
    record.status.trim().to_uppercase() == DECEASED_SENTINEL
}

/// License numbers handled so far in this run.
///
/// Lookups take the read lock and may race with a claim; only [`DedupFilter::claim`]
/// decides who owns a license number.
#[derive(Debug)]
pub struct DedupFilter {
    enabled: bool,
    seen: RwLock<HashSet<String>>,
}

impl DedupFilter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            seen: RwLock::new(HashSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Marks license numbers as already handled, e.g. from the loaded store.
    pub fn seed<'a>(&self, licenses: impl IntoIterator<Item = &'a str>) {
        let mut seen = self.seen.write().unwrap_or_else(|e| e.into_inner());
        seen.extend(
            licenses
                .into_iter()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }

    /// Whether the license number was already claimed. Blank numbers never are.
    pub fn is_seen(&self, license: &str) -> bool {
        let license = license.trim();
        if !self.enabled || license.is_empty() {
            return false;
        }
        self.seen
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(license)
    }

    /// Claims a license number for the caller. Returns false if someone got there first.
    pub fn claim(&self, license: &str) -> bool {
        let license = license.trim();
        if !self.enabled || license.is_empty() {
            return true;
        }
        self.seen
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(license.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
