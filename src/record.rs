//! Records flowing through a crawl: what the listing pages yield, what gets persisted,
//! and the flat row shape of the tabular store.

use serde::{Deserialize, Serialize};

/// One entry of the specialty landing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialty {
    pub id: String,
    /// Secondary query parameter carried by the specialty link.
    pub key: String,
    pub name: String,
    /// Link target as found on the page, usually relative to the base URL.
    pub source_url: String,
}

/// A row of a specialty's doctor listing. Only lives long enough to drive the detail fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoctorSummary {
    pub detail_url: String,
    pub license_number: String,
    pub last_name_paternal: String,
    pub last_name_maternal: String,
    pub first_names: String,
    pub specialty_name: String,
    pub specialty_id: String,
}

impl DoctorSummary {
    pub fn last_names(&self) -> String {
        [self.last_name_paternal.trim(), self.last_name_maternal.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Short human label for log lines.
    pub fn label(&self) -> String {
        format!(
            "{} {} (CMP: {})",
            self.first_names,
            self.last_name_paternal,
            if self.license_number.is_empty() {
                "N/A"
            } else {
                &self.license_number
            }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub specialty_label: String,
    #[serde(default)]
    pub registration_type: String,
    #[serde(default)]
    pub registration_code: String,
    #[serde(default)]
    pub registration_date: String,
}

impl Registration {
    fn is_empty(&self) -> bool {
        self.specialty_label.is_empty()
            && self.registration_type.is_empty()
            && self.registration_code.is_empty()
            && self.registration_date.is_empty()
    }
}

/// The persisted doctor. `license_number` is its identity.
/// Missing fields default to empty strings so partially parsed pages and older stores load the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DoctorRecord {
    pub license_number: String,
    pub last_names: String,
    pub first_names: String,
    pub status: String,
    pub photo_url: String,
    pub contact_info: String,
    pub regional_council: String,
    pub registrations: Vec<Registration>,
}

impl DoctorRecord {
    /// Seeds a record from its listing row, used where the detail page has no identity table.
    pub fn from_summary(summary: &DoctorSummary) -> Self {
        Self {
            license_number: summary.license_number.trim().to_string(),
            last_names: summary.last_names(),
            first_names: summary.first_names.clone(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> &str {
        self.license_number.trim()
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_names, self.last_names)
    }

    /// One row per registration; a doctor without registrations still gets a single row.
    pub fn to_rows(&self) -> Vec<TabularRow> {
        let base = |reg: Option<&Registration>| {
            let reg = reg.cloned().unwrap_or_default();
            TabularRow {
                license_number: self.license_number.clone(),
                last_names: self.last_names.clone(),
                first_names: self.first_names.clone(),
                status: self.status.clone(),
                contact_info: self.contact_info.clone(),
                regional_council: self.regional_council.clone(),
                photo_url: self.photo_url.clone(),
                registration_specialty: reg.specialty_label,
                registration_type: reg.registration_type,
                registration_code: reg.registration_code,
                registration_date: reg.registration_date,
            }
        };
        if self.registrations.is_empty() {
            vec![base(None)]
        } else {
            self.registrations.iter().map(|r| base(Some(r))).collect()
        }
    }
}

/// A line of the tabular store: identity columns repeated per registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabularRow {
    pub license_number: String,
    pub last_names: String,
    pub first_names: String,
    pub status: String,
    pub contact_info: String,
    pub regional_council: String,
    pub photo_url: String,
    pub registration_specialty: String,
    pub registration_type: String,
    pub registration_code: String,
    pub registration_date: String,
}

impl TabularRow {
    fn registration(&self) -> Registration {
        Registration {
            specialty_label: self.registration_specialty.clone(),
            registration_type: self.registration_type.clone(),
            registration_code: self.registration_code.clone(),
            registration_date: self.registration_date.clone(),
        }
    }
}

/// Regroups flat rows into records by license number.
/// Records keep the order their license number first appears in; registrations keep row order.
/// Rows without a license number are dropped since nothing identifies them.
pub fn group_rows(rows: impl IntoIterator<Item = TabularRow>) -> Vec<DoctorRecord> {
    let mut records: Vec<DoctorRecord> = Vec::new();
    let mut index = std::collections::HashMap::new();

    for row in rows {
        let key = row.license_number.trim().to_string();
        if key.is_empty() {
            continue;
        }
        let reg = row.registration();
        let pos = *index.entry(key).or_insert_with(|| {
            records.push(DoctorRecord {
                license_number: row.license_number.clone(),
                last_names: row.last_names.clone(),
                first_names: row.first_names.clone(),
                status: row.status.clone(),
                photo_url: row.photo_url.clone(),
                contact_info: row.contact_info.clone(),
                regional_council: row.regional_council.clone(),
                registrations: Vec::new(),
            });
            records.len() - 1
        });
        if !reg.is_empty() {
            records[pos].registrations.push(reg);
        }
    }
    records
}
