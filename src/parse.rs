use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::record::{DoctorRecord, DoctorSummary, Registration, Specialty};
use crate::{Error, Result};

/// Marks links on the landing page that lead to a specialty's doctor list.
const SPECIALTY_LINK_MARKER: &str = "lista-medicos-especialidad.php";
/// Prefix of the specialty label printed above a doctor list.
const REGISTRY_LABEL: &str = "Registro:";
/// Only used to resolve relative links so their query string can be read.
const QUERY_BASE: &str = "http://localhost/";

/// The few selectors every page of the directory is built from.
struct Selectors {
    table: Selector,
    row: Selector,
    cell: Selector,
    link: Selector,
    image: Selector,
    paragraph: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            table: create_selector("table")?,
            row: create_selector("tr.cabecera_tr2")?,
            cell: create_selector("td")?,
            link: create_selector("a[href]")?,
            image: create_selector("img[src]")?,
            paragraph: create_selector("p")?,
        })
    }

    fn first_table<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        doc.select(&self.table).next()
    }

    fn rows<'a>(&'a self, table: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        table.select(&self.row)
    }

    fn cells<'a>(&self, row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        row.select(&self.cell).collect()
    }

    fn href<'a>(&self, row: ElementRef<'a>) -> Option<&'a str> {
        row.select(&self.link).next().and_then(|a| a.value().attr("href"))
    }
}

/// Parses the landing page into its specialties, in page order.
/// A page without a table yields an empty list.
pub fn parse_specialties(html: &str) -> Result<Vec<Specialty>> {
    let sel = Selectors::new()?;
    let doc = Html::parse_document(html);

    let Some(table) = sel.first_table(&doc) else {
        warn!("Could not find specialties table");
        return Ok(Vec::new());
    };

    let mut specialties = Vec::new();
    for row in sel.rows(table) {
        let Some(href) = sel.href(row) else { continue };
        let cells = sel.cells(row);
        if cells.len() < 2 || !href.contains(SPECIALTY_LINK_MARKER) {
            continue;
        }
        let specialty = Specialty {
            id: query_param(href, "id"),
            key: query_param(href, "key"),
            name: text_of(cells[1]),
            source_url: href.to_string(),
        };
        debug!("Found specialty: {}", specialty.name);
        specialties.push(specialty);
    }
    Ok(specialties)
}

/// Parses a specialty page into one summary per listed doctor.
/// The page's own "Registro:" label, when present, names the specialty.
pub fn parse_doctor_summaries(html: &str, specialty: &Specialty) -> Result<Vec<DoctorSummary>> {
    let sel = Selectors::new()?;
    let doc = Html::parse_document(html);

    let specialty_name = doc
        .select(&sel.paragraph)
        .next()
        .map(text_of)
        .filter(|text| text.contains(REGISTRY_LABEL))
        .map(|text| text.replace(REGISTRY_LABEL, "").trim().to_string())
        .unwrap_or_else(|| specialty.name.clone());

    let Some(table) = sel.first_table(&doc) else {
        warn!("No table found for specialty {}", specialty.name);
        return Ok(Vec::new());
    };

    let mut doctors = Vec::new();
    for row in sel.rows(table) {
        let Some(href) = sel.href(row) else { continue };
        let cells = sel.cells(row);
        if cells.len() < 5 {
            continue;
        }
        doctors.push(DoctorSummary {
            detail_url: href.to_string(),
            license_number: text_of(cells[1]),
            last_name_paternal: text_of(cells[2]),
            last_name_maternal: text_of(cells[3]),
            first_names: text_of(cells[4]),
            specialty_name: specialty_name.clone(),
            specialty_id: specialty.id.clone(),
        });
    }
    Ok(doctors)
}

/// Parses a doctor's profile page.
///
/// The page is a run of up to four tables: identity, status, contact and registrations.
/// Each table that is present fills in its fields; the rest stay as seeded from `summary`.
pub fn parse_doctor_detail(html: &str, summary: &DoctorSummary) -> Result<DoctorRecord> {
    let sel = Selectors::new()?;
    let doc = Html::parse_document(html);
    let mut doctor = DoctorRecord::from_summary(summary);

    let tables: Vec<_> = doc.select(&sel.table).collect();
    let first_row = |idx: usize| tables.get(idx).and_then(|t| sel.rows(*t).next());

    if let Some(row) = first_row(0) {
        let cells = sel.cells(row);
        if cells.len() >= 3 {
            doctor.license_number = text_of(cells[0]);
            doctor.last_names = text_of(cells[1]);
            doctor.first_names = text_of(cells[2]);
        }
    }

    if let Some(row) = first_row(1) {
        doctor.status = text_of(row);
    }

    if let Some(row) = first_row(2) {
        let cells = sel.cells(row);
        if cells.len() >= 3 {
            if let Some(src) = row.select(&sel.image).next().and_then(|img| img.value().attr("src")) {
                doctor.photo_url = src.to_string();
            }
            doctor.contact_info = text_of(cells[1]);
            doctor.regional_council = text_of(cells[2]);
        }
    }

    if let Some(table) = tables.get(3) {
        doctor.registrations = sel
            .rows(*table)
            .map(|row| sel.cells(row))
            .filter(|cells| cells.len() >= 4)
            .map(|cells| Registration {
                specialty_label: text_of(cells[0]),
                registration_type: text_of(cells[1]),
                registration_code: text_of(cells[2]),
                registration_date: text_of(cells[3]),
            })
            .collect();
    }

    Ok(doctor)
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

/// Element text with every text node trimmed and glued back together.
fn text_of(el: ElementRef) -> String {
    el.text().map(str::trim).collect()
}

fn query_param(href: &str, name: &str) -> String {
    Url::parse(QUERY_BASE)
        .and_then(|base| base.join(href))
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or_default()
}
