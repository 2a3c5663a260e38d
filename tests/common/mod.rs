#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cmp_scrap::config::StoreConfig;
use cmp_scrap::{CrawlConfig, Fetch, FetchError, StopSignal};

pub const BASE: &str = "http://cmp.test/conoce/";

pub fn landing_url() -> String {
    format!("{BASE}lista-especialidad.php?key=17")
}

pub fn specialty_url(id: &str) -> String {
    format!("{BASE}lista-medicos-especialidad.php?id={id}&key=17")
}

pub fn detail_url(license: &str) -> String {
    format!("{BASE}datos-colegiado.php?id={license}")
}

pub fn landing(specialties: &[(&str, &str)]) -> String {
    let rows: String = specialties
        .iter()
        .map(|(id, name)| {
            format!(
                r#"<tr class="cabecera_tr2"><td><a href="lista-medicos-especialidad.php?id={id}&key=17">Ver</a></td><td>{name}</td></tr>"#
            )
        })
        .collect();
    format!("<html><body><table>{rows}</table></body></html>")
}

/// `doctors` are (license, paternal, maternal, names).
pub fn listing(label: &str, doctors: &[(&str, &str, &str, &str)]) -> String {
    let rows: String = doctors
        .iter()
        .map(|(license, paternal, maternal, names)| {
            format!(
                r#"<tr class="cabecera_tr2"><td><a href="datos-colegiado.php?id={license}">Ver</a></td><td>{license}</td><td>{paternal}</td><td>{maternal}</td><td>{names}</td></tr>"#
            )
        })
        .collect();
    format!("<html><body><p>Registro: {label}</p><table>{rows}</table></body></html>")
}

pub fn detail(license: &str, names: &str, status: &str, registrations: &[&str]) -> String {
    let regs: String = registrations
        .iter()
        .enumerate()
        .map(|(i, label)| {
            format!(
                r#"<tr class="cabecera_tr2"><td>{label}</td><td>ESPECIALIDAD</td><td>{license}-{i}</td><td>01/02/2015</td></tr>"#
            )
        })
        .collect();
    format!(
        r#"<html><body>
        <table><tr class="cabecera_tr2"><td>{license}</td><td>APELLIDO {license}</td><td>{names}</td></tr></table>
        <table><tr class="cabecera_tr2"><td>{status}</td></tr></table>
        <table><tr class="cabecera_tr2"><td><img src="fotos/{license}.jpg"></td><td>{license}@mail.pe</td><td>CONSEJO REGIONAL III - LIMA</td></tr></table>
        <table>{regs}</table>
        </body></html>"#
    )
}

/// An in-memory directory site. Unknown locators answer 404.
#[derive(Debug, Default, Clone)]
pub struct StubSite {
    pages: HashMap<String, String>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    jitter: bool,
    panic_on: Option<String>,
    stop_on: Option<(String, StopSignal)>,
}

impl StubSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    /// Staggers responses a little so concurrent completions come back out of order.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Fetching `url` panics, like a bug deep inside one doctor's pipeline.
    pub fn with_panic_on(mut self, url: impl Into<String>) -> Self {
        self.panic_on = Some(url.into());
        self
    }

    /// Fetching `url` raises `stop`, like an operator interrupt mid-batch.
    pub fn with_stop_on(mut self, url: impl Into<String>, stop: StopSignal) -> Self {
        self.stop_on = Some((url.into(), stop));
        self
    }

    pub fn hit_counter(&self) -> Arc<Mutex<HashMap<String, usize>>> {
        self.hits.clone()
    }
}

impl Fetch for StubSite {
    async fn fetch(&self, locator: &str) -> Result<String, FetchError> {
        {
            let mut hits = self.hits.lock().unwrap();
            *hits.entry(locator.to_string()).or_default() += 1;
        }
        if self.panic_on.as_deref() == Some(locator) {
            panic!("stub site blew up on {locator}");
        }
        if let Some((url, stop)) = &self.stop_on {
            if url == locator {
                stop.stop();
            }
        }
        if self.jitter {
            let millis = locator.bytes().map(u64::from).sum::<u64>() % 5;
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        self.pages.get(locator).cloned().ok_or_else(|| FetchError::Status {
            url: locator.to_string(),
            status: 404,
        })
    }
}

pub fn store_config(dir: &Path, flush_threshold: usize) -> StoreConfig {
    StoreConfig {
        csv_path: dir.join("doctors.csv"),
        json_path: Some(dir.join("doctors.json")),
        flush_threshold,
    }
}

pub fn test_config(dir: &Path, workers: usize) -> CrawlConfig {
    let mut config = CrawlConfig::new(BASE).unwrap();
    config.delay = Duration::ZERO;
    config.workers = workers;
    config.store = store_config(dir, 3);
    config.fetch.retry.base_delay = Duration::from_millis(1);
    config
}
