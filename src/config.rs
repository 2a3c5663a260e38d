use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::Result;

pub const DEFAULT_BASE_URL: &str = "https://aplicaciones.cmp.org.pe/conoce_a_tu_medico/";
/// Landing page path, relative to the base URL.
pub const SPECIALTIES_PATH: &str = "lista-especialidad.php?key=17";
/// Landing page file name when reading saved pages from disk.
pub const LOCAL_LANDING_FILE: &str = "cmp.html";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Where page content comes from. Picked once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMode {
    Remote,
    /// Saved pages on disk. Locators fall back to their basename inside `root`.
    Local { root: PathBuf },
}

impl SourceMode {
    pub fn is_local(&self) -> bool {
        matches!(self, SourceMode::Local { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait before the attempt following `attempt` (1-based): grows linearly.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// The directory's certificate chain doesn't validate, so this defaults to on.
    pub accept_invalid_certs: bool,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            accept_invalid_certs: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Tabular store, always written.
    pub csv_path: PathBuf,
    /// Structured store, written only when set.
    pub json_path: Option<PathBuf>,
    /// Buffered records that trigger a flush.
    pub flush_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("doctors_data.csv"),
            json_path: None,
            flush_threshold: 30,
        }
    }
}

/// Which slice of the specialty list a run covers.
/// `index` wins over `start`/`max` when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialtySelection {
    pub index: Option<usize>,
    pub start: usize,
    pub max: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    /// Skip license numbers already handled earlier in this run.
    pub enabled: bool,
    /// Also skip license numbers already present in the loaded store.
    pub seed_from_existing: bool,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            seed_from_existing: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub mode: SourceMode,
    pub base_url: Url,
    /// Overrides the landing page locator.
    pub landing: Option<String>,
    pub selection: SpecialtySelection,
    /// Politeness delay between page requests. Ignored for local pages.
    pub delay: Duration,
    pub workers: usize,
    pub dedup: DedupPolicy,
    pub fetch: FetchConfig,
    pub store: StoreConfig,
}

impl CrawlConfig {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            mode: SourceMode::Remote,
            base_url: Url::parse(base_url)?,
            landing: None,
            selection: SpecialtySelection::default(),
            delay: Duration::from_secs(1),
            workers: 3,
            dedup: DedupPolicy::default(),
            fetch: FetchConfig::default(),
            store: StoreConfig::default(),
        })
    }

    /// Locator of the specialty landing page for the configured mode.
    pub fn landing_locator(&self) -> Result<String> {
        if let Some(landing) = &self.landing {
            return Ok(landing.clone());
        }
        Ok(match self.mode {
            SourceMode::Remote => self.base_url.join(SPECIALTIES_PATH)?.to_string(),
            SourceMode::Local { .. } => LOCAL_LANDING_FILE.to_string(),
        })
    }

    /// Resolves a link found on a page against the base URL.
    pub fn resolve(&self, href: &str) -> Result<String> {
        Ok(self.base_url.join(href)?.to_string())
    }

    /// Delay to insert between requests; zero when reading from disk.
    pub fn politeness_delay(&self) -> Duration {
        if self.mode.is_local() {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// Doctor details are fetched one at a time with a delay in between.
    pub fn is_sequential(&self) -> bool {
        self.workers <= 1 || self.mode.is_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_never_shrink() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
        };
        let delays: Vec<_> = (1..policy.max_attempts).map(|a| policy.delay_after(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[0], Duration::from_millis(250));
        assert_eq!(delays[2], Duration::from_millis(750));
    }

    #[test]
    fn landing_locator_follows_mode() {
        let mut config = CrawlConfig::new(DEFAULT_BASE_URL).unwrap();
        assert_eq!(
            config.landing_locator().unwrap(),
            "https://aplicaciones.cmp.org.pe/conoce_a_tu_medico/lista-especialidad.php?key=17"
        );
        config.mode = SourceMode::Local { root: ".".into() };
        assert_eq!(config.landing_locator().unwrap(), LOCAL_LANDING_FILE);
        assert!(config.is_sequential());
        assert_eq!(config.politeness_delay(), Duration::ZERO);
    }

    #[test]
    fn relative_links_join_base() {
        let config = CrawlConfig::new(DEFAULT_BASE_URL).unwrap();
        assert_eq!(
            config.resolve("datos-colegiado.php?id=1").unwrap(),
            "https://aplicaciones.cmp.org.pe/conoce_a_tu_medico/datos-colegiado.php?id=1"
        );
    }
}
