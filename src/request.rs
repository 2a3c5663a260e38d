use std::future::Future;
use std::path::{Path, PathBuf};

use reqwest::Client;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::{FetchConfig, RetryPolicy, SourceMode};
use crate::{FetchError, Result};

/// Something that turns a locator into page content.
/// A failure is never fatal to the caller; it means "skip this item".
pub trait Fetch: Send + Sync + 'static {
    fn fetch(&self, locator: &str) -> impl Future<Output = core::result::Result<String, FetchError>> + Send;
}

/// The run's fetcher: network or saved pages, chosen once from [`SourceMode`].
#[derive(Debug, Clone)]
pub enum Fetcher {
    Remote(HttpFetcher),
    Local(LocalFetcher),
}

impl Fetcher {
    pub fn new(mode: &SourceMode, config: &FetchConfig) -> Result<Self> {
        Ok(match mode {
            SourceMode::Remote => Fetcher::Remote(HttpFetcher::new(config)?),
            SourceMode::Local { root } => Fetcher::Local(LocalFetcher::new(root)),
        })
    }
}

impl Fetch for Fetcher {
    async fn fetch(&self, locator: &str) -> core::result::Result<String, FetchError> {
        match self {
            Fetcher::Remote(http) => http.fetch(locator).await,
            Fetcher::Local(local) => local.fetch(locator).await,
        }
    }
}

/// HTTP GET with a bounded retry budget.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    // Client uses Arc so we can clone cheaply
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self {
            client,
            retry: config.retry.clone(),
        })
    }

    /// Requests a page once and returns its HTML.
    async fn request_page_html(&self, url: &str) -> core::result::Result<String, FetchError> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        let html = res.text().await.map_err(|e| FetchError::from_reqwest(url, e))?;
        debug!("Fetched {} characters from {url}", html.len());
        Ok(html)
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> core::result::Result<String, FetchError> {
        with_retries(&self.retry, url, |_| self.request_page_html(url)).await
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the policy's attempts run out.
/// Attempt numbers passed to `op` start at 1; the wait before attempt `n + 1` is `policy.delay_after(n)`.
pub async fn with_retries<F, Fut, T>(
    policy: &RetryPolicy,
    url: &str,
    mut op: F,
) -> core::result::Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = core::result::Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        debug!("Fetching (attempt {attempt}/{max_attempts}): {url}");
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_transient() {
            warn!("Not retrying {url}: {err}");
            return Err(err);
        }
        if attempt >= max_attempts {
            error!("Failed to fetch {url} after {max_attempts} attempts: {err}");
            return Err(FetchError::Exhausted {
                url: url.to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }
        let wait = policy.delay_after(attempt);
        warn!("{err} (attempt {attempt}/{max_attempts}), retrying in {wait:?}");
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

/// Reads saved pages from disk.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Tries the locator as a literal path, then its URL basename inside the root directory.
    pub fn resolve(&self, locator: &str) -> Option<PathBuf> {
        let literal = Path::new(locator);
        if literal.is_file() {
            return Some(literal.to_path_buf());
        }
        let basename = basename(locator)?;
        let candidate = self.root.join(basename);
        candidate.is_file().then_some(candidate)
    }
}

impl Fetch for LocalFetcher {
    async fn fetch(&self, locator: &str) -> core::result::Result<String, FetchError> {
        let Some(path) = self.resolve(locator) else {
            warn!("Local file not found: {locator}");
            return Err(FetchError::LocalMissing(locator.to_string()));
        };
        debug!("Reading local file: {}", path.display());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(source) => Err(FetchError::LocalRead { path, source }),
        }
    }
}

/// Last path segment of a URL (or plain path), without its query string.
fn basename(locator: &str) -> Option<String> {
    let path = match Url::parse(locator) {
        Ok(url) => url.path().to_string(),
        Err(_) => locator.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
