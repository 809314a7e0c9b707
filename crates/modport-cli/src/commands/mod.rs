pub mod fetch;
pub mod resolve;

use miette::{miette, IntoDiagnostic, Result};
use modport_core::registry::MetadataClient;
use modport_core::{DirectHosts, DiskResponseCache, HttpFetcher, ResponseCache, RobustFetch, VersionResolver};
use std::path::PathBuf;
use std::sync::Arc;

/// Where the response cache lives, from the global CLI flags.
pub struct CacheLocation {
    pub dir: Option<PathBuf>,
    pub disabled: bool,
}

impl CacheLocation {
    fn store(&self) -> Option<Arc<dyn ResponseCache>> {
        if self.disabled {
            return None;
        }
        let dir = self
            .dir
            .clone()
            .or_else(|| dirs_next::cache_dir().map(|d| d.join("modport").join("responses")))?;
        Some(Arc::new(DiskResponseCache::new(dir)))
    }
}

pub fn fetcher(store: &CacheLocation) -> Result<Arc<dyn RobustFetch>> {
    let fetcher = HttpFetcher::new(store.store(), DirectHosts::default()).into_diagnostic()?;
    Ok(Arc::new(fetcher))
}

pub fn resolver(fetcher: Arc<dyn RobustFetch>, cache_first: bool) -> VersionResolver {
    VersionResolver::new(MetadataClient::new(fetcher).cache_first(cache_first))
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().into_diagnostic()
}

pub fn parse_specifier_url(specifier: &str) -> Result<url::Url> {
    url::Url::parse(specifier).map_err(|e| miette!("invalid specifier {specifier}: {e}"))
}
