//! Version resolution against registry metadata.
//!
//! Resolution pins a package specifier to one concrete version and one
//! module URL. Pinned versions are memoized for the life of the resolver,
//! so two specifiers for the same package whose ranges both admit an
//! already pinned version reuse it without another metadata fetch. The
//! memo is append-only and multi-valued: non-overlapping ranges for the
//! same package pin independent versions side by side.

use crate::range::VersionRange;
use crate::registry::{MetadataClient, RegistryError};
use crate::specifier::{EntryPoint, PackageSpecifier};
use semver::Version;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use thiserror::Error;
use url::Url;

/// CDN serving resolved npm modules.
pub const NPM_CDN_ENDPOINT: &str = "https://esm.sh";

/// How many candidate versions an error message lists before eliding.
const MAX_LISTED_VERSIONS: usize = 10;

pub type ExportMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no version of {name} satisfies {range} (available: {available})")]
    NoMatchingVersion {
        name: String,
        range: String,
        available: String,
    },

    #[error("package {name}@{version} has no entry point {entry} (available: {available})")]
    NoSuchEntryPoint {
        name: String,
        version: Version,
        entry: String,
        available: String,
    },

    #[error("cannot build module URL for {name}@{version}")]
    BadModuleUrl { name: String, version: Version },
}

/// The outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub name: String,
    pub version: Version,
    pub url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryKind {
    Npm,
    Jsr,
}

/// One pinned package: everything needed to build entry-point URLs without
/// consulting the registry again.
#[derive(Debug, Clone)]
struct PinnedPackage {
    registry: RegistryKind,
    name: String,
    version: Version,
    exports: ExportMap,
}

/// Append-only memo of pinned versions.
#[derive(Debug, Default)]
struct ResolvedVersions {
    entries: Mutex<Vec<PinnedPackage>>,
}

impl ResolvedVersions {
    fn find(&self, registry: RegistryKind, name: &str, range: &VersionRange) -> Option<PinnedPackage> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.registry == registry && p.name == name && range.matches(&p.version))
            .cloned()
    }

    fn record(&self, pinned: PinnedPackage) {
        self.entries.lock().unwrap().push(pinned);
    }
}

/// Resolves package specifiers to pinned module URLs.
pub struct VersionResolver {
    metadata: MetadataClient,
    resolved: ResolvedVersions,
}

impl VersionResolver {
    pub fn new(metadata: MetadataClient) -> Self {
        Self {
            metadata,
            resolved: ResolvedVersions::default(),
        }
    }

    pub async fn resolve_npm(
        &self,
        spec: &PackageSpecifier,
    ) -> Result<ResolvedModule, ResolveError> {
        let pinned = match self.resolved.find(RegistryKind::Npm, &spec.name, &spec.range) {
            Some(pinned) => pinned,
            None => {
                let pinned = self.pin_npm(spec).await?;
                self.resolved.record(pinned.clone());
                pinned
            }
        };
        self.npm_module(&pinned, &spec.entry_point)
    }

    pub async fn resolve_jsr(
        &self,
        spec: &PackageSpecifier,
    ) -> Result<ResolvedModule, ResolveError> {
        let pinned = match self.resolved.find(RegistryKind::Jsr, &spec.name, &spec.range) {
            Some(pinned) => pinned,
            None => {
                let pinned = self.pin_jsr(spec).await?;
                self.resolved.record(pinned.clone());
                pinned
            }
        };
        self.jsr_module(&pinned, &spec.entry_point)
    }

    async fn pin_npm(&self, spec: &PackageSpecifier) -> Result<PinnedPackage, ResolveError> {
        let meta = self.metadata.npm_package(&spec.name).await?;

        // dist-tags are carried in the metadata but never steer resolution;
        // an opaque tag has already degraded to the wildcard range
        let mut candidates: Vec<Version> = meta
            .versions
            .keys()
            .filter_map(|v| Version::parse(v).ok())
            .collect();
        candidates.sort();

        let version = spec.range.max_satisfying(&candidates).cloned().ok_or_else(|| {
            ResolveError::NoMatchingVersion {
                name: spec.name.clone(),
                range: spec.range.to_string(),
                available: format_available(&candidates),
            }
        })?;

        let exports = meta
            .versions
            .get(&version.to_string())
            .and_then(|v| v.exports.as_ref())
            .map(identity_exports)
            .unwrap_or_else(|| identity_exports(&serde_json::Value::Null));

        Ok(PinnedPackage {
            registry: RegistryKind::Npm,
            name: spec.name.clone(),
            version,
            exports,
        })
    }

    async fn pin_jsr(&self, spec: &PackageSpecifier) -> Result<PinnedPackage, ResolveError> {
        let meta = self.metadata.jsr_package(&spec.name).await?;

        // yank flags and the latest marker are carried in the metadata but
        // never steer resolution
        let mut candidates: Vec<Version> = meta
            .versions
            .keys()
            .filter_map(|v| Version::parse(v).ok())
            .collect();
        candidates.sort();

        let version = spec.range.max_satisfying(&candidates).cloned().ok_or_else(|| {
            ResolveError::NoMatchingVersion {
                name: spec.name.clone(),
                range: spec.range.to_string(),
                available: format_available(&candidates),
            }
        })?;

        let version_meta = self.metadata.jsr_version(&spec.name, &version).await?;

        Ok(PinnedPackage {
            registry: RegistryKind::Jsr,
            name: spec.name.clone(),
            version,
            exports: version_meta.exports,
        })
    }

    fn npm_module(
        &self,
        pinned: &PinnedPackage,
        entry: &EntryPoint,
    ) -> Result<ResolvedModule, ResolveError> {
        let export = self.lookup_export(pinned, entry)?;
        let base = format!(
            "{NPM_CDN_ENDPOINT}/{}@{}/",
            pinned.name, pinned.version
        );
        let url = join_module_url(&base, &export, pinned)?;
        Ok(ResolvedModule {
            name: pinned.name.clone(),
            version: pinned.version.clone(),
            url,
        })
    }

    fn jsr_module(
        &self,
        pinned: &PinnedPackage,
        entry: &EntryPoint,
    ) -> Result<ResolvedModule, ResolveError> {
        let export = self.lookup_export(pinned, entry)?;
        let base = format!(
            "{}/{}/{}/",
            self.metadata.jsr_endpoint(),
            pinned.name,
            pinned.version
        );
        let url = join_module_url(&base, &export, pinned)?;
        Ok(ResolvedModule {
            name: pinned.name.clone(),
            version: pinned.version.clone(),
            url,
        })
    }

    fn lookup_export(
        &self,
        pinned: &PinnedPackage,
        entry: &EntryPoint,
    ) -> Result<String, ResolveError> {
        pinned
            .exports
            .get(entry.as_export_key())
            .cloned()
            .ok_or_else(|| ResolveError::NoSuchEntryPoint {
                name: pinned.name.clone(),
                version: pinned.version.clone(),
                entry: entry.to_string(),
                available: pinned
                    .exports
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

fn join_module_url(
    base: &str,
    export: &str,
    pinned: &PinnedPackage,
) -> Result<Url, ResolveError> {
    let bad = || ResolveError::BadModuleUrl {
        name: pinned.name.clone(),
        version: pinned.version.clone(),
    };
    let base = Url::parse(base).map_err(|_| bad())?;
    base.join(export).map_err(|_| bad())
}

/// Synthesize an export map from an npm `exports` field. Only the keys
/// matter here; the CDN performs the actual file mapping, so every declared
/// key maps to itself. A missing or non-object field exposes the bare root.
fn identity_exports(exports: &serde_json::Value) -> ExportMap {
    match exports.as_object() {
        Some(map) => map.keys().map(|k| (k.clone(), k.clone())).collect(),
        None => ExportMap::from([(".".to_string(), ".".to_string())]),
    }
}

/// List candidate versions newest first, eliding past the first ten.
fn format_available(candidates: &[Version]) -> String {
    if candidates.is_empty() {
        return "none".to_string();
    }
    let mut out = String::new();
    for (i, version) in candidates.iter().rev().enumerate() {
        if i == MAX_LISTED_VERSIONS {
            let remaining = candidates.len() - MAX_LISTED_VERSIONS;
            let _ = write!(out, " ... ({remaining} more versions)");
            break;
        }
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{version}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, RemoteResponse, RobustFetch};
    use crate::specifier::parse_npm_specifier;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves canned documents by URL and counts every request.
    struct ScriptedFetch {
        docs: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl ScriptedFetch {
        fn new<const N: usize>(docs: [(&str, &str); N]) -> Arc<Self> {
            Arc::new(Self {
                docs: docs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RobustFetch for ScriptedFetch {
        async fn fetch(
            &self,
            url: &Url,
            _cache_first: bool,
        ) -> Result<RemoteResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self.docs.get(url.as_str()).ok_or_else(|| FetchError::Http {
                url: url.clone(),
                status: 404,
                status_text: "Not Found".to_string(),
            })?;
            Ok(RemoteResponse {
                url: url.clone(),
                status: 200,
                content_type: Some("application/json".to_string()),
                body: Bytes::from(body.clone()),
                from_cache: false,
            })
        }
    }

    const LEFT_PAD: &str = r#"{
        "name": "left-pad",
        "dist-tags": {"latest": "1.3.0"},
        "versions": {"1.0.0": {}, "1.2.0": {}, "1.3.0": {}}
    }"#;

    fn npm_resolver(fetch: Arc<ScriptedFetch>) -> VersionResolver {
        VersionResolver::new(MetadataClient::with_endpoints(
            fetch,
            "https://registry.example",
            "https://jsr.example",
        ))
    }

    fn npm_spec(s: &str) -> PackageSpecifier {
        parse_npm_specifier(&Url::parse(s).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_npm_caret_range_pins_highest() {
        let fetch = ScriptedFetch::new([("https://registry.example/left-pad", LEFT_PAD)]);
        let resolver = npm_resolver(fetch);
        let module = resolver.resolve_npm(&npm_spec("npm:left-pad@^1.0.0")).await.unwrap();
        assert_eq!(module.version, Version::new(1, 3, 0));
        assert_eq!(module.url.as_str(), "https://esm.sh/left-pad@1.3.0/");
    }

    #[tokio::test]
    async fn test_memoized_resolution_fetches_metadata_once() {
        let fetch = ScriptedFetch::new([("https://registry.example/left-pad", LEFT_PAD)]);
        let resolver = npm_resolver(Arc::clone(&fetch));
        let a = resolver.resolve_npm(&npm_spec("npm:left-pad@^1.0.0")).await.unwrap();
        let b = resolver.resolve_npm(&npm_spec("npm:left-pad@~1.3.0")).await.unwrap();
        assert_eq!(a.url, b.url);
        assert_eq!(fetch.calls(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_ranges_pin_independently() {
        let fetch = ScriptedFetch::new([("https://registry.example/left-pad", LEFT_PAD)]);
        let resolver = npm_resolver(Arc::clone(&fetch));
        let new = resolver.resolve_npm(&npm_spec("npm:left-pad@^1.2.0")).await.unwrap();
        let old = resolver.resolve_npm(&npm_spec("npm:left-pad@1.0.0")).await.unwrap();
        assert_eq!(new.version, Version::new(1, 3, 0));
        assert_eq!(old.version, Version::new(1, 0, 0));
        assert_eq!(fetch.calls(), 2);
    }

    #[tokio::test]
    async fn test_exact_version_resolves_exactly() {
        let fetch = ScriptedFetch::new([("https://registry.example/left-pad", LEFT_PAD)]);
        let resolver = npm_resolver(fetch);
        let module = resolver.resolve_npm(&npm_spec("npm:left-pad@1.0.0")).await.unwrap();
        assert_eq!(module.version, Version::new(1, 0, 0));
    }

    #[tokio::test]
    async fn test_dist_tags_never_steer_resolution() {
        // the latest tag points below the maximum; resolution ignores it
        const STALE_TAG: &str = r#"{
            "name": "left-pad",
            "dist-tags": {"latest": "1.2.0"},
            "versions": {"1.0.0": {}, "1.2.0": {}, "1.3.0": {}}
        }"#;
        let fetch = ScriptedFetch::new([("https://registry.example/left-pad", STALE_TAG)]);
        let resolver = npm_resolver(fetch);
        let module = resolver.resolve_npm(&npm_spec("npm:left-pad@latest")).await.unwrap();
        assert_eq!(module.version, Version::new(1, 3, 0));
    }

    #[tokio::test]
    async fn test_no_matching_version_lists_candidates() {
        let fetch = ScriptedFetch::new([("https://registry.example/left-pad", LEFT_PAD)]);
        let resolver = npm_resolver(fetch);
        let err = resolver.resolve_npm(&npm_spec("npm:left-pad@^2.0.0")).await.unwrap_err();
        match err {
            ResolveError::NoMatchingVersion { available, .. } => {
                assert!(available.contains("1.3.0"));
                assert!(available.contains("1.0.0"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_jsr_resolution_maps_exports() {
        let fetch = ScriptedFetch::new([
            (
                "https://jsr.example/@std/path/meta.json",
                r#"{"scope": "std", "name": "path", "latest": "1.0.8",
                   "versions": {"1.0.8": {"yanked": true}, "1.0.7": {}}}"#,
            ),
            (
                "https://jsr.example/@std/path/1.0.8_meta.json",
                r#"{"exports": {".": "./mod.ts", "./posix": "./posix/mod.ts"}}"#,
            ),
        ]);
        let resolver = npm_resolver(fetch);
        let spec = crate::specifier::parse_jsr_specifier(
            &Url::parse("jsr:@std/path@^1.0.0/posix").unwrap(),
        )
        .unwrap();
        let module = resolver.resolve_jsr(&spec).await.unwrap();
        // the yank flag is informational; 1.0.8 still wins
        assert_eq!(module.version, Version::new(1, 0, 8));
        assert_eq!(
            module.url.as_str(),
            "https://jsr.example/@std/path/1.0.8/posix/mod.ts"
        );
    }

    #[tokio::test]
    async fn test_missing_entry_point_is_typed() {
        let fetch = ScriptedFetch::new([
            (
                "https://jsr.example/@std/path/meta.json",
                r#"{"scope": "std", "name": "path", "versions": {"1.0.7": {}}}"#,
            ),
            (
                "https://jsr.example/@std/path/1.0.7_meta.json",
                r#"{"exports": {".": "./mod.ts"}}"#,
            ),
        ]);
        let resolver = npm_resolver(fetch);
        let spec = crate::specifier::parse_jsr_specifier(
            &Url::parse("jsr:@std/path@^1.0.0/windows").unwrap(),
        )
        .unwrap();
        let err = resolver.resolve_jsr(&spec).await.unwrap_err();
        match err {
            ResolveError::NoSuchEntryPoint { available, .. } => {
                assert!(available.contains('.'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_conditional_only_exports_reject_the_root() {
        const CONDITIONAL: &str = r#"{
            "name": "cond",
            "dist-tags": {},
            "versions": {"1.0.0": {"exports": {"import": "./esm.js", "require": "./cjs.js"}}}
        }"#;
        let fetch = ScriptedFetch::new([("https://registry.example/cond", CONDITIONAL)]);
        let resolver = npm_resolver(fetch);
        let err = resolver.resolve_npm(&npm_spec("npm:cond")).await.unwrap_err();
        match err {
            ResolveError::NoSuchEntryPoint { available, .. } => {
                assert!(available.contains("import"));
                assert!(available.contains("require"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_available_versions_are_elided_past_ten() {
        let candidates: Vec<Version> =
            (0..14).map(|minor| Version::new(1, minor, 0)).collect();
        let listed = format_available(&candidates);
        assert!(listed.starts_with("1.13.0, 1.12.0"));
        assert!(listed.ends_with("... (4 more versions)"));
        assert!(!listed.contains("1.3.0,"));
    }

    #[test]
    fn test_identity_exports_keep_every_declared_key() {
        let map = identity_exports(&serde_json::json!({"import": "./esm.js"}));
        assert_eq!(map.get("import"), Some(&"import".to_string()));
        assert_eq!(map.get("."), None);
        let map = identity_exports(&serde_json::json!({".": "./x.js", "./y": "./y.js"}));
        assert_eq!(map.get("./y"), Some(&"./y".to_string()));
        // packages without an exports field expose the bare root
        let map = identity_exports(&serde_json::Value::Null);
        assert_eq!(map.get("."), Some(&".".to_string()));
    }
}
