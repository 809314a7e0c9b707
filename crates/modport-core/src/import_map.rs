//! A small import-map implementation: top-level `imports`, `scopes`, exact
//! and trailing-slash prefix matching. Entries that fail to resolve against
//! the base URL are dropped rather than failing the whole map.

use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// The JSON shape of an import map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
    #[serde(default)]
    pub scopes: BTreeMap<String, BTreeMap<String, String>>,
}

impl ImportMap {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Resolve all addresses against `base`, producing a lookup-ready map.
    #[must_use]
    pub fn resolve(&self, base: &Url) -> ResolvedImportMap {
        let mut scopes: Vec<(String, SpecifierMap)> = self
            .scopes
            .iter()
            .filter_map(|(prefix, entries)| {
                let scope = base.join(prefix).ok()?;
                Some((scope.as_str().to_string(), resolve_entries(entries, base)))
            })
            .collect();
        // most specific scope first
        scopes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

        ResolvedImportMap {
            imports: resolve_entries(&self.imports, base),
            scopes,
        }
    }
}

/// Entries sorted longest key first, so prefix lookups find the most
/// specific mapping.
type SpecifierMap = Vec<(String, Url)>;

fn resolve_entries(entries: &BTreeMap<String, String>, base: &Url) -> SpecifierMap {
    let mut out: SpecifierMap = entries
        .iter()
        .filter_map(|(key, address)| {
            if key.is_empty() {
                return None;
            }
            // a key ending in '/' must map to an address ending in '/'
            if key.ends_with('/') && !address.ends_with('/') {
                return None;
            }
            let address = Url::parse(address).or_else(|_| base.join(address)).ok()?;
            Some((key.clone(), address))
        })
        .collect();
    out.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
    out
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedImportMap {
    imports: SpecifierMap,
    scopes: Vec<(String, SpecifierMap)>,
}

impl ResolvedImportMap {
    /// Map `specifier` through the import map. Scope entries for the
    /// referrer take precedence over top-level imports.
    #[must_use]
    pub fn lookup(&self, specifier: &str, referrer: Option<&Url>) -> Option<Url> {
        if let Some(referrer) = referrer {
            for (scope, entries) in &self.scopes {
                if referrer.as_str().starts_with(scope.as_str()) {
                    if let Some(url) = lookup_in(entries, specifier) {
                        return Some(url);
                    }
                }
            }
        }
        lookup_in(&self.imports, specifier)
    }
}

fn lookup_in(entries: &SpecifierMap, specifier: &str) -> Option<Url> {
    for (key, address) in entries {
        if key == specifier {
            return Some(address.clone());
        }
        if key.ends_with('/') {
            if let Some(rest) = specifier.strip_prefix(key.as_str()) {
                if let Ok(url) = address.join(rest) {
                    return Some(url);
                }
            }
        }
    }
    None
}
