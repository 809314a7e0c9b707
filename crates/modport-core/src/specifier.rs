//! `npm:`/`jsr:` specifier parsing.
//!
//! Parses protocol-qualified package references like:
//! - `npm:left-pad`
//! - `npm:left-pad@^1.0.0`
//! - `npm:@scope/pkg@~2.1/deep/entry`
//! - `jsr:@std/path@1/posix`
//!
//! The version tag is optional; a tag that is not a parseable semver range
//! (an opaque dist-tag, or syntax from the future) degrades to the wildcard
//! range instead of failing the parse, so it cannot block a build.

use crate::range::VersionRange;
use std::fmt;
use thiserror::Error;
use url::Url;

/// The subpath within a package being requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// The package root, `.`.
    Root,
    /// A subpath, stored in `./<subpath>` form.
    Sub(String),
}

impl EntryPoint {
    /// The key this entry point has in a package export map.
    #[must_use]
    pub fn as_export_key(&self) -> &str {
        match self {
            Self::Root => ".",
            Self::Sub(path) => path,
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_export_key())
    }
}

/// A parsed package specifier, common to both registries.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageSpecifier {
    /// Full package name, including the scope when present.
    pub name: String,
    /// The version constraint derived from the tag.
    pub range: VersionRange,
    /// The raw version tag as written, if any.
    pub tag: Option<String>,
    /// The requested entry point.
    pub entry_point: EntryPoint,
}

/// Specifier parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecifierError {
    #[error("not an npm: specifier: {specifier}")]
    NotNpmProtocol { specifier: Url },

    #[error("not a jsr: specifier: {specifier}")]
    NotJsrProtocol { specifier: Url },

    /// npm only: a scope with no package segment, e.g. `npm:@types`.
    #[error("only a scope was provided in {specifier}")]
    OnlyScopeProvided { specifier: Url },

    #[error("no package name in {specifier}")]
    PackageNotFound { specifier: Url },

    /// JSR only: every JSR package lives under a scope.
    #[error("jsr packages must start with a scope: {specifier}")]
    ScopeNotFound { specifier: Url },
}

/// Parse an `npm:` specifier URL.
///
/// The name spans up to the version tag (`@`) or the entry subpath (`/`),
/// whichever comes first; a scoped name consumes its first `@` and `/`.
pub fn parse_npm_specifier(specifier: &Url) -> Result<PackageSpecifier, SpecifierError> {
    if specifier.scheme() != "npm" {
        return Err(SpecifierError::NotNpmProtocol {
            specifier: specifier.clone(),
        });
    }
    let path = specifier.path();
    let start = usize::from(path.starts_with('/'));

    let (path_start, version_start) = if path[start..].starts_with('@') {
        let Some(first_slash) = find_from(path, '/', start) else {
            return Err(SpecifierError::OnlyScopeProvided {
                specifier: specifier.clone(),
            });
        };
        (
            find_from(path, '/', first_slash + 1),
            find_from(path, '@', first_slash + 1),
        )
    } else {
        (find_from(path, '/', start), find_from(path, '@', start))
    };

    split_specifier(specifier, path, start, path_start, version_start)
}

/// Parse a `jsr:` specifier URL. Identical shape to npm, but the name must
/// carry a scope.
pub fn parse_jsr_specifier(specifier: &Url) -> Result<PackageSpecifier, SpecifierError> {
    if specifier.scheme() != "jsr" {
        return Err(SpecifierError::NotJsrProtocol {
            specifier: specifier.clone(),
        });
    }
    let path = specifier.path();
    let start = usize::from(path.starts_with('/'));

    if !path[start..].starts_with('@') {
        return Err(SpecifierError::ScopeNotFound {
            specifier: specifier.clone(),
        });
    }
    let Some(first_slash) = find_from(path, '/', start) else {
        return Err(SpecifierError::PackageNotFound {
            specifier: specifier.clone(),
        });
    };
    let path_start = find_from(path, '/', first_slash + 1);
    let version_start = find_from(path, '@', first_slash + 1);

    split_specifier(specifier, path, start, path_start, version_start)
}

/// Shared tail of both parsers: carve the name, tag, and entry point out of
/// the path once the candidate split points are known.
fn split_specifier(
    specifier: &Url,
    path: &str,
    start: usize,
    path_start: Option<usize>,
    version_start: Option<usize>,
) -> Result<PackageSpecifier, SpecifierError> {
    let path_start = path_start.unwrap_or(path.len());
    let version_start = version_start.unwrap_or(path.len()).min(path_start);

    if start == version_start {
        return Err(SpecifierError::PackageNotFound {
            specifier: specifier.clone(),
        });
    }

    let name = &path[start..version_start];
    let tag = if version_start < path_start {
        &path[version_start + 1..path_start]
    } else {
        ""
    };
    let range = if tag.is_empty() {
        VersionRange::any()
    } else {
        VersionRange::parse(tag).unwrap_or_else(VersionRange::any)
    };
    let rest = if path_start < path.len() {
        &path[path_start + 1..]
    } else {
        ""
    };
    let entry_point = if rest.is_empty() {
        EntryPoint::Root
    } else {
        EntryPoint::Sub(format!("./{rest}"))
    };

    Ok(PackageSpecifier {
        name: name.to_string(),
        range,
        tag: (!tag.is_empty()).then(|| tag.to_string()),
        entry_point,
    })
}

fn find_from(haystack: &str, needle: char, from: usize) -> Option<usize> {
    haystack[from..].find(needle).map(|i| i + from)
}
