//! Semver range arithmetic.
//!
//! npm-style ranges are a disjunction of conjunctions: `^1.0.0 || >=2.1.0 <3.0.0`
//! matches a version when at least one alternative matches. The `semver` crate
//! models a single conjunction (`VersionReq`); the disjunction layer lives here,
//! along with normalization for npm syntax the crate does not accept directly
//! (hyphen ranges, space-separated comparators).

use semver::{Version, VersionReq};
use std::fmt;

/// A parsed version range: one or more alternatives, any of which may match.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRange {
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// The wildcard range, matching every version.
    #[must_use]
    pub fn any() -> Self {
        Self {
            alternatives: vec![VersionReq::STAR],
        }
    }

    /// Parse an npm-style range string.
    ///
    /// Alternatives are separated by `||`; invalid alternatives are skipped.
    /// Returns `None` when nothing parses, so callers can decide how an
    /// opaque tag (e.g. `latest`) degrades.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let mut alternatives = Vec::new();
        for alt in input.split("||") {
            let alt = alt.trim();
            if alt.is_empty() {
                continue;
            }
            if let Ok(req) = parse_conjunction(alt) {
                alternatives.push(req);
            }
        }
        if alternatives.is_empty() {
            None
        } else {
            Some(Self { alternatives })
        }
    }

    /// Whether `version` satisfies at least one alternative.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// The highest version among `versions` that satisfies this range.
    pub fn max_satisfying<'a, I>(&self, versions: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions.into_iter().filter(|v| self.matches(v)).max()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.alternatives.iter().enumerate() {
            if i > 0 {
                f.write_str(" || ")?;
            }
            write!(f, "{req}")?;
        }
        Ok(())
    }
}

/// Parse one `||` alternative, normalizing npm syntax first.
fn parse_conjunction(alt: &str) -> Result<VersionReq, semver::Error> {
    if let Some((start, end)) = split_hyphen_range(alt) {
        return VersionReq::parse(&format!(">={start}, <={end}"));
    }
    VersionReq::parse(&join_comparators(alt))
}

/// Split a hyphen range like `1.0.0 - 2.0.0` into its bounds.
fn split_hyphen_range(alt: &str) -> Option<(&str, &str)> {
    let (start, end) = alt.split_once(" - ")?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() {
        return None;
    }
    Some((start, end))
}

/// npm allows `>= 2.1.2 < 3.0.0` with spaces meaning AND; the semver crate
/// wants `>=2.1.2, <3.0.0`. Reattach dangling operators to the version that
/// follows them, then join comparators with commas.
fn join_comparators(alt: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for token in alt.split_whitespace() {
        let dangling_op = out
            .last()
            .is_some_and(|prev| !prev.chars().any(has_version_char));
        if dangling_op {
            if let Some(prev) = out.last_mut() {
                prev.push_str(token);
                continue;
            }
        }
        out.push(token.to_string());
    }
    let pinned: Vec<String> = out.iter().map(|c| pin_bare(c)).collect();
    pinned.join(", ")
}

/// npm reads a bare `1.2.3` as exactly that version and a bare `1.2` as
/// `1.2.x`, while `VersionReq` treats both as caret requirements. Make the
/// operator explicit before the crate parses it.
fn pin_bare(comparator: &str) -> String {
    let starts_numeric = comparator
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit());
    if !starts_numeric {
        return comparator.to_string();
    }
    let numeric = comparator
        .split_once(['-', '+'])
        .map_or(comparator, |(head, _)| head);
    if numeric
        .split('.')
        .any(|part| matches!(part, "x" | "X" | "*"))
    {
        return comparator.to_string();
    }
    if numeric.split('.').count() >= 3 {
        format!("={comparator}")
    } else {
        format!("{comparator}.*")
    }
}

fn has_version_char(c: char) -> bool {
    c.is_ascii_digit() || c == '*' || c == 'x' || c == 'X'
}
