//! Locating and inlining `sourceMappingURL` comments.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex_lite::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// A `sourceMappingURL` reference found in module source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapRef {
    /// The URL text as written, possibly relative.
    pub url: String,
    /// Byte span of the URL text, for rewriting in place.
    span: Range<usize>,
}

fn line_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[^\S\n]*//[#@][^\S\n]*sourceMappingURL=(\S+)[^\S\n]*$")
            .unwrap()
    })
}

fn block_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The closing */ is deliberately not required; generators have been seen
    // to emit truncated trailing comments.
    RE.get_or_init(|| {
        Regex::new(r"/\*[#@][^\S\n]*sourceMappingURL=([^\s*]+)").unwrap()
    })
}

/// Find the last `sourceMappingURL` comment in `source`.
#[must_use]
pub fn extract_source_map_url(source: &str) -> Option<SourceMapRef> {
    let line = line_comment_re()
        .captures_iter(source)
        .last()
        .and_then(|c| c.get(1));
    let block = block_comment_re()
        .captures_iter(source)
        .last()
        .and_then(|c| c.get(1));

    let best = match (line, block) {
        (Some(a), Some(b)) => {
            if a.start() >= b.start() {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };

    Some(SourceMapRef {
        url: best.as_str().to_string(),
        span: best.range(),
    })
}

/// Rewrite the referenced URL in place, leaving the comment form intact.
#[must_use]
pub fn replace_source_map_url(source: &str, map_ref: &SourceMapRef, new_url: &str) -> String {
    let mut out = String::with_capacity(source.len() - map_ref.url.len() + new_url.len());
    out.push_str(&source[..map_ref.span.start]);
    out.push_str(new_url);
    out.push_str(&source[map_ref.span.end..]);
    out
}

/// Encode bytes as a base64 `data:` URL.
#[must_use]
pub fn to_data_url(content_type: &str, body: &[u8]) -> String {
    format!("data:{content_type};base64,{}", BASE64.encode(body))
}
