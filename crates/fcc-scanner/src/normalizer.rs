//! URL canonicalization and link resolution.
//!
//! Canonical form: lowercase `http`/`https` scheme and host, no default port,
//! no credentials or fragment, path segments percent-encoded with only the
//! RFC 3986 unreserved characters left bare, `.`/`..` collapsed and no
//! trailing slash except for the root path. The query string is kept.
//! Applying [`normalize_input`] to its own output returns it unchanged.

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

/// Everything but `A-Z a-z 0-9 - _ . ~` is encoded.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Split `scheme://rest`, returning the scheme if `input` starts with one.
fn explicit_scheme(input: &str) -> Option<&str> {
    let (scheme, _) = input.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    (first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
    .then_some(scheme)
}

/// `scheme:` prefix of a link such as `mailto:` or `javascript:`.
fn has_scheme_prefix(link: &str) -> bool {
    let Some((scheme, _)) = link.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_http(scheme: &str) -> bool {
    scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
}

fn normalize_path(path: &str) -> String {
    let mut stack: Vec<String> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => {
                let decoded: Vec<u8> = percent_decode_str(other).collect();
                stack.push(percent_encode(&decoded, SEGMENT).to_string());
            }
        }
    }
    format!("/{}", stack.join("/"))
}

fn origin(url: &Url) -> Option<String> {
    let host = url.host_str().filter(|h| !h.is_empty())?;
    let mut origin = format!("{}://{}", url.scheme(), host.to_lowercase());
    // `Url::port` is `None` for the scheme's default port.
    if let Some(port) = url.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    Some(origin)
}

/// Canonicalize a user-supplied domain or URL.
///
/// Bare domains get `https://`. Returns `None` for blank input, a scheme other
/// than `http`/`https`, or anything without a host.
#[must_use]
pub fn normalize_input(input: &str) -> Option<String> {
    let candidate = input.trim();
    if candidate.is_empty() {
        return None;
    }

    let candidate = match explicit_scheme(candidate) {
        Some(scheme) if is_http(scheme) => candidate.to_string(),
        Some(_) => return None,
        None => format!("https://{candidate}"),
    };

    let parsed = Url::parse(&candidate).ok()?;
    if !is_http(parsed.scheme()) {
        return None;
    }

    let mut normalized = origin(&parsed)?;
    normalized.push_str(&normalize_path(parsed.path()));
    if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
        normalized.push('?');
        normalized.push_str(query);
    }
    Some(normalized)
}

/// `scheme://host[:port]` of a URL, with default ports omitted.
#[must_use]
pub fn base_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !is_http(parsed.scheme()) {
        return None;
    }
    origin(&parsed)
}

/// Lowercased host of a URL.
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()?
        .host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_lowercase)
}

/// Resolve `link` as found on the page at `base`.
///
/// Absolute links are normalized on their own and ignore `base`.
/// Protocol-relative links take the scheme of `base`. Root-relative links
/// resolve against the origin of `base`, other relative links against its
/// directory. Empty links, fragments and non-http schemes such as
/// `javascript:` or `mailto:` resolve to `None`.
#[must_use]
pub fn resolve_url(base: &str, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() || link.starts_with('#') {
        return None;
    }

    if let Some(scheme) = explicit_scheme(link) {
        return if is_http(scheme) {
            normalize_input(link)
        } else {
            None
        };
    }

    if link.starts_with("//") {
        let scheme = Url::parse(base.trim())
            .ok()
            .map_or_else(|| "https".to_string(), |u| u.scheme().to_string());
        return normalize_input(&format!("{scheme}:{link}"));
    }

    if has_scheme_prefix(link) {
        return None;
    }

    let base = Url::parse(base.trim()).ok()?;
    if !is_http(base.scheme()) {
        return None;
    }
    let origin = origin(&base)?;

    if link.starts_with('/') {
        return normalize_input(&format!("{origin}{link}"));
    }

    let base_path = base.path();
    if link.starts_with('?') {
        return normalize_input(&format!("{origin}{base_path}{link}"));
    }

    let dir = base_path
        .rfind('/')
        .map_or("", |idx| &base_path[..idx]);
    let joined = format!("{dir}/{link}");
    normalize_input(&format!("{origin}/{}", joined.trim_start_matches('/')))
}
