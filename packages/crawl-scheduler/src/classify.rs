//! Header classification and site resolution for observations.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::traits::{Classification, Classifier};

/// Headers copied verbatim into the results map.
pub const GRADED_HEADERS: [&str; 3] = [
    "x-frame-options",
    "strict-transport-security",
    "content-security-policy",
];

const DEFAULT_SITE_CACHE_CAPACITY: usize = 4096;

/// `scheme://host[:port]` of a URL, or `None` when it has no tuple origin.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization())
}

/// Host of a URL, lowercased, without a trailing dot.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
}

/// Registrable-domain lookups against the public suffix list, memoized.
///
/// Scoped to a run: construct one per driver and share it between workers.
pub struct SiteResolver {
    cache: Mutex<LruCache<String, Option<String>>>,
}

impl Default for SiteResolver {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SITE_CACHE_CAPACITY)
    }
}

impl SiteResolver {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Registrable domain (eTLD+1) of a host, e.g. `example.co.uk`.
    pub fn registrable_domain(&self, host: &str) -> Option<String> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&host) {
                return hit.clone();
            }
        }

        let site = psl::domain_str(&host).map(str::to_string);

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(host, site.clone());
        }
        site
    }

    pub fn site_of_url(&self, url: &str) -> Option<String> {
        host_of(url).and_then(|host| self.registrable_domain(&host))
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
struct CookieFlags {
    secure: bool,
    httponly: bool,
    samesite: Option<String>,
    persistent: bool,
    domain: Option<String>,
    path: Option<String>,
}

/// Default classifier: records the graded headers as received and the
/// attribute flags of every `Set-Cookie`. Grading the values is left to
/// downstream analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityHeaderSnapshot;

impl Classifier for SecurityHeaderSnapshot {
    fn classify(
        &self,
        _end_url: &str,
        headers: &Map<String, Value>,
        _origin: Option<&str>,
    ) -> Classification {
        let mut results = Map::new();
        for name in GRADED_HEADERS {
            let value = headers.get(name).cloned().unwrap_or(Value::Null);
            results.insert(name.to_string(), value);
        }

        let mut cookies = Map::new();
        if let Some(raw) = headers.get("set-cookie").and_then(Value::as_str) {
            for cookie in split_set_cookie(raw) {
                if let Some((name, flags)) = parse_cookie(&cookie) {
                    let flags = serde_json::to_value(flags).unwrap_or(Value::Null);
                    cookies.insert(name, flags);
                }
            }
        }

        Classification {
            results: Value::Object(results),
            cookies: Value::Object(cookies),
        }
    }
}

/// Undo the `", "` joining of repeated `Set-Cookie` headers.
///
/// A comma also appears inside `Expires` dates, so a piece only starts a new
/// cookie when its first segment is a `name=value` pair.
fn split_set_cookie(raw: &str) -> Vec<String> {
    let mut cookies: Vec<String> = Vec::new();
    for piece in raw.split(',') {
        let first = piece.split(';').next().unwrap_or("");
        let starts_cookie = first.contains('=') && !cookies.is_empty();
        match cookies.last_mut() {
            Some(last) if !starts_cookie => {
                last.push(',');
                last.push_str(piece);
            }
            _ => cookies.push(piece.trim_start().to_string()),
        }
    }
    cookies
}

fn parse_cookie(cookie: &str) -> Option<(String, CookieFlags)> {
    let mut parts = cookie.split(';');
    let (name, _) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut flags = CookieFlags::default();
    for attribute in parts {
        let (key, value) = match attribute.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), Some(v.trim().to_string())),
            None => (attribute.trim().to_ascii_lowercase(), None),
        };
        match key.as_str() {
            "secure" => flags.secure = true,
            "httponly" => flags.httponly = true,
            "samesite" => flags.samesite = value.map(|v| v.to_ascii_lowercase()),
            "expires" | "max-age" => flags.persistent = true,
            "domain" => flags.domain = value,
            "path" => flags.path = value,
            _ => {}
        }
    }
    Some((name.to_string(), flags))
}
