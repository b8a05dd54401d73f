//! Presentation catalogue: browser identities and request-header configurations.
//!
//! User agents were taken from the latest-user-agent listings of December 2021.
//! Combinations a vendor does not ship (Safari on Linux, for example) are absent
//! and never seeded.

use std::collections::BTreeMap;

pub const BROWSERS: [&str; 5] = ["chrome", "firefox", "safari", "edge", "opera"];

pub const SYSTEMS: [&str; 5] = ["windows", "macos", "linux", "ios", "android"];

/// Identity used by every family that does not vary the user agent.
pub const DEFAULT_BROWSER: &str = "chrome";
pub const DEFAULT_SYSTEM: &str = "windows";

/// `Accept-Language` values of the client-configuration family.
pub const ACCEPT_LANGUAGES: [&str; 5] = ["en", "es", "cn", "ru", "de"];

/// The user agent string for a browser/OS pair, if that combination exists.
pub fn user_agent(browser: &str, system: &str) -> Option<&'static str> {
    let ua = match (browser, system) {
        ("chrome", "windows") => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36",
        ("chrome", "macos") => "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36",
        ("chrome", "linux") => "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36",
        ("chrome", "ios") => "Mozilla/5.0 (iPhone; CPU iPhone OS 15_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) CriOS/96.0.4664.116 Mobile/15E148 Safari/604.1",
        ("chrome", "android") => "Mozilla/5.0 (Linux; Android 10) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.104 Mobile Safari/537.36",
        ("firefox", "windows") => "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:95.0) Gecko/20100101 Firefox/95.0",
        ("firefox", "macos") => "Mozilla/5.0 (Macintosh; Intel Mac OS X 12.1; rv:95.0) Gecko/20100101 Firefox/95.0",
        ("firefox", "linux") => "Mozilla/5.0 (X11; Linux i686; rv:95.0) Gecko/20100101 Firefox/95.0",
        ("firefox", "ios") => "Mozilla/5.0 (iPhone; CPU iPhone OS 12_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) FxiOS/40.0 Mobile/15E148 Safari/605.1.15",
        ("firefox", "android") => "Mozilla/5.0 (Android 12; Mobile; rv:68.0) Gecko/68.0 Firefox/95.0",
        ("safari", "macos") => "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.2 Safari/605.1.15",
        ("safari", "ios") => "Mozilla/5.0 (iPhone; CPU iPhone OS 15_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.2 Mobile/15E148 Safari/604.1",
        ("edge", "windows") => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36 Edg/96.0.1054.62",
        ("edge", "macos") => "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36 Edg/96.0.1054.62",
        ("edge", "android") => "Mozilla/5.0 (Linux; Android 10; HD1913) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.104 Mobile Safari/537.36 EdgA/96.0.1054.53",
        ("edge", "ios") => "Mozilla/5.0 (iPhone; CPU iPhone OS 15_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 EdgiOS/96.1054.49 Mobile/15E148 Safari/605.1.15",
        ("opera", "windows") => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36 OPR/82.0.4227.43",
        ("opera", "macos") => "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36 OPR/82.0.4227.43",
        ("opera", "linux") => "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36 OPR/82.0.4227.43",
        ("opera", "android") => "Mozilla/5.0 (Linux; Android 10; SM-G970F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.104 Mobile Safari/537.36 OPR/63.3.3216.58675",
        _ => return None,
    };
    Some(ua)
}

pub fn default_user_agent() -> &'static str {
    // Present in the table above.
    user_agent(DEFAULT_BROWSER, DEFAULT_SYSTEM).unwrap_or_default()
}

/// Every browser/OS pair with a known user agent, browser-major.
pub fn browser_variants() -> Vec<(&'static str, &'static str)> {
    BROWSERS
        .iter()
        .flat_map(|b| SYSTEMS.iter().map(move |s| (*b, *s)))
        .filter(|(b, s)| user_agent(b, s).is_some())
        .collect()
}

/// The request-header configurations of the client family.
pub fn header_configs() -> Vec<BTreeMap<String, String>> {
    ACCEPT_LANGUAGES
        .iter()
        .map(|lang| BTreeMap::from([("Accept-Language".to_string(), lang.to_string())]))
        .collect()
}
