//! Site-protection heuristics.
//!
//! Classifies an HTTP response / page snapshot as accessible or actively
//! blocking automated access (challenge interstitial, CAPTCHA, rate limit).
//! Everything here is pure; callers run it pre-flight on a freshly loaded
//! page and again post-flight, since a block can appear mid-task.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Pages at least this large are unlikely to be bare challenge interstitials.
const SMALL_PAGE_LIMIT: usize = 16 * 1024;

/// Trimmed content shorter than this counts as empty.
const MIN_CONTENT_LEN: usize = 100;

const CHALLENGE_PHRASES: &[&str] = &[
    "checking your browser",
    "just a moment",
    "ray id:",
    "_cf_chl",
    "cf-spinner-please-wait",
    "ddos protection by",
    "attention required! | cloudflare",
    "please wait... | cloudflare",
];

const CAPTCHA_MARKERS: &[&str] = &[
    "captcha",
    "g-recaptcha",
    "recaptcha",
    "h-captcha",
    "hcaptcha",
    "cf-turnstile",
    "verify you are human",
    "prove you are human",
    "human verification",
    "bot detection",
    "security challenge",
];

const RATE_LIMIT_PHRASES: &[&str] = &[
    "too many requests",
    "rate limit",
    "slow down",
    "try again later",
    "request limit exceeded",
];

const REMAINING_HEADERS: &[&str] = &[
    "x-ratelimit-remaining",
    "x-rate-limit-remaining",
    "ratelimit-remaining",
];

static RAY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ray id:\s*(?:<[^>]*>\s*)*([0-9a-f]{8,32})").unwrap());

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

/// Why a page was classified as blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Cloudflare,
    Captcha,
    RateLimited,
    HttpError(u16),
    EmptyContent,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Cloudflare => f.write_str("cloudflare"),
            BlockReason::Captcha => f.write_str("captcha"),
            BlockReason::RateLimited => f.write_str("rate-limited"),
            BlockReason::HttpError(code) => write!(f, "http error {}", code),
            BlockReason::EmptyContent => f.write_str("empty content"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protection {
    Accessible,
    Blocked(BlockReason),
}

/// Extra context for logs when a page looks protected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionDetails {
    pub server: Option<String>,
    pub matched_markers: Vec<String>,
    pub ray_id: Option<String>,
    pub title: Option<String>,
}

/// Case-insensitive header lookup.
fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn is_cloudflare(status: u16, headers: &HashMap<String, String>, html: &str, lower: &str) -> bool {
    let server_is_cf = header(headers, "server")
        .map(|s| s.to_lowercase().contains("cloudflare"))
        .unwrap_or(false);
    let has_phrase = contains_any(lower, CHALLENGE_PHRASES);

    if matches!(status, 403 | 503) && (server_is_cf || has_phrase) {
        return true;
    }
    has_phrase && html.len() < SMALL_PAGE_LIMIT
}

fn is_rate_limited(status: u16, headers: &HashMap<String, String>, lower: &str) -> bool {
    if status == 429 {
        return true;
    }
    for name in REMAINING_HEADERS {
        if let Some(value) = header(headers, name) {
            if value.trim().parse::<i64>().ok() == Some(0) {
                return true;
            }
        }
    }
    if header(headers, "retry-after").is_some() {
        return true;
    }
    contains_any(lower, RATE_LIMIT_PHRASES)
}

/// Classify a response. Checks run in precedence order; first match wins.
pub fn detect(status: u16, headers: &HashMap<String, String>, html: &str) -> Protection {
    let lower = html.to_lowercase();

    if is_cloudflare(status, headers, html, &lower) {
        return Protection::Blocked(BlockReason::Cloudflare);
    }
    if contains_any(&lower, CAPTCHA_MARKERS) {
        return Protection::Blocked(BlockReason::Captcha);
    }
    if is_rate_limited(status, headers, &lower) {
        return Protection::Blocked(BlockReason::RateLimited);
    }
    if status >= 400 {
        return Protection::Blocked(BlockReason::HttpError(status));
    }
    if html.trim().chars().count() < MIN_CONTENT_LEN {
        return Protection::Blocked(BlockReason::EmptyContent);
    }
    Protection::Accessible
}

/// Collect the markers that fired, the Cloudflare Ray ID and the page title.
pub fn details(headers: &HashMap<String, String>, html: &str) -> ProtectionDetails {
    let lower = html.to_lowercase();
    let matched_markers = CHALLENGE_PHRASES
        .iter()
        .chain(CAPTCHA_MARKERS)
        .chain(RATE_LIMIT_PHRASES)
        .filter(|m| lower.contains(*m))
        .map(|m| m.to_string())
        .collect();

    ProtectionDetails {
        server: header(headers, "server").map(str::to_string),
        matched_markers,
        ray_id: RAY_ID_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        title: page_title(html),
    }
}

pub fn page_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}
