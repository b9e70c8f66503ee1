//! Browser-like header profiles for portal requests.
//!
//! The portal rejects calls that do not look like they come from its own web
//! front-end, so every request carries the same origin, referer and client
//! hints a desktop Chrome session would send.

use http::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
    ORIGIN, REFERER, USER_AGENT,
};
use once_cell::sync::Lazy;

pub const PORTAL_ORIGIN: &str = "https://my.engie.ro";
pub const PORTAL_REFERER: &str = "https://my.engie.ro/";

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

const SOURCE: HeaderName = HeaderName::from_static("source");

/// Headers for the form-encoded login call.
pub fn login_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(SOURCE, HeaderValue::from_static("desktop"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    headers
}

/// Headers for authenticated JSON API calls (contracts, invoice history).
pub fn api_headers() -> HeaderMap {
    API_HEADERS.clone()
}

/// Headers for invoice document downloads.
pub fn download_headers() -> HeaderMap {
    DOWNLOAD_HEADERS.clone()
}

static API_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(SOURCE, HeaderValue::from_static("desktop"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ORIGIN, HeaderValue::from_static(PORTAL_ORIGIN));
    headers.insert(REFERER, HeaderValue::from_static(PORTAL_REFERER));
    headers
});

static DOWNLOAD_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("ro-RO,ro;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(ORIGIN, HeaderValue::from_static(PORTAL_ORIGIN));
    headers.insert(REFERER, HeaderValue::from_static(PORTAL_REFERER));
    headers.insert(
        HeaderName::from_static("sec-ch-ua"),
        HeaderValue::from_static(
            "\"Chromium\";v=\"134\", \"Not:A-Brand\";v=\"24\", \"Google Chrome\";v=\"134\"",
        ),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-mobile"),
        HeaderValue::from_static("?0"),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-platform"),
        HeaderValue::from_static("\"macOS\""),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-site"),
    );
    headers.insert(SOURCE, HeaderValue::from_static("desktop"));
    headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_USER_AGENT));
    headers
});
