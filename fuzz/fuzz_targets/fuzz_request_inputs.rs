//! Fuzz testing for the request-derived inputs of the pipeline.
//!
//! Everything here is reachable from attacker-controlled bytes: forwarded
//! headers, paths, query strings, proxy lists from the environment and cache
//! entries read back from a shared store. None of it may panic.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the target
//! cargo +nightly fuzz run fuzz_request_inputs
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_request_inputs -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `client_ip`: X-Forwarded-For / X-Real-IP parsing with and without trusted proxies
//! - `CidrRange::parse`: trusted proxy list entries
//! - `cache_key`: arbitrary path, query and subject
//! - `glob_match`: invalidation patterns against keys
//! - `LogFilter::should_log`: path prefix filtering
//! - `CachedResponse::from_slice`: corrupt or hostile cache entries

#![no_main]

use arbitrary::Arbitrary;
use axum::body::Body;
use axum::http::{HeaderValue, Method, Request};
use libfuzzer_sys::fuzz_target;
use storefront_edge::middleware::{
    CachedResponse, CidrRange, LogFilter, TrustedProxyConfig, cache_key, client_ip,
};
use storefront_edge::store::glob_match;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    forwarded_for: &'a [u8],
    real_ip: &'a [u8],
    proxy: &'a str,
    path: &'a str,
    query: &'a str,
    subject: Option<&'a str>,
    pattern: &'a str,
    entry: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    let mut req = Request::new(Body::empty());
    if let Ok(value) = HeaderValue::from_bytes(input.forwarded_for) {
        req.headers_mut().insert("x-forwarded-for", value);
    }
    if let Ok(value) = HeaderValue::from_bytes(input.real_ip) {
        req.headers_mut().insert("x-real-ip", value);
    }

    let _ = client_ip(&req, &TrustedProxyConfig::default());
    let _ = client_ip(&req, &TrustedProxyConfig::new(&[input.proxy.to_string()]));
    let _ = CidrRange::parse(input.proxy);

    let key = cache_key("cache:", &Method::GET, input.path, input.query, input.subject);
    assert!(key.starts_with("cache:"));
    let _ = glob_match(input.pattern, &key);
    let _ = glob_match(input.pattern, input.path);

    let filter = LogFilter::new(vec![input.pattern.to_string()], vec![input.query.to_string()]);
    let _ = filter.should_log(input.path);

    if let Ok(entry) = CachedResponse::from_slice(input.entry) {
        let _ = entry.into_response();
    }
});
