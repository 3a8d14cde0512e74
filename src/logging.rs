//! Tracing setup for hosts embedding the session core.
//! Components log under `stockdesk::<component>` targets; tokens never appear in log fields.

use xxhash_rust::xxh3::xxh3_64;

pub const TARGET_SESSION: &str = "stockdesk::session";
pub const TARGET_REFRESH: &str = "stockdesk::refresh";
pub const TARGET_CLIENT: &str = "stockdesk::client";
pub const TARGET_GUARD: &str = "stockdesk::guard";
pub const TARGET_STORE: &str = "stockdesk::store";

/// Install a fmt subscriber filtered by `RUST_LOG`. Safe to call more than once.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Same as [`init`] but writes through the test writer so output is captured per test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fingerprint of a token so logs can correlate refresh cycles. No character of the token appears in it.
pub fn token_label(token: &str) -> String {
    let h = xxh3_64(token.as_bytes());
    format!("xxh3:{:08x} len={}", h >> 32, token.len())
}
