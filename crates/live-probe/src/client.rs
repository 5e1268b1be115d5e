use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Default per-request timeout for upstream calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Client builder with browser-like default headers and the given timeout.
///
/// A zero timeout leaves reqwest's default (no timeout) in place.
pub fn create_client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    install_rustls_provider();

    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.8,en-US;q=0.5,en;q=0.3"),
    );

    let mut builder = reqwest::Client::builder()
        .user_agent(DEFAULT_UA)
        .default_headers(headers);
    if timeout > Duration::ZERO {
        builder = builder.timeout(timeout);
    }
    builder
}

pub fn default_client() -> Result<reqwest::Client, reqwest::Error> {
    create_client_builder(DEFAULT_REQUEST_TIMEOUT).build()
}
