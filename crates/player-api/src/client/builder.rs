use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::ApiError;

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Scheme assumed for proxy list entries written as plain `host:port`.
const DEFAULT_PROXY_SCHEME: &str = "socks4://";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Prefix a proxy list entry with the default scheme when it has none.
pub fn normalize_proxy(entry: &str) -> String {
    let entry = entry.trim();
    if entry.contains("://") {
        entry.to_string()
    } else {
        format!("{DEFAULT_PROXY_SCHEME}{entry}")
    }
}

/// Build a client for the player API, optionally routed through `proxy`.
///
/// A proxy given here always wins over system/env proxy settings; without one
/// the client talks to the provider directly.
pub fn build_client(proxy: Option<&str>, timeout: Duration) -> Result<Client, ApiError> {
    install_rustls_provider();

    let mut builder = Client::builder().user_agent(DEFAULT_UA);

    if timeout > Duration::ZERO {
        builder = builder.timeout(timeout);
    }

    builder = match proxy {
        Some(url) => {
            let url = normalize_proxy(url);
            let proxy = reqwest::Proxy::all(&url)
                .map_err(|e| ApiError::InvalidProxy(format!("{url}: {e}")))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    Ok(builder.build()?)
}
