use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

fn default_http_client_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
}

/// Process-wide HTTP client shared by every adapter. Adapters are immutable
/// after construction, so a single pooled client is safe to hand out.
pub fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            default_http_client_builder()
                .build()
                .expect("failed to build reqwest client")
        })
        .clone()
}
