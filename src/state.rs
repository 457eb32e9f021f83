use std::sync::Arc;

use crate::config::GatewaySettings;
use crate::handlers::fetch::ProxySettings;
use crate::rate_limit::RateLimiter;
use crate::rotation::KeyRotator;

// app's shared state, owned by main and handed to every handler
pub struct AppState {
    pub client: reqwest::Client,
    // redirect policy bound to the proxy allow-list
    pub proxy_client: reqwest::Client,
    pub rate_limiter: Arc<RateLimiter>,
    pub rotator: KeyRotator,
    pub gateway: GatewaySettings,
    pub proxy: ProxySettings,
}

impl AppState {
    pub fn new(
        client: reqwest::Client,
        proxy_client: reqwest::Client,
        rate_limiter: RateLimiter,
        rotator: KeyRotator,
        gateway: GatewaySettings,
        proxy: ProxySettings,
    ) -> Self {
        Self {
            client,
            proxy_client,
            rate_limiter: Arc::new(rate_limiter),
            rotator,
            gateway,
            proxy,
        }
    }
}
