use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;

// Environment slots holding upstream credentials, in rotation order
pub const CREDENTIAL_ENV_VARS: [&str; 10] = [
    "OPENROUTER_API_KEY",
    "OPENROUTER_API_KEY_2",
    "OPENROUTER_API_KEY_3",
    "OPENROUTER_API_KEY_4",
    "OPENROUTER_API_KEY_5",
    "OPENROUTER_API_KEY_6",
    "OPENROUTER_API_KEY_7",
    "OPENROUTER_API_KEY_8",
    "OPENROUTER_API_KEY_9",
    "OPENROUTER_API_KEY_10",
];

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "portfolio-gateway")]
#[command(about = "Rate limited, key rotating LLM gateway and allow-listed fetch proxy")]
pub struct Args {
    // Address to bind
    #[arg(long, env = "BIND_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Rate limit max requests per window, per caller
    #[arg(long, env = "RATE_LIMIT", default_value_t = 30,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub rate_window: u64,

    // Chat completions endpoint of the upstream aggregator
    #[arg(long, env = "UPSTREAM_URL",
          default_value = "https://openrouter.ai/api/v1/chat/completions")]
    pub upstream_url: String,

    // Routing model; the aggregator picks the concrete model
    #[arg(long, env = "UPSTREAM_MODEL", default_value = "openrouter/auto")]
    pub model: String,

    #[arg(long, default_value_t = 1024)]
    pub default_max_tokens: u32,

    #[arg(long, default_value_t = 0.7)]
    pub default_temperature: f64,

    // Upstream idle/read timeout in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value_t = 60)]
    pub upstream_timeout: u64,

    // Attribution headers sent to the aggregator
    #[arg(long, env = "SITE_URL", default_value = "https://localhost")]
    pub site_url: String,

    #[arg(long, env = "SITE_TITLE", default_value = "Portfolio")]
    pub site_title: String,

    // Use X-Forwarded-For / CF-Connecting-IP to identify callers
    #[arg(long, env = "TRUST_PROXY_HEADERS", default_value_t = false)]
    pub trust_proxy_headers: bool,
}

impl Args {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            upstream_url: self.upstream_url.clone(),
            model: self.model.clone(),
            default_max_tokens: self.default_max_tokens,
            default_temperature: self.default_temperature,
            upstream_timeout: self.upstream_timeout(),
            site_url: self.site_url.clone(),
            site_title: self.site_title.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

/// Settings the chat forwarder reads on every request.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub upstream_url: String,
    pub model: String,
    pub default_max_tokens: u32,
    pub default_temperature: f64,
    pub upstream_timeout: Duration,
    pub site_url: String,
    pub site_title: String,
    pub trust_proxy_headers: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            upstream_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "openrouter/auto".to_string(),
            default_max_tokens: 1024,
            default_temperature: 0.7,
            upstream_timeout: Duration::from_secs(60),
            site_url: "https://localhost".to_string(),
            site_title: "Portfolio".to_string(),
            trust_proxy_headers: false,
        }
    }
}

// Read every credential slot from the environment; unset slots stay None
pub fn credential_slots_from_env() -> Vec<Option<String>> {
    CREDENTIAL_ENV_VARS
        .iter()
        .map(|name| std::env::var(name).ok())
        .collect()
}
