//! Allow-listed fetch proxy.
//!
//! Lets the browser read papers and metadata from academic hosts that do not
//! send CORS headers. Only hosts on the allow-list, or their subdomains, are
//! ever contacted, redirect hops included.

use axum::extract::{RawQuery, State};
use axum::http::{HeaderValue, Method, header};
use axum::response::{IntoResponse, Response};
use reqwest::redirect::{Attempt, Policy};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::metrics::PROXY_REQUESTS;
use crate::state::AppState;

pub const ALLOWED_DOMAINS: &[&str] = &[
    "arxiv.org",
    "doi.org",
    "semanticscholar.org",
    "openalex.org",
    "crossref.org",
    "ncbi.nlm.nih.gov",
    "europepmc.org",
    "biorxiv.org",
    "medrxiv.org",
    "openreview.net",
    "aclanthology.org",
    "nature.com",
    "springer.com",
    "sciencedirect.com",
    "acm.org",
    "ieee.org",
];

pub const PROXY_USER_AGENT: &str = "Mozilla/5.0 (compatible; PortfolioFetchProxy/1.0)";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const CACHE_FOR_ONE_HOUR: &str = "public, max-age=3600";
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub allowed_domains: &'static [&'static str],
    pub user_agent: &'static str,
    pub timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            allowed_domains: ALLOWED_DOMAINS,
            user_agent: PROXY_USER_AGENT,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Client used for proxied fetches.
///
/// Redirects are followed only while every hop stays on the allow-list. A
/// hop to any other host stops the chain and the 3xx itself is relayed.
pub fn build_proxy_client(
    settings: &ProxySettings,
    builder: reqwest::ClientBuilder,
) -> reqwest::Result<reqwest::Client> {
    let allowed = settings.allowed_domains;

    builder
        .redirect(Policy::custom(move |attempt| follow_allowed(attempt, allowed)))
        .build()
}

fn follow_allowed(attempt: Attempt<'_>, allowed: &[&str]) -> reqwest::redirect::Action {
    if attempt.previous().len() >= MAX_REDIRECTS {
        return attempt.error("too many redirects");
    }

    let permitted = matches!(attempt.url().scheme(), "http" | "https")
        && attempt
            .url()
            .host_str()
            .is_some_and(|host| is_allowed_host(host, allowed));

    if permitted {
        attempt.follow()
    } else {
        tracing::warn!(url = %attempt.url(), "Refusing redirect off the allow-list");
        attempt.stop()
    }
}

// First `url` pair of the query string, the way URLSearchParams.get reads it
fn url_param(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
}

/// GET /api/fetch?url=...
pub async fn fetch_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    RawQuery(query): RawQuery,
) -> Response {
    let target = url_param(query.as_deref());

    match fetch_through(&state, method, target.as_deref()).await {
        Ok(response) => {
            PROXY_REQUESTS.with_label_values(&["relayed"]).inc();
            response
        }
        Err(e) => {
            let outcome = if matches!(e, GatewayError::FetchFailed(_)) {
                "failed"
            } else {
                "rejected"
            };
            PROXY_REQUESTS.with_label_values(&[outcome]).inc();
            tracing::warn!(status = %e.status(), error = %e, "Fetch proxy request not served");
            e.into_response()
        }
    }
}

pub async fn fetch_preflight() -> Response {
    super::preflight("GET, OPTIONS")
}

async fn fetch_through(state: &AppState, method: Method, raw: Option<&str>) -> GatewayResult<Response> {
    let target = validate_target(raw, state.proxy.allowed_domains)?;
    tracing::debug!(url = %target, "Proxying fetch");

    let res = state
        .proxy_client
        .request(method, target)
        .header(header::USER_AGENT, state.proxy.user_agent)
        .timeout(state.proxy.timeout)
        .send()
        .await
        .map_err(|e| GatewayError::FetchFailed(e.to_string()))?;

    let status = res.status();
    let content_type = res
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let body = res
        .bytes()
        .await
        .map_err(|e| GatewayError::FetchFailed(e.to_string()))?;

    Ok((
        status,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static(CACHE_FOR_ONE_HOUR)),
        ],
        body,
    )
        .into_response())
}

/// Parse the requested target and check it against the allow-list.
///
/// No network call is made for a target rejected here.
pub fn validate_target(raw: Option<&str>, allowed: &'static [&'static str]) -> GatewayResult<Url> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(GatewayError::MissingUrl)?;

    let url = Url::parse(raw).map_err(|_| GatewayError::InvalidUrl)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::InvalidUrl);
    }
    let host = url.host_str().ok_or(GatewayError::InvalidUrl)?;

    if !is_allowed_host(host, allowed) {
        return Err(GatewayError::DomainNotAllowed {
            host: host.to_string(),
            allowed,
        });
    }

    Ok(url)
}

// Exact match or a subdomain of an allowed domain
pub fn is_allowed_host(host: &str, allowed: &[&str]) -> bool {
    allowed.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
