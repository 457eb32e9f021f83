use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::Response;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::config::GatewaySettings;
use crate::handlers::fetch::{ProxySettings, build_proxy_client};
use crate::rate_limit::RateLimiter;
use crate::rotation::KeyRotator;
use crate::state::AppState;

pub async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    (base_url, handle)
}

// Address nothing listens on
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn test_state(upstream_url: &str, keys: &[&str], limit: u32) -> Arc<AppState> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(500))
        .no_proxy()
        .build()
        .unwrap();

    let gateway = GatewaySettings {
        upstream_url: upstream_url.to_string(),
        upstream_timeout: Duration::from_secs(5),
        ..GatewaySettings::default()
    };
    let proxy = ProxySettings {
        allowed_domains: &["127.0.0.1"],
        timeout: Duration::from_secs(5),
        ..ProxySettings::default()
    };
    let proxy_client = build_proxy_client(
        &proxy,
        reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(500))
            .no_proxy(),
    )
    .unwrap();

    Arc::new(AppState::new(
        client,
        proxy_client,
        RateLimiter::new(limit, Duration::from_secs(60)),
        KeyRotator::new(keys.iter().map(|k| Some(k.to_string())).collect()),
        gateway,
        proxy,
    ))
}

pub async fn body_bytes(resp: Response<Body>) -> Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}
