use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, HeaderName, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::caller::caller_id;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::{KEY_SELECTIONS, RATE_LIMITED_TOTAL, REQUEST_LATENCY, REQUEST_TOTAL, TRACKED_CALLERS, UPSTREAM_ERRORS};
use crate::models::{ChatRequest, UpstreamErrorBody, UpstreamRequest};
use crate::rate_limit::RateLimitDecision;
use crate::rotation::Credential;
use crate::state::AppState;

pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_MODEL_USED: HeaderName = HeaderName::from_static("x-model-used");

/// POST /api/chat
///
/// Every response, failures included, reports the caller's remaining quota.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> Response {
    REQUEST_TOTAL.inc();

    let direct_ip = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let caller = caller_id(&headers, direct_ip, state.gateway.trust_proxy_headers);

    let decision = state.rate_limiter.check(&caller);
    TRACKED_CALLERS.set(state.rate_limiter.tracked_callers() as f64);

    let mut response = match handle_chat(&state, &caller, decision, body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(caller = %caller, status = %e.status(), error = %e, "Chat request failed");
            e.into_response()
        }
    };

    response
        .headers_mut()
        .insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    response
}

pub async fn chat_preflight() -> Response {
    super::preflight("POST, OPTIONS")
}

async fn handle_chat(
    state: &AppState,
    caller: &str,
    decision: RateLimitDecision,
    body: Bytes,
) -> GatewayResult<Response> {
    if !decision.allowed {
        RATE_LIMITED_TOTAL.inc();
        return Err(GatewayError::RateLimited {
            retry_after_secs: state.rate_limiter.window().as_secs(),
        });
    }

    let credential = state.rotator.next().ok_or(GatewayError::NotConfigured)?;
    let slot = credential.slot.to_string();
    KEY_SELECTIONS.with_label_values(&[slot.as_str()]).inc();

    let request: ChatRequest = serde_json::from_slice(&body)?;
    if request.messages.is_empty() {
        return Err(GatewayError::BadRequest("Messages array is required"));
    }

    tracing::info!(
        caller,
        key_slot = credential.slot,
        key_id = %credential.fingerprint(),
        use_case = request.use_case.as_deref().unwrap_or("-"),
        stream = request.stream,
        "Forwarding chat request"
    );

    forward(state, &request, &credential).await
}

/// Send one chat request upstream and shape the answer for the browser.
///
/// A successful streaming answer is relayed chunk by chunk without
/// inspection. Anything else is buffered: structured upstream errors are
/// reduced to `{error, code}`, other bodies are passed through verbatim.
pub async fn forward(
    state: &AppState,
    request: &ChatRequest,
    credential: &Credential,
) -> GatewayResult<Response> {
    let settings = &state.gateway;
    let payload = UpstreamRequest::build(request, settings);

    let mut upstream = state
        .client
        .post(&settings.upstream_url)
        .bearer_auth(credential.secret())
        .header("HTTP-Referer", &settings.site_url)
        .header("X-Title", &settings.site_title)
        .json(&payload);

    // streams are bounded by the client's read timeout instead
    if !request.stream {
        upstream = upstream.timeout(settings.upstream_timeout);
    }

    let start_time = Instant::now();
    let res = upstream.send().await?;
    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());

    let status = res.status();

    if request.stream && status.is_success() {
        let stream = res.bytes_stream().inspect_err(|e| {
            tracing::warn!(error = %e, "Upstream stream interrupted");
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        set_model_header(&mut response, &settings.model);
        return Ok(response);
    }

    let bytes = res.bytes().await?;
    let body: serde_json::Value = serde_json::from_slice(&bytes)?;
    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(settings.model.as_str())
        .to_string();

    if !status.is_success() {
        UPSTREAM_ERRORS.inc();

        if let Ok(UpstreamErrorBody { error }) = serde_json::from_value::<UpstreamErrorBody>(body) {
            tracing::warn!(
                status = %status,
                key_slot = credential.slot,
                code = ?error.code,
                "Upstream returned an error"
            );

            let message = error.message.unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Upstream request failed")
                    .to_string()
            });
            let mut response = GatewayError::Upstream {
                status,
                message,
                code: error.code,
            }
            .into_response();
            set_model_header(&mut response, &model);
            return Ok(response);
        }
    }

    let mut response = (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        bytes,
    )
        .into_response();
    set_model_header(&mut response, &model);
    Ok(response)
}

fn set_model_header(response: &mut Response, model: &str) {
    if let Ok(value) = HeaderValue::from_str(model) {
        response.headers_mut().insert(X_MODEL_USED, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_bytes, body_json, spawn_upstream, test_state, unreachable_url};
    use axum::http::{Method, Request, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const HELLO: &str = r#"{"messages":[{"role":"user","content":"hello"}]}"#;

    #[tokio::test]
    async fn empty_pool_answers_503() {
        let app = crate::router(test_state(&unreachable_url().await, &[], 30));

        let resp = app.oneshot(chat_request(HELLO)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers()[&X_RATELIMIT_REMAINING], "29");
        assert!(resp.headers().get(&X_MODEL_USED).is_none());
        assert_eq!(body_json(resp).await, json!({"error": "API not configured"}));
    }

    #[tokio::test]
    async fn request_over_quota_is_rejected_with_retry_after() {
        let app = crate::router(test_state(&unreachable_url().await, &[], 2));

        let first = app.clone().oneshot(chat_request(HELLO)).await.unwrap();
        assert_eq!(first.headers()[&X_RATELIMIT_REMAINING], "1");
        let second = app.clone().oneshot(chat_request(HELLO)).await.unwrap();
        assert_eq!(second.headers()[&X_RATELIMIT_REMAINING], "0");

        let third = app.oneshot(chat_request(HELLO)).await.unwrap();
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(third.headers()[header::RETRY_AFTER], "60");
        assert_eq!(third.headers()[&X_RATELIMIT_REMAINING], "0");
        assert_eq!(third.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn structured_upstream_error_is_normalized() {
        let upstream = Router::new().route(
            "/chat",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": {"message": "bad input", "code": "E1", "metadata": {"x": 1}}})),
                )
            }),
        );
        let (base_url, _handle) = spawn_upstream(upstream).await;
        let app = crate::router(test_state(&format!("{base_url}/chat"), &["k1"], 30));

        let resp = app.oneshot(chat_request(HELLO)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({"error": "bad input", "code": "E1"}));
    }

    #[tokio::test]
    async fn unstructured_upstream_error_is_relayed() {
        let upstream = Router::new().route(
            "/chat",
            post(|| async { (StatusCode::BAD_GATEWAY, r#"{"error":"overloaded"}"#) }),
        );
        let (base_url, _handle) = spawn_upstream(upstream).await;
        let app = crate::router(test_state(&format!("{base_url}/chat"), &["k1"], 30));

        let resp = app.oneshot(chat_request(HELLO)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_bytes(resp).await, r#"{"error":"overloaded"}"#.as_bytes());
    }

    #[tokio::test]
    async fn buffered_success_is_verbatim() {
        const UPSTREAM_BODY: &str =
            "{ \"model\": \"vendor/some-model\",  \"choices\": [{\"message\": {\"content\": \"hi\"}}] }";
        let upstream = Router::new().route("/chat", post(|| async { UPSTREAM_BODY }));
        let (base_url, _handle) = spawn_upstream(upstream).await;
        let app = crate::router(test_state(&format!("{base_url}/chat"), &["k1"], 30));

        let resp = app.oneshot(chat_request(HELLO)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(resp.headers()[&X_MODEL_USED], "vendor/some-model");
        assert_eq!(resp.headers()[&X_RATELIMIT_REMAINING], "29");
        assert_eq!(body_bytes(resp).await, UPSTREAM_BODY.as_bytes());
    }

    #[tokio::test]
    async fn streaming_bytes_are_relayed_unchanged() {
        const CHUNKS: [&str; 4] = [
            ": OPENROUTER PROCESSING\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ];
        let upstream = Router::new().route(
            "/chat",
            post(|| async {
                let stream = futures_util::stream::iter(
                    CHUNKS.map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes()))),
                );
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    Body::from_stream(stream),
                )
            }),
        );
        let (base_url, _handle) = spawn_upstream(upstream).await;
        let app = crate::router(test_state(&format!("{base_url}/chat"), &["k1"], 30));

        let resp = app
            .oneshot(chat_request(
                r#"{"messages":[{"role":"user","content":"hello"}],"stream":true}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[&X_MODEL_USED], "openrouter/auto");
        assert_eq!(body_bytes(resp).await, CHUNKS.concat().as_bytes());
    }

    #[tokio::test]
    async fn streaming_request_with_upstream_error_is_normalized() {
        let upstream = Router::new().route(
            "/chat",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": {"message": "busy", "code": 429}})),
                )
            }),
        );
        let (base_url, _handle) = spawn_upstream(upstream).await;
        let app = crate::router(test_state(&format!("{base_url}/chat"), &["k1"], 30));

        let resp = app
            .oneshot(chat_request(
                r#"{"messages":[{"role":"user","content":"hello"}],"stream":true}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_ne!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[&X_RATELIMIT_REMAINING], "29");
        assert_eq!(body_json(resp).await, json!({"error": "busy", "code": 429}));
    }

    #[tokio::test]
    async fn credentials_rotate_and_payload_gets_defaults() {
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let upstream = Router::new()
            .route(
                "/chat",
                post(
                    |State(seen): State<Arc<Mutex<Vec<(String, Value)>>>>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        let auth = headers[header::AUTHORIZATION].to_str().unwrap().to_string();
                        seen.lock().unwrap().push((auth, body));
                        Json(json!({"model": "x/y", "choices": []}))
                    },
                ),
            )
            .with_state(seen.clone());
        let (base_url, _handle) = spawn_upstream(upstream).await;
        let app = crate::router(test_state(&format!("{base_url}/chat"), &["k1", "k2"], 30));

        for _ in 0..3 {
            let resp = app
                .clone()
                .oneshot(chat_request(
                    r#"{"messages":[{"role":"user","content":"hello"}],"response_format":{"type":"json_object"},"use_case":"cv"}"#,
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let seen = seen.lock().unwrap();
        let keys: Vec<&str> = seen.iter().map(|(auth, _)| auth.as_str()).collect();
        assert_eq!(keys, vec!["Bearer k1", "Bearer k2", "Bearer k1"]);

        let body = &seen[0].1;
        assert_eq!(body["model"], "openrouter/auto");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["stream"], false);
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        assert!(body.get("use_case").is_none());
    }

    #[tokio::test]
    async fn malformed_payload_is_500() {
        let app = crate::router(test_state(&unreachable_url().await, &["k1"], 30));

        let resp = app.oneshot(chat_request("{not json")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "Failed to process request");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn missing_messages_is_400() {
        let app = crate::router(test_state(&unreachable_url().await, &["k1"], 30));

        let resp = app.oneshot(chat_request(r#"{"messages":[]}"#)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({"error": "Messages array is required"}));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_500() {
        let app = crate::router(test_state(&unreachable_url().await, &["k1"], 30));

        let resp = app.oneshot(chat_request(HELLO)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.headers()[&X_RATELIMIT_REMAINING], "29");
        assert_eq!(body_json(resp).await["error"], "Failed to process request");
    }

    #[tokio::test]
    async fn preflight_lists_post() {
        let app = crate::router(test_state(&unreachable_url().await, &[], 30));

        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/chat")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let headers = resp.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[tokio::test]
    async fn get_is_not_allowed() {
        let app = crate::router(test_state(&unreachable_url().await, &[], 30));

        let resp = app
            .oneshot(Request::builder().uri("/api/chat").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(resp.headers().get(&X_RATELIMIT_REMAINING).is_none());
        assert_eq!(body_json(resp).await, json!({"error": "Method not allowed"}));
    }
}
