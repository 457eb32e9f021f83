use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec, register_gauge,
    register_histogram,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("gateway_requests_total", "Total number of chat requests").unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter =
        register_counter!("gateway_rate_limited_total", "Chat requests denied by the rate limiter").unwrap();
    pub static ref UPSTREAM_ERRORS: Counter =
        register_counter!("gateway_upstream_errors_total", "Upstream error responses and transport failures").unwrap();
    pub static ref KEY_SELECTIONS: CounterVec = register_counter_vec!(
        "gateway_key_selections_total",
        "Credential selections by configuration slot",
        &["slot"]
    )
    .unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "gateway_request_latency_seconds",
        "Time until upstream response headers, in seconds"
    )
    .unwrap();
    pub static ref PROXY_REQUESTS: CounterVec = register_counter_vec!(
        "proxy_requests_total",
        "Fetch proxy requests by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref TRACKED_CALLERS: Gauge =
        register_gauge!("gateway_tracked_callers", "Callers currently held by the rate limiter").unwrap();
}
