use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use watchdog_core::types::RequestContext;

/// Attach the identifier/audit contract to every request.
///
/// `request_id` is echoed from `X-Request-ID` or generated; the client IP
/// is the first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// transport address. The id is echoed back on the response so clients
/// and logs correlate.
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let headers = request.headers();

    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let forwarded_ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let transport_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let ip_address = forwarded_ip.or(real_ip).or(transport_ip);

    let user_agent = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let ctx = RequestContext::new(request_id, ip_address, user_agent);
    let echo_id = ctx.request_id.clone();

    // Access log with sensitive headers redacted before emission
    if tracing::enabled!(tracing::Level::DEBUG) {
        let logged_headers: Vec<String> = request
            .headers()
            .iter()
            .map(|(name, value)| {
                if watchdog_core::utils::is_sensitive_header(name.as_str()) {
                    format!("{}: [REDACTED]", name)
                } else {
                    format!("{}: {}", name, value.to_str().unwrap_or("<binary>"))
                }
            })
            .collect();
        tracing::debug!(
            request_id = %echo_id,
            method = %request.method(),
            path = %request.uri().path(),
            headers = ?logged_headers,
            "Request received"
        );
    }

    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&echo_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}
