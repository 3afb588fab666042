use crate::error::{set_rate_limit_headers, ApiError};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use watchdog_core::{
    error::ErrorCode,
    jobs::{EnqueueOptions, JobQueue},
    rate_limit::{RateIdentity, RateLimitScope},
    security::AccessClaims,
    types::RequestContext,
    Error,
};
use watchdog_pipeline::workers::JobPayload;

/// The REST surface. Mutating routes sit behind the CSRF middleware in
/// `main`; per-scope rate limits are applied inside the handlers where
/// the identity is known.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/sessions", get(list_sessions))
        .route("/auth/csrf", get(issue_csrf))
        .route("/auth/password-reset/request", post(password_reset_request))
        .route("/auth/password-reset/confirm", post(password_reset_confirm))
        .route("/uploads", post(upload))
}

fn api_error(state: &AppState, error: Error) -> ApiError {
    ApiError::new(error, state.config.app.environment.clone())
}

/// Resolve the caller from the `Authorization: Bearer` header.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AccessClaims, Error> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| Error::unauthorized("Missing bearer token"))?;

    state.auth.validate_access(token).await
}

async fn check_rate(
    state: &AppState,
    scope: RateLimitScope,
    identity: RateIdentity,
) -> Result<watchdog_core::RateLimitDecision, Error> {
    let decision = state.rate_limiter.check(scope, &identity).await?;
    if !decision.allowed {
        return Err(Error::rate_limited(
            decision.retry_after_seconds.unwrap_or(60),
        ));
    }
    Ok(decision)
}

fn ip_identity(ctx: &RequestContext) -> RateIdentity {
    RateIdentity::Ip(ctx.ip_address.clone().unwrap_or_else(|| "unknown".into()))
}

async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<watchdog_auth::LoginRequest>,
) -> Response {
    let decision = match check_rate(&state, RateLimitScope::Auth, ip_identity(&ctx)).await {
        Ok(decision) => decision,
        Err(e) => return api_error(&state, e).into_response(),
    };

    let mut response = match state.auth.login(request, &ctx).await {
        Ok(tokens) => (StatusCode::OK, Json(tokens)).into_response(),
        Err(e) => api_error(&state, e).into_response(),
    };

    set_rate_limit_headers(&mut response, &decision);
    response
}

async fn refresh(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<watchdog_auth::RefreshRequest>,
) -> Response {
    let decision = match check_rate(&state, RateLimitScope::Auth, ip_identity(&ctx)).await {
        Ok(decision) => decision,
        Err(e) => return api_error(&state, e).into_response(),
    };

    let mut response = match state.auth.refresh(request, &ctx).await {
        Ok(tokens) => (StatusCode::OK, Json(tokens)).into_response(),
        Err(e) => api_error(&state, e).into_response(),
    };

    set_rate_limit_headers(&mut response, &decision);
    response
}

async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
) -> Response {
    let claims = match authenticate(&state, &headers).await {
        Ok(claims) => claims,
        Err(e) => return api_error(&state, e).into_response(),
    };

    match state.auth.logout(&claims, &ctx).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => api_error(&state, e).into_response(),
    }
}

async fn list_sessions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match authenticate(&state, &headers).await {
        Ok(claims) => claims,
        Err(e) => return api_error(&state, e).into_response(),
    };

    let user_id = match Uuid::parse_str(&claims.sub) {
        Ok(user_id) => user_id,
        Err(_) => {
            return api_error(
                &state,
                Error::new(ErrorCode::TokenInvalid, "Malformed subject claim"),
            )
            .into_response()
        }
    };

    match state.auth.list_sessions(user_id, &claims.jti).await {
        Ok(sessions) => Json(json!({ "sessions": sessions })).into_response(),
        Err(e) => api_error(&state, e).into_response(),
    }
}

/// Issue the double-submit CSRF cookie.
async fn issue_csrf(State(state): State<AppState>) -> Response {
    let token = state.csrf.issue();
    let cookie = format!(
        "csrf_token={}; Path=/; SameSite=Strict{}",
        token,
        if state.config.app.is_production() {
            "; Secure"
        } else {
            ""
        }
    );

    let mut response = Json(json!({ "csrf_token": token })).into_response();
    if let Ok(value) = axum::http::HeaderValue::from_str(&cookie) {
        response.headers_mut().insert("set-cookie", value);
    }
    response
}

async fn password_reset_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<watchdog_auth::dto::PasswordResetRequest>,
) -> Response {
    match state.password_reset.request_reset(request, &ctx).await {
        // Identical response whether or not the address exists
        Ok(_) => Json(json!({
            "message": "If the address is registered, a reset link has been sent"
        }))
        .into_response(),
        Err(e) => api_error(&state, e).into_response(),
    }
}

async fn password_reset_confirm(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<watchdog_auth::dto::PasswordResetConfirm>,
) -> Response {
    match state.password_reset.confirm_reset(request, &ctx).await {
        Ok(()) => Json(json!({ "message": "Password updated" })).into_response(),
        Err(e) => api_error(&state, e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    filename: String,
    location_id: Uuid,
    default_supplier_id: Option<Uuid>,
    /// `csv` or `pdf`.
    connector: String,
    /// Connector configuration as a JSON string; validated against the
    /// connector's schema semantics at extraction time.
    config: Option<String>,
}

/// Stage an upload and enqueue its extraction job.
///
/// API-key callers are accepted alongside bearer tokens; both paths are
/// rate limited under their own scope.
async fn upload(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let uploaded_by = match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        Some(presented) => {
            let key = match state.api_keys.validate(presented).await {
                Ok(key) => key,
                Err(e) => return api_error(&state, e).into_response(),
            };
            let identity = RateIdentity::ApiKeyPrefix(key.key_prefix.clone());
            if let Err(e) = check_rate(&state, RateLimitScope::ApiKey, identity).await {
                return api_error(&state, e).into_response();
            }
            None
        }
        None => {
            let claims = match authenticate(&state, &headers).await {
                Ok(claims) => claims,
                Err(e) => return api_error(&state, e).into_response(),
            };
            let user_id = Uuid::parse_str(&claims.sub).ok();
            if let Some(user_id) = user_id {
                let identity = RateIdentity::User(user_id);
                if let Err(e) = check_rate(&state, RateLimitScope::Upload, identity).await {
                    return api_error(&state, e).into_response();
                }
            }
            user_id
        }
    };

    if body.is_empty() {
        return api_error(&state, Error::validation("Empty upload")).into_response();
    }

    // Stage the raw bytes; the extraction worker moves them into their
    // document key after ingest
    let staging_key = format!("staging/{}", Uuid::new_v4());
    if let Err(e) = state
        .storage
        .put(&staging_key, &body, "application/octet-stream")
        .await
    {
        return api_error(&state, e).into_response();
    }

    let connector_config = match params.config.as_deref() {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return api_error(
                    &state,
                    Error::validation(format!("Invalid connector config: {}", e)),
                )
                .into_response()
            }
        },
        None => serde_json::Value::Null,
    };

    let payload = JobPayload::Extraction {
        upload_key: staging_key.clone(),
        filename: params.filename,
        mime_type: headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        location_id: params.location_id,
        default_supplier_id: params.default_supplier_id,
        connector: params.connector,
        config: connector_config,
        uploaded_by,
    };

    let payload_value = match payload.to_value() {
        Ok(value) => value,
        Err(e) => return api_error(&state, e).into_response(),
    };

    match state
        .queues
        .extraction
        .enqueue(payload_value, EnqueueOptions::default())
        .await
    {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job_id.to_string(),
                "staging_key": staging_key,
                "request_id": ctx.request_id,
            })),
        )
            .into_response(),
        Err(e) => api_error(&state, e).into_response(),
    }
}

/// CSRF middleware: mutating requests must echo the cookie value in
/// `X-CSRF-Token`. API-key authenticated requests are exempt.
pub async fn csrf_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    use watchdog_core::security::CsrfService;

    let method = request.method().as_str().to_string();
    let exempt = request.headers().contains_key("x-api-key")
        || !CsrfService::method_requires_check(&method)
        // Credential acquisition happens before any CSRF cookie exists
        || matches!(
            request.uri().path(),
            "/auth/login" | "/auth/refresh" | "/auth/password-reset/request"
                | "/auth/password-reset/confirm"
        );

    if exempt {
        return next.run(request).await;
    }

    let cookie_token = request
        .headers()
        .get("cookie")
        .and_then(|value| value.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|part| {
                part.trim()
                    .strip_prefix("csrf_token=")
                    .map(str::to_string)
            })
        });

    let header_token = request
        .headers()
        .get("x-csrf-token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match (cookie_token, header_token) {
        (Some(cookie), Some(header)) => match state.csrf.validate(&cookie, &header) {
            Ok(()) => next.run(request).await,
            Err(e) => api_error(&state, e).into_response(),
        },
        _ => api_error(
            &state,
            Error::new(ErrorCode::CsrfValidationFailed, "CSRF token missing"),
        )
        .into_response(),
    }
}
