use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use redis::AsyncCommands;
use serde_json::json;

/// Liveness/readiness probe: checks the database and the KV store.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = state.db.health_check().await.is_ok();

    let mut conn = state.redis.clone();
    let redis_ok = conn
        .set_ex::<_, _, ()>("health:probe", "1", 10)
        .await
        .is_ok();

    let healthy = db_ok && redis_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "database": db_ok,
            "kv_store": redis_ok,
        })),
    )
}
