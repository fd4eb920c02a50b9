use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::attach_identity;
use crate::error::ApiError;
use crate::models::{SearchRequest, SearchResponse, normalize_medicine_name};
use crate::rate_limiter::rate_limit;
use crate::state::SharedState;

pub fn app_router(state: SharedState) -> Router {
    let search = Router::new()
        .route("/api/search", post(search_handler))
        .route_layer(middleware::from_fn_with_state(
            state.search_limiter.clone(),
            rate_limit,
        ));

    let mut router = Router::new()
        .route("/api/health", get(health_handler))
        .merge(search)
        .fallback(not_found_handler);

    if let Some(signer) = &state.signer {
        router = router.layer(middleware::from_fn_with_state(
            signer.clone(),
            attach_identity,
        ));
    }

    router
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| *o != "*")
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60))
}

async fn health_handler() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "service": "medicine-alternatives-api"})),
    )
}

async fn search_handler(
    State(state): State<SharedState>,
    Json(body): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = body.medicine_name.as_deref().unwrap_or_default();
    let normalized = normalize_medicine_name(name)
        .ok_or_else(|| ApiError::ValidationError("Medicine name required".to_string()))?;

    if let Some(data) = state.cache.get(&normalized).await {
        tracing::debug!("Search cache hit for {}", normalized);
        return Ok((
            StatusCode::OK,
            Json(SearchResponse {
                success: true,
                data,
                cached: true,
            }),
        ));
    }

    let data = state.provider.fetch_alternatives(name.trim()).await?;
    state.cache.put(&normalized, &data).await;

    Ok((
        StatusCode::OK,
        Json(SearchResponse {
            success: true,
            data,
            cached: false,
        }),
    ))
}

async fn not_found_handler() -> ApiError {
    ApiError::NotFound("Route not found".to_string())
}
