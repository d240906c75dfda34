use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, FromRequest, Path, Query, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    config::{CommitFailurePolicy, Config},
    redirect::{self, RedirectResult},
    store::{Entries, PreferenceStore, StoreError, StoreName},
};


#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<PreferenceStore>,
}

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    status: StatusCode,
    details: Map<String, Value>,
}

impl ApiError {
    fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
            details: Map::new(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal", StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match &value {
            StoreError::InvalidStoreName { name, .. } => {
                let name = name.clone();
                ApiError::invalid_request(value.to_string()).with_detail("store", name)
            }
            StoreError::CommitRejected { store }
            | StoreError::SchemaVersionMismatch { store, .. } => {
                let store = store.clone();
                ApiError::internal(value.to_string()).with_detail("store", store)
            }
            StoreError::Io(_) | StoreError::SerdeJson(_) => ApiError::internal(value.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    details: Map<String, Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S>,
    <axum::Json<T> as FromRequest<S>>::Rejection: std::fmt::Display,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::invalid_request(e.to_string()))?;
        Ok(Self(value))
    }
}

#[derive(Serialize)]
struct Items<T> {
    items: T,
}

pub fn build_router(config: Config, store: Arc<PreferenceStore>) -> Router {
    let app_state = AppState {
        config: Arc::new(config),
        store,
    };

    let api = Router::new()
        .route("/health", get(health))
        .route("/stores/:store/entries", get(list_entries))
        .route(
            "/stores/:store/entries/:key",
            get(get_entry).put(put_entry).delete(delete_entry),
        )
        .route("/redirect", get(get_redirect).post(apply_redirect))
        .fallback(fallback_not_found);

    Router::new()
        .nest("/api", api)
        .fallback(fallback_not_found)
        .layer(Extension(app_state))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": crate::version::VERSION,
    }))
}

async fn fallback_not_found() -> ApiError {
    ApiError::not_found("not found")
}

fn parse_store_name(raw: &str) -> Result<StoreName, ApiError> {
    StoreName::parse(raw).map_err(ApiError::from)
}

async fn list_entries(
    Extension(state): Extension<AppState>,
    Path(store): Path<String>,
) -> Result<Json<Items<Entries>>, ApiError> {
    let name = parse_store_name(&store)?;
    let entries = state.store.try_entries(name.as_str())?;
    Ok(Json(Items { items: entries }))
}

#[derive(Debug, Deserialize)]
struct GetEntryQuery {
    default: Option<String>,
}

#[derive(Debug, Serialize)]
struct EntryResponse {
    key: String,
    value: String,
}

async fn get_entry(
    Extension(state): Extension<AppState>,
    Path((store, key)): Path<(String, String)>,
    Query(query): Query<GetEntryQuery>,
) -> Result<Json<EntryResponse>, ApiError> {
    let name = parse_store_name(&store)?;
    let value = match query.default {
        Some(default) => state.store.get(name.as_str(), &key, &default),
        None => state
            .store
            .try_get(name.as_str(), &key)?
            .ok_or_else(|| ApiError::not_found(format!("key not found: {key}")))?,
    };
    Ok(Json(EntryResponse { key, value }))
}

#[derive(Debug, Deserialize)]
struct PutEntryRequest {
    value: String,
}

#[derive(Debug, Serialize)]
struct CommitResponse {
    committed: bool,
}

async fn put_entry(
    Extension(state): Extension<AppState>,
    Path((store, key)): Path<(String, String)>,
    ApiJson(req): ApiJson<PutEntryRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    let name = parse_store_name(&store)?;
    let committed = match state.config.commit_failure_policy {
        CommitFailurePolicy::Silent => state.store.put(name.as_str(), &key, &req.value),
        CommitFailurePolicy::Report => {
            state.store.try_put(name.as_str(), &key, &req.value)?;
            true
        }
    };
    Ok(Json(CommitResponse { committed }))
}

async fn delete_entry(
    Extension(state): Extension<AppState>,
    Path((store, key)): Path<(String, String)>,
) -> Result<Json<CommitResponse>, ApiError> {
    let name = parse_store_name(&store)?;
    let committed = match state.config.commit_failure_policy {
        CommitFailurePolicy::Silent => state.store.remove(name.as_str(), &key),
        CommitFailurePolicy::Report => {
            state.store.try_remove(name.as_str(), &key)?;
            true
        }
    };
    Ok(Json(CommitResponse { committed }))
}

#[derive(Debug, Serialize, Deserialize)]
struct RedirectText {
    text: String,
}

#[derive(Debug, Serialize)]
struct RedirectResponse {
    result: RedirectResult,
}

async fn get_redirect(Extension(state): Extension<AppState>) -> Json<RedirectText> {
    Json(RedirectText {
        text: redirect::load_text(&state.store),
    })
}

async fn apply_redirect(
    Extension(state): Extension<AppState>,
    ApiJson(req): ApiJson<RedirectText>,
) -> Result<Json<RedirectResponse>, ApiError> {
    let result = redirect::apply_text(
        &state.store,
        &req.text,
        state.config.commit_failure_policy,
    )?;
    Ok(Json(RedirectResponse { result }))
}
