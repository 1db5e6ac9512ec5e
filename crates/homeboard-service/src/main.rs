use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use homeboard_core::EntityKind;
use homeboard_store_file::{JsonDocumentStore, MalformedDocument};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

#[derive(Debug, Parser)]
#[command(name = "homeboard-service")]
#[command(about = "Local HTTP service for Homeboard collections and pages")]
struct Args {
    #[arg(long, default_value = "./data")]
    data: PathBuf,
    #[arg(long, default_value = "./public")]
    public: PathBuf,
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
}

/// One async mutex per collection. A whole-document replace is not atomic at
/// the store level, so concurrent POSTs to the same collection are serialized
/// here; different collections never contend.
#[derive(Debug, Default)]
struct CollectionLocks {
    tasks: Mutex<()>,
    bookmarks: Mutex<()>,
    journal: Mutex<()>,
}

impl CollectionLocks {
    fn for_kind(&self, kind: EntityKind) -> &Mutex<()> {
        match kind {
            EntityKind::Task => &self.tasks,
            EntityKind::Bookmark => &self.bookmarks,
            EntityKind::Journal => &self.journal,
        }
    }
}

#[derive(Clone)]
struct ServiceState {
    store: Arc<JsonDocumentStore>,
    public_dir: Arc<PathBuf>,
    locks: Arc<CollectionLocks>,
}

impl ServiceState {
    fn new(data_dir: &std::path::Path, public_dir: &std::path::Path) -> Result<Self> {
        Ok(Self {
            store: Arc::new(JsonDocumentStore::open(data_dir)?),
            public_dir: Arc::new(public_dir.to_path_buf()),
            locks: Arc::new(CollectionLocks::default()),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct SaveReply {
    success: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[derive(Debug)]
struct ServiceError {
    status: StatusCode,
    error: String,
}

impl ServiceError {
    fn unknown_collection(name: &str) -> Self {
        Self { status: StatusCode::NOT_FOUND, error: format!("unknown collection: {name}") }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, error: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, error: message.into() }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = ErrorBody { success: false, error: self.error };
        (self.status, Json(body)).into_response()
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/:collection", get(collection_get))
        .route("/api/:collection", post(collection_post))
        .fallback(get(static_file))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();
    let state = ServiceState::new(&args.data, &args.public)?;
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "homeboard service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Full collection in its wire shape. An absent document reads as the kind's
/// empty shape, so clients never see a 404 for a collection that simply has
/// no data yet.
async fn collection_get(
    State(state): State<ServiceState>,
    Path(collection): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    let kind = EntityKind::from_collection_name(&collection)
        .ok_or_else(|| ServiceError::unknown_collection(&collection))?;
    let value = state
        .store
        .read(kind.collection_name())
        .map_err(|err| ServiceError::internal(err.to_string()))?;
    Ok(Json(value.unwrap_or_else(|| kind.empty_wire())))
}

/// Whole-collection replace. The body is validated as JSON and stored as
/// sent; a malformed body is rejected without touching the document.
async fn collection_post(
    State(state): State<ServiceState>,
    Path(collection): Path<String>,
    body: String,
) -> Result<Json<SaveReply>, ServiceError> {
    let kind = EntityKind::from_collection_name(&collection)
        .ok_or_else(|| ServiceError::unknown_collection(&collection))?;
    let _guard = state.locks.for_kind(kind).lock().await;
    match state.store.replace_raw(kind.collection_name(), &body) {
        Ok(_) => {
            tracing::debug!(collection = kind.collection_name(), "collection replaced");
            Ok(Json(SaveReply { success: true }))
        }
        Err(err) if err.downcast_ref::<MalformedDocument>().is_some() => {
            Err(ServiceError::bad_request(err.to_string()))
        }
        Err(err) => Err(ServiceError::internal(err.to_string())),
    }
}

async fn static_file(State(state): State<ServiceState>, uri: axum::http::Uri) -> Response {
    let path = uri.path();
    if path == "/" {
        return (StatusCode::FOUND, [(http::header::LOCATION, "/pages/index.html")], "")
            .into_response();
    }
    match serve_public(&state, path.trim_start_matches('/')).await {
        Some(response) => response,
        None => not_found_page(&state).await,
    }
}

/// Resolves a request path inside the public directory. Any path that walks
/// outside the public root, via `..` segments or symlinks, reads as missing.
async fn serve_public(state: &ServiceState, relative: &str) -> Option<Response> {
    if relative.is_empty() {
        return None;
    }
    let rel = std::path::Path::new(relative);
    if !rel.components().all(|part| matches!(part, std::path::Component::Normal(_))) {
        return None;
    }
    let root = state.public_dir.canonicalize().ok()?;
    let resolved = state.public_dir.join(rel).canonicalize().ok()?;
    if !resolved.starts_with(&root) {
        return None;
    }
    let bytes = tokio::fs::read(&resolved).await.ok()?;
    let content_type = content_type_for(&resolved);
    Some((StatusCode::OK, [(http::header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn not_found_page(state: &ServiceState) -> Response {
    let fallback = state.public_dir.join("pages").join("404.html");
    match tokio::fs::read(&fallback).await {
        Ok(bytes) => {
            (StatusCode::NOT_FOUND, [(http::header::CONTENT_TYPE, "text/html")], bytes)
                .into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use tower::ServiceExt;

    fn unique_temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("homeboard-service-{label}-{}", ulid::Ulid::new()))
    }

    fn write_fixture(path: &std::path::Path, contents: &str) {
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                panic!("failed to create fixture dir {}: {err}", parent.display());
            }
        }
        if let Err(err) = std::fs::write(path, contents) {
            panic!("failed to write fixture {}: {err}", path.display());
        }
    }

    fn test_state() -> ServiceState {
        let data = unique_temp_dir("data");
        let public = unique_temp_dir("public");
        write_fixture(&public.join("pages").join("index.html"), "<h1>Homeboard</h1>");
        write_fixture(&public.join("pages").join("404.html"), "<h1>missing</h1>");
        write_fixture(&public.join("css").join("style.css"), "body { margin: 0; }");
        match ServiceState::new(&data, &public) {
            Ok(state) => state,
            Err(err) => panic!("failed to build service state: {err}"),
        }
    }

    fn get_request(uri: &str) -> Request<axum::body::Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(axum::body::Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    fn post_request(uri: &str, body: &str) -> Request<axum::body::Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    async fn send(router: Router, request: Request<axum::body::Body>) -> Response {
        match router.oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_bytes(response: Response) -> Vec<u8> {
        match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => panic!("failed to read response body: {err}"),
        }
    }

    async fn response_json(response: Response) -> Value {
        let bytes = response_bytes(response).await;
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}"),
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = app(test_state());
        let response = send(router, get_request("/api/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value.get("status").and_then(Value::as_str), Some("ok"));
    }

    #[tokio::test]
    async fn empty_collections_have_their_wire_shape() {
        let state = test_state();
        let tasks = send(app(state.clone()), get_request("/api/tasks")).await;
        assert_eq!(tasks.status(), StatusCode::OK);
        assert_eq!(response_json(tasks).await, serde_json::json!({}));

        let bookmarks = send(app(state), get_request("/api/bookmarks")).await;
        assert_eq!(bookmarks.status(), StatusCode::OK);
        assert_eq!(response_json(bookmarks).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn post_then_get_round_trips_the_document() {
        let state = test_state();
        let document = serde_json::json!({
            "2025-01-15": [{"id": "01JGME9W2P5V9XH4NRPWS2M8T0", "text": "buy milk", "completed": false}]
        });

        let posted =
            send(app(state.clone()), post_request("/api/tasks", &document.to_string())).await;
        assert_eq!(posted.status(), StatusCode::OK);
        assert_eq!(response_json(posted).await, serde_json::json!({"success": true}));

        let fetched = send(app(state), get_request("/api/tasks")).await;
        assert_eq!(response_json(fetched).await, document);
    }

    #[tokio::test]
    async fn second_post_replaces_the_first() {
        let state = test_state();
        let first = serde_json::json!({"2025-01-15": [{"text": "a"}]});
        let second = serde_json::json!({"2025-01-16": [{"text": "b"}]});

        let _ = send(app(state.clone()), post_request("/api/tasks", &first.to_string())).await;
        let _ = send(app(state.clone()), post_request("/api/tasks", &second.to_string())).await;

        let fetched = send(app(state), get_request("/api/tasks")).await;
        assert_eq!(response_json(fetched).await, second);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_and_leaves_the_document_alone() {
        let state = test_state();
        let response =
            send(app(state.clone()), post_request("/api/tasks", "{not valid json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = response_json(response).await;
        assert_eq!(value.get("success").and_then(Value::as_bool), Some(false));

        let fetched = send(app(state), get_request("/api/tasks")).await;
        assert_eq!(response_json(fetched).await, serde_json::json!({}));
    }

    #[tokio::test]
    async fn unknown_collection_is_a_404() {
        let state = test_state();
        let fetched = send(app(state.clone()), get_request("/api/notes")).await;
        assert_eq!(fetched.status(), StatusCode::NOT_FOUND);
        let value = response_json(fetched).await;
        assert_eq!(value.get("success").and_then(Value::as_bool), Some(false));

        let posted = send(app(state), post_request("/api/notes", "{}")).await;
        assert_eq!(posted.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn root_redirects_to_the_index_page() {
        let response = send(app(test_state()), get_request("/")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get(http::header::LOCATION)
            .and_then(|value| value.to_str().ok());
        assert_eq!(location, Some("/pages/index.html"));
    }

    #[tokio::test]
    async fn static_files_are_served_with_their_content_type() {
        let response = send(app(test_state()), get_request("/css/style.css")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        assert_eq!(content_type.as_deref(), Some("text/css"));
        assert_eq!(response_bytes(response).await, b"body { margin: 0; }");
    }

    #[tokio::test]
    async fn traversal_outside_the_public_root_is_refused() {
        let response = send(app(test_state()), get_request("/../Cargo.toml")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_page_serves_the_custom_404() {
        let response = send(app(test_state()), get_request("/pages/nope.html")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response_bytes(response).await, b"<h1>missing</h1>");
    }
}
