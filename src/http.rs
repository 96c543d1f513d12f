use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::blocks::{BlockLibrary, BlockTemplate};
use crate::merge::{RejectedFile, RenamedSchema, UploadedFile};
use crate::vault::SchemaVault;
use crate::{SchemaRecord, VaultError};

/// Shared server state. The mutex serializes store operations so one user
/// action completes its load+mutate+save cycle before the next one starts.
pub struct AppState {
    vault: Mutex<SchemaVault>,
    blocks: BlockLibrary,
}

impl AppState {
    pub fn new(vault: SchemaVault, blocks: BlockLibrary) -> Self {
        Self {
            vault: Mutex::new(vault),
            blocks,
        }
    }
}

/// Error shape returned to the front-end: a status plus `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(name: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("Schema '{name}' not found"))
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        let status = match &err {
            VaultError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            VaultError::Format(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VaultError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/schemas", get(list_schemas))
        .route(
            "/api/schemas/{name}",
            get(view_schema).put(save_schema).delete(delete_schema),
        )
        .route("/api/schemas/{name}/export", get(export_schema))
        .route("/api/schemas/merge", post(merge_schemas))
        .route("/api/schemas/import", post(import_schema))
        .route("/api/blocks", get(list_blocks))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list_schemas(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let vault = state.vault.lock().await;
    let schemas = vault.load()?;
    Ok(Json(schemas.into_keys().collect()))
}

async fn view_schema(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<SchemaRecord>, ApiError> {
    let vault = state.vault.lock().await;
    let schemas = vault.load()?;
    match schemas.get(&name) {
        Some(record) => Ok(Json(record.clone())),
        None => Err(ApiError::not_found(&name)),
    }
}

#[derive(Serialize)]
struct SaveResponse {
    name: String,
    saved: bool,
}

async fn save_schema(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(record): Json<SchemaRecord>,
) -> Result<Json<SaveResponse>, ApiError> {
    let vault = state.vault.lock().await;
    vault.save_one(&name, record)?;
    info!("saved schema {name}");
    Ok(Json(SaveResponse { name, saved: true }))
}

#[derive(Serialize)]
struct DeleteResponse {
    name: String,
    deleted: bool,
}

async fn delete_schema(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let vault = state.vault.lock().await;
    let deleted = vault.delete(&name)?;
    if deleted {
        info!("deleted schema {name}");
    }
    Ok(Json(DeleteResponse { name, deleted }))
}

#[derive(Serialize)]
struct MergeResponse {
    schemas: Vec<String>,
    renamed: Vec<RenamedSchema>,
    rejected: Vec<RejectedFile>,
}

async fn merge_schemas(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<MergeResponse>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field
            .file_name()
            .map(str::to_owned)
            .or_else(|| field.name().map(str::to_owned))
            .unwrap_or_default();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        files.push(UploadedFile {
            name,
            bytes: bytes.to_vec(),
        });
    }
    if files.is_empty() {
        return Err(ApiError::bad_request("No files selected for merging"));
    }

    let vault = state.vault.lock().await;
    let report = vault.merge(&files)?;
    info!(
        "merged {} uploaded file(s), {} rejected",
        files.len() - report.outcome.rejected.len(),
        report.outcome.rejected.len()
    );
    Ok(Json(MergeResponse {
        schemas: report.schemas.into_keys().collect(),
        renamed: report.outcome.renamed,
        rejected: report.outcome.rejected,
    }))
}

#[derive(Serialize)]
struct ImportResponse {
    name: String,
    imported: bool,
}

async fn import_schema(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ImportResponse>, ApiError> {
    let mut name: Option<String> = None;
    let mut payload: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let field_name = field.name().map(str::to_owned);
        if field_name.as_deref() == Some("name") {
            name = Some(
                field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?,
            );
        } else {
            payload = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?
                    .to_vec(),
            );
        }
    }

    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::bad_request("A name is required to save the imported schema"))?;
    let payload = payload.ok_or_else(|| ApiError::bad_request("No JSON file supplied"))?;

    let vault = state.vault.lock().await;
    let record = vault.import_one(&payload)?;
    vault.save_one(&name, record)?;
    info!("imported schema {name}");
    Ok(Json(ImportResponse {
        name,
        imported: true,
    }))
}

async fn export_schema(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let vault = state.vault.lock().await;
    let schemas = vault.load()?;
    let record = schemas.get(&name).ok_or_else(|| ApiError::not_found(&name))?;
    let body = vault.export_one(record)?;
    let headers = [
        (header::CONTENT_TYPE, "application/json".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}.json\""),
        ),
    ];
    Ok((headers, body).into_response())
}

async fn list_blocks(State(state): State<Arc<AppState>>) -> Json<Vec<BlockTemplate>> {
    Json(state.blocks.templates().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let vault = SchemaVault::new(dir.path().join("schemas.pkl"));
        let state = Arc::new(AppState::new(vault, BlockLibrary::builtin()));
        (dir, router(state))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    const BOUNDARY: &str = "flowvault-test-boundary";

    fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match filename {
                Some(filename) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn save_list_view_delete_round_trip() {
        let (_dir, app) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/schemas/demo",
                json!({"nodes": []}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get_request("/api/schemas")).await.unwrap();
        assert_eq!(body_json(response).await, json!(["demo"]));

        let response = app
            .clone()
            .oneshot(get_request("/api/schemas/demo"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"nodes": []}));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/schemas/demo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"name": "demo", "deleted": true})
        );

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/schemas/demo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"name": "demo", "deleted": false})
        );

        let response = app
            .clone()
            .oneshot(get_request("/api/schemas/demo"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn merge_reports_renames_and_rejections() {
        let (_dir, app) = test_app();

        let response = app
            .clone()
            .oneshot(multipart_request(
                "/api/schemas/merge",
                &[
                    ("files", Some("one.barfi"), r#"{"A": {"nodes": [1]}}"#),
                    ("files", Some("two.barfi"), r#"{"A": {"nodes": [2]}}"#),
                    ("files", Some("x.txt"), "plain text"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["schemas"], json!(["merged_schema"]));
        assert_eq!(body["renamed"][0]["original"], "A");
        assert_eq!(body["renamed"][0]["stored_as"], "A_merged");
        assert_eq!(body["rejected"][0]["name"], "x.txt");

        let response = app
            .clone()
            .oneshot(get_request("/api/schemas/merged_schema"))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"A": {"nodes": [1]}, "A_merged": {"nodes": [2]}})
        );
    }

    #[tokio::test]
    async fn merge_with_no_files_is_a_bad_request() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(multipart_request("/api/schemas/merge", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn import_needs_a_name_and_valid_json() {
        let (_dir, app) = test_app();

        let response = app
            .clone()
            .oneshot(multipart_request(
                "/api/schemas/import",
                &[("schema", Some("up.json"), r#"{"nodes": []}"#)],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(multipart_request(
                "/api/schemas/import",
                &[
                    ("name", None, "bad"),
                    ("schema", Some("up.json"), "{not json"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .clone()
            .oneshot(multipart_request(
                "/api/schemas/import",
                &[
                    ("name", None, "imported"),
                    ("schema", Some("up.json"), r#"{"nodes": [7]}"#),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get_request("/api/schemas/imported"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!({"nodes": [7]}));
    }

    #[tokio::test]
    async fn export_delivers_a_named_json_artifact() {
        let (_dir, app) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/schemas/plant",
                json!({"nodes": [1]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get_request("/api/schemas/plant/export"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"plant.json\""
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json!({"nodes": [1]}));

        let response = app
            .oneshot(get_request("/api/schemas/ghost/export"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blocks_endpoint_lists_the_palette() {
        let (_dir, app) = test_app();
        let response = app.oneshot(get_request("/api/blocks")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Feed", "Splitter", "Mixer", "Result"]);
        assert_eq!(body[0]["rule"], json!({"kind": "emit", "value": 4.0}));
    }
}
