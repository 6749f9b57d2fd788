#![forbid(unsafe_code)]

//! Thin axum transport over [`Copilot`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use xlpilot_core::api::{
    ContinueResponse, ExecuteRequest, ExecuteResponse, RefineRequest, RefineResponse,
};
use xlpilot_core::Copilot;
use xlpilot_table::WorkbookDocument;
use xlpilot_types::{CopilotError, FileId, FileSchema};

#[derive(Clone)]
pub struct AppState {
    pub copilot: Arc<Copilot>,
}

/// Session-level failures become HTTP statuses; round-local ones travel in bodies.
pub struct ApiError(CopilotError);

impl From<CopilotError> for ApiError {
    fn from(e: CopilotError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CopilotError::SessionNotFound(_) | CopilotError::FileNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CopilotError::SessionBusy(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = json!({"error_kind": self.0.kind(), "message": self.0.to_string()});
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/tables", post(upload))
        .route("/api/file/:file_id/schema", get(schema))
        .route("/api/refine", post(refine))
        .route("/api/process", post(process))
        .route("/api/continue/:file_id", post(continue_from))
        .route("/api/download/:file_id", get(download))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn upload(
    State(state): State<AppState>,
    Json(doc): Json<WorkbookDocument>,
) -> Result<Json<FileSchema>, ApiError> {
    Ok(Json(state.copilot.ingest(doc).await?))
}

async fn schema(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
) -> Result<Json<FileSchema>, ApiError> {
    Ok(Json(state.copilot.schema(file_id).await?))
}

async fn refine(
    State(state): State<AppState>,
    Json(req): Json<RefineRequest>,
) -> Result<Json<RefineResponse>, ApiError> {
    Ok(Json(state.copilot.refine(req).await?))
}

async fn process(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    Ok(Json(state.copilot.execute(req).await?))
}

async fn continue_from(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
) -> Result<Json<ContinueResponse>, ApiError> {
    Ok(Json(state.copilot.continue_from(file_id).await?))
}

async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
) -> Result<Response, ApiError> {
    let doc = state.copilot.download(file_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", doc.file_name.replace('"', ""));
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(doc)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;
    use xlpilot_core::Settings;
    use xlpilot_planner::{PlannerReply, ScriptedPlanGenerator};
    use xlpilot_store::InMemoryTableStore;

    fn app(planner: Arc<ScriptedPlanGenerator>) -> Router {
        let copilot = Copilot::new(
            Settings::default(),
            Arc::new(InMemoryTableStore::new()),
            planner,
            None,
        );
        router(AppState {
            copilot: Arc::new(copilot),
        })
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn workbook() -> serde_json::Value {
        json!({
            "file_name": "sales.xlsx",
            "sheets": [{
                "name": "Sheet1",
                "columns": ["name", "amt"],
                "rows": [["A", 50], ["B", 100]]
            }]
        })
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = app(Arc::new(ScriptedPlanGenerator::new()));
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_refine_process_download() {
        let planner = Arc::new(ScriptedPlanGenerator::new());
        planner
            .push(PlannerReply::Plan {
                message: "ok".into(),
                plan: serde_json::from_value(json!({
                    "summary": "Sort by amount",
                    "operations": [{"type": "sort", "params": {"column": "amt", "order": "desc"}}]
                }))
                .unwrap(),
            })
            .await;
        let app = app(planner);

        let (status, schema) = call(&app, "POST", "/api/tables", Some(workbook())).await;
        assert_eq!(status, StatusCode::OK);
        let file_id = schema["file_id"].as_str().unwrap().to_string();
        assert_eq!(schema["sheets"][0]["columns"][1]["data_type"], "number");

        let (_, fetched) = call(&app, "GET", &format!("/api/file/{file_id}/schema"), None).await;
        assert_eq!(fetched, schema);

        let (status, refined) = call(
            &app,
            "POST",
            "/api/refine",
            Some(json!({"file_id": file_id, "user_input": "sort by amount, biggest first"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refined["status"], "ready");
        assert_eq!(refined["operation_plan"]["operations"][0]["type"], "SORT");
        let session_id = refined["session_id"].as_str().unwrap().to_string();

        let (status, done) = call(
            &app,
            "POST",
            "/api/process",
            Some(json!({"file_id": file_id, "session_id": session_id, "confirmed": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["success"], true);
        assert_eq!(done["summary"], "Sort by amount");
        let url = done["download_url"].as_str().unwrap().to_string();

        let (status, doc) = call(&app, "GET", &url, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(doc["file_name"], "processed_sales.xlsx");
        assert_eq!(doc["sheets"][0]["rows"][0][0], "B");

        let out_id = done["file_id"].as_str().unwrap();
        let (status, cont) = call(&app, "POST", &format!("/api/continue/{out_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(cont["file_id"], done["file_id"]);
        assert!(cont["session_id"].is_string());
    }

    #[tokio::test]
    async fn session_level_errors_map_to_statuses() {
        let app = app(Arc::new(ScriptedPlanGenerator::new()));
        let missing = FileId::new();

        let (status, body) = call(&app, "GET", &format!("/api/file/{missing}/schema"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_kind"], "file_not_found");

        let session_id = xlpilot_types::SessionId::new();
        let (status, _) = call(
            &app,
            "POST",
            "/api/process",
            Some(json!({"file_id": missing, "session_id": session_id, "confirmed": true})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let empty = json!({"file_name": "x.xlsx", "sheets": []});
        let (status, _) = call(&app, "POST", "/api/tables", Some(empty)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn planner_failure_is_reported_in_the_body() {
        let app = app(Arc::new(ScriptedPlanGenerator::new()));
        let (_, schema) = call(&app, "POST", "/api/tables", Some(workbook())).await;
        let (status, body) = call(
            &app,
            "POST",
            "/api/refine",
            Some(json!({"file_id": schema["file_id"], "user_input": "do something"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error_kind"], "plan_generator_failure");
    }
}
