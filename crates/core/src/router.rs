use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use warden_backup::BackupExtraField;
use warden_config::{EnsembleConfig, VersionedConfig};
use warden_ensemble::{SwitchKind, SystemState};
use warden_logindex::SearchFilter;

use crate::Context;

/// Uniform mutation response consumed by the admin console.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResult {
    /// True when the operation was accepted.
    pub succeeded: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl ApiResult {
    fn ok() -> Self {
        Self {
            succeeded: true,
            message: "OK".to_string(),
        }
    }

    fn ok_with(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
        }
    }
}

pub(crate) fn admin_router(context: Arc<Context>) -> Router {
    Router::new()
        .route("/warden/v1/ping", get(ping))
        .route("/warden/v1/state", get(system_state))
        .route("/warden/v1/backup-config", get(backup_config))
        .route("/warden/v1/config/set", post(set_config))
        .route("/warden/v1/config/set-rolling", post(set_config_rolling))
        .route("/warden/v1/config/rollback-rolling", get(rollback_rolling))
        .route(
            "/warden/v1/config/force-commit-rolling",
            get(force_commit_rolling),
        )
        .route("/warden/v1/index/indexed-logs", get(indexed_logs))
        .route("/warden/v1/index/new-index", post(new_index))
        .route("/warden/v1/index/job/{id}", get(index_job))
        .route("/warden/v1/index/{name}", delete(delete_index))
        .route("/warden/v1/index/cache-search", post(cache_search))
        .route("/warden/v1/index/dataTable/{name}/{handle}", get(data_table))
        .route(
            "/warden/v1/index/release-cache/{name}/{handle}",
            get(release_cache),
        )
        .route("/warden/v1/explorer/node", get(explorer_node))
        .route("/warden/v1/explorer/node-data", get(explorer_node_data))
        .route("/warden/v1/cluster/state", get(cluster_state))
        .route("/warden/v1/cluster/restart", get(cluster_restart))
        .route("/warden/v1/cluster/push-config", post(push_config))
        .route("/warden/v1/cluster/4ltr/{word}", get(cluster_four_letter))
        .route("/warden/v1/cluster/set/{kind}/{value}", get(set_switch))
        .route("/warden/v1/stop", get(stop))
        .route("/warden/v1/tabs", get(tabs))
        .route("/warden/v1/tab/{index}", get(tab_content))
        .with_state(context)
}

async fn ping() -> &'static str {
    "pong"
}

async fn system_state(State(ctx): State<Arc<Context>>) -> Json<SystemState> {
    Json(ctx.controller.snapshot().await)
}

async fn backup_config(State(ctx): State<Arc<Context>>) -> Json<Vec<BackupExtraField>> {
    Json(ctx.backup.fields())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigPayload {
    /// Version the caller read before editing; omitted means "latest".
    expected_version: Option<u64>,
    #[serde(flatten)]
    config: EnsembleConfig,
}

impl ConfigPayload {
    async fn expected(&self, ctx: &Context) -> u64 {
        match self.expected_version {
            Some(version) => version,
            None => ctx.config_store.get().await.version,
        }
    }
}

async fn set_config(
    State(ctx): State<Arc<Context>>,
    Json(payload): Json<ConfigPayload>,
) -> Json<ApiResult> {
    let expected = payload.expected(&ctx).await;
    match ctx.coordinator.apply_at_once(expected, payload.config).await {
        Ok(report) if report.succeeded() => Json(ApiResult::ok()),
        Ok(report) => {
            let failed: Vec<&str> = report.failed.iter().map(|f| f.hostname.as_str()).collect();
            Json(ApiResult::failed(format!(
                "stored as version {} but some members did not acknowledge: {}",
                report.version,
                failed.join(", ")
            )))
        }
        Err(e) => Json(ApiResult::failed(e.to_string())),
    }
}

async fn set_config_rolling(
    State(ctx): State<Arc<Context>>,
    Json(payload): Json<ConfigPayload>,
) -> Json<ApiResult> {
    let expected = payload.expected(&ctx).await;
    match ctx.coordinator.apply_rolling(expected, payload.config).await {
        Ok(()) => Json(ApiResult::ok_with("rolling rollout started")),
        Err(e) => Json(ApiResult::failed(e.to_string())),
    }
}

async fn rollback_rolling(State(ctx): State<Arc<Context>>) -> Json<ApiResult> {
    match ctx.coordinator.cancel(false).await {
        Ok(_) => Json(ApiResult::ok_with("rollout rolled back")),
        Err(e) => Json(ApiResult::failed(e.to_string())),
    }
}

async fn force_commit_rolling(State(ctx): State<Arc<Context>>) -> Json<ApiResult> {
    match ctx.coordinator.cancel(true).await {
        Ok(_) => Json(ApiResult::ok_with("rollout force-committed")),
        Err(e) => Json(ApiResult::failed(e.to_string())),
    }
}

async fn indexed_logs(State(ctx): State<Arc<Context>>) -> Json<Value> {
    Json(json!({ "index": ctx.engine.list_indexes() }))
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NewIndexRequest {
    path: Option<String>,
}

async fn new_index(
    State(ctx): State<Arc<Context>>,
    body: Option<Json<NewIndexRequest>>,
) -> Response {
    let source = body.and_then(|Json(b)| b.path).map(PathBuf::from);
    match ctx.engine.begin_build(source) {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "succeeded": true, "message": "index build started", "id": id })),
        )
            .into_response(),
        Err(e) => Json(ApiResult::failed(e.to_string())).into_response(),
    }
}

async fn index_job(State(ctx): State<Arc<Context>>, Path(id): Path<String>) -> Response {
    ctx.engine.job(&id).map_or_else(
        || (StatusCode::NOT_FOUND, Json(ApiResult::failed("job not found"))).into_response(),
        |job| Json(job).into_response(),
    )
}

async fn delete_index(State(ctx): State<Arc<Context>>, Path(name): Path<String>) -> Response {
    match ctx.engine.delete_index(&name) {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "succeeded": true, "message": "index marked for deletion", "id": id })),
        )
            .into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(ApiResult::failed(e.to_string()))).into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheSearchRequest {
    index_name: String,
    reuse_handle: Option<String>,
    #[serde(flatten)]
    filter: SearchFilter,
}

async fn cache_search(
    State(ctx): State<Arc<Context>>,
    Json(request): Json<CacheSearchRequest>,
) -> Response {
    match ctx
        .engine
        .search(
            &request.index_name,
            &request.filter,
            request.reuse_handle.as_deref(),
        )
        .await
    {
        Ok(id) => Json(json!({ "id": id })).into_response(),
        Err(e @ warden_logindex::Error::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, Json(ApiResult::failed(e.to_string()))).into_response()
        }
        Err(e) => Json(ApiResult::failed(e.to_string())).into_response(),
    }
}

fn default_page_length() -> usize {
    25
}

#[derive(Deserialize)]
struct PagingQuery {
    #[serde(default, rename = "sEcho")]
    s_echo: Option<String>,
    #[serde(default, rename = "iDisplayStart")]
    i_display_start: usize,
    #[serde(default = "default_page_length", rename = "iDisplayLength")]
    i_display_length: usize,
}

async fn data_table(
    State(ctx): State<Arc<Context>>,
    Path((_name, handle)): Path<(String, String)>,
    Query(paging): Query<PagingQuery>,
) -> Response {
    match ctx
        .engine
        .page(&handle, paging.i_display_start, paging.i_display_length)
    {
        Ok(page) => {
            let rows: Vec<Value> = page
                .rows
                .iter()
                .map(|r| {
                    json!([
                        r.time_ms,
                        serde_json::to_value(r.op).unwrap_or(Value::Null),
                        r.path.as_deref().unwrap_or(""),
                        r.payload_bytes,
                    ])
                })
                .collect();
            Json(json!({
                "sEcho": paging.s_echo.unwrap_or_default(),
                "iTotalRecords": page.total_matched,
                "iTotalDisplayRecords": page.total_matched,
                "aaData": rows,
            }))
            .into_response()
        }
        Err(e) => (StatusCode::NOT_FOUND, Json(ApiResult::failed(e.to_string()))).into_response(),
    }
}

async fn release_cache(
    State(ctx): State<Arc<Context>>,
    Path((_name, handle)): Path<(String, String)>,
) -> Json<ApiResult> {
    ctx.engine.release_handle(&handle);
    Json(ApiResult::ok())
}

#[derive(Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

async fn explorer_node(
    State(ctx): State<Arc<Context>>,
    Query(query): Query<KeyQuery>,
) -> Response {
    let path = query.key.unwrap_or_else(|| "/".to_string());
    let explorer = ctx.controller.explorer().await;
    match explorer.children(&path).await {
        Ok(children) => {
            let base = if path == "/" { String::new() } else { path };
            let nodes: Vec<Value> = children
                .iter()
                .map(|child| json!({ "title": child, "key": format!("{base}/{child}"), "isLazy": true }))
                .collect();
            Json(nodes).into_response()
        }
        Err(e) => Json(ApiResult::failed(e.to_string())).into_response(),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

async fn explorer_node_data(
    State(ctx): State<Arc<Context>>,
    Query(query): Query<KeyQuery>,
) -> Response {
    let Some(path) = query.key else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResult::failed("missing key")),
        )
            .into_response();
    };
    let explorer = ctx.controller.explorer().await;
    match explorer.node_data(&path).await {
        Ok(node) => Json(json!({
            "path": path,
            "str": String::from_utf8_lossy(&node.data),
            "bytes": to_hex(&node.data),
            "stat": node.stat,
        }))
        .into_response(),
        Err(e) => Json(ApiResult::failed(e.to_string())).into_response(),
    }
}

async fn cluster_state(State(ctx): State<Arc<Context>>) -> Json<Value> {
    let probe = ctx.controller.local_probe().await;
    Json(json!({
        "switches": ctx.controller.switches(),
        "state": probe.state.code(),
        "description": probe.state.description(),
    }))
}

async fn cluster_restart(State(ctx): State<Arc<Context>>) -> Json<ApiResult> {
    ctx.controller.restart_instance();
    Json(ApiResult::ok())
}

async fn push_config(
    State(ctx): State<Arc<Context>>,
    Json(remote): Json<VersionedConfig>,
) -> Json<ApiResult> {
    match ctx.config_store.accept(remote).await {
        Ok(true) => Json(ApiResult::ok_with("configuration adopted")),
        Ok(false) => Json(ApiResult::ok_with("configuration already current")),
        Err(e) => Json(ApiResult::failed(e.to_string())),
    }
}

async fn cluster_four_letter(
    State(ctx): State<Arc<Context>>,
    Path(word): Path<String>,
) -> Response {
    match ctx.controller.four_letter_word(&word).await {
        Ok(text) => text.into_response(),
        Err(warden_ensemble::Error::InvalidWord(_)) => "* unknown *".into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}

async fn set_switch(
    State(ctx): State<Arc<Context>>,
    Path((kind, value)): Path<(String, bool)>,
) -> Response {
    match kind.parse::<SwitchKind>() {
        Ok(kind) => {
            ctx.controller.set_switch(kind, value);
            Json(ApiResult::ok()).into_response()
        }
        Err(()) => (
            StatusCode::NOT_FOUND,
            Json(ApiResult::failed("unknown switch")),
        )
            .into_response(),
    }
}

async fn stop(State(ctx): State<Arc<Context>>) -> Json<ApiResult> {
    ctx.controller.restart_instance();
    Json(ApiResult::ok())
}

/// Descriptor of one custom tab, as listed by the `tabs` endpoint.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSpec {
    /// Display name.
    pub name: String,
    /// Relative URL of the tab content.
    pub url: String,
}

async fn tabs(State(ctx): State<Arc<Context>>) -> Json<Vec<TabSpec>> {
    Json(
        ctx.tabs
            .iter()
            .enumerate()
            .map(|(index, tab)| TabSpec {
                name: tab.name.clone(),
                url: format!("tab/{index}"),
            })
            .collect(),
    )
}

async fn tab_content(State(ctx): State<Arc<Context>>, Path(index): Path<usize>) -> Response {
    ctx.tabs.get(index).map_or_else(
        || StatusCode::NOT_FOUND.into_response(),
        |tab| tab.content.clone().into_response(),
    )
}
