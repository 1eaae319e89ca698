//! Handler模块

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use common::errors::AppError;
use common::middleware::{AppJson, AppPath, Caller};
use common::models::{
    ConnectRequest, ConnectResponse, DeleteOutcome, DisconnectResponse, DocumentView, NameRequest,
    SessionStatus, UpdateOutcome,
};
use common::response::ApiResponse;

use crate::service::GatewayServiceTrait;
use crate::state::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// Namespace touched by a create or drop call.
#[derive(Debug, Serialize, ToSchema)]
pub struct NamespaceResult {
    /// 数据库或集合名称
    pub name: String,
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务名称
    pub service: String,
    /// 服务版本
    pub version: String,
    /// 当前时间戳
    pub timestamp: DateTime<Utc>,
    /// 已注册的用户会话数
    pub sessions: usize,
}

fn respond<T: Serialize>(state: &AppState, caller: &Caller, data: T) -> ApiResult<T> {
    let mut response = ApiResponse::ok_with_service(data, state.config.service_name.clone());
    if let Some(request_id) = &caller.request_id {
        response = response.with_request_id(request_id.as_str());
    }
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// 会话
// ---------------------------------------------------------------------------

/// 建立集群连接（已连接时为幂等操作）
#[utoipa::path(
    post,
    path = "/api/session/connect",
    tag = "session",
    request_body = ConnectRequest,
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "连接已建立", body = ApiResponse<ConnectResponse>),
        (status = 502, description = "无法连接到集群")
    )
)]
pub async fn connect(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<ConnectRequest>,
) -> ApiResult<ConnectResponse> {
    req.validate()?;
    let data = state.gateway().connect(&caller.user, &req.uri).await?;
    respond(&state, &caller, data)
}

/// 断开连接并清除所有选择
#[utoipa::path(
    post,
    path = "/api/session/disconnect",
    tag = "session",
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "连接已断开", body = ApiResponse<DisconnectResponse>)
    )
)]
pub async fn disconnect(State(state): State<AppState>, caller: Caller) -> ApiResult<DisconnectResponse> {
    let data = state.gateway().disconnect(&caller.user).await?;
    respond(&state, &caller, data)
}

/// 查询当前会话状态
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "会话状态", body = ApiResponse<SessionStatus>)
    )
)]
pub async fn session_status(State(state): State<AppState>, caller: Caller) -> ApiResult<SessionStatus> {
    let data = state.gateway().status(&caller.user).await;
    respond(&state, &caller, data)
}

/// 选择数据库（同时清除集合选择）
#[utoipa::path(
    put,
    path = "/api/session/database",
    tag = "session",
    request_body = NameRequest,
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "数据库已选择", body = ApiResponse<SessionStatus>),
        (status = 409, description = "未连接")
    )
)]
pub async fn select_database(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<NameRequest>,
) -> ApiResult<SessionStatus> {
    req.validate()?;
    let data = state.gateway().select_database(&caller.user, &req.name).await?;
    respond(&state, &caller, data)
}

/// 取消数据库选择
#[utoipa::path(
    delete,
    path = "/api/session/database",
    tag = "session",
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "数据库选择已清除", body = ApiResponse<SessionStatus>),
        (status = 409, description = "未连接")
    )
)]
pub async fn unselect_database(State(state): State<AppState>, caller: Caller) -> ApiResult<SessionStatus> {
    let data = state.gateway().unselect_database(&caller.user).await?;
    respond(&state, &caller, data)
}

/// 在已选数据库中选择集合
#[utoipa::path(
    put,
    path = "/api/session/collection",
    tag = "session",
    request_body = NameRequest,
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "集合已选择", body = ApiResponse<SessionStatus>),
        (status = 409, description = "未连接或未选择数据库")
    )
)]
pub async fn select_collection(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<NameRequest>,
) -> ApiResult<SessionStatus> {
    req.validate()?;
    let data = state.gateway().select_collection(&caller.user, &req.name).await?;
    respond(&state, &caller, data)
}

/// 取消集合选择
#[utoipa::path(
    delete,
    path = "/api/session/collection",
    tag = "session",
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "集合选择已清除", body = ApiResponse<SessionStatus>),
        (status = 409, description = "未连接")
    )
)]
pub async fn unselect_collection(State(state): State<AppState>, caller: Caller) -> ApiResult<SessionStatus> {
    let data = state.gateway().unselect_collection(&caller.user).await?;
    respond(&state, &caller, data)
}

// ---------------------------------------------------------------------------
// 数据库
// ---------------------------------------------------------------------------

/// 列出集群中的数据库
#[utoipa::path(
    get,
    path = "/api/databases",
    tag = "databases",
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "数据库列表", body = ApiResponse<Vec<String>>),
        (status = 409, description = "未连接")
    )
)]
pub async fn list_databases(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<String>> {
    let data = state.gateway().list_databases(&caller.user).await?;
    respond(&state, &caller, data)
}

/// 创建数据库（附带一个占位集合）
#[utoipa::path(
    post,
    path = "/api/databases",
    tag = "databases",
    request_body = NameRequest,
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "数据库已创建", body = ApiResponse<NamespaceResult>),
        (status = 409, description = "未连接")
    )
)]
pub async fn create_database(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<NameRequest>,
) -> ApiResult<NamespaceResult> {
    req.validate()?;
    state.gateway().create_database(&caller.user, &req.name).await?;
    respond(&state, &caller, NamespaceResult { name: req.name })
}

/// 删除数据库
#[utoipa::path(
    delete,
    path = "/api/databases/{name}",
    tag = "databases",
    params(
        ("name" = String, Path, description = "数据库名称"),
        ("X-User-Id" = String, Header, description = "用户 ID")
    ),
    responses(
        (status = 200, description = "数据库已删除", body = ApiResponse<NamespaceResult>),
        (status = 409, description = "未连接")
    )
)]
pub async fn drop_database(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(name): AppPath<String>,
) -> ApiResult<NamespaceResult> {
    state.gateway().drop_database(&caller.user, &name).await?;
    respond(&state, &caller, NamespaceResult { name })
}

// ---------------------------------------------------------------------------
// 集合
// ---------------------------------------------------------------------------

/// 列出已选数据库中的集合
#[utoipa::path(
    get,
    path = "/api/collections",
    tag = "collections",
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "集合列表", body = ApiResponse<Vec<String>>),
        (status = 409, description = "未连接或未选择数据库")
    )
)]
pub async fn list_collections(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<String>> {
    let data = state.gateway().list_collections(&caller.user).await?;
    respond(&state, &caller, data)
}

/// 在已选数据库中创建集合
#[utoipa::path(
    post,
    path = "/api/collections",
    tag = "collections",
    request_body = NameRequest,
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "集合已创建", body = ApiResponse<NamespaceResult>),
        (status = 409, description = "未连接或未选择数据库"),
        (status = 500, description = "集合已存在")
    )
)]
pub async fn create_collection(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<NameRequest>,
) -> ApiResult<NamespaceResult> {
    req.validate()?;
    state.gateway().create_collection(&caller.user, &req.name).await?;
    respond(&state, &caller, NamespaceResult { name: req.name })
}

/// 删除已选数据库中的集合
#[utoipa::path(
    delete,
    path = "/api/collections/{name}",
    tag = "collections",
    params(
        ("name" = String, Path, description = "集合名称"),
        ("X-User-Id" = String, Header, description = "用户 ID")
    ),
    responses(
        (status = 200, description = "集合已删除", body = ApiResponse<NamespaceResult>),
        (status = 409, description = "未连接或未选择数据库")
    )
)]
pub async fn drop_collection(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(name): AppPath<String>,
) -> ApiResult<NamespaceResult> {
    state.gateway().drop_collection(&caller.user, &name).await?;
    respond(&state, &caller, NamespaceResult { name })
}

// ---------------------------------------------------------------------------
// 文档
// ---------------------------------------------------------------------------

/// 列出已选集合中的文档 ID
#[utoipa::path(
    get,
    path = "/api/documents",
    tag = "documents",
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "文档 ID 列表", body = ApiResponse<Vec<String>>),
        (status = 409, description = "未选择集合")
    )
)]
pub async fn list_documents(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<String>> {
    let data = state.gateway().list_document_ids(&caller.user).await?;
    respond(&state, &caller, data)
}

/// 插入文档（未提供 `_id` 时自动生成）
#[utoipa::path(
    post,
    path = "/api/documents",
    tag = "documents",
    request_body = Object,
    params(("X-User-Id" = String, Header, description = "用户 ID")),
    responses(
        (status = 200, description = "文档已插入", body = ApiResponse<DocumentView>),
        (status = 400, description = "文档不是 JSON 对象"),
        (status = 409, description = "未选择集合")
    )
)]
pub async fn insert_document(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(body): AppJson<serde_json::Value>,
) -> ApiResult<DocumentView> {
    let data = state.gateway().insert_document(&caller.user, body).await?;
    respond(&state, &caller, data)
}

/// 根据 ID 获取文档
#[utoipa::path(
    get,
    path = "/api/documents/{id}",
    tag = "documents",
    params(
        ("id" = String, Path, description = "文档 ID（24 位十六进制视为 ObjectId）"),
        ("X-User-Id" = String, Header, description = "用户 ID")
    ),
    responses(
        (status = 200, description = "文档内容", body = ApiResponse<DocumentView>),
        (status = 404, description = "文档未找到")
    )
)]
pub async fn get_document(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<String>,
) -> ApiResult<DocumentView> {
    let data = state.gateway().get_document(&caller.user, &id).await?;
    respond(&state, &caller, data)
}

/// 合并更新文档，不存在时创建
#[utoipa::path(
    patch,
    path = "/api/documents/{id}",
    tag = "documents",
    request_body = Object,
    params(
        ("id" = String, Path, description = "文档 ID"),
        ("X-User-Id" = String, Header, description = "用户 ID")
    ),
    responses(
        (status = 200, description = "文档已更新", body = ApiResponse<UpdateOutcome>),
        (status = 400, description = "更新内容为空或非法")
    )
)]
pub async fn update_document(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<String>,
    AppJson(partial): AppJson<serde_json::Value>,
) -> ApiResult<UpdateOutcome> {
    let data = state.gateway().update_document(&caller.user, &id, partial).await?;
    respond(&state, &caller, data)
}

/// 删除文档（文档不存在时不报错）
#[utoipa::path(
    delete,
    path = "/api/documents/{id}",
    tag = "documents",
    params(
        ("id" = String, Path, description = "文档 ID"),
        ("X-User-Id" = String, Header, description = "用户 ID")
    ),
    responses(
        (status = 200, description = "删除结果", body = ApiResponse<DeleteOutcome>)
    )
)]
pub async fn delete_document(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(id): AppPath<String>,
) -> ApiResult<DeleteOutcome> {
    let data = state.gateway().delete_document(&caller.user, &id).await?;
    respond(&state, &caller, data)
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        sessions: state.registry.session_count().await,
    })
}
