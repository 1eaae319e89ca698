//! 网关服务路由模块

use axum::{
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use common::middleware::request_id_middleware;

use crate::handlers;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "文档数据库网关 API",
        version = "0.1.0",
        description = "多租户文档数据库会话网关"
    ),
    paths(
        handlers::connect,
        handlers::disconnect,
        handlers::session_status,
        handlers::select_database,
        handlers::unselect_database,
        handlers::select_collection,
        handlers::unselect_collection,
        handlers::list_databases,
        handlers::create_database,
        handlers::drop_database,
        handlers::list_collections,
        handlers::create_collection,
        handlers::drop_collection,
        handlers::list_documents,
        handlers::insert_document,
        handlers::get_document,
        handlers::update_document,
        handlers::delete_document,
        handlers::health_check,
    ),
    components(schemas(
        common::models::ConnectRequest,
        common::models::ConnectResponse,
        common::models::DisconnectResponse,
        common::models::NameRequest,
        common::models::SessionStage,
        common::models::SessionStatus,
        common::models::DocumentView,
        common::models::UpdateOutcome,
        common::models::DeleteOutcome,
        handlers::NamespaceResult,
        handlers::HealthResponse,
    )),
    tags(
        (name = "session", description = "连接与选择状态"),
        (name = "databases", description = "数据库管理"),
        (name = "collections", description = "集合管理"),
        (name = "documents", description = "文档增删改查"),
        (name = "health", description = "健康检查端点")
    )
)]
pub struct ApiDoc;

/// 创建网关路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/session", get(handlers::session_status))
        .route("/api/session/connect", post(handlers::connect))
        .route("/api/session/disconnect", post(handlers::disconnect))
        .route(
            "/api/session/database",
            put(handlers::select_database).delete(handlers::unselect_database),
        )
        .route(
            "/api/session/collection",
            put(handlers::select_collection).delete(handlers::unselect_collection),
        )
        .route(
            "/api/databases",
            get(handlers::list_databases).post(handlers::create_database),
        )
        .route("/api/databases/{name}", axum::routing::delete(handlers::drop_database))
        .route(
            "/api/collections",
            get(handlers::list_collections).post(handlers::create_collection),
        )
        .route("/api/collections/{name}", axum::routing::delete(handlers::drop_collection))
        .route(
            "/api/documents",
            get(handlers::list_documents).post(handlers::insert_document),
        )
        .route(
            "/api/documents/{id}",
            get(handlers::get_document)
                .patch(handlers::update_document)
                .delete(handlers::delete_document),
        )
        .route("/api/health", get(handlers::health_check))
}

/// Full application: routes, OpenAPI document and middleware stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use common::config::AppConfig;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(AppState::new(AppConfig::default()))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_reports_session_count() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 0);

        call(
            &app,
            Method::POST,
            "/api/session/connect",
            Some("u1"),
            Some(json!({"uri": "memory://health"})),
        )
        .await;
        let (_, body) = call(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(body["sessions"], 1);
    }

    #[tokio::test]
    async fn test_missing_user_id_is_rejected() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/api/databases", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "MISSING_USER_ID");
    }

    #[tokio::test]
    async fn test_precondition_errors_use_stable_codes() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/api/databases", Some("u1"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "NOT_CONNECTED");

        call(
            &app,
            Method::POST,
            "/api/session/connect",
            Some("u1"),
            Some(json!({"uri": "memory://codes"})),
        )
        .await;
        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/session/collection",
            Some("u1"),
            Some(json!({"name": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "NO_DATABASE_SELECTED");
    }

    #[tokio::test]
    async fn test_document_crud_over_http() {
        let app = app();
        let user = Some("alice");
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/session/connect",
            user,
            Some(json!({"uri": "memory://crud"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["engine"], "memory");
        assert_eq!(body["data"]["already_connected"], false);

        call(&app, Method::PUT, "/api/session/database", user, Some(json!({"name": "app"}))).await;
        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/session/collection",
            user,
            Some(json!({"name": "items"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["stage"], "collection_selected");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/documents",
            user,
            Some(json!({"_id": "k1", "name": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], "k1");

        let (_, body) = call(
            &app,
            Method::PATCH,
            "/api/documents/k1",
            user,
            Some(json!({"name": "y"})),
        )
        .await;
        assert_eq!(body["data"]["created"], false);

        let (_, body) = call(&app, Method::GET, "/api/documents/k1", user, None).await;
        assert_eq!(body["data"]["document"]["name"], "y");

        let (_, body) = call(&app, Method::GET, "/api/documents", user, None).await;
        assert_eq!(body["data"], json!(["k1"]));

        let (_, body) = call(&app, Method::DELETE, "/api/documents/k1", user, None).await;
        assert_eq!(body["data"]["deleted"], true);

        let (status, body) = call(&app, Method::GET, "/api/documents/k1", user, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated_per_user() {
        let app = app();
        for user in ["u1", "u2"] {
            call(
                &app,
                Method::POST,
                "/api/session/connect",
                Some(user),
                Some(json!({"uri": "memory://iso"})),
            )
            .await;
        }
        call(&app, Method::PUT, "/api/session/database", Some("u1"), Some(json!({"name": "A"}))).await;
        call(&app, Method::PUT, "/api/session/database", Some("u2"), Some(json!({"name": "B"}))).await;

        let (_, one) = call(&app, Method::GET, "/api/session", Some("u1"), None).await;
        let (_, two) = call(&app, Method::GET, "/api/session", Some("u2"), None).await;
        assert_eq!(one["data"]["database"], "A");
        assert_eq!(two["data"]["database"], "B");
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let app = app();
        let request = Request::builder()
            .uri("/api/session")
            .header("x-user-id", "u1")
            .header("x-request-id", "req-42")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "req-42");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["meta"]["request_id"], "req-42");
        assert_eq!(body["data"]["stage"], "disconnected");
    }

    #[tokio::test]
    async fn test_unreadable_bodies_use_the_error_envelope() {
        let app = app();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/session/connect")
            .header("x-user-id", "u1")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/documents")
            .header("x-user-id", "u1")
            .body(Body::from(r#"{"a": 1}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_error_envelope_carries_request_id() {
        let app = app();
        let request = Request::builder()
            .uri("/api/databases")
            .header("x-user-id", "u1")
            .header("x-request-id", "req-7")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "NOT_CONNECTED");
        assert_eq!(body["meta"]["request_id"], "req-7");
    }

    #[tokio::test]
    async fn test_openapi_document_lists_routes() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/api-docs/openapi.json", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/documents/{id}"].is_object());
    }
}
