//! 数据库网关服务模块
//!
//! Stateless operations over the handles the registry resolves. Every engine
//! call is bounded by the configured operation timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::Document;

use common::errors::{AppError, AppResult};
use common::models::document::json_to_document;
use common::models::{
    ConnectResponse, DeleteOutcome, DisconnectResponse, DocumentId, DocumentView, SessionStatus,
    UpdateOutcome, UserId,
};
use common::utils::NameValidator;

use crate::registry::{ConnectOutcome, SessionRegistry};

/// Collection created with every new database so it shows up in listings.
pub const PLACEHOLDER_COLLECTION: &str = "placeholder";

/// 网关服务 Trait
#[async_trait]
pub trait GatewayServiceTrait: Send + Sync {
    /// 建立连接
    async fn connect(&self, user: &UserId, uri: &str) -> AppResult<ConnectResponse>;

    /// 断开连接
    async fn disconnect(&self, user: &UserId) -> AppResult<DisconnectResponse>;

    /// 会话状态
    async fn status(&self, user: &UserId) -> SessionStatus;

    async fn select_database(&self, user: &UserId, name: &str) -> AppResult<SessionStatus>;

    async fn unselect_database(&self, user: &UserId) -> AppResult<SessionStatus>;

    async fn select_collection(&self, user: &UserId, name: &str) -> AppResult<SessionStatus>;

    async fn unselect_collection(&self, user: &UserId) -> AppResult<SessionStatus>;

    /// 列出数据库
    async fn list_databases(&self, user: &UserId) -> AppResult<Vec<String>>;

    /// 创建数据库
    async fn create_database(&self, user: &UserId, name: &str) -> AppResult<()>;

    /// 删除数据库
    async fn drop_database(&self, user: &UserId, name: &str) -> AppResult<()>;

    /// 列出集合
    async fn list_collections(&self, user: &UserId) -> AppResult<Vec<String>>;

    /// 创建集合
    async fn create_collection(&self, user: &UserId, name: &str) -> AppResult<()>;

    /// 删除集合
    async fn drop_collection(&self, user: &UserId, name: &str) -> AppResult<()>;

    /// 列出文档 ID
    async fn list_document_ids(&self, user: &UserId) -> AppResult<Vec<String>>;

    /// 获取文档
    async fn get_document(&self, user: &UserId, id: &str) -> AppResult<DocumentView>;

    /// 插入文档
    async fn insert_document(&self, user: &UserId, body: serde_json::Value) -> AppResult<DocumentView>;

    /// 合并更新文档（不存在则创建）
    async fn update_document(
        &self,
        user: &UserId,
        id: &str,
        partial: serde_json::Value,
    ) -> AppResult<UpdateOutcome>;

    /// 删除文档
    async fn delete_document(&self, user: &UserId, id: &str) -> AppResult<DeleteOutcome>;
}

/// 文档数据库网关服务
pub struct GatewayService {
    registry: Arc<SessionRegistry>,
    timeout: Duration,
}

impl GatewayService {
    /// 创建新的网关服务实例
    pub fn new(registry: Arc<SessionRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>> + Send,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AppError::Timeout(operation.to_string()))?
    }
}

#[async_trait]
impl GatewayServiceTrait for GatewayService {
    async fn connect(&self, user: &UserId, uri: &str) -> AppResult<ConnectResponse> {
        let (engine, already_connected) = match self.registry.connect(user, uri).await? {
            ConnectOutcome::Opened(engine) => (engine, false),
            ConnectOutcome::AlreadyConnected(engine) => (engine, true),
        };
        Ok(ConnectResponse {
            engine: engine.to_string(),
            already_connected,
        })
    }

    async fn disconnect(&self, user: &UserId) -> AppResult<DisconnectResponse> {
        let disconnected = self.registry.disconnect(user).await?;
        Ok(DisconnectResponse { disconnected })
    }

    async fn status(&self, user: &UserId) -> SessionStatus {
        self.registry.status(user).await
    }

    async fn select_database(&self, user: &UserId, name: &str) -> AppResult<SessionStatus> {
        self.registry.select_database(user, name).await
    }

    async fn unselect_database(&self, user: &UserId) -> AppResult<SessionStatus> {
        self.registry.unselect_database(user).await
    }

    async fn select_collection(&self, user: &UserId, name: &str) -> AppResult<SessionStatus> {
        self.registry.select_collection(user, name).await
    }

    async fn unselect_collection(&self, user: &UserId) -> AppResult<SessionStatus> {
        self.registry.unselect_collection(user).await
    }

    async fn list_databases(&self, user: &UserId) -> AppResult<Vec<String>> {
        let scope = self.registry.resolve_connection(user).await?;
        self.bounded("list_databases", scope.cluster.list_database_names())
            .await
    }

    async fn create_database(&self, user: &UserId, name: &str) -> AppResult<()> {
        NameValidator::database(name)?;
        let scope = self.registry.resolve_connection(user).await?;
        let created = self
            .bounded(
                "create_database",
                scope.cluster.create_collection(name, PLACEHOLDER_COLLECTION),
            )
            .await?;
        tracing::info!(user = %user, database = name, created, "Database created");
        Ok(())
    }

    async fn drop_database(&self, user: &UserId, name: &str) -> AppResult<()> {
        NameValidator::database(name)?;
        let scope = self.registry.resolve_connection(user).await?;
        self.bounded("drop_database", scope.cluster.drop_database(name))
            .await?;
        self.registry
            .forget_database(user, scope.cluster.id(), name)
            .await;
        tracing::info!(user = %user, database = name, "Database dropped");
        Ok(())
    }

    async fn list_collections(&self, user: &UserId) -> AppResult<Vec<String>> {
        let scope = self.registry.resolve_database(user).await?;
        self.bounded(
            "list_collections",
            scope.cluster.list_collection_names(&scope.database),
        )
        .await
    }

    async fn create_collection(&self, user: &UserId, name: &str) -> AppResult<()> {
        NameValidator::collection(name)?;
        let scope = self.registry.resolve_database(user).await?;
        let created = self
            .bounded(
                "create_collection",
                scope.cluster.create_collection(&scope.database, name),
            )
            .await?;
        if !created {
            return Err(AppError::Engine(format!(
                "collection {}.{} already exists",
                scope.database, name
            )));
        }
        tracing::info!(user = %user, database = %scope.database, collection = name, "Collection created");
        Ok(())
    }

    async fn drop_collection(&self, user: &UserId, name: &str) -> AppResult<()> {
        NameValidator::collection(name)?;
        let scope = self.registry.resolve_database(user).await?;
        self.bounded(
            "drop_collection",
            scope.cluster.drop_collection(&scope.database, name),
        )
        .await?;
        self.registry
            .forget_collection(user, scope.cluster.id(), &scope.database, name)
            .await;
        tracing::info!(user = %user, database = %scope.database, collection = name, "Collection dropped");
        Ok(())
    }

    async fn list_document_ids(&self, user: &UserId) -> AppResult<Vec<String>> {
        let scope = self.registry.resolve_collection(user).await?;
        let ids = self
            .bounded(
                "list_documents",
                scope
                    .cluster
                    .list_document_ids(&scope.database, &scope.collection),
            )
            .await?;
        Ok(ids.iter().map(ToString::to_string).collect())
    }

    async fn get_document(&self, user: &UserId, id: &str) -> AppResult<DocumentView> {
        let id = DocumentId::parse(id)?;
        let scope = self.registry.resolve_collection(user).await?;
        let found = self
            .bounded(
                "get_document",
                scope
                    .cluster
                    .find_document(&scope.database, &scope.collection, &id),
            )
            .await?;
        found
            .map(DocumentView::from_document)
            .ok_or_else(|| AppError::DocumentNotFound(id.to_string()))
    }

    async fn insert_document(&self, user: &UserId, body: serde_json::Value) -> AppResult<DocumentView> {
        let fields = json_to_document(body)?;
        let scope = self.registry.resolve_collection(user).await?;

        let id = match fields.get("_id") {
            Some(id) => DocumentId::from_caller(id.clone())?,
            None => DocumentId::generate(),
        };
        let mut document = Document::new();
        document.insert("_id", id.into_bson());
        for (key, value) in fields {
            if key != "_id" {
                document.insert(key, value);
            }
        }

        self.bounded(
            "insert_document",
            scope
                .cluster
                .insert_document(&scope.database, &scope.collection, document.clone()),
        )
        .await?;

        let view = DocumentView::from_document(document);
        tracing::debug!(user = %user, collection = %scope.collection, doc_id = %view.id, "Document inserted");
        Ok(view)
    }

    async fn update_document(
        &self,
        user: &UserId,
        id: &str,
        partial: serde_json::Value,
    ) -> AppResult<UpdateOutcome> {
        let id = DocumentId::parse(id)?;
        let mut fields = json_to_document(partial)?;
        fields.remove("_id");
        if fields.is_empty() {
            return Err(AppError::Validation(
                "update must set at least one field".into(),
            ));
        }
        if let Some(key) = fields.keys().find(|key| key.starts_with('$')) {
            return Err(AppError::Validation(format!(
                "field names must not start with '$': {key}"
            )));
        }
        // Engines disagree on dotted keys under `$set` (path vs. literal name).
        if let Some(key) = fields.keys().find(|key| key.contains('.')) {
            return Err(AppError::Validation(format!(
                "field names must not contain '.': {key}"
            )));
        }

        let scope = self.registry.resolve_collection(user).await?;
        let created = self
            .bounded(
                "update_document",
                scope
                    .cluster
                    .merge_document(&scope.database, &scope.collection, &id, fields),
            )
            .await?;

        tracing::debug!(user = %user, collection = %scope.collection, doc_id = %id, created, "Document merged");
        Ok(UpdateOutcome {
            id: id.to_string(),
            created,
        })
    }

    async fn delete_document(&self, user: &UserId, id: &str) -> AppResult<DeleteOutcome> {
        let id = DocumentId::parse(id)?;
        let scope = self.registry.resolve_collection(user).await?;
        let deleted = self
            .bounded(
                "delete_document",
                scope
                    .cluster
                    .delete_document(&scope.database, &scope.collection, &id),
            )
            .await?;
        tracing::debug!(user = %user, collection = %scope.collection, doc_id = %id, deleted, "Document deleted");
        Ok(DeleteOutcome {
            id: id.to_string(),
            deleted,
        })
    }
}
