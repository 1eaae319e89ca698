//! Cluster handles.
//!
//! A [`Cluster`] is one live connection to a document engine, opened from a
//! connection string by the [`Connector`]. Handles are cheap to clone; closing
//! one makes every later call through any clone fail.

use std::collections::HashMap;
use std::fmt;

use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::Client;
use tokio::sync::RwLock;
use uuid::Uuid;

use common::config::AppConfig;
use common::errors::{server_error_code, AppError, AppResult, NAMESPACE_EXISTS_CODE};
use common::models::DocumentId;

use crate::memory::{MemoryConnection, MemoryServer};

/// Most distinct `memory://<name>` servers one process will hold.
pub const MAX_MEMORY_SERVERS: usize = 64;

/// Engine selected by the connection string scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// MongoDB through the official driver.
    MongoDB,
    /// In-process document engine.
    Memory,
}

impl EngineKind {
    /// Determines the engine from a connection string.
    ///
    /// # Errors
    /// Returns `AppError::Validation` for unsupported schemes.
    pub fn from_uri(uri: &str) -> AppResult<Self> {
        let uri = uri.trim();
        if uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://") {
            Ok(EngineKind::MongoDB)
        } else if uri.starts_with("memory://") {
            Ok(EngineKind::Memory)
        } else {
            Err(AppError::Validation(format!(
                "unsupported connection string: {}",
                redact_uri(uri)
            )))
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::MongoDB => write!(f, "mongodb"),
            EngineKind::Memory => write!(f, "memory"),
        }
    }
}

/// Engine-specific connection.
#[derive(Clone)]
pub enum ClusterPool {
    /// MongoDB client (internally pooled).
    MongoDB(Client),
    /// In-process engine connection.
    Memory(MemoryConnection),
}

/// A live connection to a cluster.
#[derive(Clone)]
pub struct Cluster {
    id: Uuid,
    pool: ClusterPool,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("engine", &self.engine())
            .finish()
    }
}

impl Cluster {
    pub fn new(pool: ClusterPool) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool,
        }
    }

    /// Unique id of this connection.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine(&self) -> EngineKind {
        match &self.pool {
            ClusterPool::MongoDB(_) => EngineKind::MongoDB,
            ClusterPool::Memory(_) => EngineKind::Memory,
        }
    }

    /// Lists database names in the order the engine reports them.
    pub async fn list_database_names(&self) -> AppResult<Vec<String>> {
        match &self.pool {
            ClusterPool::MongoDB(client) => Ok(client.list_database_names().await?),
            ClusterPool::Memory(conn) => conn.list_database_names().await,
        }
    }

    /// Creates a collection. Returns `false` if it already existed.
    pub async fn create_collection(&self, database: &str, collection: &str) -> AppResult<bool> {
        match &self.pool {
            ClusterPool::MongoDB(client) => {
                match client.database(database).create_collection(collection).await {
                    Ok(()) => Ok(true),
                    Err(e) if server_error_code(&e) == Some(NAMESPACE_EXISTS_CODE) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
            ClusterPool::Memory(conn) => conn.create_collection(database, collection).await,
        }
    }

    pub async fn drop_database(&self, database: &str) -> AppResult<()> {
        match &self.pool {
            ClusterPool::MongoDB(client) => Ok(client.database(database).drop().await?),
            ClusterPool::Memory(conn) => conn.drop_database(database).await,
        }
    }

    pub async fn list_collection_names(&self, database: &str) -> AppResult<Vec<String>> {
        match &self.pool {
            ClusterPool::MongoDB(client) => {
                Ok(client.database(database).list_collection_names().await?)
            }
            ClusterPool::Memory(conn) => conn.list_collection_names(database).await,
        }
    }

    pub async fn drop_collection(&self, database: &str, collection: &str) -> AppResult<()> {
        match &self.pool {
            ClusterPool::MongoDB(client) => Ok(client
                .database(database)
                .collection::<Document>(collection)
                .drop()
                .await?),
            ClusterPool::Memory(conn) => conn.drop_collection(database, collection).await,
        }
    }

    /// Lists document ids in natural order, without fetching document bodies.
    pub async fn list_document_ids(
        &self,
        database: &str,
        collection: &str,
    ) -> AppResult<Vec<DocumentId>> {
        match &self.pool {
            ClusterPool::MongoDB(client) => {
                let coll = client.database(database).collection::<Document>(collection);
                let mut cursor = coll.find(doc! {}).projection(doc! { "_id": 1 }).await?;
                let mut ids = Vec::new();
                while cursor.advance().await? {
                    let row: Document = cursor.deserialize_current()?;
                    if let Some(id) = row.get("_id") {
                        ids.push(DocumentId::from_bson(id.clone()));
                    }
                }
                Ok(ids)
            }
            ClusterPool::Memory(conn) => conn.list_document_ids(database, collection).await,
        }
    }

    pub async fn find_document(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
    ) -> AppResult<Option<Document>> {
        match &self.pool {
            ClusterPool::MongoDB(client) => Ok(client
                .database(database)
                .collection::<Document>(collection)
                .find_one(doc! { "_id": id.as_bson().clone() })
                .await?),
            ClusterPool::Memory(conn) => conn.find_document(database, collection, id).await,
        }
    }

    /// Inserts a document that already carries its `_id`.
    pub async fn insert_document(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> AppResult<()> {
        match &self.pool {
            ClusterPool::MongoDB(client) => {
                client
                    .database(database)
                    .collection::<Document>(collection)
                    .insert_one(document)
                    .await?;
                Ok(())
            }
            ClusterPool::Memory(conn) => conn.insert_document(database, collection, document).await,
        }
    }

    /// Shallow-merges `fields` into the document, creating it when missing.
    /// Returns `true` if a new document was created.
    pub async fn merge_document(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
        fields: Document,
    ) -> AppResult<bool> {
        match &self.pool {
            ClusterPool::MongoDB(client) => {
                let result = client
                    .database(database)
                    .collection::<Document>(collection)
                    .update_one(doc! { "_id": id.as_bson().clone() }, doc! { "$set": fields })
                    .upsert(true)
                    .await?;
                Ok(result.upserted_id.is_some())
            }
            ClusterPool::Memory(conn) => conn.merge_document(database, collection, id, fields).await,
        }
    }

    /// Deletes at most one document. Returns `true` if one was removed.
    pub async fn delete_document(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
    ) -> AppResult<bool> {
        match &self.pool {
            ClusterPool::MongoDB(client) => {
                let result = client
                    .database(database)
                    .collection::<Document>(collection)
                    .delete_one(doc! { "_id": id.as_bson().clone() })
                    .await?;
                Ok(result.deleted_count > 0)
            }
            ClusterPool::Memory(conn) => conn.delete_document(database, collection, id).await,
        }
    }

    /// Closes the connection. Calls through other clones fail afterwards.
    pub async fn close(self) {
        match self.pool {
            ClusterPool::MongoDB(client) => client.shutdown().immediate(true).await,
            ClusterPool::Memory(conn) => conn.close(),
        }
    }
}

/// Opens cluster connections from connection strings.
pub struct Connector {
    config: AppConfig,
    /// In-process servers by name, shared by every connection to that name.
    memory_servers: RwLock<HashMap<String, MemoryServer>>,
}

impl Connector {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            memory_servers: RwLock::new(HashMap::new()),
        }
    }

    /// Establishes a verified connection.
    ///
    /// # Errors
    /// `Validation` for malformed or unsupported connection strings,
    /// `Connection` when the cluster cannot be reached or rejects the login.
    pub async fn connect(&self, uri: &str) -> AppResult<Cluster> {
        let pool = match EngineKind::from_uri(uri)? {
            EngineKind::MongoDB => ClusterPool::MongoDB(self.connect_mongodb(uri.trim()).await?),
            EngineKind::Memory => {
                if !self.config.allow_memory_engine {
                    return Err(AppError::Validation("memory engine is disabled".into()));
                }
                let name = memory_server_name(uri);
                ClusterPool::Memory(self.memory_server(name).await?.connect())
            }
        };
        Ok(Cluster::new(pool))
    }

    async fn connect_mongodb(&self, uri: &str) -> AppResult<Client> {
        let mut options = ClientOptions::parse(uri).await?;
        let timeout = self.config.connect_timeout();
        options.app_name = Some(self.config.service_name.clone());
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        options.server_api = Some(
            ServerApi::builder()
                .version(ServerApiVersion::V1)
                .strict(self.config.stable_api_strict)
                .deprecation_errors(self.config.stable_api_strict)
                .build(),
        );

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::Engine(msg) => AppError::Connection(msg),
                other => other,
            })?;

        tracing::info!(uri = %redact_uri(uri), "Connected to MongoDB cluster");
        Ok(client)
    }

    /// Looks up or creates the named server. Servers live as long as the
    /// process, so their number is capped.
    async fn memory_server(&self, name: &str) -> AppResult<MemoryServer> {
        if let Some(server) = self.memory_servers.read().await.get(name) {
            return Ok(server.clone());
        }
        let mut servers = self.memory_servers.write().await;
        if !servers.contains_key(name) && servers.len() >= MAX_MEMORY_SERVERS {
            return Err(AppError::Validation(format!(
                "at most {MAX_MEMORY_SERVERS} memory servers can exist"
            )));
        }
        Ok(servers.entry(name.to_string()).or_default().clone())
    }

    /// Holds the server table so memory connects stall until the guard drops.
    #[cfg(test)]
    pub(crate) async fn stall_memory_connects(
        &self,
    ) -> tokio::sync::RwLockWriteGuard<'_, HashMap<String, MemoryServer>> {
        self.memory_servers.write().await
    }
}

fn memory_server_name(uri: &str) -> &str {
    let name = uri
        .trim()
        .trim_start_matches("memory://")
        .trim_end_matches('/');
    if name.is_empty() {
        "default"
    } else {
        name
    }
}

/// Masks the credentials of a connection string for logging.
pub fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => uri.to_string(),
    }
}
