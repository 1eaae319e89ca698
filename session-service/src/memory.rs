//! In-process document engine.
//!
//! Backs `memory://<name>` connection strings. It follows the cluster's
//! namespace rules closely enough for the gateway: databases exist only while
//! they hold a collection, inserts create missing namespaces, and `_id` is
//! unique per collection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mongodb::bson::Document;
use tokio::sync::RwLock;

use common::errors::{AppError, AppResult};
use common::models::DocumentId;

type Collections = BTreeMap<String, Vec<Document>>;

/// Shared storage of one named in-process server.
#[derive(Clone, Default)]
pub struct MemoryServer {
    databases: Arc<RwLock<BTreeMap<String, Collections>>>,
}

impl MemoryServer {
    /// Opens a new connection to this server.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            server: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// One connection to a [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryConnection {
    server: MemoryServer,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::ConnectionClosed);
        }
        Ok(())
    }

    pub async fn list_database_names(&self) -> AppResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.server.databases.read().await.keys().cloned().collect())
    }

    pub async fn create_collection(&self, database: &str, collection: &str) -> AppResult<bool> {
        self.ensure_open()?;
        let mut databases = self.server.databases.write().await;
        let collections = databases.entry(database.to_string()).or_default();
        if collections.contains_key(collection) {
            return Ok(false);
        }
        collections.insert(collection.to_string(), Vec::new());
        Ok(true)
    }

    pub async fn drop_database(&self, database: &str) -> AppResult<()> {
        self.ensure_open()?;
        self.server.databases.write().await.remove(database);
        Ok(())
    }

    pub async fn list_collection_names(&self, database: &str) -> AppResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .server
            .databases
            .read()
            .await
            .get(database)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn drop_collection(&self, database: &str, collection: &str) -> AppResult<()> {
        self.ensure_open()?;
        let mut databases = self.server.databases.write().await;
        if let Some(collections) = databases.get_mut(database) {
            collections.remove(collection);
            if collections.is_empty() {
                databases.remove(database);
            }
        }
        Ok(())
    }

    pub async fn list_document_ids(
        &self,
        database: &str,
        collection: &str,
    ) -> AppResult<Vec<DocumentId>> {
        self.ensure_open()?;
        let databases = self.server.databases.read().await;
        let ids = databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|docs| {
                docs.iter()
                    .filter_map(|doc| doc.get("_id").cloned().map(DocumentId::from_bson))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    pub async fn find_document(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
    ) -> AppResult<Option<Document>> {
        self.ensure_open()?;
        let databases = self.server.databases.read().await;
        Ok(databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .and_then(|docs| docs.iter().find(|doc| has_id(doc, id)).cloned()))
    }

    pub async fn insert_document(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> AppResult<()> {
        self.ensure_open()?;
        let id = document
            .get("_id")
            .cloned()
            .map(DocumentId::from_bson)
            .ok_or_else(|| AppError::Engine("document has no _id".into()))?;

        let mut databases = self.server.databases.write().await;
        let docs = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        if docs.iter().any(|doc| has_id(doc, &id)) {
            return Err(AppError::Engine(format!(
                "E11000 duplicate key error collection: {database}.{collection} dup key: {{ _id: {id} }}"
            )));
        }
        docs.push(document);
        Ok(())
    }

    pub async fn merge_document(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
        fields: Document,
    ) -> AppResult<bool> {
        self.ensure_open()?;
        let mut databases = self.server.databases.write().await;
        let docs = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        if let Some(existing) = docs.iter_mut().find(|doc| has_id(doc, id)) {
            for (key, value) in fields {
                existing.insert(key, value);
            }
            return Ok(false);
        }

        let mut created = Document::new();
        created.insert("_id", id.as_bson().clone());
        for (key, value) in fields {
            created.insert(key, value);
        }
        docs.push(created);
        Ok(true)
    }

    pub async fn delete_document(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
    ) -> AppResult<bool> {
        self.ensure_open()?;
        let mut databases = self.server.databases.write().await;
        let Some(docs) = databases
            .get_mut(database)
            .and_then(|collections| collections.get_mut(collection))
        else {
            return Ok(false);
        };
        match docs.iter().position(|doc| has_id(doc, id)) {
            Some(index) => {
                docs.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn has_id(document: &Document, id: &DocumentId) -> bool {
    document.get("_id") == Some(id.as_bson())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[tokio::test]
    async fn test_database_disappears_with_last_collection() {
        let conn = MemoryServer::default().connect();
        assert!(conn.create_collection("app", "users").await.unwrap());
        assert!(!conn.create_collection("app", "users").await.unwrap());
        assert_eq!(conn.list_database_names().await.unwrap(), vec!["app"]);

        conn.drop_collection("app", "users").await.unwrap();
        assert!(conn.list_database_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_ids() {
        let conn = MemoryServer::default().connect();
        conn.insert_document("app", "users", doc! { "_id": "a", "n": 1 })
            .await
            .unwrap();
        let err = conn
            .insert_document("app", "users", doc! { "_id": "a", "n": 2 })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Engine(_)));
    }

    #[tokio::test]
    async fn test_merge_overwrites_only_given_fields() {
        let conn = MemoryServer::default().connect();
        let id = DocumentId::parse("p1").unwrap();
        conn.insert_document("app", "people", doc! { "_id": "p1", "name": "x", "age": 5 })
            .await
            .unwrap();

        let created = conn
            .merge_document("app", "people", &id, doc! { "name": "y" })
            .await
            .unwrap();
        assert!(!created);
        let stored = conn.find_document("app", "people", &id).await.unwrap().unwrap();
        assert_eq!(stored, doc! { "_id": "p1", "name": "y", "age": 5 });
    }

    #[tokio::test]
    async fn test_ids_keep_insertion_order() {
        let conn = MemoryServer::default().connect();
        for key in ["c", "a", "b"] {
            conn.insert_document("app", "k", doc! { "_id": key })
                .await
                .unwrap();
        }
        let ids: Vec<String> = conn
            .list_document_ids("app", "k")
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
