//! Session registry.
//!
//! Owns every user's live connection and selections, keyed by user id.
//!
//! Each user has an entry guarded by its own async mutex, so mutations for one
//! user are serialized while unrelated users proceed independently. The map
//! lock is only held to find, insert or remove entries and never across
//! cluster I/O. Reads go through the same per-user mutex and hand back a
//! cloned scope, making resolve-and-use one atomic step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use common::models::{SessionStage, SessionStatus, UserId};
use common::utils::NameValidator;

use crate::cluster::{redact_uri, Connector, EngineKind};
use crate::session::{CollectionScope, ConnectionScope, DatabaseScope, SessionState, Transition};

/// One user's slot in the registry.
#[derive(Default)]
struct SessionEntry {
    state: SessionState,
    /// Set once the entry has been removed from the map. Anyone still holding
    /// the `Arc` must look the user up again.
    retired: bool,
}

type SharedEntry = Arc<Mutex<SessionEntry>>;
type EntryGuard = OwnedMutexGuard<SessionEntry>;
type SessionMap = RwLock<HashMap<UserId, SharedEntry>>;

/// Outcome of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection was opened.
    Opened(EngineKind),
    /// The user was already connected; nothing changed.
    AlreadyConnected(EngineKind),
}

/// Per-user registry of cluster connections and selections.
pub struct SessionRegistry {
    connector: Connector,
    sessions: Arc<SessionMap>,
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(config: AppConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            close_timeout: config.operation_timeout(),
            connector: Connector::new(config),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Opens a connection for `user` unless one already exists.
    ///
    /// An existing connection is kept as is, even if `uri` differs. A failed
    /// attempt registers nothing.
    pub async fn connect(&self, user: &UserId, uri: &str) -> AppResult<ConnectOutcome> {
        let (entry, mut guard) = self.lock_or_insert(user).await;
        if let Some(cluster) = guard.state.cluster() {
            tracing::debug!(user = %user, "Already connected, keeping existing connection");
            return Ok(ConnectOutcome::AlreadyConnected(cluster.engine()));
        }
        let pending = PendingConnect::new(&self.sessions, user, &entry);

        let attempt = match tokio::time::timeout(self.connect_timeout, self.connector.connect(uri)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout("connect".into())),
        };

        match attempt {
            Ok(cluster) => {
                pending.settle();
                let engine = cluster.engine();
                guard.state = guard.state.next(Transition::Connect(cluster))?;
                tracing::info!(user = %user, engine = %engine, "Session connected");
                Ok(ConnectOutcome::Opened(engine))
            }
            Err(e) => {
                self.retire(user, &entry, &mut guard).await;
                pending.settle();
                tracing::warn!(user = %user, uri = %redact_uri(uri), error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// Closes the user's connection and discards its selections.
    /// Returns `false` if there was nothing to close.
    pub async fn disconnect(&self, user: &UserId) -> AppResult<bool> {
        let Some((entry, mut guard)) = self.lock_existing(user).await else {
            return Ok(false);
        };

        let cluster = guard.state.cluster().cloned();
        guard.state = guard.state.next(Transition::Disconnect)?;
        self.retire(user, &entry, &mut guard).await;
        drop(guard);

        let Some(cluster) = cluster else {
            return Ok(false);
        };
        let connection = cluster.id();
        if tokio::time::timeout(self.close_timeout, cluster.close()).await.is_err() {
            tracing::warn!(user = %user, %connection, "Timed out closing connection");
        }
        tracing::info!(user = %user, %connection, "Session disconnected");
        Ok(true)
    }

    /// Selects a database, discarding any collection selection.
    pub async fn select_database(&self, user: &UserId, database: &str) -> AppResult<SessionStatus> {
        NameValidator::database(database)?;
        let status = self
            .transition(user, Transition::SelectDatabase(database.to_string()))
            .await?;
        tracing::debug!(user = %user, database, "Database selected");
        Ok(status)
    }

    pub async fn unselect_database(&self, user: &UserId) -> AppResult<SessionStatus> {
        self.transition(user, Transition::UnselectDatabase).await
    }

    /// Selects a collection inside the currently selected database.
    pub async fn select_collection(&self, user: &UserId, collection: &str) -> AppResult<SessionStatus> {
        NameValidator::collection(collection)?;
        let status = self
            .transition(user, Transition::SelectCollection(collection.to_string()))
            .await?;
        tracing::debug!(user = %user, collection, "Collection selected");
        Ok(status)
    }

    pub async fn unselect_collection(&self, user: &UserId) -> AppResult<SessionStatus> {
        self.transition(user, Transition::UnselectCollection).await
    }

    /// Clears the user's selection if it points at a database just dropped
    /// through `connection`.
    pub async fn forget_database(&self, user: &UserId, connection: Uuid, database: &str) {
        let transition = Transition::DatabaseDropped {
            connection,
            database: database.to_string(),
        };
        if let Err(e) = self.transition(user, transition).await {
            tracing::debug!(user = %user, error = %e, "Session changed before database drop was recorded");
        }
    }

    /// Clears the user's collection selection if it points at a collection
    /// just dropped through `connection`.
    pub async fn forget_collection(
        &self,
        user: &UserId,
        connection: Uuid,
        database: &str,
        collection: &str,
    ) {
        let transition = Transition::CollectionDropped {
            connection,
            database: database.to_string(),
            collection: collection.to_string(),
        };
        if let Err(e) = self.transition(user, transition).await {
            tracing::debug!(user = %user, error = %e, "Session changed before collection drop was recorded");
        }
    }

    pub async fn status(&self, user: &UserId) -> SessionStatus {
        match self.lock_existing(user).await {
            Some((_, guard)) => guard.state.status(),
            None => SessionStatus::disconnected(),
        }
    }

    pub async fn has_connection(&self, user: &UserId) -> bool {
        self.status(user).await.stage != SessionStage::Disconnected
    }

    pub async fn has_database_selected(&self, user: &UserId) -> bool {
        matches!(
            self.status(user).await.stage,
            SessionStage::DatabaseSelected | SessionStage::CollectionSelected
        )
    }

    pub async fn has_collection_selected(&self, user: &UserId) -> bool {
        self.status(user).await.stage == SessionStage::CollectionSelected
    }

    /// Resolves the user's connection in one atomic step.
    pub async fn resolve_connection(&self, user: &UserId) -> AppResult<ConnectionScope> {
        let (_, guard) = self.lock_existing(user).await.ok_or(AppError::NotConnected)?;
        guard.state.connection_scope()
    }

    /// Resolves the user's connection and database selection in one atomic step.
    pub async fn resolve_database(&self, user: &UserId) -> AppResult<DatabaseScope> {
        let (_, guard) = self.lock_existing(user).await.ok_or(AppError::NotConnected)?;
        guard.state.database_scope()
    }

    /// Resolves the user's full selection in one atomic step.
    pub async fn resolve_collection(&self, user: &UserId) -> AppResult<CollectionScope> {
        let (_, guard) = self.lock_existing(user).await.ok_or(AppError::NotConnected)?;
        guard.state.collection_scope()
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn transition(&self, user: &UserId, transition: Transition) -> AppResult<SessionStatus> {
        let (_, mut guard) = self.lock_existing(user).await.ok_or(AppError::NotConnected)?;
        guard.state = guard.state.next(transition)?;
        Ok(guard.state.status())
    }

    /// Locks the user's live entry, if any.
    async fn lock_existing(&self, user: &UserId) -> Option<(SharedEntry, EntryGuard)> {
        loop {
            let entry = self.sessions.read().await.get(user).cloned()?;
            let guard = entry.clone().lock_owned().await;
            if !guard.retired {
                return Some((entry, guard));
            }
        }
    }

    /// Locks the user's live entry, creating an empty one if needed.
    async fn lock_or_insert(&self, user: &UserId) -> (SharedEntry, EntryGuard) {
        loop {
            let entry = self
                .sessions
                .write()
                .await
                .entry(user.clone())
                .or_default()
                .clone();
            let guard = entry.clone().lock_owned().await;
            if !guard.retired {
                return (entry, guard);
            }
        }
    }

    async fn retire(&self, user: &UserId, entry: &SharedEntry, guard: &mut EntryGuard) {
        retire_entry(&self.sessions, user, entry, guard).await;
    }
}

/// Removes the entry from the map while its lock is held.
///
/// The flag is set only once the map lock is held, so a retired entry never
/// stays in the map.
async fn retire_entry(sessions: &SessionMap, user: &UserId, entry: &SharedEntry, guard: &mut EntryGuard) {
    let mut sessions = sessions.write().await;
    guard.retired = true;
    if sessions.get(user).is_some_and(|current| Arc::ptr_eq(current, entry)) {
        sessions.remove(user);
    }
}

/// Armed while a connect attempt runs on a freshly locked entry.
///
/// If the connect future is dropped before it settles, the entry it may have
/// inserted is retired in the background unless someone else connected it.
struct PendingConnect {
    sessions: Arc<SessionMap>,
    user: UserId,
    entry: SharedEntry,
    settled: bool,
}

impl PendingConnect {
    fn new(sessions: &Arc<SessionMap>, user: &UserId, entry: &SharedEntry) -> Self {
        Self {
            sessions: sessions.clone(),
            user: user.clone(),
            entry: entry.clone(),
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let sessions = self.sessions.clone();
        let user = self.user.clone();
        let entry = self.entry.clone();
        runtime.spawn(async move {
            let mut guard = entry.clone().lock_owned().await;
            if guard.retired || guard.state.cluster().is_some() {
                return;
            }
            retire_entry(&sessions, &user, &entry, &mut guard).await;
            tracing::debug!(user = %user, "Cancelled connect left no session behind");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(AppConfig::default()))
    }

    fn user(name: &str) -> UserId {
        UserId::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let registry = registry();
        let u = user("u1");

        let first = registry.connect(&u, "memory://idem").await.unwrap();
        assert_eq!(first, ConnectOutcome::Opened(EngineKind::Memory));
        let id = registry.resolve_connection(&u).await.unwrap().cluster.id();

        registry.select_database(&u, "A").await.unwrap();
        let second = registry.connect(&u, "memory://elsewhere").await.unwrap();
        assert_eq!(second, ConnectOutcome::AlreadyConnected(EngineKind::Memory));

        let scope = registry.resolve_database(&u).await.unwrap();
        assert_eq!(scope.cluster.id(), id);
        assert_eq!(scope.database, "A");
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_connect_registers_nothing() {
        let registry = registry();
        let u = user("u1");

        let err = registry.connect(&u, "redis://localhost").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!registry.has_connection(&u).await);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_registers_nothing() {
        let registry = registry();
        let u = user("u1");
        let stalled = registry.connector.stall_memory_connects().await;

        let err = registry.connect(&u, "memory://slow").await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(op) if op == "connect"));
        assert_eq!(registry.session_count().await, 0);

        drop(stalled);
        let outcome = registry.connect(&u, "memory://slow").await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Opened(EngineKind::Memory));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_registers_nothing() {
        let registry = registry();
        let u = user("u1");
        let stalled = registry.connector.stall_memory_connects().await;

        let task = {
            let (registry, u) = (registry.clone(), u.clone());
            tokio::spawn(async move { registry.connect(&u, "memory://gone").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.session_count().await, 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.session_count().await, 0);
        assert!(!registry.has_connection(&u).await);
        drop(stalled);
    }

    #[tokio::test]
    async fn test_disconnect_then_operations_are_not_connected() {
        let registry = registry();
        let u = user("u1");
        registry.connect(&u, "memory://dc").await.unwrap();
        registry.select_database(&u, "A").await.unwrap();
        registry.select_collection(&u, "c").await.unwrap();
        let held = registry.resolve_collection(&u).await.unwrap();

        assert!(registry.disconnect(&u).await.unwrap());
        assert!(!registry.disconnect(&u).await.unwrap());

        assert!(matches!(registry.resolve_connection(&u).await, Err(AppError::NotConnected)));
        assert!(matches!(registry.resolve_collection(&u).await, Err(AppError::NotConnected)));
        assert!(matches!(
            registry.select_database(&u, "A").await,
            Err(AppError::NotConnected)
        ));
        assert!(matches!(registry.unselect_database(&u).await, Err(AppError::NotConnected)));
        assert_eq!(registry.status(&u).await, SessionStatus::disconnected());
        assert_eq!(registry.session_count().await, 0);

        // A scope resolved before the disconnect cannot reach the closed handle.
        assert!(matches!(
            held.cluster.list_collection_names(&held.database).await,
            Err(AppError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_select_collection_without_database_is_an_error() {
        let registry = registry();
        let u = user("u1");
        assert!(matches!(
            registry.select_collection(&u, "c").await,
            Err(AppError::NotConnected)
        ));

        registry.connect(&u, "memory://sel").await.unwrap();
        assert!(matches!(
            registry.select_collection(&u, "c").await,
            Err(AppError::NoDatabaseSelected)
        ));
        assert!(!registry.has_collection_selected(&u).await);
    }

    #[tokio::test]
    async fn test_reselecting_database_clears_collection() {
        let registry = registry();
        let u = user("u1");
        registry.connect(&u, "memory://resel").await.unwrap();
        registry.select_database(&u, "A").await.unwrap();
        registry.select_collection(&u, "c").await.unwrap();
        assert!(registry.has_collection_selected(&u).await);

        let status = registry.select_database(&u, "A").await.unwrap();
        assert_eq!(status.stage, SessionStage::DatabaseSelected);
        assert!(status.collection.is_none());
        assert!(registry.has_database_selected(&u).await);
        assert!(!registry.has_collection_selected(&u).await);
    }

    #[tokio::test]
    async fn test_invalid_names_leave_state_untouched() {
        let registry = registry();
        let u = user("u1");
        registry.connect(&u, "memory://names").await.unwrap();
        registry.select_database(&u, "A").await.unwrap();

        assert!(matches!(
            registry.select_database(&u, "bad.name").await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(registry.status(&u).await.database.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let registry = registry();
        let u1 = user("u1");
        let u2 = user("u2");
        registry.connect(&u1, "memory://iso").await.unwrap();
        registry.connect(&u2, "memory://iso").await.unwrap();
        registry.select_database(&u1, "A").await.unwrap();
        registry.select_collection(&u1, "c").await.unwrap();

        assert_eq!(registry.status(&u2).await.stage, SessionStage::Connected);

        registry.disconnect(&u2).await.unwrap();
        assert!(registry.has_collection_selected(&u1).await);
        assert!(registry.resolve_collection(&u1).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_database_selection_is_atomic() {
        let registry = registry();
        let u = user("u1");
        registry.connect(&u, "memory://race").await.unwrap();

        for _ in 0..20 {
            registry.select_database(&u, "A").await.unwrap();
            registry.select_collection(&u, "c").await.unwrap();

            let (a, b, c) = tokio::join!(
                {
                    let (registry, u) = (registry.clone(), u.clone());
                    tokio::spawn(async move { registry.select_database(&u, "A").await })
                },
                {
                    let (registry, u) = (registry.clone(), u.clone());
                    tokio::spawn(async move { registry.select_database(&u, "B").await })
                },
                {
                    let (registry, u) = (registry.clone(), u.clone());
                    tokio::spawn(async move { registry.select_collection(&u, "d").await })
                },
            );
            a.unwrap().unwrap();
            b.unwrap().unwrap();
            c.unwrap().unwrap();

            let status = registry.status(&u).await;
            let database = status.database.as_deref();
            assert!(matches!(database, Some("A") | Some("B")));
            // Any collection selection must have been made on the final database.
            if let Some(collection) = status.collection.as_deref() {
                assert_eq!(collection, "d");
                assert_eq!(status.stage, SessionStage::CollectionSelected);
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_connects_open_one_handle() {
        let registry = registry();
        let u = user("u1");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (registry, u) = (registry.clone(), u.clone());
                tokio::spawn(async move { registry.connect(&u, "memory://many").await })
            })
            .collect();

        let mut opened = 0;
        for task in tasks {
            if let ConnectOutcome::Opened(_) = task.await.unwrap().unwrap() {
                opened += 1;
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect_gets_fresh_state() {
        let registry = registry();
        let u = user("u1");
        registry.connect(&u, "memory://again").await.unwrap();
        registry.select_database(&u, "A").await.unwrap();
        registry.disconnect(&u).await.unwrap();

        let outcome = registry.connect(&u, "memory://again").await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Opened(EngineKind::Memory));
        assert_eq!(registry.status(&u).await.stage, SessionStage::Connected);
    }
}
