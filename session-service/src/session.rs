//! Per-user selection state machine.
//!
//! ```text
//! Disconnected --connect--> Connected --select db--> DatabaseSelected --select coll--> CollectionSelected
//!      ^                        ^  ^                      |  ^                               |
//!      |                        |  +-----unselect db------+  +------unselect coll-------------+
//!      +------- disconnect (from any state) ---------------------------------------------------+
//! ```
//!
//! All invalidation rules live in [`SessionState::next`]: selecting a database
//! always discards the collection selection, and nothing outlives the
//! connection it was made on.

use uuid::Uuid;

use common::errors::{AppError, AppResult};
use common::models::{SessionStage, SessionStatus};

use crate::cluster::Cluster;

/// State of one user's session.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected {
        cluster: Cluster,
    },
    DatabaseSelected {
        cluster: Cluster,
        database: String,
    },
    CollectionSelected {
        cluster: Cluster,
        database: String,
        collection: String,
    },
}

/// Events that move a session between states.
#[derive(Debug)]
pub enum Transition {
    Connect(Cluster),
    Disconnect,
    SelectDatabase(String),
    UnselectDatabase,
    SelectCollection(String),
    UnselectCollection,
    /// A database was dropped through the given connection.
    DatabaseDropped { connection: Uuid, database: String },
    /// A collection was dropped through the given connection.
    CollectionDropped {
        connection: Uuid,
        database: String,
        collection: String,
    },
}

/// Resolved connection, ready for cluster-level operations.
#[derive(Debug, Clone)]
pub struct ConnectionScope {
    pub cluster: Cluster,
}

/// Resolved database selection.
#[derive(Debug, Clone)]
pub struct DatabaseScope {
    pub cluster: Cluster,
    pub database: String,
}

/// Resolved collection selection; `collection` always lives in `database`.
#[derive(Debug, Clone)]
pub struct CollectionScope {
    pub cluster: Cluster,
    pub database: String,
    pub collection: String,
}

impl SessionState {
    /// Computes the state that follows `transition`.
    ///
    /// # Errors
    /// `NotConnected` for selection changes on a disconnected session and
    /// `NoDatabaseSelected` when selecting a collection without a database.
    pub fn next(&self, transition: Transition) -> AppResult<SessionState> {
        use SessionState::*;

        let next = match (self, transition) {
            (_, Transition::Disconnect) => Disconnected,

            (Disconnected, Transition::Connect(cluster)) => Connected { cluster },
            // Already connected: keep the existing handle.
            (state, Transition::Connect(_)) => state.clone(),

            (Disconnected, _) => return Err(AppError::NotConnected),

            (state, Transition::SelectDatabase(database)) => DatabaseSelected {
                cluster: state.require_cluster()?.clone(),
                database,
            },
            (state, Transition::UnselectDatabase) => Connected {
                cluster: state.require_cluster()?.clone(),
            },

            (Connected { .. }, Transition::SelectCollection(_)) => {
                return Err(AppError::NoDatabaseSelected)
            }
            (
                DatabaseSelected { cluster, database } | CollectionSelected { cluster, database, .. },
                Transition::SelectCollection(collection),
            ) => CollectionSelected {
                cluster: cluster.clone(),
                database: database.clone(),
                collection,
            },

            (CollectionSelected { cluster, database, .. }, Transition::UnselectCollection) => {
                DatabaseSelected {
                    cluster: cluster.clone(),
                    database: database.clone(),
                }
            }
            (state, Transition::UnselectCollection) => state.clone(),

            (
                DatabaseSelected { cluster, database } | CollectionSelected { cluster, database, .. },
                Transition::DatabaseDropped {
                    connection,
                    database: dropped,
                },
            ) if cluster.id() == connection && *database == dropped => Connected {
                cluster: cluster.clone(),
            },
            (state, Transition::DatabaseDropped { .. }) => state.clone(),

            (
                CollectionSelected {
                    cluster,
                    database,
                    collection,
                },
                Transition::CollectionDropped {
                    connection,
                    database: dropped_db,
                    collection: dropped,
                },
            ) if cluster.id() == connection && *database == dropped_db && *collection == dropped => {
                DatabaseSelected {
                    cluster: cluster.clone(),
                    database: database.clone(),
                }
            }
            (state, Transition::CollectionDropped { .. }) => state.clone(),
        };

        Ok(next)
    }

    pub fn stage(&self) -> SessionStage {
        match self {
            SessionState::Disconnected => SessionStage::Disconnected,
            SessionState::Connected { .. } => SessionStage::Connected,
            SessionState::DatabaseSelected { .. } => SessionStage::DatabaseSelected,
            SessionState::CollectionSelected { .. } => SessionStage::CollectionSelected,
        }
    }

    pub fn cluster(&self) -> Option<&Cluster> {
        match self {
            SessionState::Disconnected => None,
            SessionState::Connected { cluster }
            | SessionState::DatabaseSelected { cluster, .. }
            | SessionState::CollectionSelected { cluster, .. } => Some(cluster),
        }
    }

    fn require_cluster(&self) -> AppResult<&Cluster> {
        self.cluster().ok_or(AppError::NotConnected)
    }

    pub fn connection_scope(&self) -> AppResult<ConnectionScope> {
        Ok(ConnectionScope {
            cluster: self.require_cluster()?.clone(),
        })
    }

    pub fn database_scope(&self) -> AppResult<DatabaseScope> {
        match self {
            SessionState::Disconnected => Err(AppError::NotConnected),
            SessionState::Connected { .. } => Err(AppError::NoDatabaseSelected),
            SessionState::DatabaseSelected { cluster, database }
            | SessionState::CollectionSelected {
                cluster, database, ..
            } => Ok(DatabaseScope {
                cluster: cluster.clone(),
                database: database.clone(),
            }),
        }
    }

    pub fn collection_scope(&self) -> AppResult<CollectionScope> {
        match self {
            SessionState::Disconnected => Err(AppError::NotConnected),
            SessionState::Connected { .. } => Err(AppError::NoDatabaseSelected),
            SessionState::DatabaseSelected { .. } => Err(AppError::NoCollectionSelected),
            SessionState::CollectionSelected {
                cluster,
                database,
                collection,
            } => Ok(CollectionScope {
                cluster: cluster.clone(),
                database: database.clone(),
                collection: collection.clone(),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        let (database, collection) = match self {
            SessionState::Disconnected | SessionState::Connected { .. } => (None, None),
            SessionState::DatabaseSelected { database, .. } => (Some(database.clone()), None),
            SessionState::CollectionSelected {
                database,
                collection,
                ..
            } => (Some(database.clone()), Some(collection.clone())),
        };
        SessionStatus {
            stage: self.stage(),
            engine: self.cluster().map(|c| c.engine().to_string()),
            database,
            collection,
        }
    }
}
