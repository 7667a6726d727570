//! The set of named stores the state core reads at startup.

use std::sync::Arc;

use crate::database::Database;
use crate::kv::KeyValueStore;
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;

pub const STORE_STATE: &str = "state";
pub const STORE_SESSION: &str = "session";

/// Independently persisted entity caches loaded alongside the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Users,
    Chats,
    Dialogs,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Users, EntityKind::Chats, EntityKind::Dialogs];

    /// Name of the backing store.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Chats => "chats",
            EntityKind::Dialogs => "dialogs",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handles to every store the state core consumes.
///
/// `session` is a separate namespace for the auth marker and the session id,
/// so it can have a different lifetime than general application state.
#[derive(Clone)]
pub struct StateStorages {
    pub state: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
    pub users: Arc<dyn KeyValueStore>,
    pub chats: Arc<dyn KeyValueStore>,
    pub dialogs: Arc<dyn KeyValueStore>,
}

impl StateStorages {
    /// Fresh, empty in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(MemoryStore::new()),
            session: Arc::new(MemoryStore::new()),
            users: Arc::new(MemoryStore::new()),
            chats: Arc::new(MemoryStore::new()),
            dialogs: Arc::new(MemoryStore::new()),
        }
    }

    /// Named partitions of one SQLite database.
    pub fn sqlite(db: Arc<Database>) -> Self {
        let store = |name: &str| -> Arc<dyn KeyValueStore> { Arc::new(SqliteStore::new(db.clone(), name)) };
        Self {
            state: store(STORE_STATE),
            session: store(STORE_SESSION),
            users: store(EntityKind::Users.as_str()),
            chats: store(EntityKind::Chats.as_str()),
            dialogs: store(EntityKind::Dialogs.as_str()),
        }
    }

    pub fn entity(&self, kind: EntityKind) -> &Arc<dyn KeyValueStore> {
        match kind {
            EntityKind::Users => &self.users,
            EntityKind::Chats => &self.chats,
            EntityKind::Dialogs => &self.dialogs,
        }
    }
}
