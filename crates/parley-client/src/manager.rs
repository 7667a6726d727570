//! The state manager.
//!
//! Owns the in-memory [`ApplicationState`], loads and reconciles it from the
//! key-value stores on first access, and writes every key-level change back
//! to storage in the background.
//!
//! Snapshots handed out are immutable `Arc`s. A mutation swaps in a new
//! snapshot, so all changes go through [`StateManager::set_key`] or
//! [`StateManager::write`] and reach storage.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use futures::future::join_all;
use parley_shared::constants::{KEY_STATE_ID, KEY_USER_AUTH, LEGACY_RESET_VERSION, REFRESH_EVERY_MS};
use parley_shared::{compare_version, PeerId, UserAuth};
use parley_store::kv::record;
use parley_store::{EntityKind, KeyValueStore, Records, StateStorages};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, error, info, warn};

use crate::auth::resolve_auth;
use crate::config::ClientConfig;
use crate::document::{set_deep_property, validate_init_object};
use crate::error::StateError;
use crate::events::{EventBus, SettingsUpdatedPayload, StateEvent};
use crate::migrate;
use crate::peers::{PeerInterest, PeerInterestTracker};
use crate::persist::PersistHandle;
use crate::state::{ApplicationState, AuthState, StateKey};
use crate::template::StateTemplate;

/// Entity-cache rows read at load time, exposed as-is to higher layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityResults {
    pub users: Vec<Value>,
    pub chats: Vec<Value>,
    pub dialogs: Vec<Value>,
}

impl EntityResults {
    pub fn get(&self, kind: EntityKind) -> &Vec<Value> {
        match kind {
            EntityKind::Users => &self.users,
            EntityKind::Chats => &self.chats,
            EntityKind::Dialogs => &self.dialogs,
        }
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut Vec<Value> {
        match kind {
            EntityKind::Users => &mut self.users,
            EntityKind::Chats => &mut self.chats,
            EntityKind::Dialogs => &mut self.dialogs,
        }
    }

    /// Rows of the cache whose store is called `name`, if any.
    fn by_name_mut(&mut self, name: &str) -> Option<&mut Vec<Value>> {
        let kind = EntityKind::ALL.into_iter().find(|k| k.as_str() == name)?;
        Some(self.get_mut(kind))
    }

    fn clear(&mut self) {
        self.users.clear();
        self.chats.clear();
        self.dialogs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.chats.is_empty() && self.dialogs.is_empty()
    }
}

/// Raw results of the batched startup read.
struct StartupReads {
    values: Vec<Option<Value>>,
    session_auth: Option<Value>,
    session_state_id: Option<Value>,
    legacy_auth: Option<Value>,
    entities: EntityResults,
}

/// Long-lived service owning the application state. Construct once at
/// startup and share the `Arc`.
pub struct StateManager {
    config: ClientConfig,
    template: StateTemplate,
    storages: StateStorages,
    events: EventBus,
    writer: PersistHandle,
    loaded: OnceCell<()>,
    state: RwLock<Option<Arc<ApplicationState>>>,
    entity_results: RwLock<EntityResults>,
    new_version: RwLock<Option<String>>,
    peers: Mutex<PeerInterestTracker>,
}

impl StateManager {
    /// Create the manager with a fresh template.
    ///
    /// Must be called from within a tokio runtime: the background writer is
    /// spawned here.
    pub fn new(config: ClientConfig, storages: StateStorages) -> Result<Arc<Self>, StateError> {
        let template = StateTemplate::new(&config)?;
        Ok(Self::with_template(config, storages, template))
    }

    pub fn with_template(
        config: ClientConfig,
        storages: StateStorages,
        template: StateTemplate,
    ) -> Arc<Self> {
        let events = EventBus::default();
        let writer = PersistHandle::spawn(storages.state.clone(), events.clone());

        Arc::new(Self {
            peers: Mutex::new(PeerInterestTracker::new(events.clone())),
            config,
            template,
            storages,
            events,
            writer,
            loaded: OnceCell::new(),
            state: RwLock::new(None),
            entity_results: RwLock::new(EntityResults::default()),
            new_version: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn template(&self) -> &StateTemplate {
        &self.template
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Load the state, running the reconciliation pipeline exactly once.
    ///
    /// Concurrent callers wait for the same run and receive the same
    /// snapshot. Storage failures never surface here: the state is rebuilt
    /// from whatever could be read and the failures are logged.
    pub async fn load(&self) -> Arc<ApplicationState> {
        self.loaded
            .get_or_init(|| async {
                let state = self.load_saved_state().await;
                *self.write_state() = Some(Arc::new(state));
            })
            .await;

        self.snapshot()
            .unwrap_or_else(|| Arc::new(self.template.state().clone()))
    }

    /// The loaded state, loading it first if needed.
    pub async fn get(&self) -> Arc<ApplicationState> {
        match self.snapshot() {
            Some(state) => state,
            None => self.load().await,
        }
    }

    /// Current snapshot without triggering a load.
    pub fn snapshot(&self) -> Option<Arc<ApplicationState>> {
        self.read_state().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Users/chats/dialogs rows read during load.
    pub fn entity_results(&self) -> EntityResults {
        self.entity_results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set when this process upgraded the stored version.
    pub fn new_version(&self) -> Option<String> {
        self.new_version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Set the value at a dot-separated path (`settings.autoDownload.groups`)
    /// and persist the top-level key that contains it.
    ///
    /// The change is visible to readers immediately; the write to storage
    /// happens in the background.
    pub fn set_key(&self, path: &str, value: Value) -> Result<(), StateError> {
        let top = path.split('.').next().unwrap_or(path);
        let key: StateKey = top.parse()?;

        let top_value = {
            let mut guard = self.write_state();
            let current = guard.as_ref().ok_or(StateError::NotLoaded)?;
            let (updated, top_value) = apply_path(current, key, path, value.clone())?;
            *guard = Some(Arc::new(updated));
            top_value
        };

        debug!(path, "State key updated");
        self.events
            .emit(StateEvent::SettingsUpdated(SettingsUpdatedPayload {
                key: path.to_string(),
                value,
            }));
        self.persist_value(key, top_value);
        Ok(())
    }

    /// Persist `value` under a top-level key, replacing the in-memory value
    /// first when `update_memory` is set.
    ///
    /// The value is checked against the typed model in both modes. An
    /// ill-typed value is rejected and nothing is written. Without
    /// `update_memory` the check runs against the template when the state is
    /// not loaded yet.
    pub fn write(&self, key: StateKey, value: Value, update_memory: bool) -> Result<(), StateError> {
        if update_memory {
            let mut guard = self.write_state();
            let current = guard.as_ref().ok_or(StateError::NotLoaded)?;
            let (updated, _) = apply_path(current, key, key.as_str(), value.clone())?;
            *guard = Some(Arc::new(updated));
        } else {
            let base = self
                .snapshot()
                .unwrap_or_else(|| Arc::new(self.template.state().clone()));
            apply_path(&base, key, key.as_str(), value.clone())?;
        }

        self.persist_value(key, value);
        Ok(())
    }

    /// Re-persist the in-memory value of `key`.
    pub fn persist_key(&self, key: StateKey) -> Result<(), StateError> {
        let value = {
            let guard = self.read_state();
            let current = guard.as_ref().ok_or(StateError::NotLoaded)?;
            let doc = serde_json::to_value(current.as_ref())?;
            doc.get(key.as_str()).cloned().unwrap_or(Value::Null)
        };
        self.persist_value(key, value);
        Ok(())
    }

    /// Wait until every write scheduled so far has been attempted.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    // -----------------------------------------------------------------------
    // Auth and peer interest
    // -----------------------------------------------------------------------

    /// Announce a signed-in user and keep their peer resident.
    pub fn on_user_auth(&self, auth: UserAuth) {
        info!(peer = %auth.id, dc = auth.dc_id, "User authorized");
        let peer_id = auth.id;
        self.events.emit(StateEvent::UserAuth(auth));
        self.request_peer_single(peer_id, PeerInterest::SelfPeer, None);
    }

    pub fn request_peer(&self, peer_id: PeerId, interest: PeerInterest, exclusive: bool) {
        self.lock_peers().request(peer_id, interest, exclusive);
    }

    pub fn request_peer_single(
        &self,
        peer_id: PeerId,
        interest: PeerInterest,
        exclusive_key: Option<PeerId>,
    ) {
        self.lock_peers()
            .request_single(peer_id, interest, exclusive_key);
    }

    pub fn release_single_peer(&self, peer_id: PeerId, interest: PeerInterest) {
        self.lock_peers().release_single(peer_id, interest);
    }

    pub fn is_peer_needed(&self, peer_id: PeerId) -> bool {
        self.lock_peers().is_needed(peer_id)
    }

    /// Run `f` with exclusive access to the interest tracker.
    pub fn with_peers<R>(&self, f: impl FnOnce(&mut PeerInterestTracker) -> R) -> R {
        f(&mut self.lock_peers())
    }

    // -----------------------------------------------------------------------
    // Load pipeline
    // -----------------------------------------------------------------------

    async fn load_saved_state(&self) -> ApplicationState {
        let started = Instant::now();
        let reads = self.read_startup().await;
        let mut results = reads.entities;

        // Adopt stored values, defaulting (and persisting) the missing ones.
        let mut doc = Map::new();
        for (key, stored) in StateKey::ALL.into_iter().zip(reads.values) {
            match stored {
                Some(value) => {
                    doc.insert(key.as_str().to_string(), value);
                }
                None => self.reset_to_default(&mut doc, key),
            }
        }

        let now_secs = chrono::Utc::now().timestamp();
        if let Some(auth) = resolve_auth(
            &self.storages,
            reads.session_auth,
            reads.legacy_auth,
            self.config.base_dc_id,
            now_secs,
        )
        .await
        {
            match serde_json::to_value(AuthState::SignedIn) {
                Ok(signed_in) => self.set_document_value(&mut doc, StateKey::AuthState, signed_in),
                Err(e) => error!(error = %e, "Failed to encode auth state"),
            }
            self.on_user_auth(auth);
        }

        self.reconcile_session(&mut doc, &mut results, reads.session_state_id)
            .await;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let created = doc
            .get(StateKey::StateCreatedTime.as_str())
            .and_then(Value::as_i64);
        if let Some(created) = created {
            if created.saturating_add(REFRESH_EVERY_MS) < now_ms {
                debug!(created, now = now_ms, "Refreshing time-sensitive state keys");
                for key in StateKey::REFRESH {
                    self.reset_to_default(&mut doc, key);
                    if let Some(rows) = results.by_name_mut(key.as_str()) {
                        rows.clear();
                    }
                }
            }
        }

        self.migrate_legacy_settings(&mut doc);

        let mut replaced = BTreeSet::new();
        validate_init_object(self.template.document(), &mut doc, &mut |key| {
            replaced.insert(key.to_string());
        });
        for name in replaced {
            match name.parse::<StateKey>() {
                Ok(key) => {
                    debug!(key = %key, "Filled missing state defaults");
                    self.persist_from_document(&doc, key);
                }
                Err(e) => warn!(error = %e, "Template produced an unknown key"),
            }
        }

        self.reconcile_version(&mut doc, &mut results);

        let state = self.decode_document(doc);

        *self
            .entity_results
            .write()
            .unwrap_or_else(PoisonError::into_inner) = results;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            state_id = state.state_id,
            "State loaded"
        );
        state
    }

    /// One batched read over every key the pipeline needs.
    async fn read_startup(&self) -> StartupReads {
        let state_store = &self.storages.state;
        let session_store = &self.storages.session;
        let key_reads = join_all(
            StateKey::ALL
                .iter()
                .map(|key| read_value(state_store, key.as_str())),
        );

        let (values, session_auth, session_state_id, legacy_auth, users, chats, dialogs) = tokio::join!(
            key_reads,
            read_value(session_store, KEY_USER_AUTH),
            read_value(session_store, KEY_STATE_ID),
            read_value(state_store, KEY_USER_AUTH),
            read_entities(&self.storages, EntityKind::Users),
            read_entities(&self.storages, EntityKind::Chats),
            read_entities(&self.storages, EntityKind::Dialogs),
        );

        StartupReads {
            values,
            session_auth,
            session_state_id,
            legacy_auth,
            entities: EntityResults {
                users,
                chats,
                dialogs,
            },
        }
    }

    /// Reset everything but the auth state and id when the stored state was
    /// written under another session marker, then record the current marker.
    async fn reconcile_session(
        &self,
        doc: &mut Map<String, Value>,
        results: &mut EntityResults,
        session_state_id: Option<Value>,
    ) {
        let loaded_id = doc.get(StateKey::StateId.as_str()).and_then(Value::as_u64);
        let stored_id = session_state_id.as_ref().and_then(Value::as_u64);
        if loaded_id.is_some() && loaded_id == stored_id {
            return;
        }

        if session_state_id.is_some() {
            info!(
                stored = ?stored_id,
                loaded = ?loaded_id,
                "State belongs to another session, resetting"
            );

            let auth_state = doc.remove(StateKey::AuthState.as_str());
            let state_id = doc.remove(StateKey::StateId.as_str());
            *doc = self.template.document().clone();
            if let Some(value) = auth_state {
                doc.insert(StateKey::AuthState.as_str().to_string(), value);
            }
            if let Some(value) = state_id {
                doc.insert(StateKey::StateId.as_str().to_string(), value);
            }

            results.clear();
            self.clear_entity_stores().await;
            self.persist_document(doc);
        }

        let marker = doc
            .get(StateKey::StateId.as_str())
            .cloned()
            .unwrap_or(Value::Null);
        if let Err(e) = self.storages.session.set(record(KEY_STATE_ID, marker)).await {
            warn!(error = %e, "Failed to persist session marker");
        }
    }

    fn migrate_legacy_settings(&self, doc: &mut Map<String, Value>) {
        let default_themes = serde_json::to_value(self.template.default_themes())
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to encode default themes");
                Value::Array(Vec::new())
            });

        let changed = match doc.get_mut(StateKey::Settings.as_str()) {
            Some(Value::Object(settings)) => {
                let theme = migrate::derive_theme(settings);
                let themes = migrate::derive_themes(settings, &default_themes);
                theme || themes
            }
            _ => false,
        };

        if changed {
            info!("Migrated legacy theme settings");
            self.persist_from_document(doc, StateKey::Settings);
        }
    }

    fn reconcile_version(&self, doc: &mut Map<String, Value>, results: &mut EntityResults) {
        let stored_version = doc
            .get(StateKey::Version.as_str())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let stored_build = doc.get(StateKey::Build.as_str()).and_then(Value::as_u64);

        let current_version = self.config.app_version.clone();
        let current_build = self.config.build;
        if stored_version == current_version && stored_build == Some(u64::from(current_build)) {
            return;
        }

        if compare_version(&stored_version, LEGACY_RESET_VERSION).is_lt() {
            info!(
                stored = %stored_version,
                reset_below = LEGACY_RESET_VERSION,
                "Stored state predates the dialog format, wiping dialogs and filters"
            );
            self.reset_to_default(doc, StateKey::AllDialogsLoaded);
            self.reset_to_default(doc, StateKey::Filters);
            results.dialogs.clear();
        }

        if compare_version(&stored_version, &current_version).is_ne() {
            info!(from = %stored_version, to = %current_version, "State version upgraded");
            *self
                .new_version
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(current_version.clone());
        }

        self.set_document_value(doc, StateKey::Version, Value::from(current_version));
        self.set_document_value(doc, StateKey::Build, Value::from(current_build));
    }

    /// Decode the reconciled document, resetting any key that does not fit
    /// the typed model.
    fn decode_document(&self, mut doc: Map<String, Value>) -> ApplicationState {
        match serde_json::from_value::<ApplicationState>(Value::Object(doc.clone())) {
            Ok(state) => return state,
            Err(e) => warn!(error = %e, "Stored state does not fit the model, resetting bad keys"),
        }

        for key in StateKey::ALL {
            let mut probe = self.template.document().clone();
            if let Some(value) = doc.get(key.as_str()) {
                probe.insert(key.as_str().to_string(), value.clone());
            }
            if let Err(e) = serde_json::from_value::<ApplicationState>(Value::Object(probe)) {
                warn!(key = %key, error = %e, "Resetting undecodable state key");
                self.reset_to_default(&mut doc, key);
            }
        }

        serde_json::from_value(Value::Object(doc)).unwrap_or_else(|e| {
            error!(error = %e, "State still undecodable, falling back to defaults");
            self.template.state().clone()
        })
    }

    async fn clear_entity_stores(&self) {
        let clears = EntityKind::ALL.map(|kind| async move {
            if let Err(e) = self.storages.entity(kind).clear().await {
                warn!(store = %kind, error = %e, "Failed to clear entity cache");
            }
        });
        join_all(clears).await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn reset_to_default(&self, doc: &mut Map<String, Value>, key: StateKey) {
        self.set_document_value(doc, key, self.template.default_value(key));
    }

    fn set_document_value(&self, doc: &mut Map<String, Value>, key: StateKey, value: Value) {
        doc.insert(key.as_str().to_string(), value.clone());
        self.persist_value(key, value);
    }

    fn persist_from_document(&self, doc: &Map<String, Value>, key: StateKey) {
        let value = doc.get(key.as_str()).cloned().unwrap_or(Value::Null);
        self.persist_value(key, value);
    }

    fn persist_document(&self, doc: &Map<String, Value>) {
        let records: Records = StateKey::ALL
            .iter()
            .filter_map(|key| {
                doc.get(key.as_str())
                    .map(|value| (key.as_str().to_string(), value.clone()))
            })
            .collect();
        self.writer.write(records);
    }

    fn persist_value(&self, key: StateKey, value: Value) {
        self.writer.write(record(key.as_str(), value));
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Option<Arc<ApplicationState>>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Option<Arc<ApplicationState>>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_peers(&self) -> MutexGuard<'_, PeerInterestTracker> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply `value` at `path` to a copy of `state` and decode the result.
///
/// Returns the new state and the JSON value of the top-level `key`.
fn apply_path(
    state: &ApplicationState,
    key: StateKey,
    path: &str,
    value: Value,
) -> Result<(ApplicationState, Value), StateError> {
    let mut doc = serde_json::to_value(state)?;
    set_deep_property(&mut doc, path, value)?;
    let top_value = doc.get(key.as_str()).cloned().unwrap_or(Value::Null);

    let updated = serde_json::from_value(doc).map_err(|source| StateError::InvalidValue {
        path: path.to_string(),
        source,
    })?;
    Ok((updated, top_value))
}

/// Read one key; failures and explicit nulls count as absent.
async fn read_value(store: &Arc<dyn KeyValueStore>, key: &str) -> Option<Value> {
    match store.get(key).await {
        Ok(value) => value.filter(|v| !v.is_null()),
        Err(e) => {
            warn!(key, error = %e, "Failed to read key, treating as absent");
            None
        }
    }
}

async fn read_entities(storages: &StateStorages, kind: EntityKind) -> Vec<Value> {
    match storages.entity(kind).get_all().await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(store = %kind, error = %e, "Failed to read entity cache");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ThemeName;
    use parley_store::{Database, MemoryStore};
    use serde_json::json;

    const STATE_ID: u32 = 42;

    struct Fixture {
        state: Arc<MemoryStore>,
        session: Arc<MemoryStore>,
        users: Arc<MemoryStore>,
        dialogs: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_state(MemoryStore::new())
        }

        fn with_state(state: MemoryStore) -> Self {
            Self {
                state: Arc::new(state),
                session: Arc::new(MemoryStore::new()),
                users: Arc::new(MemoryStore::new()),
                dialogs: Arc::new(MemoryStore::new()),
            }
        }

        fn storages(&self) -> StateStorages {
            StateStorages {
                state: self.state.clone(),
                session: self.session.clone(),
                users: self.users.clone(),
                chats: Arc::new(MemoryStore::new()),
                dialogs: self.dialogs.clone(),
            }
        }

        fn manager(&self) -> Arc<StateManager> {
            manager_for(self.storages(), STATE_ID)
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            app_version: "1.2.0".to_string(),
            build: 120,
            ..ClientConfig::default()
        }
    }

    fn template(state_id: u32) -> StateTemplate {
        StateTemplate::build(&config(), chrono::Utc::now().timestamp_millis(), state_id)
            .expect("template")
    }

    fn manager_for(storages: StateStorages, state_id: u32) -> Arc<StateManager> {
        StateManager::with_template(config(), storages, template(state_id))
    }

    /// Template document with `changes` applied, as a stored state.
    fn stored_doc(changes: Value) -> Map<String, Value> {
        let mut doc = template(STATE_ID).document().clone();
        if let Value::Object(changes) = changes {
            doc.extend(changes);
        }
        doc
    }

    fn drain(rx: &mut broadcast::Receiver<StateEvent>) -> Vec<StateEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_empty_store_loads_and_persists_template() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        let mut rx = manager.subscribe();

        let state = manager.load().await;
        manager.flush().await;

        assert_eq!(state.as_ref(), manager.template().state());
        assert_eq!(state.state_id, STATE_ID);
        assert!(manager.new_version().is_none());

        let stored = fixture.state.snapshot().await;
        for key in StateKey::ALL {
            assert!(stored.contains_key(key.as_str()), "missing {key}");
        }
        assert_eq!(fixture.session.peek(KEY_STATE_ID).await, Some(json!(STATE_ID)));

        let saved: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                StateEvent::Save { keys } => Some(keys),
                _ => None,
            })
            .flatten()
            .collect();
        assert!(saved.contains(&"settings".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_run() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        assert!(!manager.is_loaded());

        let (a, b) = tokio::join!(manager.load(), manager.load());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(manager.is_loaded());

        let reads = fixture.state.read_count();
        let c = manager.load().await;
        let d = manager.get().await;
        assert!(Arc::ptr_eq(&a, &c));
        assert!(Arc::ptr_eq(&a, &d));
        assert_eq!(fixture.state.read_count(), reads);
    }

    #[tokio::test]
    async fn test_session_mismatch_resets_state() {
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "stateId": 99,
            "contactsList": [5, 6],
            "keepSigned": false,
            "authState": {"_": "authStateSignedIn"},
        }))));
        fixture
            .session
            .set(record(KEY_STATE_ID, json!(42)))
            .await
            .unwrap();
        fixture.users.set(record("5", json!({"id": 5}))).await.unwrap();

        let manager = fixture.manager();
        let state = manager.load().await;
        manager.flush().await;

        assert_eq!(state.state_id, 99);
        assert_eq!(state.auth_state, AuthState::SignedIn);
        assert!(state.contacts_list.is_empty());
        assert!(state.keep_signed);
        assert!(manager.entity_results().is_empty());
        assert!(fixture.users.snapshot().await.is_empty());
        assert_eq!(fixture.session.peek(KEY_STATE_ID).await, Some(json!(99)));
        assert_eq!(fixture.state.peek("contactsList").await, Some(json!([])));
    }

    #[tokio::test]
    async fn test_matching_session_keeps_entities() {
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "contactsList": [5],
        }))));
        fixture
            .session
            .set(record(KEY_STATE_ID, json!(STATE_ID)))
            .await
            .unwrap();
        fixture.users.set(record("5", json!({"id": 5}))).await.unwrap();

        let manager = fixture.manager();
        let state = manager.load().await;

        assert_eq!(state.contacts_list, vec![PeerId(5)]);
        assert_eq!(manager.entity_results().users, vec![json!({"id": 5})]);
    }

    #[tokio::test]
    async fn test_stale_state_refreshes_time_sensitive_keys() {
        let created = chrono::Utc::now().timestamp_millis() - 25 * 60 * 60 * 1000;
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "stateCreatedTime": created,
            "contactsList": [7],
            "maxSeenMsgId": 100,
            "filters": {"2": {"title": "Work"}},
            "recentEmoji": ["x"],
        }))));

        let manager = fixture.manager();
        let state = manager.load().await;

        assert!(state.contacts_list.is_empty());
        assert_eq!(state.max_seen_msg_id, 0);
        assert!(state.filters.is_empty());
        assert!(state.state_created_time > created);
        assert_eq!(state.recent_emoji, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_fresh_state_is_not_refreshed() {
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "contactsList": [7],
            "maxSeenMsgId": 100,
        }))));

        let state = fixture.manager().load().await;

        assert_eq!(state.contacts_list, vec![PeerId(7)]);
        assert_eq!(state.max_seen_msg_id, 100);
    }

    #[tokio::test]
    async fn test_night_theme_flag_migrates() {
        let mut settings = template(STATE_ID).default_value(StateKey::Settings);
        if let Some(map) = settings.as_object_mut() {
            map.remove("theme");
            map.remove("themes");
            map.insert("nightTheme".to_string(), json!(true));
        }
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(
            json!({ "settings": settings }),
        )));

        let manager = fixture.manager();
        let state = manager.load().await;
        manager.flush().await;

        assert_eq!(state.settings.theme, ThemeName::Night);
        assert!(state.settings.theme_by_name(ThemeName::Day).is_some());
        assert!(state.settings.theme_by_name(ThemeName::Night).is_some());
        let stored = fixture.state.peek("settings").await.unwrap();
        assert_eq!(stored["theme"], json!("night"));
    }

    #[tokio::test]
    async fn test_legacy_background_moves_into_theme() {
        let background = json!({"type": "color", "blur": true, "color": "#112233"});
        let mut settings = template(STATE_ID).default_value(StateKey::Settings);
        if let Some(map) = settings.as_object_mut() {
            map.remove("themes");
            map.insert("theme".to_string(), json!("day"));
            map.insert("background".to_string(), background);
        }
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(
            json!({ "settings": settings }),
        )));

        let state = fixture.manager().load().await;

        let day = state.settings.theme_by_name(ThemeName::Day).unwrap();
        assert_eq!(day.background.color.as_deref(), Some("#112233"));
        assert!(day.background.blur);
        let night = state.settings.theme_by_name(ThemeName::Night).unwrap();
        assert_eq!(night.background.color.as_deref(), Some("#0f0f0f"));
    }

    #[tokio::test]
    async fn test_old_version_wipes_dialogs() {
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "version": "0.8.0",
            "allDialogsLoaded": {"0": true},
            "filters": {"1": {"title": "Unread"}},
        }))));
        fixture.dialogs.set(record("1", json!({"peer": 1}))).await.unwrap();
        fixture.users.set(record("1", json!({"id": 1}))).await.unwrap();

        let manager = fixture.manager();
        let state = manager.load().await;
        manager.flush().await;

        assert!(state.all_dialogs_loaded.is_empty());
        assert!(state.filters.is_empty());
        assert_eq!(state.version, "1.2.0");
        assert_eq!(manager.new_version().as_deref(), Some("1.2.0"));

        let results = manager.entity_results();
        assert!(results.dialogs.is_empty());
        assert_eq!(results.users.len(), 1);
        assert_eq!(fixture.state.peek("version").await, Some(json!("1.2.0")));
        assert_eq!(fixture.state.peek("allDialogsLoaded").await, Some(json!({})));
    }

    #[tokio::test]
    async fn test_newer_version_upgrade_keeps_dialogs() {
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "version": "1.0.0",
            "allDialogsLoaded": {"0": true},
        }))));

        let manager = fixture.manager();
        let state = manager.load().await;

        assert_eq!(state.all_dialogs_loaded.get(&0), Some(&true));
        assert_eq!(manager.new_version().as_deref(), Some("1.2.0"));
    }

    #[tokio::test]
    async fn test_build_change_alone_is_not_an_upgrade() {
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "build": 100,
        }))));

        let manager = fixture.manager();
        let state = manager.load().await;
        manager.flush().await;

        assert_eq!(state.build, 120);
        assert!(manager.new_version().is_none());
        assert_eq!(fixture.state.peek("build").await, Some(json!(120)));
    }

    #[tokio::test]
    async fn test_session_auth_signs_in() {
        let fixture = Fixture::new();
        fixture
            .session
            .set(record(KEY_USER_AUTH, json!({"dcID": 2, "date": 1, "id": 777})))
            .await
            .unwrap();

        let manager = fixture.manager();
        let mut rx = manager.subscribe();
        let state = manager.load().await;
        manager.flush().await;

        assert_eq!(state.auth_state, AuthState::SignedIn);
        assert!(manager.is_peer_needed(PeerId(777)));
        assert_eq!(
            fixture.state.peek("authState").await,
            Some(json!({"_": "authStateSignedIn"}))
        );

        let events = drain(&mut rx);
        assert!(events.contains(&StateEvent::UserAuth(UserAuth {
            dc_id: 2,
            date: 1,
            id: PeerId(777),
        })));
        assert!(events.contains(&StateEvent::PeerNeeded(PeerId(777))));
    }

    #[tokio::test]
    async fn test_legacy_auth_migrates_to_session() {
        let fixture = Fixture::with_state(MemoryStore::with_entries([
            (KEY_USER_AUTH, json!(555)),
            ("dc", json!(4)),
            ("dc4_auth_key", json!("abcd")),
        ]));

        let manager = fixture.manager();
        let mut rx = manager.subscribe();
        let state = manager.load().await;

        assert_eq!(state.auth_state, AuthState::SignedIn);

        let migrated = fixture.session.peek(KEY_USER_AUTH).await.unwrap();
        assert_eq!(migrated["dcID"], json!(4));
        assert_eq!(migrated["id"], json!(555));
        assert_eq!(fixture.session.peek("dc4_auth_key").await, Some(json!("abcd")));

        let announced = drain(&mut rx).into_iter().find_map(|e| match e {
            StateEvent::UserAuth(auth) => Some(auth),
            _ => None,
        });
        let announced = announced.unwrap();
        assert_eq!(announced.id, PeerId(555));
        assert_eq!(announced.dc_id, 0);
    }

    #[tokio::test]
    async fn test_set_key_updates_memory_and_store() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        let before = manager.load().await;
        manager.flush().await;
        let mut rx = manager.subscribe();

        manager
            .set_key("settings.autoDownload.groups", json!(false))
            .unwrap();
        manager.flush().await;

        let after = manager.snapshot().unwrap();
        assert!(!after.settings.auto_download.groups);
        assert!(before.settings.auto_download.groups);

        let stored = fixture.state.peek("settings").await.unwrap();
        assert_eq!(stored["autoDownload"]["groups"], json!(false));

        let events = drain(&mut rx);
        assert!(events.contains(&StateEvent::SettingsUpdated(SettingsUpdatedPayload {
            key: "settings.autoDownload.groups".to_string(),
            value: json!(false),
        })));
        assert!(events.contains(&StateEvent::Save {
            keys: vec!["settings".to_string()],
        }));
    }

    #[tokio::test]
    async fn test_set_key_rejects_bad_input() {
        let manager = Fixture::new().manager();

        assert!(matches!(
            manager.set_key("keepSigned", json!(false)),
            Err(StateError::NotLoaded)
        ));

        let loaded = manager.load().await;
        assert!(matches!(
            manager.set_key("nope.deeper", json!(1)),
            Err(StateError::UnknownKey(_))
        ));
        assert!(matches!(
            manager.set_key("settings.messagesTextSize", json!("huge")),
            Err(StateError::InvalidValue { .. })
        ));

        let current = manager.snapshot().unwrap();
        assert!(Arc::ptr_eq(&loaded, &current));
    }

    #[tokio::test]
    async fn test_write_without_memory_update() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        manager.load().await;

        manager
            .write(StateKey::ContactsList, json!([1, 2]), false)
            .unwrap();
        manager.flush().await;

        assert!(manager.snapshot().unwrap().contacts_list.is_empty());
        assert_eq!(fixture.state.peek("contactsList").await, Some(json!([1, 2])));

        manager
            .write(StateKey::ContactsList, json!([3]), true)
            .unwrap();
        assert_eq!(manager.snapshot().unwrap().contacts_list, vec![PeerId(3)]);
    }

    #[tokio::test]
    async fn test_unavailable_storage_still_loads() {
        let fixture = Fixture::new();
        fixture.state.set_unavailable(true);
        fixture.session.set_unavailable(true);

        let manager = fixture.manager();
        let state = manager.load().await;
        manager.flush().await;

        assert_eq!(state.as_ref(), manager.template().state());
    }

    #[tokio::test]
    async fn test_wrong_kinds_are_replaced() {
        let mut settings = template(STATE_ID).default_value(StateKey::Settings);
        if let Some(map) = settings.as_object_mut() {
            map.insert("stickers".to_string(), json!(5));
        }
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "keepSigned": "yes",
            "settings": settings,
        }))));

        let manager = fixture.manager();
        let state = manager.load().await;
        manager.flush().await;

        assert!(state.keep_signed);
        assert!(state.settings.stickers.suggest);
        assert_eq!(fixture.state.peek("keepSigned").await, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_undecodable_key_falls_back_to_default() {
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(json!({
            "authState": {"_": "authStateBogus"},
            "contactsList": [9],
        }))));

        let manager = fixture.manager();
        let state = manager.load().await;

        assert_eq!(state.auth_state, manager.template().state().auth_state);
        assert_eq!(state.contacts_list, vec![PeerId(9)]);
    }

    #[tokio::test]
    async fn test_state_survives_restart_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_dir(dir.path()).unwrap());

        let first = manager_for(StateStorages::sqlite(db.clone()), STATE_ID);
        first.load().await;
        first.set_key("keepSigned", json!(false)).unwrap();
        first.flush().await;

        let second = manager_for(StateStorages::sqlite(db), 7);
        let state = second.load().await;

        assert!(!state.keep_signed);
        assert_eq!(state.state_id, STATE_ID);
    }

    #[tokio::test]
    async fn test_single_peer_slot_through_manager() {
        let manager = Fixture::new().manager();
        let mut rx = manager.subscribe();

        manager.request_peer_single(PeerId(1), PeerInterest::SelfPeer, Some(PeerId(100)));
        manager.request_peer_single(PeerId(2), PeerInterest::SelfPeer, Some(PeerId(100)));

        assert!(!manager.is_peer_needed(PeerId(1)));
        assert!(manager.is_peer_needed(PeerId(2)));

        let events = drain(&mut rx);
        assert!(events.contains(&StateEvent::PeerUnneeded(PeerId(1))));
    }

    #[tokio::test]
    async fn test_theme_entry_missing_field_keeps_other_settings() {
        let mut settings = template(STATE_ID).default_value(StateKey::Settings);
        settings["messagesTextSize"] = json!(20);
        if let Some(background) = settings["themes"][0]["background"].as_object_mut() {
            background.remove("blur");
        }
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(
            json!({ "settings": settings }),
        )));

        let manager = fixture.manager();
        let state = manager.load().await;
        manager.flush().await;

        assert_eq!(state.settings.messages_text_size, 20);
        let day = state.settings.theme_by_name(ThemeName::Day).unwrap();
        assert!(!day.background.blur);

        let stored = fixture.state.peek("settings").await.unwrap();
        assert_eq!(stored["messagesTextSize"], json!(20));
        assert_eq!(stored["themes"][0]["background"]["blur"], json!(false));
    }

    #[tokio::test]
    async fn test_short_theme_list_is_completed() {
        let mut settings = template(STATE_ID).default_value(StateKey::Settings);
        if let Some(themes) = settings["themes"].as_array_mut() {
            themes.truncate(1);
        }
        settings["messagesTextSize"] = json!(18);
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(
            json!({ "settings": settings }),
        )));

        let state = fixture.manager().load().await;

        assert_eq!(state.settings.themes.len(), 2);
        assert!(state.settings.theme_by_name(ThemeName::Night).is_some());
        assert_eq!(state.settings.messages_text_size, 18);
    }

    #[tokio::test]
    async fn test_write_rejects_ill_typed_value_in_both_modes() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        manager.load().await;
        manager.flush().await;

        assert!(matches!(
            manager.write(StateKey::ContactsList, json!("oops"), false),
            Err(StateError::InvalidValue { .. })
        ));
        assert!(matches!(
            manager.write(StateKey::ContactsList, json!({"a": 1}), true),
            Err(StateError::InvalidValue { .. })
        ));
        manager.flush().await;

        assert_eq!(fixture.state.peek("contactsList").await, Some(json!([])));
        assert!(manager.snapshot().unwrap().contacts_list.is_empty());
    }

    #[tokio::test]
    async fn test_write_before_load_checks_against_template() {
        let fixture = Fixture::new();
        let manager = fixture.manager();

        manager
            .write(StateKey::MaxSeenMsgId, json!(12), false)
            .unwrap();
        assert!(manager
            .write(StateKey::MaxSeenMsgId, json!("twelve"), false)
            .is_err());
        manager.flush().await;

        assert_eq!(fixture.state.peek("maxSeenMsgId").await, Some(json!(12)));
    }

    #[tokio::test]
    async fn test_unknown_settings_fields_survive_rewrite() {
        let mut settings = template(STATE_ID).default_value(StateKey::Settings);
        settings["futureOption"] = json!({"level": 3});
        let fixture = Fixture::with_state(MemoryStore::with_entries(stored_doc(
            json!({ "settings": settings }),
        )));

        let manager = fixture.manager();
        manager.load().await;
        manager.set_key("settings.theme", json!("night")).unwrap();
        manager.flush().await;

        let stored = fixture.state.peek("settings").await.unwrap();
        assert_eq!(stored["theme"], json!("night"));
        assert_eq!(stored["futureOption"], json!({"level": 3}));
        assert_eq!(
            manager.snapshot().unwrap().settings.extra.get("futureOption"),
            Some(&json!({"level": 3}))
        );
    }
}
