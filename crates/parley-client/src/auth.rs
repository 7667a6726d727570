//! Auth marker resolution during load.
//!
//! The primary marker lives in the session store. Older installs kept it,
//! together with their per-datacenter connection keys, in the state store;
//! those are copied over to the session store under their canonical names.

use futures::future::join_all;
use parley_shared::constants::{legacy_connection_keys, KEY_DC, KEY_USER_AUTH};
use parley_shared::{StoredAuth, UserAuth};
use parley_store::{Records, StateStorages};
use serde_json::Value;
use tracing::{info, warn};

/// Resolve the auth marker and return the payload to announce, if any.
///
/// `primary` is the session-store marker, `legacy` the old state-store one.
/// Bare-id markers are announced with `dc_id = 0`.
pub(crate) async fn resolve_auth(
    storages: &StateStorages,
    primary: Option<Value>,
    legacy: Option<Value>,
    base_dc_id: u32,
    now_secs: i64,
) -> Option<UserAuth> {
    let mut auth = primary.and_then(|v| parse_marker(v, "session"));

    if auth.is_none() {
        if let Some(legacy_auth) = legacy.and_then(|v| parse_marker(v, "legacy")) {
            migrate_legacy_session(storages, &legacy_auth, base_dc_id, now_secs).await;
            auth = Some(legacy_auth);
        }
    }

    let auth = auth?;
    let payload = auth.clone().into_record(0, now_secs);
    if payload.is_none() {
        warn!(marker = ?auth, "Auth marker does not name a peer");
    }
    payload
}

fn parse_marker(value: Value, source: &'static str) -> Option<StoredAuth> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<StoredAuth>(value) {
        Ok(auth) if auth.is_present() => Some(auth),
        Ok(_) => None,
        Err(e) => {
            warn!(source, error = %e, "Ignoring unreadable auth marker");
            None
        }
    }
}

/// Copy legacy connection keys into the session store and write a
/// structured `user_auth` there.
async fn migrate_legacy_session(
    storages: &StateStorages,
    legacy_auth: &StoredAuth,
    base_dc_id: u32,
    now_secs: i64,
) {
    let keys = legacy_connection_keys();
    let reads = join_all(keys.iter().map(|key| storages.state.get(key))).await;

    let mut records = Records::new();
    let mut dc_value = None;
    for (key, read) in keys.iter().zip(reads) {
        match read {
            Ok(Some(value)) if !value.is_null() => {
                if dc_value.is_none() && key == KEY_DC {
                    dc_value = Some(value.clone());
                }
                records.insert(key.clone(), value);
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to read legacy session key"),
        }
    }

    let dc_id = dc_value.as_ref().and_then(parse_dc).unwrap_or(base_dc_id);
    let user_auth = match legacy_auth.clone().into_record(dc_id, now_secs) {
        Some(record) => record,
        None => {
            warn!("Legacy auth marker has no usable id, skipping migration");
            return;
        }
    };

    match serde_json::to_value(&user_auth) {
        Ok(value) => {
            records.insert(KEY_USER_AUTH.to_string(), value);
        }
        Err(e) => {
            warn!(error = %e, "Failed to encode migrated auth record");
            return;
        }
    }

    let migrated = records.len();
    match storages.session.set(records).await {
        Ok(()) => info!(migrated, dc_id, "Migrated legacy session into session store"),
        Err(e) => warn!(error = %e, "Failed to write migrated legacy session"),
    }
}

fn parse_dc(value: &Value) -> Option<u32> {
    let dc = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    dc.filter(|dc| *dc > 0)
}
