/// Application name
pub const APP_NAME: &str = "Parley";

/// Time-sensitive keys are soft-refreshed once the state is older than this (1 day, millis)
pub const REFRESH_EVERY_MS: i64 = 24 * 60 * 60 * 1000;

/// Stored states older than this version lose their dialog and filter caches
pub const LEGACY_RESET_VERSION: &str = "0.8.7";

/// Datacenter assumed for legacy sessions that never recorded one
pub const DEFAULT_BASE_DC_ID: u32 = 2;

/// Number of datacenters whose legacy salts/keys are migrated
pub const LEGACY_DC_COUNT: u32 = 5;

/// Session-store key holding the auth record
pub const KEY_USER_AUTH: &str = "user_auth";

/// Session-store key holding the last persisted `stateId`
pub const KEY_STATE_ID: &str = "state_id";

/// Legacy per-connection keys carried over into the session store
pub const KEY_DC: &str = "dc";
pub const KEY_SERVER_TIME_OFFSET: &str = "server_time_offset";
pub const KEY_XT_INSTANCE: &str = "xt_instance";

/// `dc{n}_server_salt`
pub fn dc_server_salt_key(dc: u32) -> String {
    format!("dc{dc}_server_salt")
}

/// `dc{n}_auth_key`
pub fn dc_auth_key_key(dc: u32) -> String {
    format!("dc{dc}_auth_key")
}

/// Every legacy connection key in migration order: `dc` first, then the
/// time offset and instance id, then salt/key pairs per datacenter.
pub fn legacy_connection_keys() -> Vec<String> {
    let mut keys = vec![
        KEY_DC.to_string(),
        KEY_SERVER_TIME_OFFSET.to_string(),
        KEY_XT_INSTANCE.to_string(),
    ];
    for dc in 1..=LEGACY_DC_COUNT {
        keys.push(dc_server_salt_key(dc));
        keys.push(dc_auth_key_key(dc));
    }
    keys
}
