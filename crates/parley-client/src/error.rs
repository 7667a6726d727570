use thiserror::Error;

/// Errors returned by key-level state mutations.
///
/// Loading never fails; see [`StateManager::load`](crate::StateManager::load).
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State has not been loaded yet")]
    NotLoaded,

    #[error("Unknown state key: {0}")]
    UnknownKey(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Value for '{path}' does not fit the state model: {source}")]
    InvalidValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
