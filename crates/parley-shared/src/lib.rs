//! # parley-shared
//!
//! Identifiers, auth records and constants shared by the storage layer and
//! the client state core.

pub mod constants;
pub mod types;
pub mod version;

pub use types::{PeerId, StoredAuth, UserAuth, NULL_PEER_ID};
pub use version::compare_version;
