pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod manager;
pub mod peers;
pub mod state;
pub mod template;

mod auth;
mod migrate;
mod persist;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use error::StateError;
pub use events::{EventBus, SettingsUpdatedPayload, StateEvent};
pub use manager::{EntityResults, StateManager};
pub use peers::{PeerInterest, PeerInterestTracker};
pub use state::{ApplicationState, AuthState, Settings, StateKey};
pub use template::StateTemplate;

/// Install the global tracing subscriber, honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,parley_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
