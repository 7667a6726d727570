//! # parley-state
//!
//! Inspect and edit the persisted client state from the command line.
//!
//! ```text
//! parley-state show [PATH]      print the state, or the value at a dot path
//! parley-state set PATH JSON    set a value and persist it
//! parley-state peers            list peers kept resident after load
//! ```
//!
//! Configuration comes from the `PARLEY_*` environment variables.

use std::sync::Arc;

use anyhow::{bail, Context};
use parley_client::{init_tracing, ClientConfig, StateManager};
use parley_shared::constants::APP_NAME;
use parley_store::{Database, StateStorages};
use serde_json::Value;
use tracing::info;

const USAGE: &str = "usage: parley-state [show [PATH] | set PATH JSON | peers]";

enum Command {
    Show(Option<String>),
    Set { path: String, value: Value },
    Peers,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Command> {
    let command = match args.next().as_deref() {
        None | Some("show") => Command::Show(args.next()),
        Some("set") => {
            let (Some(path), Some(raw)) = (args.next(), args.next()) else {
                bail!("{}", USAGE);
            };
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("value for {path} is not valid JSON: {raw}"))?;
            Command::Set { path, value }
        }
        Some("peers") => Command::Peers,
        Some(other) => bail!("unknown command {other:?}\n{}", USAGE),
    };

    if args.next().is_some() {
        bail!("too many arguments\n{}", USAGE);
    }
    Ok(command)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let command = parse_args(std::env::args().skip(1))?;

    let config = ClientConfig::from_env();
    info!(?config, "{} state tool v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let db = match &config.data_dir {
        Some(dir) => Database::open_in_dir(dir),
        None => Database::new(),
    }
    .context("failed to open state database")?;
    let storages = StateStorages::sqlite(Arc::new(db));

    let manager = StateManager::new(config, storages)?;
    let state = manager.load().await;

    if let Some(version) = manager.new_version() {
        info!(%version, "State upgraded");
    }

    match command {
        Command::Show(path) => {
            let doc = serde_json::to_value(state.as_ref())?;
            let value = match path {
                Some(path) => {
                    let pointer = format!("/{}", path.replace('.', "/"));
                    doc.pointer(&pointer)
                        .cloned()
                        .with_context(|| format!("no value at {path}"))?
                }
                None => doc,
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Set { path, value } => {
            manager.set_key(&path, value)?;
            println!("{path} updated");
        }
        Command::Peers => {
            manager.with_peers(|peers| {
                for peer in peers.needed_peers() {
                    println!("{peer}\t{}", peers.interests(peer).join(","));
                }
            });
        }
    }

    manager.flush().await;
    Ok(())
}
