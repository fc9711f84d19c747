//! The Small POS - offline order queue and sync reconciliation.
//!
//! Sales rung up while the terminal has no connectivity are queued durably
//! per merchant, merged into canonical line items, and submitted to the
//! admin dashboard once the network returns. Before submission every queued
//! order is checked against a live menu snapshot; orders that reference
//! removed items, inactive items, missing addons or changed prices are held
//! for staff review instead of being sent.
//!
//! Typical wiring:
//!
//! ```ignore
//! let storage = Arc::new(SqliteStorage::init(&data_dir)?);
//! let backend = Arc::new(HttpBackend::new(&config)?);
//! let network = Arc::new(NetworkMonitor::new(&FixedConnectivity(false), config.network_debounce()));
//! let coordinator = Arc::new(SyncCoordinator::new(storage, &config, backend.clone(), network.clone()));
//! let _poller = network.spawn_polling(backend, config.connectivity_poll_interval());
//! let _handle = coordinator.spawn();
//! ```

use std::path::Path;

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cart;
pub mod commands;
pub mod config;
pub mod conflicts;
pub mod db;
pub mod error;
pub mod menu;
pub mod merge;
pub mod models;
pub mod network;
pub mod pending_orders;
pub mod resolution;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use api::{HttpBackend, OrderBackend, OrderSubmission, SubmissionReceipt};
pub use cart::{CartPersistence, DraftCart};
pub use config::EngineConfig;
pub use conflicts::{Conflict, ConflictItem};
pub use db::SqliteStorage;
pub use error::{Result, SyncError};
pub use menu::MenuSnapshot;
pub use models::{Addon, CustomLine, CustomerInfo, LineItem, MenuLine, OrderType, PendingOrder};
pub use network::{ConnectivityProbe, ConnectivitySource, FixedConnectivity, NetworkMonitor};
pub use pending_orders::PendingOrderStore;
pub use resolution::ConflictResolutionAction;
pub use storage::{MemoryStorage, StorageAdapter};
pub use sync::{
    OrderResolution, SyncCoordinator, SyncCycleReport, SyncHandle, SyncState, SyncStatus,
    SyncTrigger,
};

/// Install the global subscriber: console output plus, when `log_dir` is
/// given, a daily rolling file. Keep the returned guard alive for the life
/// of the process; dropping it flushes and stops the file writer.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,the_small_pos_sync=debug"));
    let console_layer = fmt::layer().with_target(true);

    let mut dir_error = None;
    let (file_layer, guard) = match log_dir {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::daily(dir, "pos-sync");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                let layer = fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                dir_error = Some(format!("{}: {e}", dir.display()));
                (None, None)
            }
        },
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        info!(
            "Starting The Small POS offline sync v{}",
            env!("CARGO_PKG_VERSION")
        );
    }
    if let Some(err) = dir_error {
        // Logged after install so the warning reaches the console layer.
        warn!(error = %err, "cannot create log directory; logging to console only");
    }
    guard
}
