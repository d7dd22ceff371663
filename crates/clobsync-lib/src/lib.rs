pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod mapping;
pub mod operations;
pub mod orchestrator;
pub mod presence;
pub mod session;
pub mod staging;
pub mod store;
pub mod watch;

pub use backup::{BackupStore, FileBackup};
pub use config::{ConfigError, SessionConfig};
pub use error::{SyncError, SyncResult};
pub use mapping::{MappingResolver, MappingResult, MappingRule, TableMapping};
pub use operations::{SkipReason, SyncOutcome};
pub use orchestrator::{SyncListener, SyncOrchestrator};
pub use presence::{FileSyncView, Presence};
pub use session::SyncSession;
pub use store::{RemoteFileRecord, RowKey, RowStore, SqliteRowStore};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
