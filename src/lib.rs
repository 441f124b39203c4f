// Cashbook - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod logging;
pub mod period;
pub mod stats;
pub mod transaction;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use api::{handle_stats, StatsRequest, StatsResponse};
pub use config::{Config, ConfigError};
pub use db::{setup_database, ImportSummary, SqliteStore};
pub use error::{FieldError, LedgerError, LedgerResult};
pub use import::{load_csv, load_csv_from_reader};
pub use logging::init_tracing;
pub use period::{resolve_window, PeriodKind, PeriodWindow, WeekStart, WindowResolver};
pub use stats::{reduce, CategoryTotals, StatsAggregator, StatsResult, Totals, TransactionSource};
pub use transaction::{
    NewTransaction, Transaction, TransactionFilter, TransactionKind, TransactionPatch,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
