use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber once. `RUST_LOG` wins over the
/// built-in `cashbook=info` default.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cashbook=info,cashbook_server=info,tower_http=info"));

        // A subscriber installed by the host (e.g. a test harness) is left alone.
        let _ = fmt().with_env_filter(filter).try_init();
    });
}
