//! Party Member Evaluation Voting: election store
//!
//! One replicated election document holds the roster, both candidate lists,
//! both ballot sets and the election config. Voters rate Phase 1 candidates on
//! a three-level scale and select a bounded number of Phase 2 candidates;
//! administrators import lists, toggle phases, export results and reset.

pub mod admin;
pub mod config;
pub mod errors;
pub mod results;
pub mod storage;
pub mod tabular;
pub mod types;

// Re-export commonly used types
pub use errors::{Error, RemoteErrorKind, Result};
pub use storage::{ElectionStore, ResetScope, SyncStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the `RUST_LOG` filter, falling back to info.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "member_vote=info".into()),
        )
        .init();

    tracing::info!("🗳️  Election store v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from a [`config::LoggingConfig`].
///
/// `RUST_LOG` still wins over the configured level when set.
pub fn init_with(logging: &config::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("member_vote={}", logging.level).into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };
    result.map_err(|e| Error::internal(format!("logging already initialized: {e}")))?;

    tracing::info!(
        "🗳️  Election store v{} initialized (log format: {})",
        VERSION,
        logging.format
    );
    Ok(())
}
