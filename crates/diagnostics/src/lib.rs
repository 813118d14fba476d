//! Shared diagnostics for the CMS data warehouse crates.
//!
//! Thin wrapper over `emit` so every crate logs through the same macros
//! without configuring its own emitter.
//!
//! Usage:
//! - Set CMSDATA_LOG=off (default) - no logs
//! - Set CMSDATA_LOG=info - cache hits, fetch progress, table loads
//! - Set CMSDATA_LOG=debug - request parameters, SQL statements, page counts

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

static INIT: Once = Once::new();

/// Initialize diagnostics based on the CMSDATA_LOG environment variable.
///
/// Call once at startup; repeated calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let log_level = std::env::var("CMSDATA_LOG").unwrap_or_else(|_| "off".to_string());

        let rt = match log_level.as_str() {
            "off" => return,
            "debug" => emit::setup()
                .emit_to(emit_term::stderr())
                .emit_when(emit::level::min_filter(emit::Level::Debug))
                .init(),
            "info" => emit::setup()
                .emit_to(emit_term::stderr())
                .emit_when(emit::level::min_filter(emit::Level::Info))
                .init(),
            "warn" => emit::setup()
                .emit_to(emit_term::stderr())
                .emit_when(emit::level::min_filter(emit::Level::Warn))
                .init(),
            "error" => emit::setup()
                .emit_to(emit_term::stderr())
                .emit_when(emit::level::min_filter(emit::Level::Error))
                .init(),
            _ => {
                let rt = emit::setup()
                    .emit_to(emit_term::stderr())
                    .emit_when(emit::level::min_filter(emit::Level::Info))
                    .init();
                eprintln!("Warning: Unknown CMSDATA_LOG value '{}', using 'info'", log_level);
                rt
            }
        };

        // The emit runtime must live for the remainder of the process.
        std::mem::forget(rt);
    });
}

/// Log normal operations: cache hits, completed fetches, table registrations.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics: request parameters, page sizes, SQL text.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable conditions: retries, stale-cache fallbacks, index rebuilds.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that abort an operation.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}
