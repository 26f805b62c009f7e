//! Shared helpers for the journal demos.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber for the demo binaries.
///
/// The level is read from `RUST_LOG`, falling back to `info`.
pub fn setup_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // a second call within the same process is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Render the first bytes of a payload for log output.
pub fn preview(data: &[u8]) -> String {
    let shown = &data[..data.len().min(24)];
    match std::str::from_utf8(shown) {
        Ok(text) => text.to_string(),
        Err(_) => format!("{shown:02x?}"),
    }
}
