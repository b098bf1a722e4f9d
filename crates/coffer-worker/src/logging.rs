use std::sync::OnceLock;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

/// Level used when a requested level name is not recognized.
pub const FALLBACK_LEVEL: LevelFilter = LevelFilter::WARN;

type LevelHandle = reload::Handle<LevelFilter, Registry>;

/// `None` when another global subscriber was already installed.
static RELOAD: OnceLock<Option<LevelHandle>> = OnceLock::new();

/// Map a level name to a filter. Unknown names fall back to `warn`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => FALLBACK_LEVEL,
    }
}

/// Install the process-wide fmt subscriber on first use and set its level.
///
/// Later calls only change the level. If the host installed its own global
/// subscriber first, it is left alone and the level is ignored.
pub fn init(level: &str) -> LevelFilter {
    let filter = parse_level(level);
    let handle = RELOAD.get_or_init(|| {
        let (layer, handle) = reload::Layer::new(filter);
        tracing_subscriber::registry()
            .with(layer)
            .with(fmt::layer().with_target(true))
            .try_init()
            .ok()
            .map(|()| handle)
    });
    match handle {
        Some(handle) => {
            if let Err(e) = handle.reload(filter) {
                tracing::debug!(error = %e, "log level not applied");
            }
        }
        None => tracing::debug!(%filter, "host subscriber in place; log level ignored"),
    }
    filter
}
