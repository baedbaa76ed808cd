//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Filter comes from `RUST_LOG` (default `info`). `FERRY_LOG_FORMAT=json`
/// switches to JSON lines. Safe to call more than once; later calls are no-ops.
pub fn init() {
    let json = std::env::var("FERRY_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    init_with(json);
}

pub fn init_with(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init_with(false);
        init_with(true);
        tracing::info!("still logging");
    }
}
