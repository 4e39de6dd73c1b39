//! Tracing setup for the survey CLI.
//!
//! `RUST_LOG` wins over the configured level. Otherwise the RPC transport
//! stack is held at `warn` so `debug` shows survey activity, not HTTP.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

const TRANSPORT_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "rustls", "tungstenite"];

fn filter_for(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let mut directives = vec![level.to_string()];
    directives.extend(TRANSPORT_TARGETS.iter().map(|target| format!("{}=warn", target)));
    EnvFilter::new(directives.join(","))
}

/// Installs the global subscriber. Fails if one is already set.
pub fn init(level: &str, json: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter_for(level));

    let installed = if json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))
}

/// Installs the subscriber `settings` describe
pub fn init_from_settings(settings: &LoggingSettings) -> anyhow::Result<()> {
    init(&settings.level, settings.format == "json")
}
