//! Layered runtime configuration.
//!
//! Built-in defaults, then an optional TOML file, then environment
//! variables prefixed with `VITALWATCH_` (nested keys separated by `__`).
//!
//! ```toml
//! [feed]
//! url = "ws://monitor.local:8000/ws/vitals"
//! reconnect_delay = "3s"
//!
//! [scoring]
//! url = "http://monitor.local:8000/neural-sync/stability"
//! timeout = "5s"
//!
//! [simulation]
//! tick = "150ms"
//! log_mapping = "parity"
//!
//! [serve]
//! bind = "127.0.0.1:8000"
//! interval = "2s"
//! ```
//!
//! ```bash
//! VITALWATCH_FEED__URL=ws://10.0.0.5:8000/ws/vitals vitalwatch monitor
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File, Map};
use serde::Deserialize;

use crate::data::duration::parse_duration;
use crate::simulation::LogMapping;

/// Streaming endpoint used when none is configured.
pub const DEFAULT_FEED_URL: &str = "ws://127.0.0.1:8000/ws/vitals";

/// Scoring endpoint used when none is configured.
pub const DEFAULT_SCORING_URL: &str = "http://127.0.0.1:8000/neural-sync/stability";

const ENV_PREFIX: &str = "VITALWATCH";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub feed: FeedSettings,
    pub scoring: ScoringSettings,
    pub simulation: SimulationSettings,
    pub serve: ServeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    pub url: String,
    pub reconnect_delay: String,
}

impl FeedSettings {
    pub fn reconnect_delay(&self) -> Result<Duration> {
        parse_duration(&self.reconnect_delay).context("feed.reconnect_delay")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringSettings {
    pub url: String,
    pub timeout: String,
}

impl ScoringSettings {
    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(&self.timeout).context("scoring.timeout")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationSettings {
    pub tick: String,
    pub log_mapping: LogMapping,
}

impl SimulationSettings {
    pub fn tick(&self) -> Result<Duration> {
        parse_duration(&self.tick).context("simulation.tick")
    }
}

/// Settings for the simulated feed server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServeSettings {
    pub bind: String,
    pub interval: String,
}

impl ServeSettings {
    pub fn interval(&self) -> Result<Duration> {
        parse_duration(&self.interval).context("serve.interval")
    }
}

impl Settings {
    /// Load settings, reading `path` if given and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// Load settings with an explicit set of environment variables.
    ///
    /// `None` reads the process environment.
    pub fn load_from(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("feed.url", DEFAULT_FEED_URL)?
            .set_default("feed.reconnect_delay", "3s")?
            .set_default("scoring.url", DEFAULT_SCORING_URL)?
            .set_default("scoring.timeout", "5s")?
            .set_default("simulation.tick", "150ms")?
            .set_default("simulation.log_mapping", "parity")?
            .set_default("serve.bind", "127.0.0.1:8000")?
            .set_default("serve.interval", "2s")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .source(env),
            )
            .build()
            .context("Failed to load configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        // Built without TLS: encrypted endpoints could never be reached
        ensure!(
            self.feed.url.starts_with("ws://"),
            "feed.url must be a plain ws:// URL, got {}",
            self.feed.url
        );
        ensure!(
            self.scoring.url.starts_with("http://"),
            "scoring.url must be a plain http:// URL, got {}",
            self.scoring.url
        );
        self.feed.reconnect_delay()?;
        self.scoring.timeout()?;
        ensure!(!self.simulation.tick()?.is_zero(), "simulation.tick must be positive");
        ensure!(!self.serve.interval()?.is_zero(), "serve.interval must be positive");
        Ok(())
    }
}
