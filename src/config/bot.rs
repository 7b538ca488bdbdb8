use std::time::Duration;

/// Process level configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Directory holding the persisted database
    pub state_path: String,

    /// Prefix used when a guild has not set its own
    pub default_prefix: String,

    /// How often the expiration and reminder sweeps run
    pub sweep_interval: Duration,

    /// Number of license log entries kept in memory
    pub log_buffer_size: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            state_path: "state".to_string(),
            default_prefix: ".".to_string(),
            sweep_interval: Duration::from_secs(60),
            log_buffer_size: 1000,
        }
    }
}

impl BotConfig {
    /// Build from environment variables, falling back to defaults for
    /// anything missing or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let sweep_interval = lookup("SWEEP_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let log_buffer_size = lookup("LOG_BUFFER_SIZE")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.log_buffer_size);

        Self {
            state_path: lookup("STATE_PATH").unwrap_or(defaults.state_path),
            default_prefix: lookup("DEFAULT_PREFIX").unwrap_or(defaults.default_prefix),
            sweep_interval,
            log_buffer_size,
        }
    }

    /// Path of the JSON database file
    pub fn database_path(&self) -> String {
        format!("{}/licensy.json", self.state_path)
    }
}
