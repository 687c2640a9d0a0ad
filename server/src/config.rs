// Configuration constants for the server

use std::time::Duration;

use stream_core::job;
use stream_core::relay::{RelayOptions, DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_INTERVAL};
use stream_core::supervisor::{GeneratorCommand, Supervisor, DEFAULT_GENERATOR};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub generator_bin: String,
    pub generator_args: Vec<String>,
    pub chunk_size: usize,
    pub progress_interval_bytes: u64,
    pub terminate_grace_ms: u64,
    pub startup_timeout_secs: u64,
    pub max_duration_minutes: u32,
    pub session_history: usize,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            generator_bin: DEFAULT_GENERATOR.to_string(),
            generator_args: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval_bytes: DEFAULT_PROGRESS_INTERVAL,
            terminate_grace_ms: 5000,
            startup_timeout_secs: 10,
            max_duration_minutes: job::DEFAULT_MAX_DURATION_MINUTES,
            session_history: 256,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let generator_bin = std::env::var("GENERATOR_BIN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.generator_bin);

        let generator_args = std::env::var("GENERATOR_ARGS")
            .map(|args| args.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect()
            });

        Self {
            port: env_or("PORT", defaults.port),
            generator_bin,
            generator_args,
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size).max(1),
            progress_interval_bytes: env_or("PROGRESS_INTERVAL_BYTES", defaults.progress_interval_bytes),
            terminate_grace_ms: env_or("TERMINATE_GRACE_MS", defaults.terminate_grace_ms),
            startup_timeout_secs: env_or("STARTUP_TIMEOUT_SECS", defaults.startup_timeout_secs),
            max_duration_minutes: env_or("MAX_DURATION_MINUTES", defaults.max_duration_minutes),
            session_history: env_or("SESSION_HISTORY", defaults.session_history).max(1),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
        }
    }

    pub fn generator_command(&self) -> GeneratorCommand {
        GeneratorCommand::new(&self.generator_bin).with_leading_args(self.generator_args.iter().cloned())
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.generator_command()).with_terminate_grace(self.terminate_grace())
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            chunk_size: self.chunk_size,
            progress_interval: self.progress_interval_bytes,
        }
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
