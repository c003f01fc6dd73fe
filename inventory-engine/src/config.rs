use std::env;
use std::time::Duration;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_EXPIRY_WARNING_WINDOW_MINUTES: i32 = 60;

/// Engine configuration, built once at bootstrap and passed to the parts
/// that need it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sweep_interval: Duration,
    pub expiry_warning_window_minutes: i32,
    pub host: String,
    pub port: u16,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let sweep_interval = env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
        let expiry_warning_window_minutes = env::var("EXPIRY_WARNING_WINDOW_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(DEFAULT_EXPIRY_WARNING_WINDOW_MINUTES);
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8087);
        EngineConfig { sweep_interval, expiry_warning_window_minutes, host, port }
    }
}
