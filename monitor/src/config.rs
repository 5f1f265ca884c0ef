use std::time::Duration;

/// List poll cadence while any visible trace is running.
pub const ACTIVE_POLL_INTERVAL_MS: u64 = 2000;
/// List poll cadence while everything is settled.
pub const IDLE_POLL_INTERVAL_MS: u64 = 5000;
/// Detail poll cadence for a selected running trace.
pub const DETAIL_POLL_INTERVAL_MS: u64 = 2000;
/// Fixed delay before a push-channel reconnect attempt (no backoff growth).
pub const RECONNECT_DELAY_MS: u64 = 3000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the trace API
    pub api_base_url: String,
    /// WebSocket endpoint for the push event stream
    pub events_url: String,
    pub active_poll_interval: Duration,
    pub idle_poll_interval: Duration,
    pub detail_poll_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_base_url = env_str("MONITOR_API_URL", "http://127.0.0.1:8000");
        let events_url = std::env::var("MONITOR_EVENTS_URL")
            .unwrap_or_else(|_| derive_events_url(&api_base_url));

        Ok(Self {
            events_url,
            api_base_url,
            active_poll_interval: Duration::from_millis(env_parse(
                "MONITOR_ACTIVE_POLL_MS",
                ACTIVE_POLL_INTERVAL_MS,
            )?),
            idle_poll_interval: Duration::from_millis(env_parse(
                "MONITOR_IDLE_POLL_MS",
                IDLE_POLL_INTERVAL_MS,
            )?),
            detail_poll_interval: Duration::from_millis(env_parse(
                "MONITOR_DETAIL_POLL_MS",
                DETAIL_POLL_INTERVAL_MS,
            )?),
            reconnect_delay: Duration::from_millis(env_parse(
                "MONITOR_RECONNECT_DELAY_MS",
                RECONNECT_DELAY_MS,
            )?),
        })
    }
}

/// Derive the push stream endpoint from the API base URL when
/// `MONITOR_EVENTS_URL` is not set explicitly.
fn derive_events_url(api_base_url: &str) -> String {
    let base = api_base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/ws/events")
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
