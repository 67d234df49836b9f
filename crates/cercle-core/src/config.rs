use cercle_fabric::{EndpointConfig, IceServer};
use cercle_shared::constants::{
    DIAL_TIMEOUT_MS, LEAVE_GRACE_MS, PING_IDLE_MS, SESSION_TIMEOUT_MS, TICK_INTERVAL_MS,
};

/// Node configuration. Timing fields exist so tests can shrink them; the
/// defaults are the protocol's nominal values.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Passed through to every endpoint the node creates.
    pub endpoint: EndpointConfig,
    /// Supervisor sweep period.
    pub tick_interval_ms: u64,
    /// Idle time on an open session before a ping is sent.
    pub ping_idle_ms: i64,
    /// Idle time before an open session is declared dead.
    pub session_timeout_ms: i64,
    /// Time an unanswered dial may stay in flight.
    pub dial_timeout_ms: i64,
    /// Delay between the goodbye broadcast and group teardown.
    pub leave_grace_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            tick_interval_ms: TICK_INTERVAL_MS,
            ping_idle_ms: PING_IDLE_MS,
            session_timeout_ms: SESSION_TIMEOUT_MS,
            dial_timeout_ms: DIAL_TIMEOUT_MS,
            leave_grace_ms: LEAVE_GRACE_MS,
        }
    }
}

impl NodeConfig {
    /// Build a config from `CERCLE_*` environment variables, falling back
    /// to defaults (with a warning) on anything unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CERCLE_TICK_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.tick_interval_ms = ms;
            } else {
                tracing::warn!(value = %val, "Invalid CERCLE_TICK_MS, using default");
            }
        }

        if let Ok(val) = std::env::var("CERCLE_ICE_URLS") {
            let urls: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !urls.is_empty() {
                config.endpoint.ice_servers = vec![IceServer {
                    urls,
                    username: None,
                    credential: None,
                }];
            }
        }

        if let Ok(val) = std::env::var("CERCLE_DEBUG_LEVEL") {
            if let Ok(level) = val.parse::<u8>() {
                config.endpoint.debug_level = level;
            } else {
                tracing::warn!(value = %val, "Invalid CERCLE_DEBUG_LEVEL, using default");
            }
        }

        config
    }

    /// A copy with all protocol timers shrunk by `factor`. Test helper for
    /// exercising timeout paths without simulating half a minute.
    pub fn scaled_down(factor: u64) -> Self {
        let factor = factor.max(1);
        let defaults = Self::default();
        Self {
            endpoint: EndpointConfig::default(),
            tick_interval_ms: defaults.tick_interval_ms / factor,
            ping_idle_ms: defaults.ping_idle_ms / factor as i64,
            session_timeout_ms: defaults.session_timeout_ms / factor as i64,
            dial_timeout_ms: defaults.dial_timeout_ms / factor as i64,
            leave_grace_ms: defaults.leave_grace_ms / factor,
        }
    }
}
