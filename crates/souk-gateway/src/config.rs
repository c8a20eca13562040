use std::time::Duration;

/// Timing knobs of the gateway. Defaults are the production values.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Probe period; also the probe timeout, since one missed probe is fatal.
    pub heartbeat_interval: Duration,
    /// Delay before a last-connection disconnect becomes an offline event.
    pub offline_debounce: Duration,
    /// How long an unauthenticated socket may take to send `Identify`.
    pub auth_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            offline_debounce: Duration::from_secs(2),
            auth_timeout: Duration::from_secs(10),
        }
    }
}
