//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Default command mailbox size per engine.
pub const DEFAULT_MAILBOX_SIZE: usize = 32;

/// Default number of buffered push notifications per engine.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// Settings applied to every engine actor the server spawns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Name reported in the initialization result.
    pub server_name: String,

    /// Version reported in the initialization result.
    pub server_version: String,

    /// Bounded command channel size. When full, request handlers wait
    /// for the engine to catch up (backpressure).
    pub mailbox_size: usize,

    /// How many notifications a slow push-stream subscriber may lag
    /// behind before it starts missing events.
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_name: "toolgate".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            mailbox_size: DEFAULT_MAILBOX_SIZE,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_nonzero_buffers() {
        let config = EngineConfig::default();
        assert!(config.mailbox_size > 0);
        assert!(config.notification_capacity > 0);
        assert_eq!(config.server_name, "toolgate");
    }
}
