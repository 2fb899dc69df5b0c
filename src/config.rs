//! Engine configuration.
//!
//! ```ignore
//! let config = BridgeConfig::from_json(r#"{ "recursion_limit": 50, "default_flush": "post" }"#)?;
//! let scheduler = Scheduler::with_config(&config);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::scheduler::FlushMode;

/// Default cap on how often one job may run within a single flush.
pub const RECURSION_LIMIT: usize = 100;

/// Tunables for the scheduler and the binding lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Runs of a single job allowed per flush before it is reported and dropped.
    pub recursion_limit: usize,
    /// Flush mode of the watcher that syncs bindings to the host.
    pub default_flush: FlushMode,
    /// Warn when setup reads a property that was never declared.
    pub warn_undeclared_props: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: RECURSION_LIMIT,
            default_flush: FlushMode::Pre,
            warn_undeclared_props: true,
        }
    }
}

impl BridgeConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(source: &str) -> Result<Self, BridgeError> {
        let config: Self =
            serde_json::from_str(source).map_err(|err| BridgeError::Config(err.to_string()))?;
        if config.recursion_limit == 0 {
            return Err(BridgeError::Config(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
