//! Configuration for a watch registry.
//!
//! Deliberately per-instance: each registry owns its configuration, so
//! multiple independent registries (one per watched root) can coexist with
//! different settings and no process-wide state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for a single `WatchRegistry`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Debounce window in milliseconds. Delivery fires this long after the
    /// last buffered change while the registry is idle; each new change
    /// restarts the countdown.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl WatchConfig {
    /// The debounce window as a `Duration`.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    100
}
