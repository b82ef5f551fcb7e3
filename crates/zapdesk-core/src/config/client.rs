use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;

/// Settings for the pairing client (`zapdesk pair` / `zapdesk reconnect`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Delay after the create-account call before the first QR poll.
    #[serde(default = "default_initial_poll_delay_ms")]
    pub initial_poll_delay_ms: u64,
    #[serde(default = "default_fast_poll_interval_ms")]
    pub fast_poll_interval_ms: u64,
    /// Attempts made at the fast interval before switching to the slow one.
    #[serde(default = "default_fast_poll_attempts")]
    pub fast_poll_attempts: u32,
    #[serde(default = "default_slow_poll_interval_ms")]
    pub slow_poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Pause between `Connected` and handing control back to the caller.
    #[serde(default = "default_redirect_delay_ms")]
    pub redirect_delay_ms: u64,
    /// Visual QR countdown; expiry itself is server-driven.
    #[serde(default = "default_qr_countdown_secs")]
    pub qr_countdown_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            initial_poll_delay_ms: default_initial_poll_delay_ms(),
            fast_poll_interval_ms: default_fast_poll_interval_ms(),
            fast_poll_attempts: default_fast_poll_attempts(),
            slow_poll_interval_ms: default_slow_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            redirect_delay_ms: default_redirect_delay_ms(),
            qr_countdown_secs: default_qr_countdown_secs(),
        }
    }
}

impl ClientConfig {
    pub fn initial_poll_delay(&self) -> Duration {
        Duration::from_millis(self.initial_poll_delay_ms)
    }

    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }
}
