use serde::{Deserialize, Serialize};

use super::defaults::*;

/// WhatsApp connection service config.
///
/// Session keys for every account live in the main database, keyed by account id.
/// Pairing is done by scanning a QR code (like WhatsApp Web).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Device name shown under "Linked devices" on the phone.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Seconds without a scan before `whatsapp-qr-expired` fires and the socket is dropped.
    #[serde(default = "default_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,
    /// Reconnect accounts whose stored status is `connected` at startup.
    #[serde(default = "default_true")]
    pub restore_on_start: bool,
    /// QR fetches allowed per account per window.
    #[serde(default = "default_qr_rate_limit_max")]
    pub qr_rate_limit_max: u32,
    #[serde(default = "default_qr_rate_limit_window_secs")]
    pub qr_rate_limit_window_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            pairing_timeout_secs: default_pairing_timeout_secs(),
            restore_on_start: true,
            qr_rate_limit_max: default_qr_rate_limit_max(),
            qr_rate_limit_window_secs: default_qr_rate_limit_window_secs(),
        }
    }
}
