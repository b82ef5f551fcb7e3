pub(super) fn default_name() -> String {
    "zapdesk".to_string()
}
pub(super) fn default_data_dir() -> String {
    "~/.zapdesk".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_true() -> bool {
    true
}
pub(super) fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
pub(super) fn default_api_port() -> u16 {
    3001
}
pub(super) fn default_max_body_bytes() -> usize {
    1024 * 1024
}
pub(super) fn default_db_path() -> String {
    "~/.zapdesk/data/zapdesk.db".to_string()
}
pub(super) fn default_device_name() -> String {
    "ZAPDESK".to_string()
}
pub(super) fn default_pairing_timeout_secs() -> u64 {
    120
}
pub(super) fn default_qr_rate_limit_max() -> u32 {
    30
}
pub(super) fn default_qr_rate_limit_window_secs() -> u64 {
    60
}
pub(super) fn default_invite_ttl_hours() -> i64 {
    72
}
pub(super) fn default_reconnect_ttl_hours() -> i64 {
    24
}
pub(super) fn default_summarizer_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
pub(super) fn default_summarizer_model() -> String {
    "gpt-4o-mini".to_string()
}
pub(super) fn default_summary_messages() -> i64 {
    50
}
pub(super) fn default_server_url() -> String {
    "http://127.0.0.1:3001".to_string()
}
pub(super) fn default_initial_poll_delay_ms() -> u64 {
    5000
}
pub(super) fn default_fast_poll_interval_ms() -> u64 {
    1000
}
pub(super) fn default_fast_poll_attempts() -> u32 {
    10
}
pub(super) fn default_slow_poll_interval_ms() -> u64 {
    2000
}
pub(super) fn default_max_poll_attempts() -> u32 {
    45
}
pub(super) fn default_redirect_delay_ms() -> u64 {
    2500
}
pub(super) fn default_qr_countdown_secs() -> u64 {
    120
}
