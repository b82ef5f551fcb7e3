//! WhatsApp JID normalization.
//!
//! Chats imported over time carry JIDs in several shapes: bare phone numbers,
//! legacy `@c.us` addresses, and device-qualified `user:12@s.whatsapp.net`.
//! Everything is stored as `user@s.whatsapp.net` (or `@g.us` for groups).

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
const LEGACY_USER_SERVER: &str = "c.us";

/// Canonical form of `raw`, or `None` if nothing usable is left.
pub fn normalize_jid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (user, server) = match trimmed.split_once('@') {
        Some((u, s)) => (u, s),
        None => (trimmed, USER_SERVER),
    };

    // Drop the device part (`5511999:12`) and agent part (`5511999.0:12`).
    let user = user.split(':').next().unwrap_or(user);
    let user = user.split('.').next().unwrap_or(user);

    let server = match server {
        LEGACY_USER_SERVER => USER_SERVER,
        other => other,
    };

    if server == USER_SERVER {
        let digits: String = user.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        return Some(format!("{digits}@{USER_SERVER}"));
    }

    if user.is_empty() {
        return None;
    }
    Some(format!("{user}@{server}"))
}

/// Phone number part of a user JID.
pub fn phone_from_jid(jid: &str) -> Option<String> {
    let normalized = normalize_jid(jid)?;
    let (user, server) = normalized.split_once('@')?;
    (server == USER_SERVER).then(|| user.to_string())
}

pub fn is_group_jid(jid: &str) -> bool {
    jid.trim().ends_with(&format!("@{GROUP_SERVER}"))
}
