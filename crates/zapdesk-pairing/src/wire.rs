//! Push-event adapter: wire event names to tracker signals.
//!
//! The server announces success under three names (`whatsapp-connected`,
//! `whatsapp-invite-success`, `whatsapp-connection-success`); all three fold
//! into one `PairingSignal::Succeeded`.

use crate::qr::{normalize_qr, QrFields};
use crate::tracker::{Channel, PairingSignal};
use serde_json::Value;
use uuid::Uuid;
use zapdesk_core::events::{
    EVENT_CONNECTED, EVENT_CONNECTION_SUCCESS, EVENT_INVITE_SUCCESS, EVENT_QR_CODE,
    EVENT_QR_EXPIRED,
};

/// `accountId`, falling back to `account_id`.
fn account_id(data: &Value) -> Option<Uuid> {
    data.get("accountId")
        .or_else(|| data.get("account_id"))
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn account_name(data: &Value) -> Option<String> {
    data.get("accountName")
        .or_else(|| data.get("account_name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Fold one push event into a signal. Unknown events and QR events without
/// a usable payload yield `None`.
pub fn fold_event(name: &str, data: &Value) -> Option<PairingSignal> {
    match name {
        EVENT_QR_CODE => {
            let qr = normalize_qr(&QrFields::from_value(data))?;
            Some(PairingSignal::Qr {
                account_id: account_id(data),
                account_name: account_name(data),
                qr,
                channel: Channel::Push,
            })
        }
        EVENT_CONNECTED | EVENT_INVITE_SUCCESS | EVENT_CONNECTION_SUCCESS => {
            Some(PairingSignal::Succeeded {
                account_id: account_id(data),
                account_name: account_name(data),
            })
        }
        EVENT_QR_EXPIRED => Some(PairingSignal::Expired {
            account_id: account_id(data),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_names_fold_together() {
        let id = Uuid::new_v4();
        let data = json!({ "accountId": id.to_string(), "accountName": "Maria - WhatsApp" });
        let expected = PairingSignal::Succeeded {
            account_id: Some(id),
            account_name: Some("Maria - WhatsApp".into()),
        };
        for name in [
            "whatsapp-connected",
            "whatsapp-invite-success",
            "whatsapp-connection-success",
        ] {
            assert_eq!(fold_event(name, &data), Some(expected.clone()));
        }
    }

    #[test]
    fn test_qr_event_normalized() {
        let data = json!({
            "accountId": Uuid::nil().to_string(),
            "qrCode": "data:image/png;base64,QQ==",
            "code": "2@abc,def",
        });
        match fold_event("whatsapp-qr-code", &data) {
            Some(PairingSignal::Qr { qr, channel, .. }) => {
                assert_eq!(qr.image, "data:image/png;base64,QQ==");
                assert_eq!(qr.raw.as_deref(), Some("2@abc,def"));
                assert_eq!(channel, Channel::Push);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fold_event("whatsapp-qr-code", &json!({})), None);
    }

    #[test]
    fn test_unrelated_events_ignored() {
        assert_eq!(fold_event("new-message", &json!({})), None);
        assert_eq!(
            fold_event("whatsapp-qr-expired", &json!({ "account_id": "junk" })),
            Some(PairingSignal::Expired { account_id: None })
        );
    }
}
