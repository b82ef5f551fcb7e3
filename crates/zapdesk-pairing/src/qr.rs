//! QR payload normalization.

use serde_json::Value;
use tracing::{debug, warn};
use zapdesk_core::qr::{is_data_url, qr_data_url};

/// The three places a QR may arrive under, in priority order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QrFields {
    pub qr: Option<String>,
    pub qr_code: Option<String>,
    pub code: Option<String>,
}

impl QrFields {
    /// Read `qr`, `qrCode`, and `code` from an event or response body.
    pub fn from_value(data: &Value) -> Self {
        let field = |name: &str| data.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            qr: field("qr"),
            qr_code: field("qrCode"),
            code: field("code"),
        }
    }

    fn non_empty(&self) -> impl Iterator<Item = &str> {
        [&self.qr, &self.qr_code, &self.code]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// A QR ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrImage {
    /// PNG data-URL.
    pub image: String,
    /// Pairing text the image encodes, when the payload carried it.
    pub raw: Option<String>,
}

impl QrImage {
    pub fn from_data_url(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            raw: None,
        }
    }
}

/// First non-empty field as a displayable image, plus the raw pairing text.
///
/// Data-URLs pass through; raw pairing text is rendered to a PNG and kept
/// alongside it so terminals can draw the code directly. `None` when every
/// field is empty or rendering fails.
pub fn normalize_qr(fields: &QrFields) -> Option<QrImage> {
    let Some(first) = fields.non_empty().next() else {
        debug!("qr payload had no usable field");
        return None;
    };
    let raw = fields
        .non_empty()
        .find(|s| !is_data_url(s))
        .map(str::to_string);
    if is_data_url(first) {
        return Some(QrImage {
            image: first.to_string(),
            raw,
        });
    }
    match qr_data_url(first) {
        Ok(image) => Some(QrImage {
            image,
            raw: Some(first.to_string()),
        }),
        Err(e) => {
            warn!("could not render qr payload: {e}");
            None
        }
    }
}
