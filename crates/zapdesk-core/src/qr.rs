//! QR rendering shared by the server (PNG data-URLs for the dashboard) and the
//! pairing CLI (terminal preview, PNG file).

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageBuffer, Luma};
use qrcode::{Color, EcLevel, QrCode};

use crate::error::ZapdeskError;

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

const MODULE_PX: u32 = 10;
const QUIET_MODULES: u32 = 2;

fn encode(payload: &str) -> Result<QrCode, ZapdeskError> {
    QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .map_err(|e| ZapdeskError::WhatsApp(format!("QR generation failed: {e}")))
}

/// Half-block terminal rendering: two module rows per text line.
pub fn generate_qr_terminal(payload: &str) -> Result<String, ZapdeskError> {
    let code = encode(payload)?;
    let width = code.width();
    let colors = code.into_colors();
    let dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::with_capacity((width + 1) * width.div_ceil(2));
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

/// PNG bytes with a white quiet zone.
pub fn generate_qr_image(payload: &str) -> Result<Vec<u8>, ZapdeskError> {
    let code = encode(payload)?;
    let modules = code.width() as u32;
    let side = (modules + QUIET_MODULES * 2) * MODULE_PX;

    let img = ImageBuffer::from_fn(side, side, |x, y| {
        let (cx, cy) = (x / MODULE_PX, y / MODULE_PX);
        let inside = (QUIET_MODULES..QUIET_MODULES + modules).contains(&cx)
            && (QUIET_MODULES..QUIET_MODULES + modules).contains(&cy);
        if inside
            && code[((cx - QUIET_MODULES) as usize, (cy - QUIET_MODULES) as usize)] == Color::Dark
        {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| ZapdeskError::WhatsApp(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

/// Render `payload` and wrap the PNG as `data:image/png;base64,...`.
pub fn qr_data_url(payload: &str) -> Result<String, ZapdeskError> {
    let png = generate_qr_image(payload)?;
    Ok(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(png)))
}

pub fn is_data_url(s: &str) -> bool {
    s.starts_with("data:image/")
}

/// Decode the bytes behind a base64 `data:` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, ZapdeskError> {
    let (header, body) = url
        .split_once(',')
        .ok_or_else(|| ZapdeskError::Validation("not a data URL".into()))?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(ZapdeskError::Validation(format!(
            "unsupported data URL header '{header}'"
        )));
    }
    STANDARD
        .decode(body.trim())
        .map_err(|e| ZapdeskError::Validation(format!("bad base64 in data URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "2@abc123,XyZ==,AbC==,1";

    #[test]
    fn test_terminal_rendering_is_half_height() {
        let out = generate_qr_terminal(PAYLOAD).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        let width = lines[0].chars().count();
        assert_eq!(lines.len(), width.div_ceil(2));
        assert!(out.contains('█') || out.contains('▀'));
    }

    #[test]
    fn test_png_signature() {
        let png = generate_qr_image(PAYLOAD).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_data_url_roundtrip() {
        let url = qr_data_url(PAYLOAD).unwrap();
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));
        assert!(is_data_url(&url));
        let bytes = decode_data_url(&url).unwrap();
        assert_eq!(bytes, generate_qr_image(PAYLOAD).unwrap());
    }

    #[test]
    fn test_decode_rejects_plain_text() {
        assert!(decode_data_url("2@abc,def").is_err());
        assert!(decode_data_url("no comma here").is_err());
    }
}
