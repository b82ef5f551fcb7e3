//! Terminal pairing client: links a phone from an invite or a reconnect token.

use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;
use zapdesk_core::{
    config::ClientConfig,
    error::ZapdeskError,
    qr::{decode_data_url, generate_qr_terminal},
};
use zapdesk_pairing::{
    Credential, FlowTiming, HttpTransport, PairingFlow, PairingOutcome, PairingView,
    PushChannel, QrImage, ReconnectFlow,
};

/// Delay between push-channel reconnect attempts.
const PUSH_RETRY_DELAY: Duration = Duration::from_secs(2);
const PUSH_BUFFER: usize = 64;

/// Shows QR codes in the terminal and mirrors them to a PNG file.
pub struct TerminalView {
    qr_file: Option<PathBuf>,
    shown: u32,
    /// Terminal art of the last QR drawn.
    last_art: Option<String>,
}

impl TerminalView {
    pub fn new(qr_file: Option<PathBuf>) -> Self {
        Self {
            qr_file,
            shown: 0,
            last_art: None,
        }
    }

    /// Render the pairing text as block art. `None` when the QR came as an
    /// image only.
    fn draw(&mut self, qr: &QrImage) -> Option<&str> {
        let raw = qr.raw.as_deref()?;
        match generate_qr_terminal(raw) {
            Ok(art) => {
                self.last_art = Some(art);
                self.last_art.as_deref()
            }
            Err(e) => {
                warn!("terminal qr render failed: {e}");
                None
            }
        }
    }

    fn write_png(&self, image: &str) -> Option<PathBuf> {
        let path = self.qr_file.as_ref()?;
        let written = decode_data_url(image)
            .and_then(|png| std::fs::write(path, png).map_err(ZapdeskError::from));
        match written {
            Ok(()) => Some(path.clone()),
            Err(e) => {
                warn!("writing qr to {} failed: {e}", path.display());
                None
            }
        }
    }
}

impl PairingView for TerminalView {
    fn show_qr(&mut self, qr: &QrImage, countdown: Duration) {
        self.shown += 1;
        let written = self.write_png(&qr.image);
        let drawn = match self.draw(qr) {
            Some(art) => {
                println!("{art}");
                true
            }
            None => false,
        };

        let location = match (written, drawn) {
            (Some(path), true) => format!("shown above and saved to {}", path.display()),
            (Some(path), false) => format!("saved to {}", path.display()),
            (None, true) => "shown above".to_string(),
            (None, false) => "received as an image only (pass --qr-file to save it)".to_string(),
        };
        let _ = cliclack::log::step(format!(
            "QR #{} {location}. Scan it in WhatsApp > Linked devices within {}s.",
            self.shown,
            countdown.as_secs()
        ));
    }

    fn notify(&mut self, message: &str) {
        let _ = cliclack::log::warning(message);
    }

    fn connected(&mut self, account_id: Option<Uuid>) {
        let id = account_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".into());
        let _ = cliclack::log::success(format!("WhatsApp linked (account {id})"));
    }
}

/// Which flow to run.
pub enum PairTarget {
    Invite {
        token: String,
        /// Profile token; the invite token is used when absent.
        api_token: Option<String>,
    },
    Reconnect(String),
}

/// Run one flow to completion, retrying on expiry while the user wants to.
pub async fn run(
    config: &ClientConfig,
    target: PairTarget,
    qr_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    cliclack::intro(style(" zapdesk pair ").on_green().black())?;

    let (credential, reconnect_token) = match &target {
        PairTarget::Invite { token, api_token } => {
            let credential = match api_token {
                Some(api_token) => Credential::Bearer(api_token.clone()),
                None => Credential::Invite(token.clone()),
            };
            (credential, None)
        }
        PairTarget::Reconnect(token) => (Credential::None, Some(token.as_str())),
    };
    let transport = Arc::new(HttpTransport::new(&config.server_url, credential));
    let timing = FlowTiming::from_config(config);
    let mut view = TerminalView::new(qr_file);

    loop {
        let (tx, mut rx) = mpsc::channel(PUSH_BUFFER);
        let push =
            PushChannel::connect(transport.push_url(reconnect_token), tx, PUSH_RETRY_DELAY);

        let outcome = match &target {
            PairTarget::Invite { token, .. } => {
                PairingFlow::new(transport.clone(), timing.clone())
                    .run(token, &push, &mut rx, &mut view)
                    .await
            }
            PairTarget::Reconnect(token) => {
                ReconnectFlow::new(transport.clone(), timing.clone())
                    .run(token, &push, &mut rx, &mut view)
                    .await
            }
        };
        push.close().await;

        match outcome {
            Ok(PairingOutcome::Connected { .. }) => {
                cliclack::outro("Done. You can close this window.")?;
                return Ok(());
            }
            Ok(PairingOutcome::Expired) => {
                let again: bool = cliclack::confirm("The QR code expired. Generate a new one?")
                    .initial_value(true)
                    .interact()?;
                if !again {
                    cliclack::outro_cancel("Pairing cancelled")?;
                    return Ok(());
                }
            }
            Ok(PairingOutcome::Failed(reason)) => {
                cliclack::outro_cancel(format!("Pairing failed: {reason}"))?;
                anyhow::bail!("pairing failed: {reason}");
            }
            Err(e) => {
                cliclack::outro_cancel(format!("Pairing failed: {e}"))?;
                return Err(e.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zapdesk_core::qr::qr_data_url;

    fn pairing_qr(code: &str) -> QrImage {
        QrImage {
            image: qr_data_url(code).unwrap(),
            raw: Some(code.to_string()),
        }
    }

    #[test]
    fn test_view_writes_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qr.png");
        let mut view = TerminalView::new(Some(path.clone()));

        view.show_qr(&pairing_qr("2@abc,def,ghi"), Duration::from_secs(60));

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
        assert_eq!(view.shown, 1);
    }

    #[test]
    fn test_raw_code_is_drawn_in_terminal() {
        let mut view = TerminalView::new(None);
        view.show_qr(&pairing_qr("2@abc,def,ghi"), Duration::from_secs(60));

        let expected = generate_qr_terminal("2@abc,def,ghi").unwrap();
        assert_eq!(view.last_art.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_image_only_qr_is_not_drawn() {
        let mut view = TerminalView::new(None);
        view.show_qr(
            &QrImage::from_data_url("data:image/png;base64,!!!"),
            Duration::from_secs(60),
        );
        view.notify("QR code expired");
        assert_eq!(view.shown, 1);
        assert_eq!(view.last_art, None);
    }
}
