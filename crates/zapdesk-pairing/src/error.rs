use thiserror::Error;

/// Why the QR poll loop gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// Attempt budget spent without a QR.
    #[error("no QR code after {attempts} attempts")]
    TimedOut { attempts: u32 },

    /// Non-2xx other than 404/429.
    #[error("QR endpoint returned HTTP {status}")]
    Http { status: u16 },

    /// Network or decoding failure.
    #[error("QR request failed: {0}")]
    Transport(String),
}
