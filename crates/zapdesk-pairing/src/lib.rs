//! # zapdesk-pairing
//!
//! Client side of WhatsApp pairing: tracks one pairing session, receives QR
//! codes over the realtime push channel with HTTP polling as a fallback, and
//! drives the invite and reconnection flows.

pub mod client;
pub mod error;
pub mod flow;
pub mod poll;
pub mod push;
pub mod qr;
pub mod tracker;
pub mod wire;

pub use client::{Credential, HttpTransport, PairingApi};
pub use flow::{FlowTiming, PairingFlow, PairingOutcome, PairingView, ReconnectFlow};
pub use push::{PushChannel, PushEvent, RoomSubscriber};
pub use qr::QrImage;
pub use tracker::{PairingState, PairingTracker};
