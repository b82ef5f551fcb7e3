//! # zapdesk-core
//!
//! Core types, traits, configuration, and error handling for Zapdesk.

pub mod config;
pub mod dto;
pub mod error;
pub mod events;
pub mod jid;
pub mod model;
pub mod qr;
pub mod traits;

pub use config::shellexpand;
