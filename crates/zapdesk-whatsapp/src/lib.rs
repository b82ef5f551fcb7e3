//! WhatsApp connection service.
//!
//! One socket per linked account, driven through the `WhatsAppDriver` trait.
//! The production driver wraps `whatsapp-rust` and keeps each account's
//! Signal session in the shared SQLite database.

pub mod driver;
pub mod manager;
mod rate_limit;
pub mod session_store;

pub use driver::WhatsAppRustFactory;
pub use manager::{ConnectionManager, QrLookup};
pub use session_store::AccountSessionStore;
