pub mod audit;
pub mod store;

pub use audit::{AuditEntry, AuditLogger, AuditStatus};
pub use store::{hash_token, ChatScope, Store};
