pub mod types;

pub use types::{unix_now, AgentInfo, AuditEntry, Request};
