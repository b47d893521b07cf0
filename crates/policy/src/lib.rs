pub mod allowlist;
pub mod environment;

pub use allowlist::{Allowlist, AllowlistEntry, AllowlistError};
pub use environment::SessionEnvironment;
