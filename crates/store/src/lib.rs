pub mod audit_log;
pub mod file_lock;
pub mod request_queue;

pub use audit_log::{AuditLog, AuditLogError};
pub use file_lock::{FileLock, LockError};
pub use request_queue::{QueueError, RequestQueue};
