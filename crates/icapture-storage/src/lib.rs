pub mod backend;
pub mod violation;

pub use backend::{BackendError, LocalBackend, StorageBackend};
pub use violation::{LocalViolationStore, StorageError, ViolationStore};
