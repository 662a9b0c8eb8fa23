pub mod datastore;
pub mod db;
pub mod entities;
pub mod log_queue;
pub mod retention;

pub use datastore::{Datastore, InMemoryDatastore};
pub use log_queue::{InMemoryLogQueue, LogQueue, PendingLog};
pub use retention::strip_for_retention;
