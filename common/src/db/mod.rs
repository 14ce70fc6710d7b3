// Database layer module
// A single pooled PostgreSQL connection is shared by claim, job and report calls.

pub mod pool;
pub mod repositories;

pub use pool::DbPool;
pub use repositories::TriggerRepository;
