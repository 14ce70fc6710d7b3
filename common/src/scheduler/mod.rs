// Scheduler module: claim due triggers, run them under the concurrency gate, report results

pub mod engine;
pub mod reporter;

pub use engine::{Scheduler, SchedulerConfig, SchedulerEngine, TickSummary};
pub use reporter::ResultReporter;
