// Common library for the trigger worker: scheduling, safety checks, store access and telemetry

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod executor;
pub mod models;
pub mod periodic_event;
pub mod safety;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
