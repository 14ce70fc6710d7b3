// Repository layer for the external trigger store

pub mod trigger;

pub use trigger::TriggerRepository;
