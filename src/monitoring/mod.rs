pub mod dashboard;
pub mod events;
pub mod logger;
pub mod metrics;
