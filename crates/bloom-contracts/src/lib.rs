pub mod events;
pub mod metrics;
pub mod routine;
pub mod scan;
