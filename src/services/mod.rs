pub mod backoff;
pub mod classifier;
pub mod producer;
pub mod queue;
pub mod worker;
