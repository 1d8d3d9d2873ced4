pub mod content;
pub mod job;
pub mod prediction;
