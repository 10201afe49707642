pub mod baseline;
pub mod engine;
pub mod rules;
pub mod types;
