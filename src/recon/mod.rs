pub mod engine;
pub mod matcher;
pub mod types;
