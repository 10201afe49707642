pub mod checker;
pub mod types;
