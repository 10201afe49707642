pub mod csv;
pub mod decoder;
pub mod normalizer;
pub mod types;
