pub mod anomaly;
pub mod audit;
pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod recon;
pub mod records;
pub mod risk;
