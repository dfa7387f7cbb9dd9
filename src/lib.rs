pub mod asset;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod planet;
pub mod stages;
pub mod task;
