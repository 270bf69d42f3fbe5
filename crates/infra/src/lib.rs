//! Infrastructure layer: job persistence, command execution, workers, config.

pub mod config;
pub mod context;
pub mod jobs;

mod integration_tests;
