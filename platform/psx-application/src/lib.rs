pub mod config;
pub mod extraction;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;
