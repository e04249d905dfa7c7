pub mod api;
pub mod auth;
pub mod census;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod executors;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod runs;
pub mod shared;
pub mod store;
