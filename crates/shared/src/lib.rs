pub mod clock;
pub mod config;
mod config_env;
pub mod fallback;
pub mod llm;
pub mod models;
pub mod repos;
pub mod telemetry;
