//! Server module for turnstream
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for all server components
//! - `loader`: Configuration loading from files and environment
//! - `stages`: Built-in pipeline stages
//! - `state`: Shared handler state and background pipeline launch
//! - `uploads`: Upload storage and turn file resolution
//! - `init`: Server startup and run loop

pub mod config;
mod init;
mod loader;
pub mod stages;
pub mod state;
pub mod uploads;

pub use config::AppConfig;
pub use init::run;
pub use loader::load_config;
pub use state::AppState;
