pub mod config;
pub mod types;

pub use config::{ConfigError, PromvaultConfig};
pub use types::*;
