pub mod config;
pub mod error;
pub mod types;

pub use config::StoreConfig;
pub use error::{Result, SonarError};
pub use types::*;
