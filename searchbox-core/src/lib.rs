pub mod config;
pub mod error;
pub mod logging;

pub use crate::config::{
    ClientConfig, Config, DiscoveryConfig, DiscoveryFrequency, LoggingConfig, TimeUnit,
};
pub use error::{Error, Result};
