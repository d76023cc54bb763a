pub mod common;
pub mod config;
pub mod monitor;

pub use common::error::{ConfigError, MarketDataError, MonitorError, NotificationError};
