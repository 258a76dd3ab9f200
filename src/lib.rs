pub mod bootstrap;
pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod provisioner;
pub mod shutdown;
pub mod terminator;

pub use error::{ConfigError, Result, XdistError};
