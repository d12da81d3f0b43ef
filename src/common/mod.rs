//! Common utilities shared by the server and the one-shot CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::Config;
pub use error::{Error, ErrorClass, Result};
