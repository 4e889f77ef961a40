pub mod config;
pub mod download;
pub mod error;
pub mod log_sanitize;
pub mod logging;
pub mod notify;
pub mod runner;
pub mod tool;
pub mod ui;

pub use error::{Error, Result};
