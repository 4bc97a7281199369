//! # partcheck Common Library
//!
//! Shared code for the partcheck workspace:
//! - Common error type
//! - Configuration file and root folder resolution
//! - Logging bootstrap

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
