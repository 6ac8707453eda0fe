pub mod access_log;
pub mod activity_db;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod io;
pub mod ledger;
pub mod routing;

pub use error::{ModelgateError, Result};
