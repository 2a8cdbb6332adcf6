pub mod actions;
pub mod config;
pub mod db;
pub mod error;
pub mod exec;
pub mod facts;
pub mod fetch;
pub mod fs_util;
pub mod keys;
pub mod runner;
pub mod secret;
pub mod sink;

pub use config::Settings;
pub use error::ProvisionError;
