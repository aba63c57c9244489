pub mod certs;
pub mod compose;
pub mod config;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod io;
pub mod manifest;
pub mod paths;
pub mod provision;
pub mod registry;
pub mod render;
pub mod secrets;
pub mod site;
pub mod templates;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{FleetError, Result};
