//! Report model, collaborator traits, configuration and errors.

pub mod config;
pub mod error;
pub mod report;
pub mod traits;
pub mod window;
