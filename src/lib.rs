//! Trailscope library crate.
//!
//! Turns the CloudTrail logs delivered to a bucket into per-scope activity
//! reports: who acted, from where, with which clients, and which API calls
//! they made.

pub mod blob;
pub mod core;
pub mod geoip;
pub mod pipeline;
pub mod sources;
pub mod store;

pub use crate::core::config;
pub use crate::core::error;
pub use crate::core::report::{EventSummary, Location, Principal, PrincipalType, Report};
pub use crate::core::traits;
pub use crate::core::window::TimeWindow;
