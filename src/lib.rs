//! Local cache for the CRM services catalogue.
//!
//! [`services::CachedServicesClient`] is the entry point: it serves the
//! enabled services from a SQLite-backed cache when fresh, revalidates in the
//! background, and degrades to stale or empty data instead of failing.

pub mod cache;
pub mod config;
pub mod logging;
pub mod paginate;
pub mod services;
pub mod session;

pub use services::diff;
