//! The services catalogue: backend types, mapping, HTTP source and the cached client.

mod cache;
mod cached_client;
mod client;
mod mapper;
mod types;

pub use cache::{content_changed, diff};
pub use cached_client::CachedServicesClient;
pub use client::{decode_services, RemoteError, RemoteSource, ServicesClient};
pub use mapper::{is_truthy, map_enabled, map_service, slugify};
pub use types::{ApiService, Service};
