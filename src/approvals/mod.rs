//! Client for the portal's approvals endpoint.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
#[cfg(test)]
pub mod testing;
pub mod types;
