//! HTTP backend for the dataplane configuration API.
//!
//! [`DataplaneClient`] implements the transaction protocol
//! (`RemoteConfigClient`); [`HttpResourceDriver`] implements per-kind CRUD
//! (`ResourceDriver`). Error responses are decoded from the `{code, message}`
//! body and classified, so conflict signatures surface as
//! `DataplaneError::Conflict` and are retried by the coordinator.

mod client;
mod driver;
mod wire;

pub use client::DataplaneClient;
pub use driver::HttpResourceDriver;
