//! Deckflow Remote - HTTP client for the presentation service
//!
//! Implements [`deckflow_core::RemoteSync`] over HTTP + JSON:
//! - `GET  {base}/presentations/{id}`
//! - `POST {base}/presentations`
//! - `POST {base}/presentations/{id}/steps/{stage}/run`
//! - `POST {base}/presentations/{id}/save`
//! - `POST {base}/presentations/{id}/interpret`
//!
//! Responses are decoded as loose JSON and coerced into typed values, so a
//! malformed snapshot degrades to defaults instead of failing the poll.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod client;

pub use client::HttpRemote;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
