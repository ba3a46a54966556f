// src/fetch/mod.rs
//! Network side of the pipeline: the statistical API and the crosswalk archive.
//! Calls are sequential and bounded by a timeout; there is no retry.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

pub mod bea;
pub mod zips;

/// HTTP client with a per-request timeout.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("colzip/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}
