// src/lib.rs
//! Builds a ZIP-level cost-of-living lookup from regional price parities and
//! the ZIP⇄county crosswalk, then shards it into artifacts for the web app.

pub mod config;
pub mod crosswalk;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod join;
pub mod optimize;
pub mod output;
pub mod reference;
