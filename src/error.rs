use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions that abort a build run. Everything recoverable (bad
/// numeric cell, "(NA)" value, malformed crosswalk row) is handled locally
/// and never shows up here.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("BEA_API_KEY is not set; export it or use COLZIP_RPP_SOURCE=estimates")]
    MissingCredential,
    #[error("statistical source reported an error for table {table}: {message}")]
    Upstream { table: String, message: String },
    #[error("unrecognized response for {table}: {detail}")]
    UnrecognizedResponse { table: String, detail: String },
    #[error("required input not found: {}", path.display())]
    MissingInput { path: PathBuf },
}
