// src/config.rs
use anyhow::{bail, Context, Result};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::error::BuildError;

pub const DEFAULT_YEAR: u16 = 2024;
pub const DEFAULT_CROSSWALK_URL: &str =
    "https://www.huduser.gov/portal/datasets/usps/ZIP_COUNTY_2025_Q1.zip";
pub const DEFAULT_CORE_SIZE: usize = 2000;

pub const BEA_TIMEOUT: Duration = Duration::from_secs(40);
pub const CROSSWALK_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the geography-level price parities come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RppSource {
    /// Live statistical API; needs a credential.
    Bea,
    /// Shared state-estimate reference table, keyed by postal state code.
    Estimates,
}

impl FromStr for RppSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bea" => Ok(RppSource::Bea),
            "estimates" => Ok(RppSource::Estimates),
            _ => bail!("COLZIP_RPP_SOURCE must be `bea` or `estimates`, got `{}`", s),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub rpp_source: RppSource,
    /// Only present when `rpp_source` is `Bea`.
    pub api_key: Option<String>,
    pub year: u16,
    pub crosswalk_url: String,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    pub output_dirs: Vec<PathBuf>,
    pub core_size: usize,
}

impl Config {
    /// Read the process environment. A missing credential is reported here,
    /// before any network call is made.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// For jobs that only read and write local files: no credential needed.
    pub fn local_from_env() -> Result<Self> {
        Self::from_lookup(|key| match key {
            "COLZIP_RPP_SOURCE" => Some("estimates".to_string()),
            _ => env::var(key).ok(),
        })
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rpp_source = match get("COLZIP_RPP_SOURCE") {
            Some(raw) => raw.parse()?,
            None => RppSource::Bea,
        };

        let api_key = get("BEA_API_KEY").filter(|k| !k.trim().is_empty());
        if rpp_source == RppSource::Bea && api_key.is_none() {
            return Err(BuildError::MissingCredential.into());
        }

        let year = match get("COLZIP_YEAR") {
            Some(y) => y
                .trim()
                .parse()
                .with_context(|| format!("COLZIP_YEAR `{}` is not a year", y))?,
            None => DEFAULT_YEAR,
        };

        let core_size = match get("COLZIP_CORE_SIZE") {
            Some(n) => n
                .trim()
                .parse()
                .with_context(|| format!("COLZIP_CORE_SIZE `{}` is not a count", n))?,
            None => DEFAULT_CORE_SIZE,
        };

        let cache_dir = match get("COLZIP_CACHE_DIR") {
            Some(d) => PathBuf::from(d),
            None => get("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cache")
                .join("col_by_zip"),
        };

        let output_dirs = get("COLZIP_OUTPUT_DIRS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect::<Vec<_>>()
            })
            .filter(|dirs| !dirs.is_empty())
            .unwrap_or_else(|| vec![PathBuf::from("public"), PathBuf::from("src/data")]);

        Ok(Config {
            rpp_source,
            api_key: if rpp_source == RppSource::Bea { api_key } else { None },
            year,
            crosswalk_url: get("COLZIP_CROSSWALK_URL")
                .unwrap_or_else(|| DEFAULT_CROSSWALK_URL.to_string()),
            cache_dir,
            data_dir: get("COLZIP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            output_dirs,
            core_size,
        })
    }

    pub fn csv_path(&self) -> PathBuf {
        self.data_dir.join(crate::output::CSV_FILE)
    }

    /// The structured lookup file in the first output root; downstream jobs read this one.
    pub fn lookup_path(&self) -> PathBuf {
        self.output_dirs
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("public"))
            .join(crate::output::LOOKUP_FILE)
    }
}
