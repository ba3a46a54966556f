// src/output/mod.rs
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::geo::Rpp;
use crate::join::ResolvedZip;

pub const CSV_FILE: &str = "col_by_zip.csv";
pub const LOOKUP_FILE: &str = "col_by_zip.json";
pub const CORE_FILE: &str = "col_by_zip_core.json";
pub const FALLBACK_FILE: &str = "col_by_zip_fallback.json";
pub const STATES_DIR: &str = "states";

/// Numbers in every artifact carry two decimals.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// One row of `col_by_zip.csv`. Column order is the file's contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsvRow {
    pub zip: String,
    pub state: String,
    pub county_fips: String,
    /// Written as an empty cell when absent.
    pub cbsa_code: Option<String>,
    /// Cells that are blank or not a number read back as `None`.
    #[serde(deserialize_with = "csv::invalid_option")]
    pub rpp_all: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub rpp_housing: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub rpp_goods: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub rpp_other: Option<f64>,
}

impl From<&ResolvedZip> for CsvRow {
    fn from(r: &ResolvedZip) -> Self {
        CsvRow {
            zip: r.zip.clone(),
            state: r.state.clone(),
            county_fips: r.county_fips.clone(),
            cbsa_code: r.cbsa_code.clone(),
            rpp_all: Some(round2(r.rpp.all)),
            rpp_housing: Some(round2(r.rpp.housing)),
            rpp_goods: Some(round2(r.rpp.goods)),
            rpp_other: Some(round2(r.rpp.other)),
        }
    }
}

/// Value side of the structured lookup: `{zip: LookupEntry}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub rpp_all: f64,
    pub rpp_housing: f64,
    pub rpp_goods: f64,
    pub rpp_other: f64,
    pub state: String,
    /// Serialized as `null` when absent, never omitted.
    pub cbsa_code: Option<String>,
}

impl From<&ResolvedZip> for LookupEntry {
    fn from(r: &ResolvedZip) -> Self {
        LookupEntry {
            rpp_all: round2(r.rpp.all),
            rpp_housing: round2(r.rpp.housing),
            rpp_goods: round2(r.rpp.goods),
            rpp_other: round2(r.rpp.other),
            state: r.state.clone(),
            cbsa_code: r.cbsa_code.clone(),
        }
    }
}

/// A missing cell reads as the national average.
impl From<&CsvRow> for LookupEntry {
    fn from(r: &CsvRow) -> Self {
        let value = |v: Option<f64>| round2(v.unwrap_or(Rpp::NATIONAL_AVERAGE.all));
        LookupEntry {
            rpp_all: value(r.rpp_all),
            rpp_housing: value(r.rpp_housing),
            rpp_goods: value(r.rpp_goods),
            rpp_other: value(r.rpp_other),
            state: r.state.trim().to_string(),
            cbsa_code: r
                .cbsa_code
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        }
    }
}

/// ZIP → entry, ordered by ZIP.
pub type Lookup = BTreeMap<String, LookupEntry>;

pub fn to_lookup(records: &[ResolvedZip]) -> Lookup {
    records
        .iter()
        .map(|r| (r.zip.clone(), LookupEntry::from(r)))
        .collect()
}

pub fn csv_rows_to_lookup(rows: &[CsvRow]) -> Lookup {
    rows.iter()
        .map(|r| (format!("{:0>5}", r.zip.trim()), LookupEntry::from(r)))
        .collect()
}

/// Replace `path` with `bytes` in one step: write a sibling temp file, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).with_context(|| format!("creating {}", parent.display()))?;

    let mut tmp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("could not create temporary file in `{}`", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("writing temporary file for `{}`", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("renaming temporary file to `{}`", path.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote");
    Ok(())
}

/// Compact JSON (no whitespace), written atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).context("serializing JSON")?;
    write_atomic(path, &bytes)
}

#[tracing::instrument(level = "info", skip(records), fields(rows = records.len()))]
pub fn write_csv(path: &Path, records: &[ResolvedZip]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for r in records {
        wtr.serialize(CsvRow::from(r))
            .with_context(|| format!("serializing row for {}", r.zip))?;
    }
    let bytes = wtr.into_inner().context("flushing CSV buffer")?;
    write_atomic(path, &bytes)?;
    info!(path = %path.display(), "wrote tabular dataset");
    Ok(())
}

#[tracing::instrument(level = "info", skip(lookup), fields(zips = lookup.len()))]
pub fn write_lookup(path: &Path, lookup: &Lookup) -> Result<()> {
    write_json(path, lookup)?;
    info!(path = %path.display(), "wrote lookup");
    Ok(())
}

fn require_input(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(BuildError::MissingInput {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

/// Read `col_by_zip.csv`. A row that cannot be read is logged and skipped;
/// numeric cells that do not parse come back as `None`.
pub fn read_csv(path: &Path) -> Result<Vec<CsvRow>> {
    require_input(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (idx, result) in rdr.deserialize::<CsvRow>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!(row = idx, error = %e, "unreadable dataset row");
                skipped += 1;
            }
        }
    }
    let gaps = rows
        .iter()
        .filter(|r| {
            [r.rpp_all, r.rpp_housing, r.rpp_goods, r.rpp_other]
                .iter()
                .any(Option::is_none)
        })
        .count();
    if gaps > 0 {
        warn!(rows = gaps, "rows with missing values, read as 100.0");
    }
    info!(path = %path.display(), rows = rows.len(), skipped, "loaded tabular dataset");
    Ok(rows)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    require_input(path)?;
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

pub fn read_lookup(path: &Path) -> Result<Lookup> {
    let lookup: Lookup = read_json(path)?;
    info!(path = %path.display(), zips = lookup.len(), "loaded lookup");
    Ok(lookup)
}
