// src/crosswalk/mod.rs
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::{
    fs::File,
    io::{Cursor, Read},
    path::Path,
};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::BuildError;

/// One ZIP⇄county row. After [`dedupe`] there is exactly one per ZIP.
#[derive(Clone, Debug, PartialEq)]
pub struct ZipRecord {
    /// 5 digits, zero-padded.
    pub zip: String,
    /// 2-letter postal code.
    pub state: String,
    /// 5 digits, zero-padded; empty when the source cell is unusable.
    pub county_fips: String,
    pub cbsa_code: Option<String>,
    /// Share of the ZIP's residential addresses in this county. `None` when
    /// the cell is blank or not a number; such rows lose every tie.
    pub res_ratio: Option<f64>,
}

#[derive(Debug, Default)]
pub struct CrosswalkRows {
    pub rows: Vec<ZipRecord>,
    /// Rows without a usable ZIP; these are dropped.
    pub skipped: usize,
    /// Kept rows with an unusable county or ratio cell.
    pub field_gaps: usize,
}

struct Columns {
    zip: usize,
    county: usize,
    state: usize,
    cbsa: Option<usize>,
    res_ratio: usize,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim().trim_start_matches('\u{feff}');
                names.iter().any(|n| h.eq_ignore_ascii_case(n))
            })
        };
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| BuildError::UnrecognizedResponse {
                table: "crosswalk".into(),
                detail: format!(
                    "missing column {} (headers: {})",
                    names[0],
                    headers.iter().collect::<Vec<_>>().join(",")
                ),
            })
        };
        Ok(Columns {
            zip: require(&["ZIP"])?,
            county: require(&["COUNTY"])?,
            state: require(&["STATE", "USPS_ZIP_PREF_STATE"])?,
            cbsa: find(&["CBSA"]),
            res_ratio: require(&["RES_RATIO"])?,
        })
    }
}

fn pad_digits(raw: &str, width: usize) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() > width || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{:0>width$}", raw, width = width))
}

/// `None` only when the ZIP itself is unusable. Bad county or ratio cells
/// become gaps on an otherwise kept row.
fn parse_row(record: &StringRecord, cols: &Columns) -> Option<ZipRecord> {
    let zip = pad_digits(record.get(cols.zip)?, 5)?;
    let county_fips = record
        .get(cols.county)
        .and_then(|c| pad_digits(c, 5))
        .unwrap_or_default();
    let state = record
        .get(cols.state)
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_default();
    let res_ratio = record
        .get(cols.res_ratio)
        .and_then(|r| r.trim().parse::<f64>().ok())
        .filter(|r| r.is_finite() && *r >= 0.0);
    let cbsa_code = cols
        .cbsa
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| pad_digits(c, 5).unwrap_or_else(|| c.to_string()));

    Some(ZipRecord {
        zip,
        state,
        county_fips,
        cbsa_code,
        res_ratio,
    })
}

/// Parse crosswalk CSV text. A missing required column is fatal; a row that
/// cannot be parsed is logged and counted.
pub fn read_crosswalk_csv<R: Read>(reader: R) -> Result<CrosswalkRows> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = rdr.headers().context("reading crosswalk header")?.clone();
    let cols = Columns::locate(&headers)?;

    let mut out = CrosswalkRows::default();
    for (idx, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(row = idx, error = %e, "unreadable crosswalk row");
                out.skipped += 1;
                continue;
            }
        };
        match parse_row(&record, &cols) {
            Some(row) => {
                if row.county_fips.is_empty() || row.res_ratio.is_none() {
                    debug!(row = idx, zip = %row.zip, ?record, "crosswalk row with gaps");
                    out.field_gaps += 1;
                }
                out.rows.push(row);
            }
            None => {
                debug!(row = idx, ?record, "crosswalk row without a usable ZIP");
                out.skipped += 1;
            }
        }
    }
    if out.skipped > 0 {
        warn!(skipped = out.skipped, "dropped crosswalk rows without a ZIP");
    }
    if out.field_gaps > 0 {
        warn!(rows = out.field_gaps, "kept crosswalk rows with unusable county or ratio");
    }
    Ok(out)
}

/// Open the crosswalk archive and parse its tabular entry (first `.csv`).
#[tracing::instrument(level = "info", skip(zip_path), fields(path = %zip_path.as_ref().display()))]
pub fn load_crosswalk_archive<P: AsRef<Path>>(zip_path: P) -> Result<CrosswalkRows> {
    let zip_path = zip_path.as_ref();
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open crosswalk archive: {:?}", zip_path))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))?;

    let csv_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.to_lowercase().ends_with(".csv"))
        .map(str::to_string)
        .collect();
    let Some(name) = csv_names.first() else {
        return Err(BuildError::UnrecognizedResponse {
            table: "crosswalk".into(),
            detail: format!("no .csv entry in {}", zip_path.display()),
        }
        .into());
    };
    if csv_names.len() > 1 {
        warn!(entries = ?csv_names, "several tabular entries, using the first");
    }

    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Failed to access {} in {:?}", name, zip_path))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("Failed to read {} into memory", name))?;
    drop(entry);

    info!(entry = %name, bytes = buf.len(), "extracted crosswalk");
    let rows = read_crosswalk_csv(Cursor::new(buf))?;
    info!(rows = rows.rows.len(), "ZIP-county mappings");
    Ok(rows)
}

fn ratio_rank(r: Option<f64>) -> f64 {
    r.unwrap_or(f64::NEG_INFINITY)
}

/// Keep one row per ZIP: the one with the largest residential ratio, the
/// earliest input row on ties. A missing ratio ranks below every number.
/// Output is ordered by ZIP.
pub fn dedupe(mut rows: Vec<ZipRecord>) -> Vec<ZipRecord> {
    // stable: equal (zip, ratio) pairs keep input order
    rows.sort_by(|a, b| {
        a.zip
            .cmp(&b.zip)
            .then_with(|| ratio_rank(b.res_ratio).total_cmp(&ratio_rank(a.res_ratio)))
    });
    rows.dedup_by(|later, earlier| later.zip == earlier.zip);
    info!(zips = rows.len(), "unique ZIP codes");
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_test_logging;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    fn row(zip: &str, county: &str, ratio: f64) -> ZipRecord {
        ZipRecord {
            zip: zip.into(),
            state: "MI".into(),
            county_fips: county.into(),
            cbsa_code: None,
            res_ratio: Some(ratio),
        }
    }

    #[test]
    fn dedupe_keeps_max_ratio_first_on_tie() {
        let rows = vec![
            row("48505", "26049", 0.2),
            row("10001", "36061", 0.5),
            row("48505", "26125", 0.7),
            row("10001", "36047", 0.5),
            row("48505", "26087", 0.1),
            row("99501", "02020", 0.0),
        ];
        let out = dedupe(rows);
        let got: Vec<(&str, &str, Option<f64>)> = out
            .iter()
            .map(|r| (r.zip.as_str(), r.county_fips.as_str(), r.res_ratio))
            .collect();
        assert_eq!(
            got,
            vec![
                ("10001", "36061", Some(0.5)),
                ("48505", "26125", Some(0.7)),
                ("99501", "02020", Some(0.0)),
            ]
        );
    }

    #[test]
    fn missing_ratio_loses_to_any_number() {
        let mut unknown = row("48505", "26125", 0.0);
        unknown.res_ratio = None;
        let out = dedupe(vec![unknown.clone(), row("48505", "26049", 0.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].county_fips, "26049");

        // alone, it is still kept
        let out = dedupe(vec![unknown]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].res_ratio, None);
    }

    #[test]
    fn parses_hud_layout_and_keeps_rows_with_gaps() -> Result<()> {
        init_test_logging();
        let csv = "\u{feff}ZIP,COUNTY,USPS_ZIP_PREF_CITY,USPS_ZIP_PREF_STATE,RES_RATIO,BUS_RATIO\n\
                   501,36103,HOLTSVILLE,ny,0,1\n\
                   48505,26049,FLINT,MI,1,1\n\
                   ABCDE,26049,FLINT,MI,1,1\n\
                   48506,26049,FLINT,MI,n/a,1\n\
                   48507,,FLINT,MI,1,1\n";
        let out = read_crosswalk_csv(csv.as_bytes())?;
        assert_eq!(out.skipped, 1);
        assert_eq!(out.field_gaps, 2);
        assert_eq!(out.rows.len(), 4);
        assert_eq!(out.rows[0].zip, "00501");
        assert_eq!(out.rows[0].state, "NY");
        assert_eq!(out.rows[0].cbsa_code, None);
        assert_eq!(out.rows[1].county_fips, "26049");
        assert_eq!(out.rows[2].zip, "48506");
        assert_eq!(out.rows[2].res_ratio, None);
        assert_eq!(out.rows[3].zip, "48507");
        assert_eq!(out.rows[3].county_fips, "");
        Ok(())
    }

    #[test]
    fn blank_metro_is_absent() -> Result<()> {
        let csv = "zip,county,state,cbsa,res_ratio\n\
                   78701,48453,TX,12420,1.0\n\
                   48505,26049,MI,,1.0\n";
        let out = read_crosswalk_csv(csv.as_bytes())?;
        assert_eq!(out.rows[0].cbsa_code.as_deref(), Some("12420"));
        assert_eq!(out.rows[1].cbsa_code, None);
        Ok(())
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let csv = "ZIP,COUNTY,STATE\n48505,26049,MI\n";
        let err = read_crosswalk_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::UnrecognizedResponse { .. })
        ));
    }

    fn archive_with(entries: &[(&str, &str)]) -> Result<NamedTempFile> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, content) in entries {
                zip.start_file(*name, options)?;
                zip.write_all(content.as_bytes())?;
            }
            zip.finish()?;
        }
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(&buf)?;
        Ok(tmp)
    }

    #[test]
    fn loads_tabular_entry_from_archive() -> Result<()> {
        init_test_logging();
        let tmp = archive_with(&[
            ("README.txt", "not data"),
            (
                "ZIP_COUNTY_032025.CSV",
                "ZIP,COUNTY,STATE,CBSA,RES_RATIO\n48505,26049,MI,,1\n",
            ),
        ])?;
        let out = load_crosswalk_archive(tmp.path())?;
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].zip, "48505");
        Ok(())
    }

    #[test]
    fn archive_without_csv_is_fatal() -> Result<()> {
        let tmp = archive_with(&[("ZIP_COUNTY.xlsx", "binary")])?;
        let err = load_crosswalk_archive(tmp.path()).unwrap_err();
        assert!(err.downcast_ref::<BuildError>().is_some());
        Ok(())
    }
}
