// src/join/mod.rs
use std::fmt;
use tracing::info;

use crate::crosswalk::ZipRecord;
use crate::geo::{GeoTable, Rpp};

/// Which tier of the fallback chain produced a ZIP's values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provenance {
    MetroMatched,
    StateMatched,
    Estimated,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedZip {
    pub zip: String,
    pub state: String,
    pub county_fips: String,
    pub cbsa_code: Option<String>,
    pub rpp: Rpp,
    pub provenance: Provenance,
}

/// How many ZIPs each tier resolved. Reported, never used for control flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoinSummary {
    pub metro: usize,
    pub state: usize,
    pub estimated: usize,
}

impl JoinSummary {
    pub fn total(&self) -> usize {
        self.metro + self.state + self.estimated
    }

    fn count(&mut self, p: Provenance) {
        match p {
            Provenance::MetroMatched => self.metro += 1,
            Provenance::StateMatched => self.state += 1,
            Provenance::Estimated => self.estimated += 1,
        }
    }
}

impl fmt::Display for JoinSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ZIPs: {} metro, {} state, {} estimated",
            self.total(),
            self.metro,
            self.state,
            self.estimated
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct JoinedDataset {
    /// Same order as the crosswalk input.
    pub records: Vec<ResolvedZip>,
    pub summary: JoinSummary,
}

/// Resolve one ZIP: metro code, then state (postal code, then the county's
/// state FIPS prefix), then the national average.
pub fn resolve(zip: &ZipRecord, geo: &GeoTable) -> (Rpp, Provenance) {
    if let Some(rec) = zip
        .cbsa_code
        .as_deref()
        .filter(|c| !c.is_empty())
        .and_then(|c| geo.get(c))
    {
        return (rec.complete(), Provenance::MetroMatched);
    }

    let state_fips = zip.county_fips.get(..2);
    let state_rec = geo
        .get(&zip.state)
        .filter(|_| zip.state.len() == 2)
        .or_else(|| state_fips.and_then(|f| geo.get(f)));
    if let Some(rec) = state_rec {
        return (rec.complete(), Provenance::StateMatched);
    }

    (Rpp::NATIONAL_AVERAGE, Provenance::Estimated)
}

/// Join every crosswalk record against the geo table. Each input ZIP yields
/// exactly one output record.
#[tracing::instrument(level = "info", skip_all, fields(zips = zips.len(), geographies = geo.len()))]
pub fn join(zips: &[ZipRecord], geo: &GeoTable) -> JoinedDataset {
    let mut summary = JoinSummary::default();
    let records = zips
        .iter()
        .map(|z| {
            let (rpp, provenance) = resolve(z, geo);
            summary.count(provenance);
            ResolvedZip {
                zip: z.zip.clone(),
                state: z.state.clone(),
                county_fips: z.county_fips.clone(),
                cbsa_code: z.cbsa_code.clone(),
                rpp,
                provenance,
            }
        })
        .collect();

    info!(
        metro = summary.metro,
        state = summary.state,
        estimated = summary.estimated,
        "joined price parities"
    );
    JoinedDataset { records, summary }
}
