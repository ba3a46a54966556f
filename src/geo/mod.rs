// src/geo/mod.rs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// The four price-parity components for one geography (100 = national average).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rpp {
    pub all: f64,
    pub housing: f64,
    pub goods: f64,
    pub other: f64,
}

impl Rpp {
    pub const NATIONAL_AVERAGE: Rpp = Rpp {
        all: 100.0,
        housing: 100.0,
        goods: 100.0,
        other: 100.0,
    };
}

/// A geography record as published: any component may be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PartialRpp {
    pub all: Option<f64>,
    pub housing: Option<f64>,
    pub goods: Option<f64>,
    pub other: Option<f64>,
}

impl PartialRpp {
    pub fn set(&mut self, component: Component, value: f64) {
        match component {
            Component::All => self.all = Some(value),
            Component::Housing => self.housing = Some(value),
            Component::Goods => self.goods = Some(value),
            Component::Other => self.other = Some(value),
        }
    }

    /// Missing components read as the national average.
    pub fn complete(&self) -> Rpp {
        let n = Rpp::NATIONAL_AVERAGE;
        Rpp {
            all: self.all.unwrap_or(n.all),
            housing: self.housing.unwrap_or(n.housing),
            goods: self.goods.unwrap_or(n.goods),
            other: self.other.unwrap_or(n.other),
        }
    }
}

impl From<Rpp> for PartialRpp {
    fn from(r: Rpp) -> Self {
        PartialRpp {
            all: Some(r.all),
            housing: Some(r.housing),
            goods: Some(r.goods),
            other: Some(r.other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    All,
    Housing,
    Goods,
    Other,
}

impl Component {
    /// Line codes of the RPP tables: 1 all items, 2 goods, 3 rents, 4 other services.
    pub fn from_line_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Component::All),
            "2" => Some(Component::Goods),
            "3" => Some(Component::Housing),
            "4" => Some(Component::Other),
            _ => None,
        }
    }
}

/// Granularity of a published table. Both levels share one key namespace and
/// are told apart by code length: 5 characters for metro, 2 for state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeoLevel {
    Metro,
    State,
}

impl GeoLevel {
    pub fn as_str(&self) -> &str {
        match self {
            GeoLevel::Metro => "metro",
            GeoLevel::State => "state",
        }
    }

    /// Turn a raw GeoFips into the lookup key for this level.
    /// State tables publish `SS000`; the key is the `SS` prefix.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim().trim_matches('"');
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        match self {
            GeoLevel::Metro if raw.len() <= 5 => Some(format!("{:0>5}", raw)),
            GeoLevel::Metro => None,
            GeoLevel::State if raw.len() <= 2 => Some(format!("{:0>2}", raw)),
            GeoLevel::State if raw.len() <= 5 => Some(format!("{:0>5}", raw)[..2].to_string()),
            GeoLevel::State => None,
        }
    }
}

/// Parse a published cell. Sentinels such as `(NA)` or `(D)` and any other
/// non-numeric text come back as `None`; thousands separators are ignored.
pub fn parse_data_value(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Geography code → price parities, metro and state codes together.
#[derive(Clone, Debug, Default)]
pub struct GeoTable {
    records: HashMap<String, PartialRpp>,
}

impl GeoTable {
    pub fn builder() -> GeoTableBuilder {
        GeoTableBuilder::default()
    }

    /// Seed a table from complete records keyed by whatever code the caller
    /// wants matched (postal state codes for the estimate table).
    pub fn from_complete<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Rpp)>,
    {
        GeoTable {
            records: records
                .into_iter()
                .map(|(code, rpp)| (code.to_string(), PartialRpp::from(rpp)))
                .collect(),
        }
    }

    pub fn from_state_estimates(estimates: &BTreeMap<String, Rpp>) -> Self {
        Self::from_complete(estimates.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    pub fn get(&self, code: &str) -> Option<&PartialRpp> {
        self.records.get(code)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn metro_count(&self) -> usize {
        self.records.keys().filter(|k| k.len() == 5).count()
    }

    pub fn state_count(&self) -> usize {
        self.records.keys().filter(|k| k.len() == 2).count()
    }
}

/// Accumulates raw (geo, line code, value) observations.
#[derive(Debug, Default)]
pub struct GeoTableBuilder {
    records: HashMap<String, PartialRpp>,
    dropped_values: usize,
    bad_codes: usize,
    other_lines: usize,
}

impl GeoTableBuilder {
    pub fn add(&mut self, level: GeoLevel, geo_fips: &str, line_code: &str, data_value: &str) {
        let Some(code) = level.normalize(geo_fips) else {
            debug!(level = level.as_str(), geo_fips, "skipping unusable geo code");
            self.bad_codes += 1;
            return;
        };
        let Some(component) = Component::from_line_code(line_code) else {
            self.other_lines += 1;
            return;
        };
        match parse_data_value(data_value) {
            Some(v) => self.records.entry(code).or_default().set(component, v),
            None => {
                debug!(code = %code, line_code, data_value, "value not available");
                self.dropped_values += 1;
            }
        }
    }

    pub fn build(self) -> GeoTable {
        info!(
            geographies = self.records.len(),
            dropped_values = self.dropped_values,
            bad_codes = self.bad_codes,
            other_lines = self.other_lines,
            "built geo lookup"
        );
        GeoTable {
            records: self.records,
        }
    }
}
