// src/optimize/mod.rs
//! Splits the full lookup into what the client loads up front (core subset
//! plus fallback table) and what it loads lazily (one shard per state).
//! Building the artifact set is pure; [`persist`] is the only writer.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::output::{
    write_json, write_lookup, Lookup, LookupEntry, CORE_FILE, FALLBACK_FILE, LOOKUP_FILE, STATES_DIR,
};
use crate::reference::{CorePriority, Reference};

/// Partition for ZIPs without a usable state.
pub const UNKNOWN_STATE: &str = "XX";

/// Compact client-side last resort: `{zip_to_state, state_rpp, version}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackTable {
    pub zip_to_state: BTreeMap<String, String>,
    pub state_rpp: BTreeMap<String, f64>,
    /// Version of the reference tables this was cut from.
    pub version: String,
}

impl FallbackTable {
    /// Authored data only; independent of any join output.
    pub fn from_reference(r: &Reference) -> Self {
        FallbackTable {
            zip_to_state: r.zip_prefix_to_state.clone(),
            state_rpp: r
                .state_estimates
                .iter()
                .map(|(state, rpp)| (state.clone(), rpp.all))
                .collect(),
            version: r.version.clone(),
        }
    }

    /// Client lookup: 2-digit prefix, then 1-digit, then the national average.
    #[cfg(test)]
    fn estimate(&self, zip: &str) -> f64 {
        [2usize, 1]
            .iter()
            .filter_map(|n| zip.get(..*n))
            .find_map(|p| self.zip_to_state.get(p))
            .and_then(|state| self.state_rpp.get(state))
            .copied()
            .unwrap_or(100.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CoreLimits {
    pub max_size: usize,
    pub metro_limit: usize,
    pub per_prefix: usize,
    pub prefixes: Vec<String>,
}

impl CoreLimits {
    pub fn new(max_size: usize, priority: &CorePriority) -> Self {
        CoreLimits {
            max_size,
            metro_limit: priority.metro_limit,
            per_prefix: priority.per_prefix,
            prefixes: priority.prefixes.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactSet {
    pub core: Lookup,
    pub states: BTreeMap<String, Lookup>,
    pub fallback: FallbackTable,
}

/// Pick the core ZIPs: metro ZIPs in lookup order (up to `metro_limit`),
/// then the first `per_prefix` ZIPs under each curated prefix; de-duplicated
/// and capped at `max_size`.
pub fn core_zips<F>(lookup: &Lookup, is_metro: F, limits: &CoreLimits) -> Vec<String>
where
    F: Fn(&str, &LookupEntry) -> bool,
{
    let metro = lookup
        .iter()
        .filter(|(zip, entry)| is_metro(zip, entry))
        .map(|(zip, _)| zip.as_str())
        .take(limits.metro_limit);
    let by_prefix = limits.prefixes.iter().flat_map(|prefix| {
        lookup
            .keys()
            .filter(move |zip| zip.starts_with(prefix.as_str()))
            .map(String::as_str)
            .take(limits.per_prefix)
    });

    let mut seen = HashSet::new();
    metro
        .chain(by_prefix)
        .filter(|zip| seen.insert(*zip))
        .take(limits.max_size)
        .map(str::to_string)
        .collect()
}

pub fn core_subset<F>(lookup: &Lookup, is_metro: F, limits: &CoreLimits) -> Lookup
where
    F: Fn(&str, &LookupEntry) -> bool,
{
    core_zips(lookup, is_metro, limits)
        .into_iter()
        .filter_map(|zip| lookup.get(&zip).map(|e| (zip, e.clone())))
        .collect()
}

fn partition_key(state: &str) -> String {
    let s = state.trim();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
        UNKNOWN_STATE.to_string()
    } else {
        s.to_ascii_uppercase()
    }
}

/// Every ZIP lands in exactly one shard: the one named by its own state.
pub fn state_shards(lookup: &Lookup) -> BTreeMap<String, Lookup> {
    let mut shards: BTreeMap<String, Lookup> = BTreeMap::new();
    for (zip, entry) in lookup {
        shards
            .entry(partition_key(&entry.state))
            .or_default()
            .insert(zip.clone(), entry.clone());
    }
    shards
}

pub fn build_artifacts<F>(
    lookup: &Lookup,
    is_metro: F,
    limits: &CoreLimits,
    reference: &Reference,
) -> ArtifactSet
where
    F: Fn(&str, &LookupEntry) -> bool,
{
    let core = core_subset(lookup, is_metro, limits);
    let states = state_shards(lookup);
    info!(
        zips = lookup.len(),
        core = core.len(),
        shards = states.len(),
        "built artifact set"
    );
    ArtifactSet {
        core,
        states,
        fallback: FallbackTable::from_reference(reference),
    }
}

/// Write the full lookup to every output root.
pub fn persist_lookup(lookup: &Lookup, roots: &[PathBuf]) -> Result<()> {
    for root in roots {
        write_lookup(&root.join(LOOKUP_FILE), lookup)?;
    }
    Ok(())
}

fn kb(path: &Path) -> f64 {
    fs::metadata(path).map(|m| m.len() as f64 / 1024.0).unwrap_or(0.0)
}

/// Write the artifact set to every output root.
pub fn persist(set: &ArtifactSet, roots: &[PathBuf]) -> Result<()> {
    for root in roots {
        let core_path = root.join(CORE_FILE);
        write_json(&core_path, &set.core)?;
        let fallback_path = root.join(FALLBACK_FILE);
        write_json(&fallback_path, &set.fallback)?;

        let shard_dir = root.join(STATES_DIR);
        let mut shard_kb = 0.0;
        for (state, shard) in &set.states {
            let path = shard_dir.join(format!("{}.json", state));
            write_json(&path, shard)?;
            shard_kb += kb(&path);
        }

        info!(
            root = %root.display(),
            core_kb = %format!("{:.1}", kb(&core_path)),
            fallback_kb = %format!("{:.1}", kb(&fallback_path)),
            shards = set.states.len(),
            shard_kb = %format!("{:.1}", shard_kb),
            "wrote optimized artifacts"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::read_json;
    use crate::reference::reference;
    use tempfile::tempdir;

    fn entry(state: &str, cbsa: Option<&str>, all: f64) -> LookupEntry {
        LookupEntry {
            rpp_all: all,
            rpp_housing: all,
            rpp_goods: all,
            rpp_other: all,
            state: state.into(),
            cbsa_code: cbsa.map(str::to_string),
        }
    }

    fn sample() -> Lookup {
        let mut l = Lookup::new();
        l.insert("10001".into(), entry("NY", Some("35620"), 125.6));
        l.insert("10002".into(), entry("NY", None, 125.0));
        l.insert("48505".into(), entry("MI", None, 89.5));
        l.insert("60601".into(), entry("IL", Some("16980"), 108.9));
        l.insert("78701".into(), entry("TX", Some("12420"), 95.8));
        l.insert("00601".into(), entry("", None, 100.0));
        l
    }

    fn limits(max: usize, metro: usize, per_prefix: usize, prefixes: &[&str]) -> CoreLimits {
        CoreLimits {
            max_size: max,
            metro_limit: metro,
            per_prefix,
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn has_cbsa(_: &str, e: &LookupEntry) -> bool {
        e.cbsa_code.is_some()
    }

    #[test]
    fn core_orders_metro_then_prefixes() {
        let l = sample();
        let zips = core_zips(&l, has_cbsa, &limits(10, 10, 10, &["100", "485"]));
        assert_eq!(zips, vec!["10001", "60601", "78701", "10002", "48505"]);
    }

    #[test]
    fn core_respects_every_cap() {
        let l = sample();
        assert_eq!(
            core_zips(&l, has_cbsa, &limits(10, 1, 1, &["100", "485"])),
            vec!["10001", "48505"]
        );
        assert_eq!(
            core_zips(&l, has_cbsa, &limits(2, 10, 10, &["100"])),
            vec!["10001", "60601"]
        );
        assert!(core_zips(&l, has_cbsa, &limits(0, 10, 10, &["100"])).is_empty());
    }

    #[test]
    fn core_is_deterministic() {
        let l = sample();
        let lim = limits(4, 2, 2, &["4", "0"]);
        assert_eq!(core_zips(&l, has_cbsa, &lim), core_zips(&l, has_cbsa, &lim));
    }

    #[test]
    fn shards_cover_everything_once() {
        let l = sample();
        let shards = state_shards(&l);
        assert_eq!(
            shards.keys().collect::<Vec<_>>(),
            vec!["IL", "MI", "NY", "TX", "XX"]
        );
        let total: usize = shards.values().map(|s| s.len()).sum();
        assert_eq!(total, l.len());
        for (state, shard) in &shards {
            for (zip, e) in shard {
                assert_eq!(&partition_key(&e.state), state, "{} misplaced", zip);
            }
        }

        let set = build_artifacts(&l, has_cbsa, &limits(1, 1, 0, &[]), reference().unwrap());
        let mut union: HashSet<&String> = set.core.keys().collect();
        union.extend(set.states.values().flat_map(|s| s.keys()));
        assert_eq!(union.len(), l.len());
    }

    #[test]
    fn fallback_comes_from_reference() -> Result<()> {
        let fb = FallbackTable::from_reference(reference()?);
        assert_eq!(fb.zip_to_state["48"], "MI");
        assert_eq!(fb.state_rpp["MI"], 89.5);
        assert_eq!(fb.state_rpp.len(), 51);
        assert_eq!(fb.version, reference()?.version);
        assert_eq!(fb.estimate("48505"), 89.5);
        assert_eq!(fb.estimate("94102"), 142.0);
        assert_eq!(fb.estimate(""), 100.0);
        Ok(())
    }

    #[test]
    fn persists_to_every_root() -> Result<()> {
        let dir = tempdir()?;
        let roots = vec![dir.path().join("public"), dir.path().join("src/data")];
        let l = sample();
        let set = build_artifacts(&l, has_cbsa, &limits(3, 3, 0, &[]), reference()?);
        persist_lookup(&l, &roots)?;
        persist(&set, &roots)?;

        for root in &roots {
            let core: Lookup = read_json(&root.join(CORE_FILE))?;
            assert_eq!(core.len(), 3);
            let mi: Lookup = read_json(&root.join(STATES_DIR).join("MI.json"))?;
            assert_eq!(mi["48505"].rpp_all, 89.5);
            assert!(root.join(STATES_DIR).join("XX.json").is_file());
            let fb: FallbackTable = read_json(&root.join(FALLBACK_FILE))?;
            assert_eq!(fb, set.fallback);
            let full: Lookup = read_json(&root.join(LOOKUP_FILE))?;
            assert_eq!(full, l);
        }
        let text = fs::read_to_string(roots[0].join(FALLBACK_FILE))?;
        assert!(text.starts_with(r#"{"zip_to_state":{"0":"MA","#));
        assert!(text.ends_with(r#","version":"2025.07.1"}"#));
        Ok(())
    }
}
