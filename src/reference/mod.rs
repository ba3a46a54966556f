// src/reference/mod.rs
//! Authored reference tables (state estimates, ZIP-prefix → state, core
//! priority prefixes). One embedded YAML document, parsed once per process.

use anyhow::{bail, Context, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::geo::Rpp;

const REFERENCE_YAML: &str = include_str!("reference.yaml");

static REFERENCE: OnceCell<Reference> = OnceCell::new();

#[derive(Debug, Deserialize)]
pub struct Reference {
    pub version: String,
    pub state_estimates: BTreeMap<String, Rpp>,
    pub zip_prefix_to_state: BTreeMap<String, String>,
    pub core: CorePriority,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CorePriority {
    pub metro_limit: usize,
    pub per_prefix: usize,
    pub prefixes: Vec<String>,
}

/// The shared reference tables.
pub fn reference() -> Result<&'static Reference> {
    REFERENCE.get_or_try_init(|| parse(REFERENCE_YAML))
}

fn parse(text: &str) -> Result<Reference> {
    let r: Reference = serde_yaml::from_str(text).context("parsing reference tables")?;

    for (prefix, state) in &r.zip_prefix_to_state {
        if prefix.is_empty() || prefix.len() > 2 || !prefix.chars().all(|c| c.is_ascii_digit()) {
            bail!("reference {}: bad ZIP prefix `{}`", r.version, prefix);
        }
        if !r.state_estimates.contains_key(state) {
            bail!(
                "reference {}: prefix {} maps to {} which has no estimate",
                r.version,
                prefix,
                state
            );
        }
    }
    if let Some(p) = r
        .core
        .prefixes
        .iter()
        .find(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        bail!("reference {}: bad priority prefix `{}`", r.version, p);
    }
    Ok(r)
}
