//! optimize_dataset.rs
//!
//! Splits an existing `col_by_zip.json` into the artifacts the web client
//! loads: a bounded core subset, one shard per state, and the authored
//! prefix→state fallback table. The lookup file carries no provenance, so a
//! ZIP with a metro code counts as a metro ZIP for core priority.

use anyhow::Result;
use colzip::{
    config::Config,
    optimize::{self, CoreLimits},
    output, reference,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// ZIPs whose presence in the core subset is reported after the run.
const SPOT_CHECK: &[&str] = &["48505", "78701", "10001", "94102", "60601"];

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cfg = Config::local_from_env()?;
    let reference = reference::reference()?;

    let lookup = output::read_lookup(&cfg.lookup_path())?;
    let limits = CoreLimits::new(cfg.core_size, &reference.core);
    let set = optimize::build_artifacts(
        &lookup,
        |_, entry| entry.cbsa_code.is_some(),
        &limits,
        reference,
    );
    optimize::persist(&set, &cfg.output_dirs)?;

    for zip in SPOT_CHECK {
        match set.core.get(*zip) {
            Some(e) => info!(zip, rpp_all = e.rpp_all, "in core"),
            None => info!(zip, "needs state shard"),
        }
    }
    Ok(())
}
