//! csv_to_json.rs
//!
//! Re-derives the structured lookup (`col_by_zip.json`) from the tabular
//! dataset (`data/col_by_zip.csv`) without touching the network. ZIPs are
//! re-padded to 5 digits, numbers rounded to 2 decimals, blank metro codes
//! become `null`. The file is written to every configured output root.

use anyhow::Result;
use colzip::{config::Config, optimize, output};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cfg = Config::local_from_env()?;

    let rows = output::read_csv(&cfg.csv_path())?;
    let lookup = output::csv_rows_to_lookup(&rows);
    optimize::persist_lookup(&lookup, &cfg.output_dirs)?;

    if let Some((zip, e)) = lookup.iter().next() {
        info!(zip = %zip, rpp_all = e.rpp_all, state = %e.state, "sample");
    }
    info!(zips = lookup.len(), "done");
    Ok(())
}
