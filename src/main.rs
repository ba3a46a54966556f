use anyhow::Result;
use colzip::{
    config::{Config, RppSource, BEA_TIMEOUT, CROSSWALK_TIMEOUT},
    crosswalk::{dedupe, load_crosswalk_archive},
    fetch::{self, bea::BeaClient},
    geo::GeoTable,
    join::{join, Provenance},
    optimize::{self, CoreLimits},
    output, reference,
};
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");
    let start = Instant::now();

    // ─── 2) config (credential is checked before any network call) ──
    let cfg = Config::from_env()?;
    let reference = reference::reference()?;
    info!(source = ?cfg.rpp_source, year = cfg.year, reference = %reference.version, "configured");

    // ─── 3) price parities by geography ──────────────────────────────
    let geo = match (&cfg.rpp_source, &cfg.api_key) {
        (RppSource::Bea, Some(key)) => {
            let bea = BeaClient::new(key.clone(), BEA_TIMEOUT)?;
            fetch::bea::fetch_geo_table(&bea, cfg.year).await?
        }
        _ => GeoTable::from_state_estimates(&reference.state_estimates),
    };
    info!(
        metros = geo.metro_count(),
        states = geo.state_count(),
        "geo lookup ready"
    );

    // ─── 4) crosswalk ────────────────────────────────────────────────
    let client = fetch::http_client(CROSSWALK_TIMEOUT)?;
    let archive = fetch::zips::download_cached(&client, &cfg.crosswalk_url, &cfg.cache_dir).await?;
    let rows = tokio::task::spawn_blocking(move || load_crosswalk_archive(archive)).await??;
    let zips = dedupe(rows.rows);

    // ─── 5) join ─────────────────────────────────────────────────────
    let joined = join(&zips, &geo);
    info!("{}", joined.summary);

    // ─── 6) write full dataset ───────────────────────────────────────
    output::write_csv(&cfg.csv_path(), &joined.records)?;
    let lookup = output::to_lookup(&joined.records);
    optimize::persist_lookup(&lookup, &cfg.output_dirs)?;

    // ─── 7) optimized artifacts ──────────────────────────────────────
    let metro: HashSet<&str> = joined
        .records
        .iter()
        .filter(|r| r.provenance == Provenance::MetroMatched)
        .map(|r| r.zip.as_str())
        .collect();
    let limits = CoreLimits::new(cfg.core_size, &reference.core);
    let set = optimize::build_artifacts(&lookup, |zip, _| metro.contains(zip), &limits, reference);
    optimize::persist(&set, &cfg.output_dirs)?;

    info!(zips = lookup.len(), elapsed = ?start.elapsed(), "all done");
    Ok(())
}
