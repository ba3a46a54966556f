//! rpp_line_codes.rs
//!
//! Lists the line codes (price-parity components) the metro and state RPP
//! tables publish, to check the component mapping the builder relies on.
//! With `--years`, lists the release years instead and reports the latest
//! one next to the configured `COLZIP_YEAR`. Needs `BEA_API_KEY`.

use anyhow::Result;
use colzip::{
    config::{Config, BEA_TIMEOUT},
    error::BuildError,
    fetch::bea::{latest_year, BeaClient, METRO_TABLE, STATE_TABLE},
    geo::Component,
};
use std::env;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let years = env::args().skip(1).any(|a| a == "--years");

    let cfg = Config::from_env()?;
    let key = cfg.api_key.ok_or(BuildError::MissingCredential)?;
    let bea = BeaClient::new(key, BEA_TIMEOUT)?;

    for table in [METRO_TABLE, STATE_TABLE] {
        println!("{}", table);
        if years {
            let values = bea.years(table).await?;
            for (year, desc) in &values {
                println!("  {: <6} {}", year, desc);
            }
            match latest_year(&values) {
                Some(latest) if latest > cfg.year => {
                    println!("  latest {} (configured {}: newer data available)", latest, cfg.year)
                }
                Some(latest) => println!("  latest {} (configured {})", latest, cfg.year),
                None => println!("  no numeric years published"),
            }
            continue;
        }
        for (code, desc) in bea.line_codes(table).await? {
            let mapped = Component::from_line_code(&code)
                .map(|c| format!("{:?}", c))
                .unwrap_or_else(|| "-".into());
            println!("  {: >3}  {: <8} {}", code, mapped, desc);
        }
    }
    Ok(())
}
