use std::{error::Error, path::Path};

use clap::Parser;
use jiff::{civil::Date, tz::TimeZone};
use log::info;
use swiss_power::db::{entsoe::lib_entsoe::EntsoeClient, prod_db::ProdDb};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// First day to fetch (UTC), e.g. 2022-01-01
    #[arg(long)]
    start: Date,

    /// Day after the last day to fetch (UTC)
    #[arg(long)]
    end: Date,
}

/// Fetch an explicit range of ENTSO-E data and upsert it.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let archive = ProdDb::energy_data()?;
    let session = ProdDb::http_session();
    let client = EntsoeClient::new(&session, ProdDb::entsoe_api_key()?);
    let mut conn = ProdDb::connect(&archive.duckdb_path)?;

    let start = args.start.to_zoned(TimeZone::UTC)?.timestamp();
    let end = args.end.to_zoned(TimeZone::UTC)?.timestamp();
    info!("Backfilling energy_data from {} to {}", start, end);
    let summary = archive.backfill(&mut conn, &client, start, end)?;
    info!("\n{}", summary.ascii_table());
    println!("{}", summary.to_status("backfill_energy_data").to_json());

    Ok(())
}
