use std::{error::Error, path::Path};

use clap::Parser;
use log::info;
use swiss_power::db::prod_db::ProdDb;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Drop and rebuild the weather tables from the backfill exports.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let archive = ProdDb::weather()?;
    let store = ProdDb::object_store()?;
    let mut conn = ProdDb::connect(&archive.duckdb_path)?;

    let summary = archive.load_backfill_from_store(&mut conn, &store)?;
    info!("\n{}", summary.ascii_table());
    println!("{}", summary.to_status("load_weather_backfill").to_json());

    Ok(())
}
