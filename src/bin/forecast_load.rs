use std::{error::Error, path::Path};

use clap::Parser;
use jiff::Timestamp;
use log::info;
use swiss_power::db::prod_db::ProdDb;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Hourly load forecast for the days of the stored weather forecast.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let store = ProdDb::object_store()?;
    let mut conn = ProdDb::connect(&ProdDb::duckdb_path()?)?;

    let summary = ProdDb::load_forecaster().run(&mut conn, &store, Timestamp::now())?;
    info!("\n{}", summary.ascii_table());
    println!("{}", summary.to_status("forecast_load").to_json());

    Ok(())
}
