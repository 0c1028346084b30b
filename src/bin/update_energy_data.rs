use std::{error::Error, path::Path};

use clap::Parser;
use jiff::Timestamp;
use log::info;
use swiss_power::db::{entsoe::lib_entsoe::EntsoeClient, prod_db::ProdDb};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Run this job every hour
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

    let summary = archive.update_duckdb(&mut conn, &client, Timestamp::now())?;
    info!("\n{}", summary.ascii_table());
    println!("{}", summary.to_status("update_energy_data").to_json());

    Ok(())
}
