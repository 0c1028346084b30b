use std::{error::Error, path::Path};

use clap::Parser;
use jiff::Zoned;
use log::info;
use swiss_power::db::{openmeteo::lib_openmeteo::OpenMeteoClient, prod_db::ProdDb};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Refetch the last 3 days of weather for every city.  Run every day.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let archive = ProdDb::weather()?;
    let session = ProdDb::http_session();
    let client = OpenMeteoClient::new(&session);
    let mut conn = ProdDb::connect(&archive.duckdb_path)?;

    let today = Zoned::now().date();
    let summary = archive.update_duckdb(&mut conn, &client, today)?;
    info!("\n{}", summary.ascii_table());
    println!("{}", summary.to_status("update_weather_data").to_json());

    Ok(())
}
