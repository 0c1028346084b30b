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

/// Append the day after the last stored one, as soon as the archive has it.
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

    let summary = archive.update_next_day(&mut conn, &client, Zoned::now().date())?;
    info!("\n{}", summary.ascii_table());
    println!("{}", summary.to_status("update_weather_next_day").to_json());

    Ok(())
}
