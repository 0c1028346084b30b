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

/// Export three years of weather per city, and the cross-city aggregate,
/// to the object store.  Follow with load_weather_backfill.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let archive = ProdDb::weather()?;
    let store = ProdDb::object_store()?;
    let session = ProdDb::http_session();
    let client = OpenMeteoClient::new(&session);

    let summary = archive.backfill_to_store(&client, &store, Zoned::now().date())?;
    info!("\n{}", summary.ascii_table());
    println!("{}", summary.to_status("backfill_weather").to_json());

    Ok(())
}
