use std::{error::Error, path::Path};

use clap::Parser;
use jiff::Timestamp;
use swiss_power::{db::prod_db::ProdDb, status::RunStatus};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Refit the load model on everything stored so far.  Run once a week.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let store = ProdDb::object_store()?;
    let conn = ProdDb::connect(&ProdDb::duckdb_path()?)?;
    let trainer = ProdDb::load_model_trainer();

    let model = trainer.train(&conn, &store, Timestamp::now())?;
    let status = RunStatus::ok(format!(
        "train_load_model: {} observations, R2 {:.4}, saved {}",
        model.n_observations,
        model.r_squared,
        model.key(&trainer.model_prefix)
    ));
    println!("{}", status.to_json());

    Ok(())
}
