use std::{env, path::PathBuf, time::Duration};

use duckdb::{AccessMode, Connection};
use jiff::{SignedDuration, Timestamp};

use crate::{
    error::ConfigError,
    model::{load_forecast::LoadForecaster, training::LoadModelTrainer},
    object_store::ObjectStore,
    utils::{lib_duckdb::open_with_retry, lib_http::HttpSession},
};

use super::{
    entsoe::energy_data_archive::EnergyDataArchive,
    openmeteo::{
        lib_openmeteo::CITIES, weather_archive::WeatherArchive,
        weather_forecast_archive::WeatherForecastArchive,
    },
};

/// Builds the archives from the environment.  Call `dotenvy` first.
pub struct ProdDb {}

impl ProdDb {
    fn var(name: &str) -> Result<String, ConfigError> {
        match env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            Ok(value) => Err(ConfigError::InvalidVar {
                name: name.to_string(),
                value,
            }),
            Err(_) => Err(ConfigError::MissingVar(name.to_string())),
        }
    }

    pub fn duckdb_path() -> Result<String, ConfigError> {
        ProdDb::var("DUCKDB_PATH")
    }

    /// Open the DuckDB file for the duration of a job.
    pub fn connect(duckdb_path: &str) -> Result<Connection, duckdb::Error> {
        open_with_retry(
            duckdb_path,
            8,
            Duration::from_millis(25),
            AccessMode::ReadWrite,
        )
    }

    pub fn object_store() -> Result<ObjectStore, ConfigError> {
        Ok(ObjectStore::new(ProdDb::var("ARCHIVE_DIR")?))
    }

    pub fn entsoe_api_key() -> Result<String, ConfigError> {
        ProdDb::var("ENTSOE_API_KEY")
    }

    /// One session per job, responses cached for an hour.
    pub fn http_session() -> HttpSession {
        let cache_dir = env::var("HTTP_CACHE_DIR").unwrap_or_else(|_| "/tmp/.cache".to_string());
        HttpSession::new()
            .with_cache(PathBuf::from(cache_dir), Duration::from_secs(3600))
            .with_retry(5, 0.2)
    }

    pub fn energy_data() -> Result<EnergyDataArchive, ConfigError> {
        Ok(EnergyDataArchive {
            duckdb_path: ProdDb::duckdb_path()?,
            start_of_history: Timestamp::constant(1_640_995_200, 0), // 2022-01-01T00:00Z
            chunk: SignedDuration::from_hours(24),
        })
    }

    pub fn weather() -> Result<WeatherArchive, ConfigError> {
        Ok(WeatherArchive {
            duckdb_path: ProdDb::duckdb_path()?,
            cities: CITIES.to_vec(),
            rolling_days: 3,
            archive_lag_days: 5,
            backfill_years: 3,
            backfill_prefix: "weather_backfill".to_string(),
        })
    }

    pub fn weather_forecast() -> Result<WeatherForecastArchive, ConfigError> {
        Ok(WeatherForecastArchive {
            duckdb_path: ProdDb::duckdb_path()?,
            cities: CITIES.to_vec(),
            forecast_days: 7,
        })
    }

    pub fn load_model_trainer() -> LoadModelTrainer {
        LoadModelTrainer {
            model_prefix: "modelling".to_string(),
        }
    }

    pub fn load_forecaster() -> LoadForecaster {
        LoadForecaster::default()
    }
}
