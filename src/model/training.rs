use std::collections::HashMap;

use duckdb::Connection;
use jiff::{civil::Date, tz::TimeZone, SignedDuration, Timestamp, ToSpan};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    db::{
        entsoe::{energy_data_archive::read_hourly_load, lib_entsoe::LoadPoint},
        openmeteo::weather_table::{read_weather_rows, AGGREGATE_TABLE},
    },
    error::JobError,
    object_store::ObjectStore,
    transform::WeatherRow,
};

use super::{
    artifact::{ModelArtifact, ARTIFACT_VERSION},
    features::{feature_names, feature_row, LAG_168, LAG_24},
    ols,
};

/// Hours with a complete feature row and an observed load.
#[derive(Debug, Default)]
pub struct TrainingSet {
    pub timestamps: Vec<Timestamp>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
}

/// In-sample fit, written next to the model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedLoad {
    pub timestamp: Timestamp,
    pub load_mw: f64,
    pub predicted_load_mw: f64,
}

/// Join hourly load with the daily aggregated weather.  Lags are looked up
/// by timestamp, an hour is dropped if a lag or a weather value is missing.
pub fn training_set(load: &[LoadPoint], weather: &[WeatherRow]) -> TrainingSet {
    let by_hour: HashMap<Timestamp, f64> = load.iter().map(|p| (p.timestamp, p.load_mw)).collect();
    let by_date: HashMap<Date, &WeatherRow> = weather.iter().map(|w| (w.date, w)).collect();

    let mut set = TrainingSet::default();
    let mut dropped = 0;
    for point in load {
        let lag = |d: SignedDuration| {
            point
                .timestamp
                .checked_sub(d)
                .ok()
                .and_then(|t| by_hour.get(&t).copied())
        };
        let date = TimeZone::UTC.to_datetime(point.timestamp).date();
        let row = match (lag(LAG_24), lag(LAG_168), by_date.get(&date)) {
            (Some(lag24), Some(lag168), Some(w)) => feature_row(point.timestamp, lag24, lag168, w),
            _ => None,
        };
        match row {
            Some(x) => {
                set.timestamps.push(point.timestamp);
                set.x.push(x);
                set.y.push(point.load_mw);
            }
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        info!("Dropped {} hours with incomplete features", dropped);
    }
    set
}

#[derive(Debug, Clone)]
pub struct LoadModelTrainer {
    /// Object store prefix for artifacts and predictions.
    pub model_prefix: String,
}

impl LoadModelTrainer {
    /// Fit the model on all stored load and weather, save the in-sample
    /// predictions and the artifact.  Returns the artifact.
    pub fn train(
        &self,
        conn: &Connection,
        store: &ObjectStore,
        now: Timestamp,
    ) -> Result<ModelArtifact, JobError> {
        let load = read_hourly_load(conn, None, None)?;
        let weather = match (load.first(), load.last()) {
            (Some(first), Some(last)) => {
                let start = TimeZone::UTC.to_datetime(first.timestamp).date();
                let end = TimeZone::UTC.to_datetime(last.timestamp).date();
                read_weather_rows(conn, AGGREGATE_TABLE, start, end.checked_add(1.day())?)?
            }
            _ => Vec::new(),
        };
        if weather.is_empty() {
            warn!("No aggregated weather in {}", AGGREGATE_TABLE);
        }
        info!(
            "Training on {} hours of load and {} days of weather",
            load.len(),
            weather.len()
        );

        let set = training_set(&load, &weather);
        let fit = ols::fit(&set.x, &set.y)?;
        info!(
            "Fitted {} coefficients on {} observations, R2 {:.4}",
            fit.coefficients.len(),
            fit.n_observations,
            fit.r_squared
        );

        let model = ModelArtifact {
            version: ARTIFACT_VERSION,
            trained_at: now,
            features: feature_names(),
            coefficients: fit.coefficients,
            r_squared: fit.r_squared,
            n_observations: fit.n_observations,
        };
        let fitted: Vec<FittedLoad> = set
            .timestamps
            .iter()
            .zip(set.x.iter().zip(&set.y))
            .map(|(timestamp, (x, y))| FittedLoad {
                timestamp: *timestamp,
                load_mw: *y,
                predicted_load_mw: model.predict(x),
            })
            .collect();
        let key = format!(
            "{}/predictions_{}.csv",
            self.model_prefix,
            now.strftime("%Y%m%d_%H%M%S")
        );
        store.put_csv(&key, &fitted)?;
        info!("Saved {} in-sample predictions to {}", fitted.len(), key);

        model.save(store, &self.model_prefix)?;
        Ok(model)
    }
}
