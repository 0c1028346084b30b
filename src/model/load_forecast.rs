use std::collections::BTreeMap;

use duckdb::{types::Value, Connection};
use jiff::{tz::TimeZone, SignedDuration, Timestamp};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    db::{
        entsoe::{energy_data_archive::read_hourly_load, lib_entsoe::LoadPoint},
        openmeteo::weather_forecast_archive::read_forecast,
    },
    error::JobError,
    object_store::ObjectStore,
    status::RunSummary,
    transform::WeatherRow,
    upsert::{upsert_batch, Column, Record, TableSchema},
    utils::lib_duckdb::format_timestamp,
};

use super::{
    artifact::ModelArtifact,
    features::{feature_row, LAG_168, LAG_24},
};

pub const FORECAST_LOAD_COLUMNS: [Column; 2] = [
    Column::new("timestamp", "TIMESTAMP NOT NULL"),
    Column::new("predicted_load_mw", "DOUBLE"),
];

pub const FORECAST_LOAD_TABLE: &str = "energy_forecast";

const HOUR: SignedDuration = SignedDuration::from_hours(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: Timestamp,
    pub predicted_load_mw: f64,
}

impl Record for ForecastPoint {
    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(format_timestamp(&self.timestamp)),
            Value::Double(self.predicted_load_mw),
        ]
    }
}

pub fn forecast_schema() -> TableSchema {
    TableSchema::new(FORECAST_LOAD_TABLE, &FORECAST_LOAD_COLUMNS, &["timestamp"])
}

/// Put the points on an hourly grid `[start, end]`.  Gaps of up to `limit`
/// hours are interpolated linearly, longer gaps get the first `limit` hours
/// interpolated.  Whatever is left is filled forward, then backward.
/// Returns an empty map if there are no points in the window.
pub fn fill_gaps(
    points: &[LoadPoint],
    start: Timestamp,
    end: Timestamp,
    limit: usize,
) -> BTreeMap<Timestamp, f64> {
    let known: BTreeMap<Timestamp, f64> = points
        .iter()
        .filter(|p| p.timestamp >= start && p.timestamp <= end)
        .map(|p| (p.timestamp, p.load_mw))
        .collect();
    if known.is_empty() {
        return BTreeMap::new();
    }

    let mut grid = Vec::new();
    let mut t = start;
    while t <= end {
        grid.push(t);
        t = match t.checked_add(HOUR) {
            Ok(next) => next,
            Err(_) => break,
        };
    }
    let mut values: Vec<Option<f64>> = grid.iter().map(|t| known.get(t).copied()).collect();

    // linear interpolation between known neighbours, from the left
    let mut last_known: Option<usize> = None;
    for i in 0..values.len() {
        if values[i].is_none() {
            continue;
        }
        if let Some(k) = last_known {
            if i > k + 1 {
                let (a, b) = (values[k].unwrap_or_default(), values[i].unwrap_or_default());
                let width = (i - k) as f64;
                for (step, j) in (k + 1..i).take(limit).enumerate() {
                    values[j] = Some(a + (b - a) * (step + 1) as f64 / width);
                }
            }
        }
        last_known = Some(i);
    }
    // trailing hours past the last point
    if let Some(k) = last_known {
        let last = values[k];
        for v in values.iter_mut().skip(k + 1).take(limit) {
            *v = last;
        }
    }

    let mut previous = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => previous = Some(*x),
            None => *v = previous,
        }
    }
    let mut next = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }

    grid.into_iter()
        .zip(values)
        .filter_map(|(t, v)| v.map(|x| (t, x)))
        .collect()
}

/// 24 hourly timestamps (UTC) for every forecast day, each paired with the
/// weather of its day.
pub fn hourly_skeleton(days: &[WeatherRow]) -> Result<Vec<(Timestamp, WeatherRow)>, jiff::Error> {
    let mut out = Vec::with_capacity(24 * days.len());
    for day in days {
        let midnight = day.date.to_zoned(TimeZone::UTC)?.timestamp();
        for h in 0..24 {
            out.push((midnight.checked_add(SignedDuration::from_hours(h))?, day.clone()));
        }
    }
    out.sort_by_key(|(t, _)| *t);
    Ok(out)
}

/// Predict the hours in order.  The lags of an hour come from earlier
/// predictions first, then from the history.  An hour with a missing lag or
/// missing weather is skipped and is not available as a lag later on.
pub fn forecast_walk(
    model: &ModelArtifact,
    history: &BTreeMap<Timestamp, f64>,
    hours: &[(Timestamp, WeatherRow)],
) -> Vec<ForecastPoint> {
    let mut predicted: BTreeMap<Timestamp, f64> = BTreeMap::new();
    for (timestamp, weather) in hours {
        let lag = |d: SignedDuration| -> Option<f64> {
            let t = timestamp.checked_sub(d).ok()?;
            predicted.get(&t).or_else(|| history.get(&t)).copied()
        };
        let (lag24, lag168) = match (lag(LAG_24), lag(LAG_168)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                debug!("Skipping {}, no lagged load", timestamp);
                continue;
            }
        };
        let Some(x) = feature_row(*timestamp, lag24, lag168, weather) else {
            debug!("Skipping {}, incomplete weather", timestamp);
            continue;
        };
        predicted.insert(*timestamp, model.predict(&x));
    }
    predicted
        .into_iter()
        .map(|(timestamp, predicted_load_mw)| ForecastPoint {
            timestamp,
            predicted_load_mw,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct LoadForecaster {
    /// Object store prefix for artifacts and forecasts.
    pub model_prefix: String,
    /// Days of load history used for the lags.
    pub history_days: i64,
    /// Longest gap in the history that is interpolated.
    pub interpolation_limit: usize,
}

impl Default for LoadForecaster {
    fn default() -> Self {
        LoadForecaster {
            model_prefix: "modelling".to_string(),
            history_days: 8,
            interpolation_limit: 3,
        }
    }
}

impl LoadForecaster {
    /// The last `history_days` of hourly load up to the most recent hour,
    /// with gaps filled.
    pub fn history(&self, conn: &Connection) -> Result<BTreeMap<Timestamp, f64>, JobError> {
        let window = SignedDuration::from_hours(24 * self.history_days);
        let load = read_hourly_load(conn, None, None)?;
        let Some(end) = load.last().map(|p| p.timestamp) else {
            warn!("No load history, every lag will be missing");
            return Ok(BTreeMap::new());
        };
        let start = end.checked_sub(window)?;
        Ok(fill_gaps(&load, start, end, self.interpolation_limit))
    }

    /// Forecast the hourly load for the days of the stored weather forecast
    /// with the latest model.  Writes a CSV to the object store and upserts
    /// into `energy_forecast`.
    pub fn run(
        &self,
        conn: &mut Connection,
        store: &ObjectStore,
        now: Timestamp,
    ) -> Result<RunSummary, JobError> {
        let model = ModelArtifact::load_latest(store, &self.model_prefix)?;
        let history = self.history(conn)?;
        let days: Vec<WeatherRow> = read_forecast(conn)?.into_iter().map(|r| r.weather).collect();
        if days.is_empty() {
            warn!("No weather forecast stored, nothing to predict");
        }
        let hours = hourly_skeleton(&days)?;
        let points = forecast_walk(&model, &history, &hours);
        info!(
            "Predicted {} of {} forecast hours",
            points.len(),
            hours.len()
        );

        let mut summary = RunSummary::new();
        let skipped = hours.len() - points.len();
        if skipped > 0 {
            summary.record_failure(
                "forecast hours",
                format!("{} of {} hours without lags or weather", skipped, hours.len()),
            );
        }
        if points.is_empty() {
            return Ok(summary);
        }

        let key = format!(
            "{}/forecast_predictions_{}.csv",
            self.model_prefix,
            now.strftime("%Y%m%d_%H%M%S")
        );
        store.put_csv(&key, &points)?;
        info!("Saved forecast to {}", key);

        let schema = forecast_schema();
        schema.ensure(conn)?;
        let outcome = upsert_batch(conn, &schema, &points)?;
        summary.record(schema.name.clone(), outcome);
        Ok(summary)
    }
}
