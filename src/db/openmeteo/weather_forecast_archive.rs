use duckdb::{types::Value, Connection};
use jiff::civil::Date;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::aggregate_by_date,
    error::JobError,
    status::RunSummary,
    transform::{transform, Imputation, WeatherRow},
    upsert::{replace_batch, Column, Record, TableSchema},
    utils::lib_duckdb::{parse_date, table_exists},
};

use super::lib_openmeteo::{City, DailyWeatherSource};

pub const FORECAST_COLUMNS: [Column; 11] = [
    Column::new("date", "DATE NOT NULL"),
    Column::new("temperature_2m_max", "DOUBLE"),
    Column::new("temperature_2m_min", "DOUBLE"),
    Column::new("temp_mean", "DOUBLE"),
    Column::new("temp_range", "DOUBLE"),
    Column::new("precipitation_sum", "DOUBLE"),
    Column::new("precip_flag", "INTEGER"),
    Column::new("sunshine_duration", "DOUBLE"),
    Column::new("wind_speed_10m_max", "DOUBLE"),
    Column::new("daylight_duration", "DOUBLE"),
    Column::new("days_ahead", "INTEGER"),
];

pub const FORECAST_TABLE: &str = "weather_swiss_forecast_agg";

/// Cross-city forecast for one day, `days_ahead` counted from the day the
/// forecast was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherForecastRow {
    #[serde(flatten)]
    pub weather: WeatherRow,
    pub days_ahead: i32,
}

impl Record for WeatherForecastRow {
    fn values(&self) -> Vec<Value> {
        let mut values = self.weather.values();
        values.push(Value::Int(self.days_ahead));
        values
    }
}

#[derive(Debug, Clone)]
pub struct WeatherForecastArchive {
    pub duckdb_path: String,
    pub cities: Vec<City>,
    pub forecast_days: i32,
}

impl WeatherForecastArchive {
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(FORECAST_TABLE, &FORECAST_COLUMNS, &["date"])
    }

    /// Fetch the forecast of every city and reduce it to one row per date.
    /// Cities that fail are logged and left out of the mean.
    pub fn fetch_aggregated(
        &self,
        source: &impl DailyWeatherSource,
        today: Date,
        summary: &mut RunSummary,
    ) -> Result<Vec<WeatherForecastRow>, JobError> {
        let mut rows = Vec::new();
        for city in &self.cities {
            let observations = match source.forecast(city, self.forecast_days) {
                Ok(xs) => xs,
                Err(e) => {
                    warn!("Skipping forecast for {}: {}", city.name, e);
                    summary.record_failure(city.name, e);
                    continue;
                }
            };
            match transform(observations, Imputation::ColumnMean) {
                Ok(xs) => rows.extend(xs),
                Err(e) => {
                    warn!("Skipping forecast for {}: {}", city.name, e);
                    summary.record_failure(city.name, e);
                }
            }
        }
        aggregate_by_date(&rows)
            .into_iter()
            .map(|weather| -> Result<WeatherForecastRow, JobError> {
                let days_ahead = today.until(weather.date)?.get_days();
                Ok(WeatherForecastRow {
                    weather,
                    days_ahead,
                })
            })
            .collect()
    }

    /// Replace the content of the forecast table with a fresh forecast, in
    /// one transaction.  The table is kept as is if no city could be fetched.
    pub fn update_duckdb(
        &self,
        conn: &mut Connection,
        source: &impl DailyWeatherSource,
        today: Date,
    ) -> Result<RunSummary, JobError> {
        let mut summary = RunSummary::new();
        let rows = self.fetch_aggregated(source, today, &mut summary)?;
        if rows.is_empty() {
            warn!("No forecast rows, {} is left as is", FORECAST_TABLE);
            return Ok(summary);
        }
        let schema = self.schema();
        let outcome = replace_batch(conn, &schema, &rows)?;
        info!("Stored {} forecast rows in {}", rows.len(), FORECAST_TABLE);
        summary.record(schema.name, outcome);
        Ok(summary)
    }
}

/// Forecast rows with `0 <= days_ahead <= 7`, sorted by date.
pub fn read_forecast(conn: &Connection) -> Result<Vec<WeatherForecastRow>, duckdb::Error> {
    if !table_exists(conn, FORECAST_TABLE)? {
        return Ok(Vec::new());
    }
    let query = format!(
        r#"
SELECT CAST(date AS VARCHAR), temperature_2m_max, temperature_2m_min, temp_mean, temp_range,
    precipitation_sum, precip_flag, sunshine_duration, wind_speed_10m_max, daylight_duration,
    days_ahead
FROM {}
WHERE days_ahead BETWEEN 0 AND 7
ORDER BY date;
"#,
        FORECAST_TABLE
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map([], |row| {
        Ok(WeatherForecastRow {
            weather: WeatherRow {
                date: parse_date(&row.get::<usize, String>(0)?, 0)?,
                temperature_2m_max: row.get(1)?,
                temperature_2m_min: row.get(2)?,
                temp_mean: row.get(3)?,
                temp_range: row.get(4)?,
                precipitation_sum: row.get(5)?,
                precip_flag: row.get::<usize, Option<i32>>(6)?.unwrap_or(0),
                sunshine_duration: row.get(7)?,
                wind_speed_10m_max: row.get(8)?,
                daylight_duration: row.get(9)?,
            },
            days_ahead: row.get(10)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use crate::db::openmeteo::{lib_openmeteo::CITIES, weather_archive::tests::StubWeather};

    use super::*;

    fn archive() -> WeatherForecastArchive {
        WeatherForecastArchive {
            duckdb_path: String::new(),
            cities: CITIES.to_vec(),
            forecast_days: 7,
        }
    }

    #[test]
    fn forecast_table_is_rebuilt() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let archive = archive();
        let today = date(2025, 6, 10);
        let source = StubWeather::new(today);

        let summary = archive.update_duckdb(&mut conn, &source, today)?;
        assert!(summary.is_clean());
        let xs = read_forecast(&conn)?;
        assert_eq!(xs.len(), 7);
        assert_eq!(xs[0].days_ahead, 0);
        assert_eq!(xs[6].days_ahead, 6);
        assert_eq!(xs[6].weather.date, date(2025, 6, 16));

        // a new forecast replaces the old one
        let source = StubWeather::new(date(2025, 6, 11));
        archive.update_duckdb(&mut conn, &source, date(2025, 6, 11))?;
        let xs = read_forecast(&conn)?;
        assert_eq!(xs.len(), 7);
        assert_eq!(xs[0].weather.date, date(2025, 6, 11));
        Ok(())
    }

    #[test]
    fn failing_cities_are_left_out() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let archive = WeatherForecastArchive {
            cities: CITIES[..2].to_vec(),
            ..archive()
        };
        let today = date(2025, 6, 10);
        let mut source = StubWeather::new(today);
        source.failing_city = Some("Geneva");

        let summary = archive.update_duckdb(&mut conn, &source, today)?;
        assert_eq!(summary.failed_sources.len(), 1);
        let xs = read_forecast(&conn)?;
        // Zurich only
        assert_eq!(xs[0].weather.temperature_2m_max, Some(19.0));
        Ok(())
    }
}
