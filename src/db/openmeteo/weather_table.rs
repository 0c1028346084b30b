use duckdb::{types::Value, Connection};
use jiff::civil::Date;

use crate::{
    transform::WeatherRow,
    upsert::{Column, Record, TableSchema},
    utils::lib_duckdb::{parse_date, table_exists},
};

use super::lib_openmeteo::City;

pub const WEATHER_COLUMNS: [Column; 10] = [
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
];

pub const AGGREGATE_TABLE: &str = "weather_swiss_aggr";

/// Table with the daily weather of one city, e.g. `weather_data_zurich`.
pub fn city_schema(city: &City) -> TableSchema {
    TableSchema::new(
        format!("weather_data_{}", city.sanitized_name()),
        &WEATHER_COLUMNS,
        &["date"],
    )
}

pub fn aggregate_schema() -> TableSchema {
    TableSchema::new(AGGREGATE_TABLE, &WEATHER_COLUMNS, &["date"])
}

fn double(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Double)
}

impl Record for WeatherRow {
    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.date.to_string()),
            double(self.temperature_2m_max),
            double(self.temperature_2m_min),
            double(self.temp_mean),
            double(self.temp_range),
            double(self.precipitation_sum),
            Value::Int(self.precip_flag),
            double(self.sunshine_duration),
            double(self.wind_speed_10m_max),
            double(self.daylight_duration),
        ]
    }
}

/// Read the rows of a weather table for dates in `[start, end)`, sorted by
/// date.  A table that doesn't exist yet has no rows.
pub fn read_weather_rows(
    conn: &Connection,
    table: &str,
    start: Date,
    end: Date,
) -> Result<Vec<WeatherRow>, duckdb::Error> {
    if !table_exists(conn, table)? {
        return Ok(Vec::new());
    }
    let query = format!(
        r#"
SELECT CAST(date AS VARCHAR), temperature_2m_max, temperature_2m_min, temp_mean, temp_range,
    precipitation_sum, precip_flag, sunshine_duration, wind_speed_10m_max, daylight_duration
FROM {}
WHERE date >= CAST(? AS DATE)
AND date < CAST(? AS DATE)
ORDER BY date;
"#,
        table
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map([start.to_string(), end.to_string()], |row| {
        Ok(WeatherRow {
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
        })
    })?;
    rows.collect()
}

/// The most recent date stored in a weather table, `None` if the table is
/// missing or empty.
pub fn last_stored_date(conn: &Connection, table: &str) -> Result<Option<Date>, duckdb::Error> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }
    let value: Option<String> = conn.query_row(
        &format!("SELECT CAST(MAX(date) AS VARCHAR) FROM {}", table),
        [],
        |row| row.get(0),
    )?;
    value.map(|v| parse_date(&v, 0)).transpose()
}
