use std::collections::BTreeSet;

use duckdb::Connection;
use jiff::{civil::Date, ToSpan};
use log::{error, info, warn};

use crate::{
    aggregate::{aggregate_by_date, upsert_aggregate},
    error::{JobError, UpsertError},
    object_store::ObjectStore,
    status::RunSummary,
    transform::{transform, Imputation, WeatherRow},
    upsert::{upsert_batch, BatchOutcome, TableSchema},
};

use super::{
    lib_openmeteo::{City, DailyWeatherSource},
    weather_table::{aggregate_schema, city_schema, last_stored_date},
};

#[derive(Debug, Clone)]
pub struct WeatherArchive {
    pub duckdb_path: String,
    pub cities: Vec<City>,
    /// Days refetched on every daily run, ending yesterday.
    pub rolling_days: i32,
    /// The archive API only has data up to `today - archive_lag_days`.
    pub archive_lag_days: i32,
    pub backfill_years: i16,
    /// Object store prefix of the backfill exports.
    pub backfill_prefix: String,
}

impl WeatherArchive {
    pub fn city_schemas(&self) -> Vec<TableSchema> {
        self.cities.iter().map(city_schema).collect()
    }

    /// Key of the backfill export for a city, e.g.
    /// `weather_backfill/Zurich.csv.gz`.
    pub fn backfill_key(&self, city: &City) -> String {
        format!("{}/{}.csv.gz", self.backfill_prefix, city.name)
    }

    pub fn aggregated_backfill_key(&self) -> String {
        format!("{}/aggregated_weather.csv.gz", self.backfill_prefix)
    }

    fn fetch_rows(
        &self,
        source: &impl DailyWeatherSource,
        city: &City,
        start: Date,
        end: Date,
        policy: Imputation,
    ) -> Result<Vec<WeatherRow>, JobError> {
        let observations = source.archive(city, start, end)?;
        Ok(transform(observations, policy)?)
    }

    /// Fetch `[start, end)` for one city and upsert it.  Nothing is written
    /// if the fetch or the transform fails.  Returns the dates written.
    pub fn update_city(
        &self,
        conn: &mut Connection,
        source: &impl DailyWeatherSource,
        city: &City,
        start: Date,
        end: Date,
        policy: Imputation,
    ) -> Result<(BatchOutcome, Vec<Date>), JobError> {
        let rows = self.fetch_rows(source, city, start, end, policy)?;
        let schema = city_schema(city);
        schema.ensure(conn)?;
        let outcome = upsert_batch(conn, &schema, &rows)?;
        Ok((outcome, rows.into_iter().map(|row| row.date).collect()))
    }

    /// Refetch the last `rolling_days` days for every city, then recompute
    /// the aggregate for every date that was written.  A city that fails is
    /// logged and skipped.
    pub fn update_duckdb(
        &self,
        conn: &mut Connection,
        source: &impl DailyWeatherSource,
        today: Date,
    ) -> Result<RunSummary, JobError> {
        let start = today.checked_sub(self.rolling_days.days())?;
        let mut summary = RunSummary::new();
        let mut touched = BTreeSet::new();
        for city in &self.cities {
            match self.update_city(conn, source, city, start, today, Imputation::ColumnMean) {
                Ok((outcome, dates)) => {
                    summary.record(city_schema(city).name, outcome);
                    touched.extend(dates);
                }
                Err(e @ (JobError::Fetch(_) | JobError::Transform(_))) => {
                    warn!("Skipping {}: {}", city.name, e);
                    summary.record_failure(city.name, e);
                }
                Err(e) => return Err(e),
            }
        }

        let dates: Vec<Date> = touched.into_iter().collect();
        let target = aggregate_schema();
        let outcome = upsert_aggregate(conn, &self.city_schemas(), &target, &dates)?;
        info!(
            "Updated {} days across {} cities",
            dates.len(),
            self.cities.len()
        );
        summary.record(target.name, outcome);
        Ok(summary)
    }

    /// For every city with stored data, fetch the day after the last stored
    /// date if the archive already has it.  Cities without data are left to
    /// the backfill.
    pub fn update_next_day(
        &self,
        conn: &mut Connection,
        source: &impl DailyWeatherSource,
        today: Date,
    ) -> Result<RunSummary, JobError> {
        let last_available = today.checked_sub(self.archive_lag_days.days())?;
        let mut summary = RunSummary::new();
        let mut touched = BTreeSet::new();
        for city in &self.cities {
            let schema = city_schema(city);
            let Some(last_stored) = last_stored_date(conn, &schema.name)? else {
                info!("{}: no existing data, skipping daily update", city.name);
                continue;
            };
            let next = last_stored.checked_add(1.day())?;
            if next > last_available {
                info!(
                    "{}: up to date (last {}, archive to {})",
                    city.name, last_stored, last_available
                );
                continue;
            }
            let end = next.checked_add(1.day())?;
            match self.update_city(conn, source, city, next, end, Imputation::ColumnMean) {
                Ok((outcome, dates)) => {
                    info!("{}: inserted/updated {}", city.name, next);
                    summary.record(schema.name, outcome);
                    touched.extend(dates);
                }
                Err(e @ (JobError::Fetch(_) | JobError::Transform(_))) => {
                    warn!("Skipping {}: {}", city.name, e);
                    summary.record_failure(city.name, e);
                }
                Err(e) => return Err(e),
            }
        }

        let dates: Vec<Date> = touched.into_iter().collect();
        if !dates.is_empty() {
            let target = aggregate_schema();
            let outcome = upsert_aggregate(conn, &self.city_schemas(), &target, &dates)?;
            summary.record(target.name, outcome);
        }
        Ok(summary)
    }

    /// Fetch `backfill_years` of history for every city and export each
    /// city, and the cross-city aggregate, as a gzipped CSV file.
    pub fn backfill_to_store(
        &self,
        source: &impl DailyWeatherSource,
        store: &ObjectStore,
        today: Date,
    ) -> Result<RunSummary, JobError> {
        let start = today.checked_sub(self.backfill_years.years())?;
        let mut summary = RunSummary::new();
        let mut all_rows = Vec::new();
        for city in &self.cities {
            let rows = match self.fetch_rows(source, city, start, today, Imputation::LAST_5_DAYS) {
                Ok(rows) => rows,
                Err(e @ (JobError::Fetch(_) | JobError::Transform(_))) => {
                    warn!("Skipping {}: {}", city.name, e);
                    summary.record_failure(city.name, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let key = self.backfill_key(city);
            store.put_csv_gz(&key, &rows)?;
            info!("Uploaded {} with {} rows", key, rows.len());
            summary.record(
                key,
                BatchOutcome {
                    applied: rows.len(),
                    ..Default::default()
                },
            );
            all_rows.extend(rows);
        }

        if all_rows.is_empty() {
            warn!("No city could be fetched, not writing the aggregate");
            return Ok(summary);
        }
        let aggregated = aggregate_by_date(&all_rows);
        let key = self.aggregated_backfill_key();
        store.put_csv_gz(&key, &aggregated)?;
        info!("Uploaded {} with {} rows", key, aggregated.len());
        summary.record(
            key,
            BatchOutcome {
                applied: aggregated.len(),
                ..Default::default()
            },
        );
        Ok(summary)
    }

    /// Drop and rebuild the city tables and the aggregate table from the
    /// backfill exports, using DuckDB's CSV reader.  Each table is rebuilt in
    /// its own transaction: a missing or unreadable export leaves the table
    /// as it was.
    pub fn load_backfill_from_store(
        &self,
        conn: &mut Connection,
        store: &ObjectStore,
    ) -> Result<RunSummary, JobError> {
        let mut tables: Vec<(TableSchema, String)> = self
            .cities
            .iter()
            .map(|city| (city_schema(city), self.backfill_key(city)))
            .collect();
        tables.push((aggregate_schema(), self.aggregated_backfill_key()));

        let mut summary = RunSummary::new();
        for (schema, key) in tables {
            if !store.exists(&key) {
                warn!("{} not found, {} is left as is", key, schema.name);
                summary.record_failure(schema.name, format!("{} not found", key));
                continue;
            }
            let path = store.local_path(&key);
            let tx = conn.transaction()?;
            match copy_into(&tx, &schema, &path.to_string_lossy()) {
                Ok(n) => {
                    tx.commit()?;
                    info!("Loaded {} into {} ({} rows)", key, schema.name, n);
                    summary.record(
                        schema.name,
                        BatchOutcome {
                            applied: n,
                            ..Default::default()
                        },
                    );
                }
                Err(e) => {
                    tx.rollback()?;
                    error!("Failed to load {}, {} is left as is: {}", key, schema.name, e);
                    summary.record_failure(schema.name, e);
                }
            }
        }
        Ok(summary)
    }
}

/// Replace the content of a table with a CSV file with a header.  Returns the
/// new row count.
fn copy_into(conn: &Connection, schema: &TableSchema, path: &str) -> Result<usize, UpsertError> {
    schema.recreate(conn)?;
    conn.execute_batch(&format!(
        "COPY {} FROM '{}' (HEADER);",
        schema.name,
        path.replace('\'', "''")
    ))
    .map_err(|e| schema.db_error(e))?;
    schema.count(conn)
}
