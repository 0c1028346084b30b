use std::collections::{HashMap, HashSet};

use duckdb::{types::Value, Connection};
use jiff::{SignedDuration, Timestamp};
use log::{info, warn};

use crate::{
    error::{FetchError, JobError},
    status::RunSummary,
    upsert::{upsert_batch, Column, Record, TableSchema},
    utils::lib_duckdb::{format_timestamp, table_exists, timestamp_from_micros},
};

use super::lib_entsoe::{GenerationPoint, LoadPoint, MarketSource, PricePoint};

pub const ENERGY_COLUMNS: [Column; 5] = [
    Column::new("timestamp", "TIMESTAMP NOT NULL"),
    Column::new("gen_type", "VARCHAR NOT NULL"),
    Column::new("quantity_mw", "DOUBLE"),
    Column::new("load_mw", "DOUBLE"),
    Column::new("price_eur_per_mwh", "DOUBLE"),
];

/// One production type at one instant, with the zone load and price of that
/// instant repeated on every production type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyRow {
    pub timestamp: Timestamp,
    pub gen_type: String,
    pub quantity_mw: f64,
    pub load_mw: Option<f64>,
    pub price_eur_per_mwh: Option<f64>,
}

impl Record for EnergyRow {
    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(format_timestamp(&self.timestamp)),
            Value::Text(self.gen_type.clone()),
            Value::Double(self.quantity_mw),
            self.load_mw.map_or(Value::Null, Value::Double),
            self.price_eur_per_mwh.map_or(Value::Null, Value::Double),
        ]
    }
}

/// What a range fetch returned.  Sub-ranges that failed are not in `rows`.
#[derive(Debug, Default)]
pub struct EnergyFetch {
    pub rows: Vec<EnergyRow>,
    /// (metric and chunk start, error message)
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct EnergyDataArchive {
    pub duckdb_path: String,
    /// Where an empty table starts from.
    pub start_of_history: Timestamp,
    /// Size of each request to the API.
    pub chunk: SignedDuration,
}

impl EnergyDataArchive {
    pub fn schema(&self) -> TableSchema {
        TableSchema::new("energy_data", &ENERGY_COLUMNS, &["timestamp", "gen_type"])
    }

    /// Fetch generation, load and prices for `[start, end)` one chunk at a
    /// time.  A metric that fails for a chunk is logged and left out, the
    /// other chunks and metrics are kept.
    pub fn fetch_range(
        &self,
        source: &impl MarketSource,
        start: Timestamp,
        end: Timestamp,
    ) -> EnergyFetch {
        let mut generation = Vec::new();
        let mut load = Vec::new();
        let mut prices = Vec::new();
        let mut failures = Vec::new();

        let mut chunk_start = start;
        while chunk_start < end {
            let chunk_end = match chunk_start.checked_add(self.chunk) {
                Ok(ts) if ts < end => ts,
                _ => end,
            };
            info!("Processing {} to {}", chunk_start, chunk_end);
            let mut failed = |metric: &str, e: FetchError| {
                warn!("{} error for {}: {}", metric, chunk_start, e);
                failures.push((format!("{} {}", metric, chunk_start), e.to_string()));
            };
            match source.generation(chunk_start, chunk_end) {
                Ok(xs) => generation.extend(xs),
                Err(e) => failed("generation", e),
            }
            match source.load(chunk_start, chunk_end) {
                Ok(xs) => load.extend(xs),
                Err(e) => failed("load", e),
            }
            match source.prices(chunk_start, chunk_end) {
                Ok(xs) => prices.extend(xs),
                Err(e) => failed("price", e),
            }
            chunk_start = chunk_end;
        }

        EnergyFetch {
            rows: merge_energy(generation, load, prices),
            failures,
        }
    }

    /// Insert or overwrite the fetched rows for `[start, end)`.
    pub fn backfill(
        &self,
        conn: &mut Connection,
        source: &impl MarketSource,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<RunSummary, JobError> {
        let schema = self.schema();
        schema.ensure(conn)?;
        let fetched = self.fetch_range(source, start, end);

        let mut summary = RunSummary::new();
        for (label, reason) in fetched.failures {
            summary.record_failure(label, reason);
        }
        if fetched.rows.is_empty() {
            info!("No generation data collected from {} to {}", start, end);
            return Ok(summary);
        }
        let outcome = upsert_batch(conn, &schema, &fetched.rows)?;
        summary.record(schema.name.clone(), outcome);
        Ok(summary)
    }

    /// Continue from the hour after the last stored timestamp up to the
    /// current hour.
    pub fn update_duckdb(
        &self,
        conn: &mut Connection,
        source: &impl MarketSource,
        now: Timestamp,
    ) -> Result<RunSummary, JobError> {
        let start = match last_timestamp(conn)? {
            Some(ts) => ts.checked_add(SignedDuration::from_hours(1))?,
            None => self.start_of_history,
        };
        let end = floor_hour(now)?;
        if start >= end {
            info!("energy_data is up to date, last hour {}", end);
            return Ok(RunSummary::new());
        }
        info!("Fetching energy data from {} to {}", start, end);
        self.backfill(conn, source, start, end)
    }
}

pub fn floor_hour(ts: Timestamp) -> Result<Timestamp, jiff::Error> {
    let seconds = ts.as_second();
    Timestamp::from_second(seconds - seconds.rem_euclid(3600))
}

/// Left join of generation with load and prices on the timestamp.  Exact
/// duplicates are dropped, rows are sorted by timestamp and production type.
pub fn merge_energy(
    generation: Vec<GenerationPoint>,
    load: Vec<LoadPoint>,
    prices: Vec<PricePoint>,
) -> Vec<EnergyRow> {
    let load: HashMap<Timestamp, f64> =
        load.into_iter().map(|p| (p.timestamp, p.load_mw)).collect();
    let prices: HashMap<Timestamp, f64> = prices
        .into_iter()
        .map(|p| (p.timestamp, p.price_eur_per_mwh))
        .collect();

    let mut seen = HashSet::new();
    let mut rows: Vec<EnergyRow> = generation
        .into_iter()
        .filter(|p| seen.insert((p.timestamp, p.gen_type.clone(), p.quantity_mw.to_bits())))
        .map(|p| EnergyRow {
            load_mw: load.get(&p.timestamp).copied(),
            price_eur_per_mwh: prices.get(&p.timestamp).copied(),
            timestamp: p.timestamp,
            gen_type: p.gen_type,
            quantity_mw: p.quantity_mw,
        })
        .collect();
    rows.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.gen_type.cmp(&b.gen_type))
    });
    rows
}

/// The most recent timestamp in `energy_data`, `None` if there is no data.
pub fn last_timestamp(conn: &Connection) -> Result<Option<Timestamp>, duckdb::Error> {
    if !table_exists(conn, "energy_data")? {
        return Ok(None);
    }
    let micros: Option<i64> = conn.query_row(
        "SELECT epoch_us(MAX(timestamp)) FROM energy_data",
        [],
        |row| row.get(0),
    )?;
    micros.map(|us| timestamp_from_micros(us, 0)).transpose()
}

/// Hourly load with `start <= timestamp <= end`, sorted.  The load is
/// repeated on every production type row so any one of them will do.
/// Quarter-hour points are ignored.
pub fn read_hourly_load(
    conn: &Connection,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
) -> Result<Vec<LoadPoint>, duckdb::Error> {
    if !table_exists(conn, "energy_data")? {
        return Ok(Vec::new());
    }
    let mut query = String::from(
        r#"
SELECT epoch_us(timestamp), MIN(load_mw)
FROM energy_data
WHERE load_mw IS NOT NULL
AND date_trunc('hour', timestamp) = timestamp"#,
    );
    if let Some(start) = start {
        query.push_str(&format!(
            "\nAND timestamp >= TIMESTAMP '{}'",
            format_timestamp(&start)
        ));
    }
    if let Some(end) = end {
        query.push_str(&format!(
            "\nAND timestamp <= TIMESTAMP '{}'",
            format_timestamp(&end)
        ));
    }
    query.push_str("\nGROUP BY timestamp\nORDER BY timestamp;");

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map([], |row| {
        Ok(LoadPoint {
            timestamp: timestamp_from_micros(row.get(0)?, 0)?,
            load_mw: row.get(1)?,
        })
    })?;
    rows.collect()
}
