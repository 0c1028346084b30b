use std::time::Duration;

use duckdb::{types::Type, AccessMode, Config, Connection};
use jiff::{civil::Date, Timestamp};
use log::warn;

/// Use this function to open the DuckDB store for the duration of a job.
/// Another job holding the file lock makes the open fail, so back off and
/// try again.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> Result<Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        let config = Config::default().access_mode(same_mode(&access_mode))?;
        match Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!(
                    "Retrying to open {} after error: {} (attempt {}/{})",
                    duckdb_path, e, attempts, max_attempts
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}

/// `AccessMode` is not `Clone`, and `Config` takes it by value.
fn same_mode(mode: &AccessMode) -> AccessMode {
    match mode {
        AccessMode::Automatic => AccessMode::Automatic,
        AccessMode::ReadOnly => AccessMode::ReadOnly,
        AccessMode::ReadWrite => AccessMode::ReadWrite,
    }
}

/// Check if a table exists in the main schema.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, duckdb::Error> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        [table],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Parse a `DATE` column selected as `CAST(col AS VARCHAR)`.
pub fn parse_date(value: &str, idx: usize) -> Result<Date, duckdb::Error> {
    value
        .parse::<Date>()
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Convert a `TIMESTAMP` column selected as `epoch_us(col)`.
pub fn timestamp_from_micros(micros: i64, idx: usize) -> Result<Timestamp, duckdb::Error> {
    Timestamp::from_microsecond(micros)
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::BigInt, Box::new(e)))
}

/// Format a timestamp the way DuckDB casts text into a naive UTC `TIMESTAMP`.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.strftime("%Y-%m-%d %H:%M:%S").to_string()
}
