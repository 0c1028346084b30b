use std::collections::HashMap;

use duckdb::{params_from_iter, types::Value, Connection};
use itertools::Itertools;
use log::{info, warn};

use crate::error::UpsertError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
}

impl Column {
    pub const fn new(name: &'static str, sql_type: &'static str) -> Column {
        Column { name, sql_type }
    }
}

/// A destination table with a fixed column order and a unique key.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: &'static [Column],
    pub key: &'static [&'static str],
}

impl TableSchema {
    pub fn new(
        name: impl Into<String>,
        columns: &'static [Column],
        key: &'static [&'static str],
    ) -> TableSchema {
        TableSchema {
            name: name.into(),
            columns,
            key,
        }
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {},\n    PRIMARY KEY ({})\n);",
            self.name,
            self.columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.sql_type))
                .join(",\n    "),
            self.key.iter().join(", "),
        )
    }

    /// Insert-or-replace: on a key conflict every non-key column is
    /// overwritten with the incoming value.
    pub fn upsert_sql(&self) -> String {
        let updates = self
            .columns
            .iter()
            .filter(|c| !self.key.contains(&c.name))
            .map(|c| format!("{} = EXCLUDED.{}", c.name, c.name))
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO {};",
            self.name,
            self.column_names().iter().join(", "),
            self.columns.iter().map(|_| "?").join(", "),
            self.key.iter().join(", "),
            if updates.is_empty() {
                "NOTHING".to_string()
            } else {
                format!("UPDATE SET {}", updates)
            }
        )
    }

    /// Create the table if it doesn't exist.
    pub fn ensure(&self, conn: &Connection) -> Result<(), UpsertError> {
        conn.execute_batch(&self.create_sql())
            .map_err(|e| self.db_error(e))
    }

    pub fn recreate_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {};\n{}", self.name, self.create_sql())
    }

    /// Drop and rebuild the table, used for full reloads.  Run it inside the
    /// transaction that refills the table.
    pub fn recreate(&self, conn: &Connection) -> Result<(), UpsertError> {
        conn.execute_batch(&self.recreate_sql())
            .map_err(|e| self.db_error(e))
    }

    pub fn count(&self, conn: &Connection) -> Result<usize, UpsertError> {
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.name), [], |row| {
                row.get(0)
            })
            .map_err(|e| self.db_error(e))?;
        Ok(n as usize)
    }

    pub(crate) fn db_error(&self, source: duckdb::Error) -> UpsertError {
        UpsertError::Database {
            table: self.name.clone(),
            source,
        }
    }

    fn key_positions(&self) -> Vec<usize> {
        self.columns
            .iter()
            .positions(|c| self.key.contains(&c.name))
            .collect()
    }
}

/// A row that can be written to a table, values in table column order.
pub trait Record {
    fn values(&self) -> Vec<Value>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    pub key: String,
    pub reason: String,
}

/// Result of applying one batch.  A batch with failed rows is still
/// committed, callers decide whether that is acceptable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// rows inserted or overwritten
    pub applied: usize,
    /// rows superseded by a later row with the same key in the same batch
    pub skipped: usize,
    pub failed: Vec<RowFailure>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }
}

/// Upsert a batch of rows inside a single transaction.
///
/// Rows with a null key or a non-finite number never reach the database,
/// they are logged and reported in [`BatchOutcome::failed`].  When the same
/// key shows up more than once the last row wins.  A row the database
/// rejects is reported as failed too: the transaction is rolled back and
/// replayed without it, so the batch is still committed once.
pub fn upsert_batch<R: Record>(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[R],
) -> Result<BatchOutcome, UpsertError> {
    write_batch(conn, schema, rows, false)
}

/// Like [`upsert_batch`] but the table is dropped and rebuilt in the same
/// transaction, so the old content survives if nothing can be written.
pub fn replace_batch<R: Record>(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[R],
) -> Result<BatchOutcome, UpsertError> {
    write_batch(conn, schema, rows, true)
}

fn write_batch<R: Record>(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[R],
    rebuild: bool,
) -> Result<BatchOutcome, UpsertError> {
    let mut outcome = BatchOutcome::default();
    let key_positions = schema.key_positions();

    let mut pending: Vec<Option<(String, Vec<Value>)>> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let values = row.values();
        if values.len() != schema.columns.len() {
            return Err(UpsertError::Arity {
                table: schema.name.clone(),
                expected: schema.columns.len(),
                found: values.len(),
            });
        }
        let key = key_positions.iter().map(|&i| render(&values[i])).join("|");
        if let Some(reason) = invalid_reason(schema, &values, &key_positions) {
            warn!("Skipping row {} for table {}: {}", key, schema.name, reason);
            outcome.failed.push(RowFailure { key, reason });
            continue;
        }
        if let Some(previous) = seen.insert(key.clone(), pending.len()) {
            pending[previous] = None;
            outcome.skipped += 1;
        }
        pending.push(Some((key, values)));
    }
    let mut pending: Vec<(String, Vec<Value>)> = pending.into_iter().flatten().collect();

    loop {
        if rebuild && pending.is_empty() {
            warn!("No valid rows, {} is left as is", schema.name);
            return Ok(outcome);
        }
        let Some((i, e)) = apply_rows(conn, schema, &pending, rebuild)? else {
            break;
        };
        let (key, _) = pending.remove(i);
        warn!("Row {} rejected by table {}: {}", key, schema.name, e);
        outcome.failed.push(RowFailure {
            key,
            reason: e.to_string(),
        });
    }
    outcome.applied += pending.len();

    info!(
        "{} rows upserted into {}, {} skipped, {} failed",
        outcome.applied,
        schema.name,
        outcome.skipped,
        outcome.failed.len()
    );
    Ok(outcome)
}

/// Execute every row in one transaction and commit, rebuilding the table
/// first if asked.  If the database rejects
/// a row, roll back and return its position with the error.
fn apply_rows(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[(String, Vec<Value>)],
    rebuild: bool,
) -> Result<Option<(usize, duckdb::Error)>, UpsertError> {
    let tx = conn.transaction().map_err(|e| schema.db_error(e))?;
    if rebuild {
        schema.recreate(&tx)?;
    }
    let rejected = {
        let mut stmt = tx
            .prepare(&schema.upsert_sql())
            .map_err(|e| schema.db_error(e))?;
        rows.iter().enumerate().find_map(|(i, (_, values))| {
            stmt.execute(params_from_iter(values.clone()))
                .err()
                .map(|e| (i, e))
        })
    };
    match rejected {
        Some(rejected) => {
            tx.rollback().map_err(|e| schema.db_error(e))?;
            Ok(Some(rejected))
        }
        None => {
            tx.commit().map_err(|e| schema.db_error(e))?;
            Ok(None)
        }
    }
}

fn invalid_reason(schema: &TableSchema, values: &[Value], key_positions: &[usize]) -> Option<String> {
    for &i in key_positions {
        if values[i] == Value::Null {
            return Some(format!("key column {} is null", schema.columns[i].name));
        }
    }
    for (column, value) in schema.columns.iter().zip(values) {
        match value {
            Value::Double(v) if !v.is_finite() => {
                return Some(format!("column {} is not finite ({})", column.name, v))
            }
            _ => {}
        }
    }
    None
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Text(s) => s.clone(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    const COLUMNS: [Column; 3] = [
        Column::new("date", "DATE NOT NULL"),
        Column::new("city", "VARCHAR NOT NULL"),
        Column::new("temp_mean", "DOUBLE"),
    ];

    struct Obs {
        date: Option<&'static str>,
        city: &'static str,
        temp_mean: Option<f64>,
    }

    impl Record for Obs {
        fn values(&self) -> Vec<Value> {
            vec![
                self.date.map_or(Value::Null, |d| Value::Text(d.to_string())),
                Value::Text(self.city.to_string()),
                self.temp_mean.map_or(Value::Null, Value::Double),
            ]
        }
    }

    fn obs(date: &'static str, city: &'static str, temp_mean: f64) -> Obs {
        Obs {
            date: Some(date),
            city,
            temp_mean: Some(temp_mean),
        }
    }

    fn schema() -> TableSchema {
        TableSchema::new("obs", &COLUMNS, &["date", "city"])
    }

    fn read_all(conn: &Connection) -> Result<Vec<(String, String, Option<f64>)>, Box<dyn Error>> {
        let mut stmt = conn.prepare(
            "SELECT CAST(date AS VARCHAR), city, temp_mean FROM obs ORDER BY date, city",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[test]
    fn sql_statements() {
        let schema = schema();
        assert_eq!(
            schema.upsert_sql(),
            "INSERT INTO obs (date, city, temp_mean) VALUES (?, ?, ?) \
             ON CONFLICT (date, city) DO UPDATE SET temp_mean = EXCLUDED.temp_mean;"
        );
        assert!(schema.create_sql().contains("PRIMARY KEY (date, city)"));
    }

    #[test]
    fn upsert_is_idempotent() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let schema = schema();
        schema.ensure(&conn)?;
        let batch = vec![
            obs("2025-01-01", "Zurich", 1.5),
            obs("2025-01-01", "Bern", 0.5),
            obs("2025-01-02", "Zurich", 2.5),
        ];
        let first = upsert_batch(&mut conn, &schema, &batch)?;
        let after_first = read_all(&conn)?;
        let second = upsert_batch(&mut conn, &schema, &batch)?;
        let after_second = read_all(&conn)?;

        assert_eq!(first.applied, 3);
        assert_eq!(second.applied, 3);
        assert_eq!(schema.count(&conn)?, 3);
        assert_eq!(after_first, after_second);
        Ok(())
    }

    #[test]
    fn last_write_wins() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let schema = schema();
        schema.ensure(&conn)?;
        upsert_batch(&mut conn, &schema, &[obs("2025-01-01", "Zurich", 1.5)])?;
        upsert_batch(&mut conn, &schema, &[obs("2025-01-01", "Zurich", 3.0)])?;
        assert_eq!(
            read_all(&conn)?,
            vec![("2025-01-01".to_string(), "Zurich".to_string(), Some(3.0))]
        );
        Ok(())
    }

    #[test]
    fn duplicate_keys_in_batch() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let schema = schema();
        schema.ensure(&conn)?;
        let outcome = upsert_batch(
            &mut conn,
            &schema,
            &[
                obs("2025-01-01", "Zurich", 1.0),
                obs("2025-01-01", "Basel", 4.0),
                obs("2025-01-01", "Zurich", 2.0),
            ],
        )?;
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.skipped, 1);
        let rows = read_all(&conn)?;
        assert_eq!(rows[1], ("2025-01-01".to_string(), "Zurich".to_string(), Some(2.0)));
        Ok(())
    }

    #[test]
    fn bad_rows_do_not_abort_the_batch() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let schema = schema();
        schema.ensure(&conn)?;
        let outcome = upsert_batch(
            &mut conn,
            &schema,
            &[
                obs("2025-01-01", "Zurich", 1.0),
                Obs {
                    date: None,
                    city: "Geneva",
                    temp_mean: Some(1.0),
                },
                obs("2025-01-02", "Zurich", f64::NAN),
                Obs {
                    date: Some("2025-01-03"),
                    city: "Bern",
                    temp_mean: None,
                },
            ],
        )?;
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.failed.len(), 2);
        assert!(!outcome.is_clean());
        assert_eq!(outcome.failed[0].key, "NULL|Geneva");
        assert_eq!(schema.count(&conn)?, 2);
        Ok(())
    }

    #[test]
    fn rejected_rows_do_not_abort_the_batch() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let schema = schema();
        schema.ensure(&conn)?;
        let outcome = upsert_batch(
            &mut conn,
            &schema,
            &[
                obs("2025-01-01", "Zurich", 1.0),
                obs("not a date", "Zurich", 1.0),
                obs("2025-01-02", "Zurich", 2.0),
            ],
        )?;
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].key, "not a date|Zurich");
        assert_eq!(schema.count(&conn)?, 2);
        Ok(())
    }

    #[test]
    fn replace_rebuilds_in_one_transaction() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let schema = schema();
        schema.ensure(&conn)?;
        upsert_batch(
            &mut conn,
            &schema,
            &[obs("2025-01-01", "Zurich", 1.0), obs("2025-01-02", "Zurich", 2.0)],
        )?;

        let outcome = replace_batch(
            &mut conn,
            &schema,
            &[obs("2025-02-01", "Bern", 3.0), obs("not a date", "Bern", 3.0)],
        )?;
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(
            read_all(&conn)?,
            vec![("2025-02-01".to_string(), "Bern".to_string(), Some(3.0))]
        );

        // nothing writable, the previous content stays
        let outcome = replace_batch(&mut conn, &schema, &[obs("not a date", "Bern", 4.0)])?;
        assert_eq!(outcome.applied, 0);
        assert_eq!(schema.count(&conn)?, 1);
        Ok(())
    }

    struct Reading {
        id: i32,
        v: f64,
    }

    impl Record for Reading {
        fn values(&self) -> Vec<Value> {
            vec![Value::Int(self.id), Value::Double(self.v)]
        }
    }

    #[test]
    fn constraint_violation_fails_only_that_row() -> Result<(), Box<dyn Error>> {
        const READINGS: [Column; 2] = [
            Column::new("id", "INTEGER NOT NULL"),
            Column::new("v", "DOUBLE CHECK (v >= 0)"),
        ];
        let mut conn = Connection::open_in_memory()?;
        let schema = TableSchema::new("readings", &READINGS, &["id"]);
        schema.ensure(&conn)?;
        let outcome = upsert_batch(
            &mut conn,
            &schema,
            &[
                Reading { id: 1, v: 1.0 },
                Reading { id: 2, v: -5.0 },
                Reading { id: 3, v: 3.0 },
            ],
        )?;
        assert_eq!(outcome.applied, 2);
        assert_eq!(
            outcome.failed.iter().map(|f| f.key.as_str()).collect::<Vec<_>>(),
            vec!["2"]
        );
        let ids: Vec<i32> = conn
            .prepare("SELECT id FROM readings ORDER BY id")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        assert_eq!(ids, vec![1, 3]);
        Ok(())
    }
}
