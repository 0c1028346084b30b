use duckdb::Connection;
use itertools::Itertools;
use jiff::{civil::Date, ToSpan};
use log::info;

use crate::{
    db::openmeteo::weather_table::read_weather_rows,
    error::UpsertError,
    transform::WeatherRow,
    upsert::{upsert_batch, BatchOutcome, TableSchema},
};

/// Mean of the known values, `None` if there are none.
fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let xs: Vec<f64> = values.flatten().collect();
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Reduce rows from several sources to one row per date: the mean of each
/// continuous column (nulls ignored) and the max of the precipitation flag.
/// Output is sorted by date.
pub fn aggregate_by_date(rows: &[WeatherRow]) -> Vec<WeatherRow> {
    rows.iter()
        .into_group_map_by(|row| row.date)
        .into_iter()
        .sorted_by_key(|(date, _)| *date)
        .map(|(date, group)| WeatherRow {
            date,
            temperature_2m_max: mean(group.iter().map(|r| r.temperature_2m_max)),
            temperature_2m_min: mean(group.iter().map(|r| r.temperature_2m_min)),
            temp_mean: mean(group.iter().map(|r| r.temp_mean)),
            temp_range: mean(group.iter().map(|r| r.temp_range)),
            precipitation_sum: mean(group.iter().map(|r| r.precipitation_sum)),
            precip_flag: group.iter().map(|r| r.precip_flag).max().unwrap_or(0),
            sunshine_duration: mean(group.iter().map(|r| r.sunshine_duration)),
            wind_speed_10m_max: mean(group.iter().map(|r| r.wind_speed_10m_max)),
            daylight_duration: mean(group.iter().map(|r| r.daylight_duration)),
        })
        .collect()
}

/// Recompute the cross-source aggregate for the given dates and upsert it
/// into `target`.  A source without a row for a date is left out of that
/// date's mean.  Dates without any source row are not written.
pub fn upsert_aggregate(
    conn: &mut Connection,
    sources: &[TableSchema],
    target: &TableSchema,
    dates: &[Date],
) -> Result<BatchOutcome, UpsertError> {
    let (Some(start), Some(last)) = (dates.iter().min(), dates.iter().max()) else {
        return Ok(BatchOutcome::default());
    };
    let end = last.saturating_add(1.day());

    let mut rows = Vec::new();
    for source in sources {
        let xs = read_weather_rows(conn, &source.name, *start, end)
            .map_err(|e| source.db_error(e))?;
        rows.extend(xs.into_iter().filter(|row| dates.contains(&row.date)));
    }
    let aggregated = aggregate_by_date(&rows);
    info!(
        "Aggregated {} source rows into {} rows for {}",
        rows.len(),
        aggregated.len(),
        target.name
    );
    target.ensure(conn)?;
    upsert_batch(conn, target, &aggregated)
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use crate::{
        db::openmeteo::{
            lib_openmeteo::CITIES,
            weather_table::{aggregate_schema, city_schema, tests::weather_row},
        },
        upsert::upsert_batch,
    };

    use super::*;

    #[test]
    fn mean_and_max_per_date() {
        let day = date(2025, 6, 1);
        let rows = vec![
            weather_row(day, 20.0, 10.0, 0.0),
            weather_row(day, 24.0, 12.0, 3.0),
            weather_row(date(2025, 6, 2), 22.0, 11.0, 0.0),
        ];
        let xs = aggregate_by_date(&rows);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].date, day);
        assert_eq!(xs[0].temperature_2m_max, Some(22.0));
        assert_eq!(xs[0].temp_mean, Some(16.5));
        assert_eq!(xs[0].precipitation_sum, Some(1.5));
        assert_eq!(xs[0].precip_flag, 1);
        assert_eq!(xs[1].precip_flag, 0);
    }

    #[test]
    fn nulls_are_ignored_not_zero() {
        let day = date(2025, 6, 1);
        let mut a = weather_row(day, 20.0, 10.0, 0.0);
        a.sunshine_duration = None;
        let mut b = weather_row(day, 24.0, 12.0, 0.0);
        b.sunshine_duration = Some(7200.0);
        let xs = aggregate_by_date(&[a, b]);
        assert_eq!(xs[0].sunshine_duration, Some(7200.0));
    }

    #[test]
    fn aggregate_tables() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let sources: Vec<TableSchema> = CITIES.iter().map(city_schema).collect();
        let target = aggregate_schema();
        let day = date(2025, 6, 1);

        // only two of the five cities have data, the others are excluded
        sources[0].ensure(&conn)?;
        upsert_batch(&mut conn, &sources[0], &[weather_row(day, 20.0, 10.0, 0.0)])?;
        sources[1].ensure(&conn)?;
        upsert_batch(&mut conn, &sources[1], &[weather_row(day, 30.0, 14.0, 2.0)])?;

        let outcome = upsert_aggregate(&mut conn, &sources, &target, &[day])?;
        assert_eq!(outcome.applied, 1);
        let xs = read_weather_rows(&conn, &target.name, day, date(2025, 6, 2))?;
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].temperature_2m_max, Some(25.0));
        assert_eq!(xs[0].precip_flag, 1);

        // a source row changes, the aggregate follows and stays unique
        upsert_batch(&mut conn, &sources[1], &[weather_row(day, 22.0, 14.0, 0.0)])?;
        upsert_aggregate(&mut conn, &sources, &target, &[day])?;
        upsert_aggregate(&mut conn, &sources, &target, &[day])?;
        let xs = read_weather_rows(&conn, &target.name, day, date(2025, 6, 2))?;
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].temperature_2m_max, Some(21.0));
        assert_eq!(xs[0].precip_flag, 0);
        Ok(())
    }
}
