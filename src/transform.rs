use jiff::civil::Date;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    db::openmeteo::lib_openmeteo::{DailyObservation, WeatherVariable},
    error::TransformError,
};

/// How missing values are filled before the derived features are computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Imputation {
    /// Mean of the known values among the last `window` rows, current row
    /// included.  Rows are sorted by date first.
    TrailingMean { window: usize },
    /// Mean of all known values in the column.
    ColumnMean,
}

impl Imputation {
    pub const LAST_5_DAYS: Imputation = Imputation::TrailingMean { window: 5 };
}

/// A day of weather for one city (or the cross-city aggregate) with the
/// derived columns.  Field order is the table column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRow {
    pub date: Date,
    pub temperature_2m_max: Option<f64>,
    pub temperature_2m_min: Option<f64>,
    pub temp_mean: Option<f64>,
    pub temp_range: Option<f64>,
    pub precipitation_sum: Option<f64>,
    pub precip_flag: i32,
    pub sunshine_duration: Option<f64>,
    pub wind_speed_10m_max: Option<f64>,
    pub daylight_duration: Option<f64>,
}

/// Fill the gaps of one column.  Known values are never changed.
pub fn impute(values: &[Option<f64>], policy: Imputation) -> Vec<Option<f64>> {
    match policy {
        Imputation::TrailingMean { window } => {
            let window = window.max(1);
            (0..values.len())
                .map(|i| match values[i] {
                    Some(v) => Some(v),
                    None => mean(&values[(i + 1).saturating_sub(window)..=i]),
                })
                .collect()
        }
        Imputation::ColumnMean => {
            let fill = mean(values);
            values.iter().map(|v| v.or(fill)).collect()
        }
    }
}

fn mean(values: &[Option<f64>]) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Add mean, range and the precipitation flag to an imputed observation.
pub fn derive_features(obs: &DailyObservation) -> WeatherRow {
    let (temp_mean, temp_range) = match (obs.temperature_2m_max, obs.temperature_2m_min) {
        (Some(max), Some(min)) => (Some((max + min) / 2.0), Some(max - min)),
        _ => (None, None),
    };
    WeatherRow {
        date: obs.date,
        temperature_2m_max: obs.temperature_2m_max,
        temperature_2m_min: obs.temperature_2m_min,
        temp_mean,
        temp_range,
        precipitation_sum: obs.precipitation_sum,
        precip_flag: match obs.precipitation_sum {
            Some(p) if p > 0.0 => 1,
            _ => 0,
        },
        sunshine_duration: obs.sunshine_duration,
        wind_speed_10m_max: obs.wind_speed_10m_max,
        daylight_duration: obs.daylight_duration,
    }
}

/// Sort by date, impute each column with `policy`, then derive the secondary
/// features.  A value that cannot be imputed stays empty, a non-finite value
/// is an error.
pub fn transform(
    mut observations: Vec<DailyObservation>,
    policy: Imputation,
) -> Result<Vec<WeatherRow>, TransformError> {
    if observations.is_empty() {
        return Ok(Vec::new());
    }
    observations.sort_by_key(|obs| obs.date);

    for variable in WeatherVariable::ALL {
        let column: Vec<Option<f64>> = observations.iter().map(|o| o.get(variable)).collect();
        if let Some((obs, v)) = observations
            .iter()
            .zip(&column)
            .find_map(|(obs, v)| v.filter(|x| !x.is_finite()).map(|x| (obs, x)))
        {
            return Err(TransformError::InvalidValue {
                column: variable.name(),
                message: format!("{} on {}", v, obs.date),
            });
        }
        let filled = impute(&column, policy);
        for (obs, value) in observations.iter_mut().zip(filled) {
            if value.is_none() {
                warn!("No value to impute {} on {}", variable, obs.date);
            }
            obs.set(variable, value);
        }
    }

    Ok(observations.iter().map(derive_features).collect())
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use super::*;

    fn obs(day: i8, max: Option<f64>, min: Option<f64>, precip: Option<f64>) -> DailyObservation {
        DailyObservation {
            date: date(2025, 1, day),
            temperature_2m_max: max,
            temperature_2m_min: min,
            precipitation_sum: precip,
            sunshine_duration: Some(3600.0),
            wind_speed_10m_max: Some(10.0),
            daylight_duration: Some(30000.0),
        }
    }

    #[test]
    fn no_gaps_is_identity() {
        let column = vec![Some(1.0), Some(-2.5), Some(4.0), Some(0.0)];
        assert_eq!(impute(&column, Imputation::LAST_5_DAYS), column);
        assert_eq!(impute(&column, Imputation::ColumnMean), column);
    }

    #[test]
    fn trailing_mean_fills_from_the_window() {
        let column = vec![
            Some(1.0),
            Some(2.0),
            Some(3.0),
            Some(4.0),
            Some(5.0),
            Some(6.0),
            None,
        ];
        // last 5 rows ending at the gap: 3, 4, 5, 6
        assert_eq!(impute(&column, Imputation::LAST_5_DAYS)[6], Some(4.5));

        let column = vec![None, Some(2.0), None, None, None, None, None, None];
        let filled = impute(&column, Imputation::LAST_5_DAYS);
        assert_eq!(filled[0], None);
        assert_eq!(filled[2], Some(2.0));
        assert_eq!(filled[5], Some(2.0));
        // the window no longer reaches back to row 1
        assert_eq!(filled[6], None);
    }

    #[test]
    fn column_mean_fills_every_gap() {
        let column = vec![Some(1.0), None, Some(5.0), None];
        assert_eq!(
            impute(&column, Imputation::ColumnMean),
            vec![Some(1.0), Some(3.0), Some(5.0), Some(3.0)]
        );
    }

    #[test]
    fn derived_features() {
        let row = derive_features(&obs(1, Some(10.0), Some(4.0), Some(0.0)));
        assert_eq!(row.temp_mean, Some(7.0));
        assert_eq!(row.temp_range, Some(6.0));
        assert_eq!(row.precip_flag, 0);

        let row = derive_features(&obs(1, Some(10.0), Some(4.0), Some(2.5)));
        assert_eq!(row.precip_flag, 1);
    }

    #[test]
    fn transform_sorts_and_imputes() -> Result<(), Box<dyn Error>> {
        let rows = transform(
            vec![
                obs(3, None, Some(2.0), Some(0.0)),
                obs(1, Some(8.0), Some(0.0), Some(1.0)),
                obs(2, Some(10.0), Some(4.0), None),
            ],
            Imputation::ColumnMean,
        )?;
        assert_eq!(
            rows.iter().map(|r| r.date).collect::<Vec<_>>(),
            vec![date(2025, 1, 1), date(2025, 1, 2), date(2025, 1, 3)]
        );
        assert_eq!(rows[2].temperature_2m_max, Some(9.0));
        assert_eq!(rows[2].temp_mean, Some(5.5));
        assert_eq!(rows[1].precipitation_sum, Some(0.5));
        assert_eq!(rows[1].precip_flag, 1);
        Ok(())
    }

    #[test]
    fn unfillable_values_stay_empty() -> Result<(), Box<dyn Error>> {
        let mut day = obs(1, Some(9.0), Some(1.0), Some(0.0));
        day.sunshine_duration = None;
        let rows = transform(vec![day], Imputation::ColumnMean)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sunshine_duration, None);
        assert_eq!(rows[0].temp_mean, Some(5.0));

        let rows = transform(
            vec![obs(1, None, Some(1.0), Some(0.0)), obs(2, None, Some(2.0), Some(0.0))],
            Imputation::LAST_5_DAYS,
        )?;
        assert!(rows.iter().all(|r| r.temperature_2m_max.is_none() && r.temp_mean.is_none()));
        Ok(())
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let _ = env_logger::builder().is_test(true).try_init();
        let res = transform(
            vec![
                obs(1, Some(5.0), Some(1.0), Some(0.0)),
                obs(2, Some(f64::NAN), Some(2.0), None),
            ],
            Imputation::ColumnMean,
        );
        assert!(matches!(
            res,
            Err(TransformError::InvalidValue {
                column: "temperature_2m_max",
                ..
            })
        ));
    }
}
