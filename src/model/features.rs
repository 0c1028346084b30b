use jiff::{tz::TimeZone, SignedDuration, Timestamp};

use crate::{
    holiday::{HolidayTrait, SWISS_CALENDAR},
    transform::WeatherRow,
};

pub const LAG_24: SignedDuration = SignedDuration::from_hours(24);
pub const LAG_168: SignedDuration = SignedDuration::from_hours(168);

/// Names of the model inputs, in design matrix column order.  Hour and
/// weekday are one-hot encoded, there is no separate intercept.
pub fn feature_names() -> Vec<String> {
    let mut names: Vec<String> = [
        "lag24",
        "lag168",
        "temp_mean",
        "temp_range",
        "precipitation_sum",
        "sunshine_duration",
        "wind_speed_10m_max",
        "daylight_duration",
        "is_holiday",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    names.extend((0..24).map(|h| format!("hour_{}", h)));
    names.extend((0..7).map(|d| format!("wday_{}", d)));
    names
}

/// One row of the design matrix for the hour starting at `timestamp` (UTC).
/// Returns `None` if one of the weather inputs is missing.
pub fn feature_row(
    timestamp: Timestamp,
    lag24: f64,
    lag168: f64,
    weather: &WeatherRow,
) -> Option<Vec<f64>> {
    let dt = TimeZone::UTC.to_datetime(timestamp);
    let mut x = vec![
        lag24,
        lag168,
        weather.temp_mean?,
        weather.temp_range?,
        weather.precipitation_sum?,
        weather.sunshine_duration?,
        weather.wind_speed_10m_max?,
        weather.daylight_duration?,
        if SWISS_CALENDAR.is_holiday(&dt.date()) {
            1.0
        } else {
            0.0
        },
    ];
    let hour = dt.hour() as usize;
    x.extend((0..24).map(|h| if h == hour { 1.0 } else { 0.0 }));
    let wday = dt.weekday().to_monday_zero_offset() as usize;
    x.extend((0..7).map(|d| if d == wday { 1.0 } else { 0.0 }));
    Some(x)
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use crate::db::openmeteo::weather_table::tests::weather_row;

    use super::*;

    #[test]
    fn design_row() -> Result<(), Box<dyn Error>> {
        let names = feature_names();
        assert_eq!(names.len(), 40);

        // Aug 1st 2025 is a Friday and a holiday
        let ts: Timestamp = "2025-08-01T13:00:00Z".parse()?;
        let weather = weather_row(date(2025, 8, 1), 28.0, 16.0, 0.0);
        let x = feature_row(ts, 6500.0, 6400.0, &weather).ok_or("missing weather")?;
        assert_eq!(x.len(), names.len());
        assert_eq!(x[0], 6500.0);
        assert_eq!(x[2], 22.0);
        assert_eq!(x[8], 1.0);
        assert_eq!(x[9 + 13], 1.0);
        assert_eq!(x[9..33].iter().sum::<f64>(), 1.0);
        assert_eq!(x[33 + 4], 1.0);
        assert_eq!(names[33 + 4], "wday_4");

        let mut weather = weather;
        weather.sunshine_duration = None;
        assert_eq!(feature_row(ts, 6500.0, 6400.0, &weather), None);
        Ok(())
    }
}
