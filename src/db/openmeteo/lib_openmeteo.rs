use std::{collections::HashMap, fmt};

use itertools::Itertools;
use jiff::{civil::Date, ToSpan};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{error::FetchError, utils::lib_http::HttpSession};

pub const ARCHIVE_ENDPOINT: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const FORECAST_ENDPOINT: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct City {
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

impl City {
    /// Lower case name with anything not alphanumeric replaced by `_`,
    /// e.g. `Zurich` -> `zurich`.
    pub fn sanitized_name(&self) -> String {
        self.name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect()
    }
}

pub const CITIES: [City; 5] = [
    City {
        name: "Zurich",
        latitude: 47.3769,
        longitude: 8.5417,
    },
    City {
        name: "Geneva",
        latitude: 46.2044,
        longitude: 6.1432,
    },
    City {
        name: "Basel",
        latitude: 47.5596,
        longitude: 7.5886,
    },
    City {
        name: "Lausanne",
        latitude: 46.5197,
        longitude: 6.6323,
    },
    City {
        name: "Bern",
        latitude: 46.9480,
        longitude: 7.4474,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeatherVariable {
    TemperatureMax,
    TemperatureMin,
    PrecipitationSum,
    SunshineDuration,
    WindSpeedMax,
    DaylightDuration,
}

impl WeatherVariable {
    /// The daily variables requested from the API, in request order.
    pub const ALL: [WeatherVariable; 6] = [
        WeatherVariable::TemperatureMax,
        WeatherVariable::TemperatureMin,
        WeatherVariable::PrecipitationSum,
        WeatherVariable::SunshineDuration,
        WeatherVariable::WindSpeedMax,
        WeatherVariable::DaylightDuration,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WeatherVariable::TemperatureMax => "temperature_2m_max",
            WeatherVariable::TemperatureMin => "temperature_2m_min",
            WeatherVariable::PrecipitationSum => "precipitation_sum",
            WeatherVariable::SunshineDuration => "sunshine_duration",
            WeatherVariable::WindSpeedMax => "wind_speed_10m_max",
            WeatherVariable::DaylightDuration => "daylight_duration",
        }
    }
}

impl fmt::Display for WeatherVariable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One day of raw weather for one city, as returned by the API.  Any value
/// can be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyObservation {
    pub date: Date,
    pub temperature_2m_max: Option<f64>,
    pub temperature_2m_min: Option<f64>,
    pub precipitation_sum: Option<f64>,
    pub sunshine_duration: Option<f64>,
    pub wind_speed_10m_max: Option<f64>,
    pub daylight_duration: Option<f64>,
}

impl DailyObservation {
    pub fn empty(date: Date) -> DailyObservation {
        DailyObservation {
            date,
            temperature_2m_max: None,
            temperature_2m_min: None,
            precipitation_sum: None,
            sunshine_duration: None,
            wind_speed_10m_max: None,
            daylight_duration: None,
        }
    }

    pub fn get(&self, variable: WeatherVariable) -> Option<f64> {
        match variable {
            WeatherVariable::TemperatureMax => self.temperature_2m_max,
            WeatherVariable::TemperatureMin => self.temperature_2m_min,
            WeatherVariable::PrecipitationSum => self.precipitation_sum,
            WeatherVariable::SunshineDuration => self.sunshine_duration,
            WeatherVariable::WindSpeedMax => self.wind_speed_10m_max,
            WeatherVariable::DaylightDuration => self.daylight_duration,
        }
    }

    pub fn set(&mut self, variable: WeatherVariable, value: Option<f64>) {
        let slot = match variable {
            WeatherVariable::TemperatureMax => &mut self.temperature_2m_max,
            WeatherVariable::TemperatureMin => &mut self.temperature_2m_min,
            WeatherVariable::PrecipitationSum => &mut self.precipitation_sum,
            WeatherVariable::SunshineDuration => &mut self.sunshine_duration,
            WeatherVariable::WindSpeedMax => &mut self.wind_speed_10m_max,
            WeatherVariable::DaylightDuration => &mut self.daylight_duration,
        };
        *slot = value;
    }
}

/// Where daily weather comes from.  The production implementation is
/// [`OpenMeteoClient`].
pub trait DailyWeatherSource {
    /// Observed daily weather for the half-open range `[start, end)`.
    fn archive(
        &self,
        city: &City,
        start: Date,
        end: Date,
    ) -> Result<Vec<DailyObservation>, FetchError>;

    /// Daily forecast starting today (UTC) for `days` days.
    fn forecast(&self, city: &City, days: i32) -> Result<Vec<DailyObservation>, FetchError>;
}

pub struct OpenMeteoClient<'a> {
    session: &'a HttpSession,
    pub archive_url: String,
    pub forecast_url: String,
}

impl<'a> OpenMeteoClient<'a> {
    pub fn new(session: &'a HttpSession) -> OpenMeteoClient<'a> {
        OpenMeteoClient {
            session,
            archive_url: ARCHIVE_ENDPOINT.to_string(),
            forecast_url: FORECAST_ENDPOINT.to_string(),
        }
    }
}

fn daily_parameter() -> String {
    WeatherVariable::ALL.iter().map(|v| v.name()).join(",")
}

impl DailyWeatherSource for OpenMeteoClient<'_> {
    fn archive(
        &self,
        city: &City,
        start: Date,
        end: Date,
    ) -> Result<Vec<DailyObservation>, FetchError> {
        if start >= end {
            return Ok(Vec::new());
        }
        // the API takes an inclusive end date
        let last = end
            .checked_sub(1.day())
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        info!("Fetching archive weather for {} from {} to {}", city.name, start, last);
        let body = self.session.get_text(
            &self.archive_url,
            &[
                ("latitude", city.latitude.to_string()),
                ("longitude", city.longitude.to_string()),
                ("start_date", start.to_string()),
                ("end_date", last.to_string()),
                ("daily", daily_parameter()),
            ],
        )?;
        parse_daily(&body)
    }

    fn forecast(&self, city: &City, days: i32) -> Result<Vec<DailyObservation>, FetchError> {
        info!("Fetching {} days of forecast weather for {}", days, city.name);
        let body = self.session.get_text(
            &self.forecast_url,
            &[
                ("latitude", city.latitude.to_string()),
                ("longitude", city.longitude.to_string()),
                ("daily", daily_parameter()),
                ("forecast_days", days.to_string()),
                ("timezone", "UTC".to_string()),
            ],
        )?;
        parse_daily(&body)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    daily: Option<DailyBlock>,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    #[serde(flatten)]
    variables: HashMap<String, Vec<Option<f64>>>,
}

/// Decode the `daily` block of an Open-Meteo JSON response, one observation
/// per day.
pub fn parse_daily(body: &str) -> Result<Vec<DailyObservation>, FetchError> {
    let response: ApiResponse = serde_json::from_str(body)?;
    if response.error {
        return Err(FetchError::Api(
            response.reason.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    let daily = response
        .daily
        .ok_or_else(|| FetchError::Malformed("response has no daily block".to_string()))?;

    let mut observations = daily
        .time
        .iter()
        .map(|t| {
            t.parse::<Date>()
                .map(DailyObservation::empty)
                .map_err(|e| FetchError::Malformed(format!("invalid date {}: {}", t, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for variable in WeatherVariable::ALL {
        let values = daily.variables.get(variable.name()).ok_or_else(|| {
            FetchError::Malformed(format!("variable {} is missing", variable))
        })?;
        if values.len() != observations.len() {
            return Err(FetchError::Malformed(format!(
                "variable {} has {} values for {} days",
                variable,
                values.len(),
                observations.len()
            )));
        }
        for (obs, value) in observations.iter_mut().zip(values) {
            obs.set(variable, *value);
        }
    }

    Ok(observations)
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use super::*;

    const RESPONSE: &str = r#"{
        "latitude": 47.38,
        "longitude": 8.54,
        "generationtime_ms": 0.1,
        "utc_offset_seconds": 0,
        "timezone": "GMT",
        "daily_units": {"time": "iso8601", "temperature_2m_max": "°C"},
        "daily": {
            "time": ["2025-03-01", "2025-03-02", "2025-03-03"],
            "temperature_2m_max": [10.2, 11.0, null],
            "temperature_2m_min": [1.0, 2.5, 3.1],
            "precipitation_sum": [0.0, 2.4, 0.3],
            "sunshine_duration": [30000.5, 1200.0, 4000.0],
            "wind_speed_10m_max": [12.3, 20.1, 9.8],
            "daylight_duration": [39600.0, 39800.0, 40000.0]
        }
    }"#;

    #[test]
    fn parse_response() -> Result<(), Box<dyn Error>> {
        let xs = parse_daily(RESPONSE)?;
        assert_eq!(xs.len(), 3);
        assert_eq!(xs[0].date, date(2025, 3, 1));
        assert_eq!(xs[0].temperature_2m_max, Some(10.2));
        assert_eq!(xs[1].precipitation_sum, Some(2.4));
        assert_eq!(xs[2].temperature_2m_max, None);
        assert_eq!(xs[2].daylight_duration, Some(40000.0));
        Ok(())
    }

    #[test]
    fn api_error_is_a_fetch_error() {
        let body = r#"{"error": true, "reason": "Parameter 'start_date' is out of allowed range from 1940-01-01 to 2025-10-20"}"#;
        match parse_daily(body) {
            Err(FetchError::Api(reason)) => assert!(reason.contains("out of allowed range")),
            other => panic!("expected an api error, got {:?}", other),
        }
    }

    #[test]
    fn ragged_columns_are_malformed() {
        let body = r#"{"daily": {
            "time": ["2025-03-01", "2025-03-02"],
            "temperature_2m_max": [10.2],
            "temperature_2m_min": [1.0, 2.5],
            "precipitation_sum": [0.0, 2.4],
            "sunshine_duration": [1.0, 1.0],
            "wind_speed_10m_max": [1.0, 1.0],
            "daylight_duration": [1.0, 1.0]
        }}"#;
        assert!(matches!(parse_daily(body), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn variable_names() {
        assert_eq!(
            daily_parameter(),
            "temperature_2m_max,temperature_2m_min,precipitation_sum,sunshine_duration,wind_speed_10m_max,daylight_duration"
        );
        assert_eq!(WeatherVariable::WindSpeedMax.to_string(), "wind_speed_10m_max");
        assert_eq!(CITIES[2].sanitized_name(), "basel");
        let city = City {
            name: "St. Gallen",
            latitude: 47.42,
            longitude: 9.37,
        };
        assert_eq!(city.sanitized_name(), "st__gallen");
    }

    #[ignore]
    #[test]
    fn fetch_archive() -> Result<(), Box<dyn Error>> {
        let session = HttpSession::new();
        let client = OpenMeteoClient::new(&session);
        let xs = client.archive(&CITIES[0], date(2024, 1, 1), date(2024, 1, 8))?;
        assert_eq!(xs.len(), 7);
        Ok(())
    }
}
