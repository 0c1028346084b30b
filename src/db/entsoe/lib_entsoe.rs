use jiff::{SignedDuration, Timestamp};
use log::info;
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};

use crate::{error::FetchError, utils::lib_http::HttpSession};

pub const ENTSOE_ENDPOINT: &str = "https://web-api.tp.entsoe.eu/api";

/// Swiss bidding zone
pub const SWISS_DOMAIN: &str = "10YCH-SWISSGRIDZ";

/// Production type codes and their labels.  Codes not in the list are kept
/// as they are.
pub const GEN_TYPE_LABELS: [(&str, &str); 21] = [
    ("B01", "biomass"),
    ("B02", "fossil_brown_coal_lignite"),
    ("B03", "fossil_coal_derived_gas"),
    ("B04", "fossil_gas"),
    ("B05", "fossil_hard_coal"),
    ("B06", "fossil_oil"),
    ("B07", "fossil_oil_shale"),
    ("B08", "fossil_peat"),
    ("B09", "geothermal"),
    ("B10", "hydro_pumped_storage"),
    ("B11", "hydro_run_of_river_and_poundage"),
    ("B12", "hydro_water_reservoir"),
    ("B13", "marine"),
    ("B14", "nuclear"),
    ("B15", "other_renewable"),
    ("B16", "solar"),
    ("B17", "waste"),
    ("B18", "wind_offshore"),
    ("B19", "wind_onshore"),
    ("B20", "other"),
    ("B25", "energy_storage"),
];

pub fn gen_type_label(code: &str) -> String {
    GEN_TYPE_LABELS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| code.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPoint {
    pub timestamp: Timestamp,
    pub gen_type: String,
    pub quantity_mw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadPoint {
    pub timestamp: Timestamp,
    pub load_mw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: Timestamp,
    pub price_eur_per_mwh: f64,
}

/// Market data for one bidding zone over a half-open UTC range.
pub trait MarketSource {
    fn generation(&self, start: Timestamp, end: Timestamp)
        -> Result<Vec<GenerationPoint>, FetchError>;
    fn load(&self, start: Timestamp, end: Timestamp) -> Result<Vec<LoadPoint>, FetchError>;
    fn prices(&self, start: Timestamp, end: Timestamp) -> Result<Vec<PricePoint>, FetchError>;
}

pub struct EntsoeClient<'a> {
    session: &'a HttpSession,
    api_key: String,
    pub domain: String,
    pub url: String,
}

impl<'a> EntsoeClient<'a> {
    pub fn new(session: &'a HttpSession, api_key: String) -> EntsoeClient<'a> {
        EntsoeClient {
            session,
            api_key,
            domain: SWISS_DOMAIN.to_string(),
            url: ENTSOE_ENDPOINT.to_string(),
        }
    }

    fn get(
        &self,
        document_type: &str,
        start: Timestamp,
        end: Timestamp,
        extra: &[(&str, String)],
    ) -> Result<String, FetchError> {
        info!(
            "Fetching ENTSO-E document {} for {} from {} to {}",
            document_type, self.domain, start, end
        );
        let mut query = vec![
            ("documentType", document_type.to_string()),
            ("periodStart", start.strftime("%Y%m%d%H%M").to_string()),
            ("periodEnd", end.strftime("%Y%m%d%H%M").to_string()),
        ];
        query.extend(extra.iter().cloned());
        query.push(("securityToken", self.api_key.clone()));
        self.session.get_text(&self.url, &query)
    }
}

impl MarketSource for EntsoeClient<'_> {
    fn generation(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<GenerationPoint>, FetchError> {
        let body = self.get(
            "A75",
            start,
            end,
            &[
                ("processType", "A16".to_string()),
                ("in_Domain", self.domain.clone()),
                ("outBiddingZone_Domain", self.domain.clone()),
            ],
        )?;
        parse_generation(&body)
    }

    fn load(&self, start: Timestamp, end: Timestamp) -> Result<Vec<LoadPoint>, FetchError> {
        let body = self.get(
            "A65",
            start,
            end,
            &[
                ("processType", "A16".to_string()),
                ("outBiddingZone_Domain", self.domain.clone()),
            ],
        )?;
        parse_load(&body)
    }

    fn prices(&self, start: Timestamp, end: Timestamp) -> Result<Vec<PricePoint>, FetchError> {
        let body = self.get(
            "A44",
            start,
            end,
            &[
                ("in_Domain", self.domain.clone()),
                ("out_Domain", self.domain.clone()),
            ],
        )?;
        parse_prices(&body)
    }
}

#[derive(Debug, Deserialize)]
struct MarketDocument {
    #[serde(rename = "TimeSeries", default)]
    time_series: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(rename = "MktPSRType")]
    mkt_psr_type: Option<MktPsrType>,
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
struct MktPsrType {
    #[serde(rename = "psrType")]
    psr_type: String,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "timeInterval")]
    time_interval: TimeInterval,
    resolution: String,
    #[serde(rename = "Point", default)]
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct TimeInterval {
    start: String,
}

#[derive(Debug, Deserialize)]
struct Point {
    position: i32,
    quantity: Option<f64>,
    #[serde(rename = "price.amount")]
    price_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AcknowledgementDocument {
    #[serde(rename = "Reason", default)]
    reasons: Vec<Reason>,
}

#[derive(Debug, Deserialize)]
struct Reason {
    code: String,
    text: Option<String>,
}

/// The API answers a query without data (or a rejected query) with an
/// acknowledgement document instead of a market document.
fn parse_document(body: &str) -> Result<MarketDocument, FetchError> {
    if body.contains("Acknowledgement_MarketDocument") {
        let ack: AcknowledgementDocument = from_str(body)?;
        let reason = ack.reasons.first();
        let text = reason
            .and_then(|r| r.text.clone())
            .unwrap_or_else(|| "acknowledgement without reason".to_string());
        return match reason.map(|r| r.code.as_str()) {
            Some("999") => Err(FetchError::NoData(text)),
            _ => Err(FetchError::Api(text)),
        };
    }
    Ok(from_str(body)?)
}

/// Parse an ISO 8601 resolution like `PT15M`, `PT60M`, `PT1H` or `P1D`.
pub fn parse_resolution(value: &str) -> Result<SignedDuration, FetchError> {
    let malformed = || FetchError::Malformed(format!("unsupported resolution {}", value));
    let (n, secs) = if let Some(rest) = value.strip_prefix("PT") {
        if let Some(n) = rest.strip_suffix('M') {
            (n, 60)
        } else if let Some(n) = rest.strip_suffix('H') {
            (n, 3600)
        } else {
            return Err(malformed());
        }
    } else if let Some(n) = value.strip_prefix('P').and_then(|s| s.strip_suffix('D')) {
        (n, 86_400)
    } else {
        return Err(malformed());
    };
    let n: i64 = n.parse().map_err(|_| malformed())?;
    match n.checked_mul(secs) {
        Some(s) if s > 0 => Ok(SignedDuration::from_secs(s)),
        _ => Err(malformed()),
    }
}

/// Interval starts come as `2025-01-01T00:00Z`, without seconds.
fn parse_start(value: &str) -> Result<Timestamp, FetchError> {
    let value = value.trim();
    let normalized = match value.strip_suffix('Z') {
        Some(s) if s.len() == 16 => format!("{}:00Z", s),
        _ => value.to_string(),
    };
    normalized
        .parse::<Timestamp>()
        .map_err(|e| FetchError::Malformed(format!("invalid interval start {}: {}", value, e)))
}

/// Timestamps of the points of a period, `start + resolution * (position - 1)`.
fn point_timestamps(period: &Period) -> Result<Vec<(Timestamp, &Point)>, FetchError> {
    let start = parse_start(&period.time_interval.start)?;
    let resolution = parse_resolution(&period.resolution)?;
    period
        .points
        .iter()
        .map(|point| {
            // positions start at 1
            point
                .position
                .checked_sub(1)
                .filter(|i| *i >= 0)
                .and_then(|i| resolution.checked_mul(i))
                .and_then(|offset| start.checked_add(offset).ok())
                .map(|ts| (ts, point))
                .ok_or_else(|| {
                    FetchError::Malformed(format!("invalid point position {}", point.position))
                })
        })
        .collect()
}

/// Actual generation per production type (document A75).  Series without
/// a production type are ignored.
pub fn parse_generation(body: &str) -> Result<Vec<GenerationPoint>, FetchError> {
    let doc = parse_document(body)?;
    let mut out = Vec::new();
    for ts in &doc.time_series {
        let Some(psr) = &ts.mkt_psr_type else {
            continue;
        };
        let gen_type = gen_type_label(psr.psr_type.trim());
        for period in &ts.periods {
            for (timestamp, point) in point_timestamps(period)? {
                if let Some(quantity_mw) = point.quantity {
                    out.push(GenerationPoint {
                        timestamp,
                        gen_type: gen_type.clone(),
                        quantity_mw,
                    });
                }
            }
        }
    }
    Ok(out)
}

/// Actual total load (document A65).
pub fn parse_load(body: &str) -> Result<Vec<LoadPoint>, FetchError> {
    let doc = parse_document(body)?;
    let mut out = Vec::new();
    for ts in &doc.time_series {
        for period in &ts.periods {
            for (timestamp, point) in point_timestamps(period)? {
                if let Some(load_mw) = point.quantity {
                    out.push(LoadPoint { timestamp, load_mw });
                }
            }
        }
    }
    Ok(out)
}

/// Day-ahead prices (document A44).
pub fn parse_prices(body: &str) -> Result<Vec<PricePoint>, FetchError> {
    let doc = parse_document(body)?;
    let mut out = Vec::new();
    for ts in &doc.time_series {
        for period in &ts.periods {
            for (timestamp, point) in point_timestamps(period)? {
                if let Some(price_eur_per_mwh) = point.price_amount {
                    out.push(PricePoint {
                        timestamp,
                        price_eur_per_mwh,
                    });
                }
            }
        }
    }
    Ok(out)
}
