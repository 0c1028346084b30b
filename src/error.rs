use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to an upstream time-series API.  The whole requested
/// range is considered failed, nothing downstream is touched.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network request failed for {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Rate limited by {url}")]
    RateLimited { url: String },

    #[error("Upstream API rejected the request: {0}")]
    Api(String),

    #[error("No data available upstream: {0}")]
    NoData(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Failed to decode XML document")]
    Xml(#[from] quick_xml::de::DeError),

    #[error("Failed to decode JSON document")]
    Json(#[from] serde_json::Error),

    #[error("Failed to access HTTP cache '{0}'")]
    Cache(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Invalid value in column '{column}': {message}")]
    InvalidValue {
        column: &'static str,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("Database error on table {table}")]
    Database {
        table: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Row has {found} values but table {table} has {expected} columns")]
    Arity {
        table: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("I/O error on object '{0}'")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("CSV error on object '{0}'")]
    Csv(String, #[source] csv::Error),

    #[error("Failed to encode object '{0}'")]
    Encode(String, #[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ModelUnavailableError {
    #[error("No model artifact under prefix '{0}'")]
    NotFound(String),

    #[error("Model artifact '{key}' could not be decoded")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Model artifact has features {found:?}, expected {expected:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Not enough data to fit model: N={observations}, F={features}")]
    NotEnoughData { observations: usize, features: usize },

    #[error("Least squares solve failed: {0}")]
    Solve(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is not set")]
    MissingVar(String),

    #[error("Environment variable {name} has an invalid value '{value}'")]
    InvalidVar { name: String, value: String },
}

/// Everything that can abort a job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Upsert(#[from] UpsertError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    ModelUnavailable(#[from] ModelUnavailableError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error")]
    Database(#[from] duckdb::Error),

    #[error("Date arithmetic error")]
    Time(#[from] jiff::Error),
}
