pub mod artifact;
pub mod features;
pub mod load_forecast;
pub mod ols;
pub mod training;
