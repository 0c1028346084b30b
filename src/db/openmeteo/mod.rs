pub mod lib_openmeteo;
pub mod weather_archive;
pub mod weather_forecast_archive;
pub mod weather_table;
