pub mod entsoe;
pub mod openmeteo;
pub mod prod_db;
