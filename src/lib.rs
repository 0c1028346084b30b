pub mod aggregate;
pub mod db;
pub mod error;
pub mod holiday;
pub mod model;
pub mod object_store;
pub mod status;
pub mod transform;
pub mod upsert;
pub mod utils;
