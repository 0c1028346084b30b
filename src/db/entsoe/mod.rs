pub mod energy_data_archive;
pub mod lib_entsoe;
