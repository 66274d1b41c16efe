//! Export core modules shared across the CLI and library wrappers.

pub mod csv_core;

#[cfg(feature = "excel")]
pub mod excel_core;
