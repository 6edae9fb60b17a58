//! Common types shared across the RDA client crates.

pub mod error;
pub mod georef;
pub mod wkt;

pub use error::{RdaError, RdaResult};
pub use georef::ImageGeoreferencing;
pub use wkt::WktBox;
