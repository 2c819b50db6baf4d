pub mod geojson;
pub mod report;

pub use geojson::{to_geojson, write_geojson};
pub use report::generate_report;
