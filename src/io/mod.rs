//! Input record loading and the persisted dataset store

pub mod records;
pub mod store;
pub mod tables;

// Re-export main types
pub use records::{read_fires, read_observations, read_records, read_stations, ObservationTable};
pub use store::{DatasetStore, StoreManifest};
