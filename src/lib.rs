//! firegrid: gridded weather and wildfire datasets from station records
//!
//! This library turns point weather-station observations and wildfire reports
//! into a uniform, curvature-adjusted spatial grid with interpolated daily
//! weather per cell and per-cell fire attributions, persisted for downstream
//! feature generation.

pub mod types;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, GridCell, GridSpec, Terrain, Station, StationObservation, WeatherValues, WeatherEstimate,
    InterpolationMethod, FireRecord, FireEvent, CellFireAttribution, GridError, GridResult,
};

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineInputs, DateSpan, RunSummary};
pub use io::{DatasetStore, StoreManifest};
pub use crate::core::{CancellationToken, SysinfoMonitor};
