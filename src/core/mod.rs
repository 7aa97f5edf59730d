//! Core grid construction and interpolation modules

pub mod geometry;
pub mod grid;
pub mod terrain;
pub mod proximity;
pub mod resources;
pub mod interpolation;
pub mod scheduler;
pub mod wildfire;

// Re-export main types
pub use grid::GridGenerator;
pub use terrain::{TerrainClassifier, TerrainRules, TerrainSummary, NamedRegion, LatitudeBand};
pub use proximity::{StationProximityIndex, StationDistanceTable, ProximityConfig, ProximityTier};
pub use resources::{
    ResourceController, ResourcePolicy, ResourceThresholds, ExecutionPlan, HardwareProfile,
    HardwareClass, PressureLevel, SystemMonitor, SystemSnapshot, SysinfoMonitor,
};
pub use interpolation::{InterpolationEngine, SeasonalCurve, WeatherBatch};
pub use scheduler::{BatchScheduler, CancellationToken, InterpolationSummary, WeatherSink};
pub use wildfire::{WildfireAssigner, FireConfig, FireAssignment, DropReason};
