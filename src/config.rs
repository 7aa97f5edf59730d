use crate::core::interpolation::SeasonalCurve;
use crate::core::proximity::ProximityConfig;
use crate::core::resources::ResourceThresholds;
use crate::core::terrain::TerrainRules;
use crate::core::wildfire::FireConfig;
use crate::types::{BoundingBox, GridError, GridResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Everything a pipeline run can be tuned with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub bbox: BoundingBox,
    pub grid_spacing_km: f64,
    pub proximity: ProximityConfig,
    pub resources: ResourceThresholds,
    pub fire: FireConfig,
    pub seasonal: SeasonalCurve,
    pub terrain: TerrainRules,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bbox: BoundingBox::new(41.7, 83.1, -141.0, -52.6), // Canada
            grid_spacing_km: 10.0,
            proximity: ProximityConfig::default(),
            resources: ResourceThresholds::default(),
            fire: FireConfig::default(),
            seasonal: SeasonalCurve::default(),
            terrain: TerrainRules::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file; omitted fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> GridResult<Self> {
        let path = path.as_ref();
        log::info!("Loading pipeline config from: {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)
            .map_err(|e| GridError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would fail mid-run
    pub fn validate(&self) -> GridResult<()> {
        self.bbox.validate()?;
        if !self.grid_spacing_km.is_finite() || self.grid_spacing_km <= 0.0 {
            return Err(GridError::InvalidSpacing(self.grid_spacing_km));
        }
        self.proximity.validate()?;
        self.resources.validate()?;
        self.fire.validate()?;
        self.seasonal.validate()?;
        Ok(())
    }
}
