use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grid cell identifier (sequential, row-major emission order)
pub type CellId = u32;

/// Weather station identifier as supplied by the upstream station table
pub type StationId = String;

/// Geospatial bounding box in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self { min_lat, max_lat, min_lon, max_lon }
    }

    /// Check that the box is finite, ordered and on the globe
    pub fn validate(&self) -> GridResult<()> {
        let values = [self.min_lat, self.max_lat, self.min_lon, self.max_lon];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(GridError::InvalidBoundingBox(format!(
                "non-finite coordinate in {:?}", self
            )));
        }
        if self.min_lat >= self.max_lat || self.min_lon >= self.max_lon {
            return Err(GridError::InvalidBoundingBox(format!(
                "minimum must be below maximum: lat {}..{}, lon {}..{}",
                self.min_lat, self.max_lat, self.min_lon, self.max_lon
            )));
        }
        if self.min_lat < -90.0 || self.max_lat > 90.0 {
            return Err(GridError::InvalidBoundingBox(format!(
                "latitude outside [-90, 90]: {}..{}", self.min_lat, self.max_lat
            )));
        }
        if self.min_lon < -180.0 || self.max_lon > 180.0 {
            return Err(GridError::InvalidBoundingBox(format!(
                "longitude outside [-180, 180]: {}..{}", self.min_lon, self.max_lon
            )));
        }
        Ok(())
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Coarse land-cover category of a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terrain {
    Land,
    Urban,
    Forest,
    Water,
}

impl Terrain {
    /// Land, urban and forest cells carry weather and can burn
    pub fn is_land_like(self) -> bool {
        !matches!(self, Terrain::Water)
    }
}

impl std::fmt::Display for Terrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terrain::Land => f.pad("land"),
            Terrain::Urban => f.pad("urban"),
            Terrain::Forest => f.pad("forest"),
            Terrain::Water => f.pad("water"),
        }
    }
}

/// Identity of a generated grid: the box it covers and its spacing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub bbox: BoundingBox,
    pub spacing_km: f64,
}

impl std::fmt::Display for GridSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}] x [{}, {}] at {} km",
            self.bbox.min_lat, self.bbox.max_lat, self.bbox.min_lon, self.bbox.max_lon, self.spacing_km
        )
    }
}

/// One lattice element of the output grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub id: CellId,
    pub row: u32,
    pub col: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub terrain: Terrain,
    pub is_water: bool,
    pub is_urban: bool,
}

impl GridCell {
    pub fn set_terrain(&mut self, terrain: Terrain) {
        self.terrain = terrain;
        self.is_water = terrain == Terrain::Water;
        self.is_urban = terrain == Terrain::Urban;
    }
}

/// Weather station location (validated upstream)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub latitude: f64,
    pub longitude: f64,
}

/// Core daily weather variables. Units: degrees C, mm, cm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherValues {
    pub tmax: Option<f64>,
    pub tmin: Option<f64>,
    pub tavg: Option<f64>,
    pub prcp: Option<f64>,
    pub snwd: Option<f64>,
}

impl WeatherValues {
    /// True when at least one variable was reported
    pub fn has_any(&self) -> bool {
        self.tmax.is_some()
            || self.tmin.is_some()
            || self.tavg.is_some()
            || self.prcp.is_some()
            || self.snwd.is_some()
    }

    pub fn temp_range(&self) -> Option<f64> {
        match (self.tmax, self.tmin) {
            (Some(max), Some(min)) => Some(max - min),
            _ => None,
        }
    }
}

/// One station's daily observation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationObservation {
    pub station_id: StationId,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub values: WeatherValues,
}

/// Great-circle distance between two stations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationDistance {
    pub station_a: StationId,
    pub station_b: StationId,
    pub distance_km: f64,
}

/// Station reference with its distance to a cell centre
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationLink {
    pub station_id: StationId,
    pub distance_km: f64,
}

/// Ranked stations used to interpolate one cell, closest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellStationAssignment {
    pub cell_id: CellId,
    pub stations: Vec<StationLink>,
}

impl CellStationAssignment {
    pub fn nearest_distance_km(&self) -> Option<f64> {
        self.stations.first().map(|s| s.distance_km)
    }
}

/// How a cell-date weather value was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterpolationMethod {
    SingleStation,
    DistanceWeighted,
    SeasonalDefault,
    WaterPlaceholder,
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpolationMethod::SingleStation => f.pad("single-station"),
            InterpolationMethod::DistanceWeighted => f.pad("distance-weighted"),
            InterpolationMethod::SeasonalDefault => f.pad("seasonal-default"),
            InterpolationMethod::WaterPlaceholder => f.pad("water-placeholder"),
        }
    }
}

/// Meteorological season (northern hemisphere convention)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Autumn,
            _ => Season::Winter,
        }
    }
}

/// Interpolated weather for one (cell, date) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherEstimate {
    pub cell_id: CellId,
    pub date: NaiveDate,
    pub tmax: Option<f64>,
    pub tmin: Option<f64>,
    pub tavg: Option<f64>,
    pub prcp: Option<f64>,
    pub snwd: Option<f64>,
    pub temp_range: Option<f64>,
    pub year: i32,
    pub month: u32,
    pub day_of_year: u32,
    pub season: Season,
    pub method: InterpolationMethod,
    pub station_count: u32,
    pub confidence: f64,
}

impl WeatherEstimate {
    pub fn new(
        cell_id: CellId,
        date: NaiveDate,
        values: WeatherValues,
        method: InterpolationMethod,
        station_count: u32,
        confidence: f64,
    ) -> Self {
        Self {
            cell_id,
            date,
            tmax: values.tmax,
            tmin: values.tmin,
            tavg: values.tavg,
            prcp: values.prcp,
            snwd: values.snwd,
            temp_range: values.temp_range(),
            year: date.year(),
            month: date.month(),
            day_of_year: date.ordinal(),
            season: Season::from_month(date.month()),
            method,
            station_count,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn key(&self) -> (CellId, NaiveDate) {
        (self.cell_id, self.date)
    }
}

/// Validated wildfire record from the upstream fire table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireRecord {
    pub fire_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub area_ha: f64,
    pub fire_type: String,
}

/// Wildfire summary anchored on the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireEvent {
    pub fire_id: String,
    pub center_cell_id: CellId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_area_ha: f64,
    pub fire_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub affected_cells: Vec<CellId>,
}

impl FireEvent {
    /// JSON-encoded list of affected cell ids, as consumed by feature generation
    pub fn affected_cells_json(&self) -> String {
        serde_json::to_string(&self.affected_cells).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Share of one fire's burned area assigned to one cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellFireAttribution {
    pub cell_id: CellId,
    pub fire_id: String,
    pub burned_area_ha: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Per-method row counts
pub type MethodCounts = BTreeMap<InterpolationMethod, usize>;

/// Error types for grid construction and interpolation
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("Invalid grid spacing: {0} km (must be finite and > 0)")]
    InvalidSpacing(f64),

    #[error("Duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for grid operations
pub type GridResult<T> = Result<T, GridError>;

macro_rules! impl_from_redb {
    ($($err:ty),*) => {
        $(impl From<$err> for GridError {
            fn from(err: $err) -> Self {
                GridError::Database(err.into())
            }
        })*
    };
}

impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_validation() {
        assert!(BoundingBox::new(43.0, 44.0, -80.0, -78.0).validate().is_ok());
        assert!(BoundingBox::new(44.0, 43.0, -80.0, -78.0).validate().is_err());
        assert!(BoundingBox::new(43.0, 44.0, -78.0, -78.0).validate().is_err());
        assert!(BoundingBox::new(43.0, 95.0, -80.0, -78.0).validate().is_err());
        assert!(BoundingBox::new(f64::NAN, 44.0, -80.0, -78.0).validate().is_err());
    }

    #[test]
    fn test_estimate_temporal_descriptors() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let values = WeatherValues {
            tmax: Some(25.0),
            tmin: Some(12.0),
            ..Default::default()
        };
        let estimate = WeatherEstimate::new(3, date, values, InterpolationMethod::SingleStation, 1, 1.4);

        assert_eq!(estimate.year, 2024);
        assert_eq!(estimate.month, 7);
        assert_eq!(estimate.day_of_year, 183);
        assert_eq!(estimate.season, Season::Summer);
        assert_eq!(estimate.temp_range, Some(13.0));
        assert_eq!(estimate.confidence, 1.0);
    }

    #[test]
    fn test_has_any_value() {
        assert!(!WeatherValues::default().has_any());
        assert!(WeatherValues { snwd: Some(0.0), ..Default::default() }.has_any());
    }

    #[test]
    fn test_method_serialization() {
        let json = serde_json::to_string(&InterpolationMethod::SeasonalDefault).unwrap();
        assert_eq!(json, "\"seasonal-default\"");
        assert_eq!(InterpolationMethod::DistanceWeighted.to_string(), "distance-weighted");
    }
}
