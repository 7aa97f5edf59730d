use crate::io::records::ObservationTable;
use crate::types::{
    CellId, CellStationAssignment, GridCell, GridError, GridResult, InterpolationMethod,
    MethodCounts, StationLink, WeatherEstimate, WeatherValues,
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Confidence floor for station-derived values and the fixed seasonal confidence
pub const MIN_CONFIDENCE: f64 = 0.1;

/// Distance scale (km) at which single-station confidence reaches the floor
const SINGLE_STATION_CONFIDENCE_KM: f64 = 100.0;

/// Distance scale (km) at which weighted confidence reaches the floor
const WEIGHTED_CONFIDENCE_KM: f64 = 200.0;

/// Stations closer than this are weighted as if at this distance
const MIN_WEIGHT_DISTANCE_KM: f64 = 0.01;

/// Smooth annual climatology used when no station reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalCurve {
    /// Annual mean temperature (C)
    pub mean_temp_c: f64,
    /// Half the peak-to-trough annual temperature swing (C)
    pub temp_amplitude_c: f64,
    /// Month with the highest mean temperature (1-12)
    pub warmest_month: u32,
    /// Typical daily max-min spread (C)
    pub diurnal_range_c: f64,
    /// Annual mean daily precipitation (mm)
    pub mean_precip_mm: f64,
    /// Half the annual precipitation swing (mm)
    pub precip_amplitude_mm: f64,
    /// Month with the highest precipitation (1-12)
    pub wettest_month: u32,
    /// Snow depth per degree below freezing (cm)
    pub snow_depth_per_degree_cm: f64,
}

impl Default for SeasonalCurve {
    fn default() -> Self {
        Self {
            mean_temp_c: 5.0,              // Southern Canada annual mean
            temp_amplitude_c: 15.0,        // -10 C in January, 20 C in July
            warmest_month: 7,
            diurnal_range_c: 10.0,
            mean_precip_mm: 2.5,
            precip_amplitude_mm: 1.0,
            wettest_month: 7,
            snow_depth_per_degree_cm: 2.0,
        }
    }
}

impl SeasonalCurve {
    pub fn validate(&self) -> GridResult<()> {
        if !(1..=12).contains(&self.warmest_month) || !(1..=12).contains(&self.wettest_month) {
            return Err(GridError::Config(format!(
                "seasonal curve months must be 1-12, got warmest {} / wettest {}",
                self.warmest_month, self.wettest_month
            )));
        }
        if self.diurnal_range_c < 0.0 || self.snow_depth_per_degree_cm < 0.0 {
            return Err(GridError::Config(
                "seasonal diurnal range and snow depth factor must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Climatological values for a month (1-12)
    pub fn values_for_month(&self, month: u32) -> WeatherValues {
        let temp_phase = 2.0 * PI * (month as f64 - self.warmest_month as f64) / 12.0;
        let precip_phase = 2.0 * PI * (month as f64 - self.wettest_month as f64) / 12.0;

        let tavg = self.mean_temp_c + self.temp_amplitude_c * temp_phase.cos();
        let prcp = (self.mean_precip_mm + self.precip_amplitude_mm * precip_phase.cos()).max(0.0);
        let snwd = if tavg < 0.0 { -tavg * self.snow_depth_per_degree_cm } else { 0.0 };

        WeatherValues {
            tmax: Some(tavg + self.diurnal_range_c / 2.0),
            tmin: Some(tavg - self.diurnal_range_c / 2.0),
            tavg: Some(tavg),
            prcp: Some(prcp),
            snwd: Some(snwd),
        }
    }
}

/// Fixed values written for water cells
pub fn water_placeholder(cell_id: CellId, date: NaiveDate) -> WeatherEstimate {
    let zero = WeatherValues {
        tmax: Some(0.0),
        tmin: Some(0.0),
        tavg: Some(0.0),
        prcp: Some(0.0),
        snwd: Some(0.0),
    };
    WeatherEstimate::new(cell_id, date, zero, InterpolationMethod::WaterPlaceholder, 0, 1.0)
}

/// Inverse-square-distance weighted mean of one variable.
///
/// Only stations reporting the variable contribute; `None` when none do.
fn weighted_mean<F>(contributions: &[(&WeatherValues, f64)], pick: F) -> Option<f64>
where
    F: Fn(&WeatherValues) -> Option<f64>,
{
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for &(values, distance) in contributions {
        if let Some(v) = pick(values) {
            let d = distance.max(MIN_WEIGHT_DISTANCE_KM);
            let w = 1.0 / (d * d);
            weighted_sum += w * v;
            total_weight += w;
        }
    }
    (total_weight > 0.0).then(|| weighted_sum / total_weight)
}

/// Blend station reports into a single estimate.
///
/// `contributions` pairs each reporting station's values with its distance to
/// the cell centre. An empty slice yields `None`; the caller falls back to the
/// seasonal curve.
pub fn blend_stations(
    cell_id: CellId,
    date: NaiveDate,
    contributions: &[(&WeatherValues, f64)],
) -> Option<WeatherEstimate> {
    let nearest = contributions
        .iter()
        .map(|(_, d)| *d)
        .min_by(|a, b| a.total_cmp(b))?;

    if contributions.len() == 1 {
        let confidence = (1.0 - nearest / SINGLE_STATION_CONFIDENCE_KM).max(MIN_CONFIDENCE);
        return Some(WeatherEstimate::new(
            cell_id,
            date,
            *contributions[0].0,
            InterpolationMethod::SingleStation,
            1,
            confidence,
        ));
    }

    let values = WeatherValues {
        tmax: weighted_mean(contributions, |v| v.tmax),
        tmin: weighted_mean(contributions, |v| v.tmin),
        tavg: weighted_mean(contributions, |v| v.tavg),
        prcp: weighted_mean(contributions, |v| v.prcp),
        snwd: weighted_mean(contributions, |v| v.snwd),
    };
    let confidence = (1.0 - nearest / WEIGHTED_CONFIDENCE_KM).max(MIN_CONFIDENCE);

    Some(WeatherEstimate::new(
        cell_id,
        date,
        values,
        InterpolationMethod::DistanceWeighted,
        contributions.len() as u32,
        confidence,
    ))
}

/// One batch's rows, accumulated by a worker and handed to the writer
#[derive(Debug, Clone, Default)]
pub struct WeatherBatch {
    pub index: usize,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<WeatherEstimate>,
    pub counts: MethodCounts,
}

impl WeatherBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read-only snapshot of everything needed to interpolate any (cell, date)
pub struct InterpolationEngine {
    cells: Vec<GridCell>,
    assignments: HashMap<CellId, Vec<StationLink>>,
    observations: ObservationTable,
    seasonal: SeasonalCurve,
}

impl InterpolationEngine {
    pub fn new(
        cells: Vec<GridCell>,
        assignments: Vec<CellStationAssignment>,
        observations: ObservationTable,
        seasonal: SeasonalCurve,
    ) -> Self {
        let assignments = assignments
            .into_iter()
            .map(|a| (a.cell_id, a.stations))
            .collect();
        Self { cells, assignments, observations, seasonal }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Estimate for one cell on one date
    pub fn estimate(&self, cell: &GridCell, date: NaiveDate) -> WeatherEstimate {
        if cell.is_water {
            return water_placeholder(cell.id, date);
        }

        let contributions: Vec<(&WeatherValues, f64)> = self
            .assignments
            .get(&cell.id)
            .map(|links| {
                links
                    .iter()
                    .filter_map(|link| {
                        // A row with no reported variable is not data
                        self.observations
                            .get(&link.station_id, date)
                            .filter(|values| values.has_any())
                            .map(|values| (values, link.distance_km))
                    })
                    .collect()
            })
            .unwrap_or_default();

        blend_stations(cell.id, date, &contributions).unwrap_or_else(|| {
            WeatherEstimate::new(
                cell.id,
                date,
                self.seasonal.values_for_month(date.month()),
                InterpolationMethod::SeasonalDefault,
                0,
                MIN_CONFIDENCE,
            )
        })
    }

    /// Every cell for every date in `dates`
    pub fn interpolate_batch(&self, index: usize, dates: &[NaiveDate]) -> WeatherBatch {
        let mut rows = Vec::with_capacity(dates.len() * self.cells.len());
        let mut counts = MethodCounts::new();

        for &date in dates {
            for cell in &self.cells {
                let estimate = self.estimate(cell, date);
                *counts.entry(estimate.method).or_insert(0) += 1;
                rows.push(estimate);
            }
        }

        log::debug!(
            "Batch {}: {} dates, {} rows",
            index,
            dates.len(),
            rows.len()
        );

        WeatherBatch {
            index,
            dates: dates.to_vec(),
            rows,
            counts,
        }
    }
}
