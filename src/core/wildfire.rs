//! Wildfire to grid attribution.
//!
//! Each fire record becomes a circular footprint whose radius is derived from
//! the reported burned area. Every eligible (non-water) cell whose centre lies
//! inside the footprint receives an equal share of the area.

use crate::core::geometry::{haversine_km, km_to_lat_degrees, km_to_lon_degrees};
use crate::types::{
    CellFireAttribution, CellId, FireEvent, FireRecord, GridCell, GridError, GridResult,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::f64::consts::PI;
use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Fire footprint parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireConfig {
    /// Upper bound on the footprint radius (km)
    pub radius_cap_km: f64,
}

impl Default for FireConfig {
    fn default() -> Self {
        Self {
            radius_cap_km: 20.0, // guards against bad area reports
        }
    }
}

impl FireConfig {
    pub fn validate(&self) -> GridResult<()> {
        if !self.radius_cap_km.is_finite() || self.radius_cap_km <= 0.0 {
            return Err(GridError::Config(format!(
                "fire radius cap must be positive, got {}",
                self.radius_cap_km
            )));
        }
        Ok(())
    }
}

/// Footprint radius for a burned area: sqrt(area / pi) / 10, capped
pub fn fire_radius_km(area_ha: f64, cap_km: f64) -> f64 {
    ((area_ha / PI).sqrt() / 10.0).min(cap_km)
}

/// Why a fire record produced no event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    NoCellsInRadius,
    InvalidArea,
    DuplicateId,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DropReason::NoCellsInRadius => "no-cells-in-radius",
            DropReason::InvalidArea => "invalid-area",
            DropReason::DuplicateId => "duplicate-id",
        };
        f.pad(name)
    }
}

/// Accepted events with their attribution rows, plus drop counts
#[derive(Debug, Clone, Default)]
pub struct FireAssignment {
    pub events: Vec<FireEvent>,
    pub attributions: Vec<CellFireAttribution>,
    pub dropped: BTreeMap<DropReason, usize>,
}

impl FireAssignment {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }
}

/// Matches fire records against the eligible cells of a grid
pub struct WildfireAssigner {
    cells: Vec<GridCell>,
    config: FireConfig,
}

impl WildfireAssigner {
    /// Water cells are never considered
    pub fn new(cells: &[GridCell], config: FireConfig) -> GridResult<Self> {
        config.validate()?;
        let cells = cells.iter().filter(|c| !c.is_water).cloned().collect();
        Ok(Self { cells, config })
    }

    pub fn eligible_cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Cells whose centre is within `radius_km` of the point, plus the nearest of them
    pub fn cells_within(&self, lat: f64, lon: f64, radius_km: f64) -> (Vec<CellId>, Option<CellId>) {
        let dlat = km_to_lat_degrees(radius_km);
        let dlon = km_to_lon_degrees(radius_km, lat);

        let mut inside = Vec::new();
        let mut nearest: Option<(CellId, f64)> = None;
        for cell in &self.cells {
            // Degree box rejects most cells before the haversine
            if (cell.latitude - lat).abs() > dlat * 1.01 || (cell.longitude - lon).abs() > dlon * 1.01 {
                continue;
            }
            let d = haversine_km(lat, lon, cell.latitude, cell.longitude);
            if d <= radius_km {
                inside.push(cell.id);
                if nearest.map(|(_, best)| d < best).unwrap_or(true) {
                    nearest = Some((cell.id, d));
                }
            }
        }
        (inside, nearest.map(|(id, _)| id))
    }

    fn event_for(&self, record: &FireRecord) -> Result<(FireEvent, Vec<CellFireAttribution>), DropReason> {
        if !record.area_ha.is_finite() || record.area_ha < 0.0 {
            return Err(DropReason::InvalidArea);
        }

        let radius_km = fire_radius_km(record.area_ha, self.config.radius_cap_km);
        let (affected, center) = self.cells_within(record.latitude, record.longitude, radius_km);
        let center_cell_id = match center {
            Some(id) if !affected.is_empty() => id,
            _ => return Err(DropReason::NoCellsInRadius),
        };

        let end_date = record.end_date.unwrap_or(record.start_date);
        let share = record.area_ha / affected.len() as f64;
        let attributions = affected
            .iter()
            .map(|&cell_id| CellFireAttribution {
                cell_id,
                fire_id: record.fire_id.clone(),
                burned_area_ha: share,
                start_date: record.start_date,
                end_date,
            })
            .collect();

        let event = FireEvent {
            fire_id: record.fire_id.clone(),
            center_cell_id,
            start_date: record.start_date,
            end_date,
            total_area_ha: record.area_ha,
            fire_type: record.fire_type.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            radius_km,
            affected_cells: affected,
        };
        Ok((event, attributions))
    }

    /// Attribute every record. Records are processed in input order so that the
    /// first occurrence of a fire id wins.
    pub fn assign(&self, records: &[FireRecord]) -> FireAssignment {
        log::info!(
            "🔥 Assigning {} fire records to {} eligible cells",
            records.len(),
            self.cells.len()
        );

        let mut result = FireAssignment::default();
        let mut seen = HashSet::with_capacity(records.len());
        let mut unique = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.fire_id.as_str()) {
                unique.push(record);
            } else {
                log::warn!("Dropping fire {}: {}", record.fire_id, DropReason::DuplicateId);
                *result.dropped.entry(DropReason::DuplicateId).or_insert(0) += 1;
            }
        }

        #[cfg(feature = "parallel")]
        let outcomes: Vec<_> = unique.par_iter().map(|r| self.event_for(r)).collect();

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<_> = unique.iter().map(|r| self.event_for(r)).collect();

        for (record, outcome) in unique.iter().zip(outcomes) {
            match outcome {
                Ok((event, attributions)) => {
                    log::debug!(
                        "Fire {}: radius {:.2} km, {} cells",
                        event.fire_id,
                        event.radius_km,
                        event.affected_cells.len()
                    );
                    result.events.push(event);
                    result.attributions.extend(attributions);
                }
                Err(reason) => {
                    log::warn!("Dropping fire {}: {}", record.fire_id, reason);
                    *result.dropped.entry(reason).or_insert(0) += 1;
                }
            }
        }

        log::info!(
            "✅ Fire assignment: {} events, {} attributions, {} dropped",
            result.events.len(),
            result.attributions.len(),
            result.dropped_total()
        );
        result
    }
}
