//! End-to-end run: grid, terrain, station proximity, interpolation, fires.
//!
//! Every stage writes its output to the [`DatasetStore`] before the next one
//! starts, and later stages read the committed tables back from the store.

use crate::config::PipelineConfig;
use crate::core::grid::GridGenerator;
use crate::core::interpolation::InterpolationEngine;
use crate::core::proximity::{StationDistanceTable, StationProximityIndex};
use crate::core::resources::{ResourceController, SystemMonitor};
use crate::core::scheduler::{BatchScheduler, CancellationToken, InterpolationSummary};
use crate::core::terrain::{TerrainClassifier, TerrainSummary};
use crate::core::wildfire::{DropReason, WildfireAssigner};
use crate::io::records::{read_fires, read_observations, read_stations, ObservationTable};
use crate::io::store::{DatasetStore, StoreManifest};
use crate::types::{FireRecord, GridError, GridResult, GridSpec, Station, StationObservation};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Validated upstream records consumed by a run
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub stations: Vec<Station>,
    pub observations: Vec<StationObservation>,
    pub fires: Vec<FireRecord>,
}

impl PipelineInputs {
    pub fn from_files<P: AsRef<Path>>(stations: P, observations: P, fires: Option<P>) -> GridResult<Self> {
        Ok(Self {
            stations: read_stations(stations)?,
            observations: read_observations(observations)?,
            fires: match fires {
                Some(path) => read_fires(path)?,
                None => Vec::new(),
            },
        })
    }
}

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> GridResult<Self> {
        if start > end {
            return Err(GridError::Config(format!("date range {} .. {} is reversed", start, end)));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days, both ends included
    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take(self.len()).collect()
    }
}

/// What a run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub cells: usize,
    pub terrain: TerrainSummary,
    pub stations: usize,
    pub station_pairs: usize,
    pub distance_table_reused: bool,
    /// Dates skipped because the store already held them
    pub dates_already_stored: usize,
    pub interpolation: InterpolationSummary,
    pub fire_events: usize,
    pub fire_attributions: usize,
    pub fires_dropped: BTreeMap<DropReason, usize>,
    pub fires_already_stored: usize,
    pub manifest: StoreManifest,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Grid cells:          {}", self.cells)?;
        for (terrain, count) in &self.terrain {
            writeln!(f, "  {:<18} {}", terrain, count)?;
        }
        writeln!(
            f,
            "Stations:            {} ({} pairs{})",
            self.stations,
            self.station_pairs,
            if self.distance_table_reused { ", reused" } else { "" }
        )?;
        writeln!(f, "Weather rows:        {}", self.interpolation.rows_written)?;
        for (method, count) in &self.interpolation.method_counts {
            writeln!(f, "  {:<18} {}", method, count)?;
        }
        if self.dates_already_stored > 0 {
            writeln!(f, "Dates already stored: {}", self.dates_already_stored)?;
        }
        if self.interpolation.cancelled {
            writeln!(f, "Interpolation was cancelled")?;
        }
        writeln!(
            f,
            "Fire events:         {} ({} cell attributions)",
            self.fire_events, self.fire_attributions
        )?;
        for (reason, count) in &self.fires_dropped {
            writeln!(f, "  dropped {:<10} {}", reason, count)?;
        }
        if self.fires_already_stored > 0 {
            writeln!(f, "Fires already stored: {}", self.fires_already_stored)?;
        }
        write!(f, "Elapsed:             {:.1?}", self.elapsed)
    }
}

/// Runs every stage against one store
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate the configuration before any work starts
    pub fn new(config: PipelineConfig) -> GridResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(
        &self,
        inputs: PipelineInputs,
        dates: &[NaiveDate],
        store: &mut DatasetStore,
        monitor: Box<dyn SystemMonitor>,
        cancel: &CancellationToken,
    ) -> GridResult<RunSummary> {
        let start = Instant::now();
        log::info!("🚀 Starting firegrid run over {} dates", dates.len());

        // Grid and terrain
        let grid = GridSpec { bbox: self.config.bbox, spacing_km: self.config.grid_spacing_km };
        store.ensure_grid(&grid)?;
        let generator = GridGenerator::new(grid.bbox, grid.spacing_km)?;
        let mut cells = generator.generate()?;
        let terrain = TerrainClassifier::with_rules(self.config.terrain.clone()).classify(&mut cells);
        store.write_cells(grid, &cells)?;

        // Station structures
        let cutoff = self.config.proximity.station_distance_cutoff_km;
        let reused = store
            .station_distances()
            .map(|t| t.matches(&inputs.stations, cutoff))
            .unwrap_or(false);
        if reused {
            log::info!("Reusing stored station distance table");
        } else {
            let table = StationDistanceTable::compute(&inputs.stations, cutoff);
            store.write_station_distances(&table)?;
        }
        let station_pairs = store.station_distances().map(|t| t.len()).unwrap_or(0);

        let index = StationProximityIndex::new(&inputs.stations, self.config.proximity.clone())?;
        let assignments = index.assign_cells(store.cells());
        store.write_assignments(&assignments)?;

        // Interpolation
        let stored_dates = store.weather_dates()?;
        let pending: Vec<NaiveDate> = dates.iter().copied().filter(|d| !stored_dates.contains(d)).collect();
        let dates_already_stored = dates.len() - pending.len();
        if dates_already_stored > 0 {
            log::info!("Skipping {} dates already in the store", dates_already_stored);
        }

        let engine = Arc::new(InterpolationEngine::new(
            store.cells().to_vec(),
            assignments,
            ObservationTable::from_observations(inputs.observations),
            self.config.seasonal.clone(),
        ));
        let mut controller = ResourceController::new(monitor, self.config.resources.clone())?;
        let interpolation = BatchScheduler::new(engine).run(&pending, &mut controller, store, cancel)?;

        // Fires
        let mut fire_events = 0;
        let mut fire_attributions = 0;
        let mut fires_dropped = BTreeMap::new();
        let mut fires_already_stored = 0;
        if interpolation.cancelled || cancel.is_cancelled() {
            log::warn!("Run cancelled; skipping fire assignment");
        } else {
            let (stored, fresh): (Vec<FireRecord>, Vec<FireRecord>) = inputs
                .fires
                .into_iter()
                .partition(|f| store.has_fire_event(&f.fire_id));
            fires_already_stored = stored.len();

            let assigner = WildfireAssigner::new(store.cells(), self.config.fire.clone())?;
            let assignment = assigner.assign(&fresh);
            for event in &assignment.events {
                store.write_fire_event(event)?;
            }
            store.write_attributions(&assignment.attributions)?;

            fire_events = assignment.events.len();
            fire_attributions = assignment.attributions.len();
            fires_dropped = assignment.dropped;
        }

        let manifest = store.finish()?;
        let summary = RunSummary {
            cells: cells.len(),
            terrain,
            stations: index.station_count(),
            station_pairs,
            distance_table_reused: reused,
            dates_already_stored,
            interpolation,
            fire_events,
            fire_attributions,
            fires_dropped,
            fires_already_stored,
            manifest,
            elapsed: start.elapsed(),
        };
        log::info!("✅ Run completed in {:?}", summary.elapsed);
        Ok(summary)
    }
}
