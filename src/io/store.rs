//! Dataset store backed by an embedded `redb` database.
//!
//! The database file lives in the store directory next to a `manifest.json`
//! summary. Weather rows are keyed by `(cell_id, day)`, so the database
//! enforces uniqueness and per-cell queries are key ranges; a `(day, cell_id)`
//! index serves date-range queries. Each weather batch is written in one
//! transaction, so a rejected batch leaves nothing behind.
//!
//! The grid, station distance table and fire events are small next to the
//! weather table and are also cached in memory for the pipeline stages that
//! read them back.

use crate::core::interpolation::WeatherBatch;
use crate::core::proximity::StationDistanceTable;
use crate::core::scheduler::WeatherSink;
use crate::io::tables::{
    attribution_cell_range, attribution_key, fire_index_key, fire_index_range, ASSIGNMENTS,
    ATTRIBUTIONS, ATTRIBUTIONS_BY_FIRE, CELLS, FIRE_EVENTS, GRID_KEY, META, STATION_DISTANCES,
    STATION_TABLE_KEY, WEATHER, WEATHER_BY_DATE, WEATHER_DATES,
};
use crate::types::{
    BoundingBox, CellFireAttribution, CellId, CellStationAssignment, FireEvent, GridCell,
    GridError, GridResult, GridSpec, StationDistance, WeatherEstimate,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const DATABASE_FILE: &str = "firegrid.redb";
const MANIFEST_FILE: &str = "manifest.json";

const FORMAT_VERSION: u32 = 2;

/// Summary written next to the database by [`DatasetStore::finish`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub format_version: u32,
    pub updated_at: DateTime<Utc>,
    /// Grid the cell table was generated from
    pub grid: Option<GridSpec>,
    pub cell_count: usize,
    pub weather_rows: usize,
    pub station_distance_pairs: usize,
    pub fire_events: usize,
    pub fire_attributions: usize,
    /// Identifies the station set the distance table was computed from
    pub station_fingerprint: Option<u64>,
    pub station_cutoff_km: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StationTableHeader {
    fingerprint: u64,
    cutoff_km: f64,
}

/// Persisted grid, weather and fire dataset
pub struct DatasetStore {
    dir: PathBuf,
    db: Database,
    grid: Option<GridSpec>,
    cells: Vec<GridCell>,
    cell_index: HashMap<CellId, usize>,
    /// Positions into `cells`, ascending by latitude
    by_latitude: Vec<usize>,
    distances: Option<StationDistanceTable>,
    weather_rows: usize,
    fire_events: Vec<FireEvent>,
    fire_ids: HashSet<String>,
}

impl DatasetStore {
    /// Create an empty store in `dir`, replacing any dataset already there
    pub fn create<P: AsRef<Path>>(dir: P) -> GridResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        log::info!("📁 Creating dataset store at {}", dir.display());
        fs::create_dir_all(&dir)?;

        for name in [DATABASE_FILE, MANIFEST_FILE] {
            let path = dir.join(name);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        let db = Database::create(dir.join(DATABASE_FILE))?;
        create_tables(&db)?;
        Ok(Self {
            dir,
            db,
            grid: None,
            cells: Vec::new(),
            cell_index: HashMap::new(),
            by_latitude: Vec::new(),
            distances: None,
            weather_rows: 0,
            fire_events: Vec::new(),
            fire_ids: HashSet::new(),
        })
    }

    /// True when `dir` holds a store database
    pub fn exists<P: AsRef<Path>>(dir: P) -> bool {
        dir.as_ref().join(DATABASE_FILE).is_file()
    }

    /// Open an existing store and load its cached tables
    pub fn open<P: AsRef<Path>>(dir: P) -> GridResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !Self::exists(&dir) {
            return Err(GridError::Store(format!("{} is not a dataset directory", dir.display())));
        }
        log::info!("📂 Opening dataset store at {}", dir.display());

        let db = Database::open(dir.join(DATABASE_FILE))?;
        create_tables(&db)?;

        let txn = db.begin_read()?;
        let meta = txn.open_table(META)?;
        let grid: Option<GridSpec> = match meta.get(GRID_KEY)? {
            Some(bytes) => Some(decode(bytes.value())?),
            None => None,
        };
        let header: Option<StationTableHeader> = match meta.get(STATION_TABLE_KEY)? {
            Some(bytes) => Some(decode(bytes.value())?),
            None => None,
        };

        let mut cells = Vec::new();
        for entry in txn.open_table(CELLS)?.iter()? {
            let (_, bytes) = entry?;
            cells.push(decode::<GridCell>(bytes.value())?);
        }

        let distances = match header {
            Some(header) => {
                let mut pairs = Vec::new();
                for entry in txn.open_table(STATION_DISTANCES)?.iter()? {
                    let (_, bytes) = entry?;
                    pairs.push(decode::<StationDistance>(bytes.value())?);
                }
                Some(StationDistanceTable::from_pairs(header.fingerprint, header.cutoff_km, pairs))
            }
            None => None,
        };

        let weather_rows = txn.open_table(WEATHER)?.len()? as usize;

        let mut fire_events = Vec::new();
        for entry in txn.open_table(FIRE_EVENTS)?.iter()? {
            let (_, bytes) = entry?;
            fire_events.push(decode::<FireEvent>(bytes.value())?);
        }
        let fire_ids = fire_events.iter().map(|e| e.fire_id.clone()).collect();
        drop(meta);
        drop(txn);

        let cell_index = index_cells(&cells)?;
        let by_latitude = latitude_order(&cells);
        log::info!(
            "Loaded {} cells, {} weather rows, {} fire events",
            cells.len(),
            weather_rows,
            fire_events.len()
        );

        Ok(Self {
            dir,
            db,
            grid,
            cells,
            cell_index,
            by_latitude,
            distances,
            weather_rows,
            fire_events,
            fire_ids,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ---- writes ----

    /// Fail when the store already holds weather or fire rows for a different grid
    pub fn ensure_grid(&self, grid: &GridSpec) -> GridResult<()> {
        match self.grid {
            Some(stored) if stored != *grid && (self.weather_rows > 0 || !self.fire_events.is_empty()) => {
                Err(GridError::Config(format!(
                    "store at {} holds data for grid {}; cannot continue it with grid {}",
                    self.dir.display(),
                    stored,
                    grid
                )))
            }
            _ => Ok(()),
        }
    }

    /// Replace the cell table with the cells generated from `grid`
    pub fn write_cells(&mut self, grid: GridSpec, cells: &[GridCell]) -> GridResult<()> {
        self.ensure_grid(&grid)?;
        let cell_index = index_cells(cells)?;

        let txn = self.db.begin_write()?;
        txn.delete_table(CELLS)?;
        {
            let mut table = txn.open_table(CELLS)?;
            for cell in cells {
                table.insert(cell.id, encode(cell)?.as_slice())?;
            }
            let mut meta = txn.open_table(META)?;
            meta.insert(GRID_KEY, encode(&grid)?.as_slice())?;
        }
        txn.commit()?;

        self.grid = Some(grid);
        self.cells = cells.to_vec();
        self.cell_index = cell_index;
        self.by_latitude = latitude_order(&self.cells);
        log::debug!("Stored {} cells for grid {}", self.cells.len(), grid);
        Ok(())
    }

    /// Replace the station distance table
    pub fn write_station_distances(&mut self, table: &StationDistanceTable) -> GridResult<()> {
        let header = StationTableHeader { fingerprint: table.fingerprint(), cutoff_km: table.cutoff_km() };

        let txn = self.db.begin_write()?;
        txn.delete_table(STATION_DISTANCES)?;
        {
            let mut pairs = txn.open_table(STATION_DISTANCES)?;
            for (i, pair) in table.pairs().iter().enumerate() {
                pairs.insert(i as u64, encode(pair)?.as_slice())?;
            }
            let mut meta = txn.open_table(META)?;
            meta.insert(STATION_TABLE_KEY, encode(&header)?.as_slice())?;
        }
        txn.commit()?;

        self.distances = Some(table.clone());
        log::debug!("Stored {} station distance pairs", table.len());
        Ok(())
    }

    /// Replace the cell to station assignment table
    pub fn write_assignments(&mut self, assignments: &[CellStationAssignment]) -> GridResult<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(ASSIGNMENTS)?;
        let written = insert_assignments(&txn, assignments);
        finish_transaction(txn, written)
    }

    /// Store one batch of weather rows in a single transaction.
    ///
    /// The whole batch is rejected if any `(cell_id, date)` key is already
    /// stored or repeats within the batch.
    pub fn commit_weather(&mut self, batch: WeatherBatch) -> GridResult<usize> {
        let txn = self.db.begin_write()?;
        let written = insert_weather(&txn, &batch.rows);
        finish_transaction(txn, written)?;

        self.weather_rows += batch.rows.len();
        Ok(batch.rows.len())
    }

    /// Store one fire event; fire ids are unique
    pub fn write_fire_event(&mut self, event: &FireEvent) -> GridResult<()> {
        if self.fire_ids.contains(&event.fire_id) {
            return Err(GridError::DuplicateKey {
                table: "fire_events",
                key: event.fire_id.clone(),
            });
        }

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FIRE_EVENTS)?;
            table.insert(event.fire_id.as_str(), encode(event)?.as_slice())?;
        }
        txn.commit()?;

        self.fire_ids.insert(event.fire_id.clone());
        self.fire_events.push(event.clone());
        Ok(())
    }

    /// Store attribution rows; `(cell_id, fire_id)` is unique
    pub fn write_attributions(&mut self, rows: &[CellFireAttribution]) -> GridResult<()> {
        let txn = self.db.begin_write()?;
        let written = insert_attributions(&txn, rows);
        finish_transaction(txn, written)
    }

    /// Record the manifest
    pub fn finish(&mut self) -> GridResult<StoreManifest> {
        let fire_attributions = {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(ATTRIBUTIONS)?;
            table.len()? as usize
        };

        let manifest = StoreManifest {
            format_version: FORMAT_VERSION,
            updated_at: Utc::now(),
            grid: self.grid,
            cell_count: self.cells.len(),
            weather_rows: self.weather_rows,
            station_distance_pairs: self.distances.as_ref().map(|d| d.len()).unwrap_or(0),
            fire_events: self.fire_events.len(),
            fire_attributions,
            station_fingerprint: self.distances.as_ref().map(|d| d.fingerprint()),
            station_cutoff_km: self.distances.as_ref().map(|d| d.cutoff_km()),
        };
        let file = File::create(self.dir.join(MANIFEST_FILE))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &manifest)?;
        log::info!("💾 Dataset store finalized: {} weather rows", manifest.weather_rows);
        Ok(manifest)
    }

    // ---- reads ----

    pub fn grid(&self) -> Option<&GridSpec> {
        self.grid.as_ref()
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn cell(&self, id: CellId) -> Option<&GridCell> {
        self.cell_index.get(&id).map(|&i| &self.cells[i])
    }

    /// Cells whose centre lies inside `bbox`, ascending by latitude
    pub fn cells_in_bbox(&self, bbox: &BoundingBox) -> Vec<&GridCell> {
        let first = self
            .by_latitude
            .partition_point(|&i| self.cells[i].latitude < bbox.min_lat);
        self.by_latitude[first..]
            .iter()
            .map(|&i| &self.cells[i])
            .take_while(|c| c.latitude <= bbox.max_lat)
            .filter(|c| bbox.contains(c.latitude, c.longitude))
            .collect()
    }

    pub fn station_distances(&self) -> Option<&StationDistanceTable> {
        self.distances.as_ref()
    }

    pub fn assignment(&self, cell_id: CellId) -> GridResult<Option<CellStationAssignment>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ASSIGNMENTS)?;
        let result = match table.get(cell_id)? {
            Some(bytes) => Some(decode(bytes.value())?),
            None => None,
        };
        Ok(result)
    }

    pub fn weather_row_count(&self) -> usize {
        self.weather_rows
    }

    pub fn has_weather(&self, cell_id: CellId, date: NaiveDate) -> GridResult<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(WEATHER)?;
        let found = table.get((cell_id, day_key(date)))?.is_some();
        Ok(found)
    }

    /// Dates with committed weather rows, ascending
    pub fn weather_dates(&self) -> GridResult<BTreeSet<NaiveDate>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(WEATHER_DATES)?;
        let mut dates = BTreeSet::new();
        for entry in table.iter()? {
            let (day, _) = entry?;
            dates.insert(date_from_key(day.value())?);
        }
        Ok(dates)
    }

    /// Rows for one cell with `start <= date <= end`, ordered by date
    pub fn weather_for_cell(
        &self,
        cell_id: CellId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> GridResult<Vec<WeatherEstimate>> {
        if start > end {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_read()?;
        let table = txn.open_table(WEATHER)?;
        let mut rows = Vec::new();
        for entry in table.range((cell_id, day_key(start))..=(cell_id, day_key(end)))? {
            let (_, bytes) = entry?;
            rows.push(decode(bytes.value())?);
        }
        Ok(rows)
    }

    /// Rows for every cell with `start <= date <= end`, ordered by (date, cell)
    pub fn weather_in_range(&self, start: NaiveDate, end: NaiveDate) -> GridResult<Vec<WeatherEstimate>> {
        if start > end {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_read()?;
        let index = txn.open_table(WEATHER_BY_DATE)?;
        let table = txn.open_table(WEATHER)?;
        let mut rows = Vec::new();
        for entry in index.range((day_key(start), 0)..=(day_key(end), CellId::MAX))? {
            let (key, _) = entry?;
            let (day, cell_id) = key.value();
            let bytes = table
                .get((cell_id, day))?
                .ok_or_else(|| GridError::Store(format!("date index points at missing row {}/{}", cell_id, day)))?;
            rows.push(decode(bytes.value())?);
        }
        Ok(rows)
    }

    /// Rows for cells inside `bbox` with `start <= date <= end`, ordered by (date, cell)
    pub fn weather_in_bbox(
        &self,
        bbox: &BoundingBox,
        start: NaiveDate,
        end: NaiveDate,
    ) -> GridResult<Vec<WeatherEstimate>> {
        if start > end {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_read()?;
        let table = txn.open_table(WEATHER)?;
        let mut rows: Vec<WeatherEstimate> = Vec::new();
        for cell in self.cells_in_bbox(bbox) {
            for entry in table.range((cell.id, day_key(start))..=(cell.id, day_key(end)))? {
                let (_, bytes) = entry?;
                rows.push(decode(bytes.value())?);
            }
        }
        rows.sort_by_key(|r| (r.date, r.cell_id));
        Ok(rows)
    }

    pub fn fire_events(&self) -> &[FireEvent] {
        &self.fire_events
    }

    pub fn has_fire_event(&self, fire_id: &str) -> bool {
        self.fire_ids.contains(fire_id)
    }

    /// Events active at any point in `[start, end]`
    pub fn fire_events_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<&FireEvent> {
        self.fire_events
            .iter()
            .filter(|e| e.start_date <= end && e.end_date >= start)
            .collect()
    }

    pub fn attributions_for_cell(&self, cell_id: CellId) -> GridResult<Vec<CellFireAttribution>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ATTRIBUTIONS)?;
        let (start, end) = attribution_cell_range(cell_id);
        let mut rows = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, bytes) = entry?;
            rows.push(decode(bytes.value())?);
        }
        Ok(rows)
    }

    pub fn attributions_for_fire(&self, fire_id: &str) -> GridResult<Vec<CellFireAttribution>> {
        let txn = self.db.begin_read()?;
        let index = txn.open_table(ATTRIBUTIONS_BY_FIRE)?;
        let table = txn.open_table(ATTRIBUTIONS)?;
        let (start, end) = fire_index_range(fire_id);
        let mut rows = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (_, cell_id) = entry?;
            let key = attribution_key(cell_id.value(), fire_id);
            let bytes = table
                .get(key.as_str())?
                .ok_or_else(|| GridError::Store(format!("fire index points at missing row {}", key)))?;
            rows.push(decode(bytes.value())?);
        }
        Ok(rows)
    }

    pub fn attributions_in_bbox(&self, bbox: &BoundingBox) -> GridResult<Vec<CellFireAttribution>> {
        let mut rows = Vec::new();
        for cell in self.cells_in_bbox(bbox) {
            rows.extend(self.attributions_for_cell(cell.id)?);
        }
        Ok(rows)
    }
}

impl WeatherSink for DatasetStore {
    fn commit_weather(&mut self, batch: WeatherBatch) -> GridResult<usize> {
        DatasetStore::commit_weather(self, batch)
    }
}

/// Make sure every table exists so read transactions can open them
fn create_tables(db: &Database) -> GridResult<()> {
    let txn = db.begin_write()?;
    txn.open_table(META)?;
    txn.open_table(CELLS)?;
    txn.open_table(STATION_DISTANCES)?;
    txn.open_table(ASSIGNMENTS)?;
    txn.open_table(WEATHER)?;
    txn.open_table(WEATHER_BY_DATE)?;
    txn.open_table(WEATHER_DATES)?;
    txn.open_table(FIRE_EVENTS)?;
    txn.open_table(ATTRIBUTIONS)?;
    txn.open_table(ATTRIBUTIONS_BY_FIRE)?;
    txn.commit()?;
    Ok(())
}

/// Commit when the writes succeeded, otherwise roll everything back
fn finish_transaction(txn: WriteTransaction, written: GridResult<()>) -> GridResult<()> {
    match written {
        Ok(()) => {
            txn.commit()?;
            Ok(())
        }
        Err(err) => {
            txn.abort()?;
            Err(err)
        }
    }
}

fn insert_assignments(txn: &WriteTransaction, assignments: &[CellStationAssignment]) -> GridResult<()> {
    let mut table = txn.open_table(ASSIGNMENTS)?;
    for a in assignments {
        if table.insert(a.cell_id, encode(a)?.as_slice())?.is_some() {
            return Err(GridError::DuplicateKey {
                table: "assignments",
                key: a.cell_id.to_string(),
            });
        }
    }
    Ok(())
}

fn insert_weather(txn: &WriteTransaction, rows: &[WeatherEstimate]) -> GridResult<()> {
    let mut table = txn.open_table(WEATHER)?;
    let mut index = txn.open_table(WEATHER_BY_DATE)?;
    let mut per_day: BTreeMap<i32, u64> = BTreeMap::new();
    for row in rows {
        let day = day_key(row.date);
        if table.insert((row.cell_id, day), encode(row)?.as_slice())?.is_some() {
            return Err(duplicate_weather(row.key()));
        }
        index.insert((day, row.cell_id), ())?;
        *per_day.entry(day).or_insert(0) += 1;
    }

    let mut dates = txn.open_table(WEATHER_DATES)?;
    for (day, count) in per_day {
        let stored = dates.get(day)?.map(|n| n.value()).unwrap_or(0);
        dates.insert(day, stored + count)?;
    }
    Ok(())
}

fn insert_attributions(txn: &WriteTransaction, rows: &[CellFireAttribution]) -> GridResult<()> {
    let mut table = txn.open_table(ATTRIBUTIONS)?;
    let mut index = txn.open_table(ATTRIBUTIONS_BY_FIRE)?;
    for row in rows {
        let key = attribution_key(row.cell_id, &row.fire_id);
        if table.insert(key.as_str(), encode(row)?.as_slice())?.is_some() {
            return Err(GridError::DuplicateKey {
                table: "cell_fire_attributions",
                key: format!("{}/{}", row.cell_id, row.fire_id),
            });
        }
        index.insert(fire_index_key(&row.fire_id, row.cell_id).as_str(), row.cell_id)?;
    }
    Ok(())
}

fn duplicate_weather((cell_id, date): (CellId, NaiveDate)) -> GridError {
    GridError::DuplicateKey {
        table: "weather",
        key: format!("cell {} on {}", cell_id, date),
    }
}

fn day_key(date: NaiveDate) -> i32 {
    date.num_days_from_ce()
}

fn date_from_key(day: i32) -> GridResult<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(day)
        .ok_or_else(|| GridError::Store(format!("day {} is out of range", day)))
}

fn encode<T: Serialize>(row: &T) -> GridResult<Vec<u8>> {
    Ok(serde_json::to_vec(row)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> GridResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn index_cells(cells: &[GridCell]) -> GridResult<HashMap<CellId, usize>> {
    let mut index = HashMap::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        if index.insert(cell.id, i).is_some() {
            return Err(GridError::DuplicateKey { table: "cells", key: cell.id.to_string() });
        }
    }
    Ok(index)
}

fn latitude_order(cells: &[GridCell]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..cells.len()).collect();
    order.sort_by(|&a, &b| cells[a].latitude.total_cmp(&cells[b].latitude));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InterpolationMethod, StationLink, Terrain, WeatherValues};
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn grid() -> GridSpec {
        GridSpec { bbox: BoundingBox::new(45.0, 46.0, -75.0, -74.0), spacing_km: 100.0 }
    }

    fn cells() -> Vec<GridCell> {
        (0..4)
            .map(|id| GridCell {
                id,
                row: id / 2,
                col: id % 2,
                latitude: 45.0 + (id / 2) as f64,
                longitude: -75.0 + (id % 2) as f64,
                terrain: Terrain::Land,
                is_water: false,
                is_urban: false,
            })
            .collect()
    }

    fn batch(index: usize, dates: &[NaiveDate], cell_ids: &[CellId]) -> WeatherBatch {
        let mut rows = Vec::new();
        for &date in dates {
            for &cell_id in cell_ids {
                let values = WeatherValues { tmax: Some(cell_id as f64), ..Default::default() };
                rows.push(WeatherEstimate::new(cell_id, date, values, InterpolationMethod::SingleStation, 1, 0.9));
            }
        }
        WeatherBatch { index, dates: dates.to_vec(), rows, counts: Default::default() }
    }

    #[test]
    fn test_commit_and_query_weather() {
        let tmp = TempDir::new().unwrap();
        let mut store = DatasetStore::create(tmp.path()).unwrap();
        store.write_cells(grid(), &cells()).unwrap();

        assert_eq!(store.commit_weather(batch(0, &[day(1), day(2)], &[0, 1, 2, 3])).unwrap(), 8);
        assert_eq!(store.commit_weather(batch(1, &[day(3)], &[0, 1, 2, 3])).unwrap(), 4);
        assert_eq!(store.weather_row_count(), 12);

        let rows = store.weather_for_cell(2, day(2), day(3)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.cell_id == 2 && r.tmax == Some(2.0)));
        assert_eq!(rows[0].date, day(2));

        let bbox = BoundingBox::new(44.5, 45.5, -75.5, -73.5);
        let rows = store.weather_in_bbox(&bbox, day(1), day(3)).unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| r.cell_id < 2));
        assert_eq!((rows[0].date, rows[0].cell_id), (day(1), 0));

        let rows = store.weather_in_range(day(3), day(3)).unwrap();
        assert_eq!(rows.iter().map(|r| r.cell_id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(store.weather_dates().unwrap().len(), 3);
        assert!(store.weather_in_range(day(4), day(9)).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_batch_rejected_atomically() {
        let tmp = TempDir::new().unwrap();
        let mut store = DatasetStore::create(tmp.path()).unwrap();
        store.commit_weather(batch(0, &[day(1)], &[0, 1])).unwrap();

        let err = store.commit_weather(batch(1, &[day(2), day(1)], &[0, 1])).unwrap_err();
        assert!(matches!(err, GridError::DuplicateKey { table: "weather", .. }));
        // Nothing from the rejected batch reached the store
        assert_eq!(store.weather_row_count(), 2);
        assert!(!store.has_weather(0, day(2)).unwrap());
        assert_eq!(store.weather_in_range(day(1), day(9)).unwrap().len(), 2);
        assert_eq!(store.weather_dates().unwrap().len(), 1);

        // A key repeated inside one batch is also rejected whole
        let mut repeated = batch(2, &[day(3)], &[0, 1]);
        repeated.rows.push(repeated.rows[0].clone());
        assert!(store.commit_weather(repeated).is_err());
        assert!(!store.has_weather(1, day(3)).unwrap());
    }

    #[test]
    fn test_reopen_keeps_keys_and_tables() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = DatasetStore::create(tmp.path()).unwrap();
            store.write_cells(grid(), &cells()).unwrap();
            store
                .write_assignments(&[CellStationAssignment {
                    cell_id: 3,
                    stations: vec![StationLink { station_id: "A".to_string(), distance_km: 12.0 }],
                }])
                .unwrap();
            store.commit_weather(batch(0, &[day(1)], &[0, 1, 2, 3])).unwrap();
            store.finish().unwrap();
        }

        let mut store = DatasetStore::open(tmp.path()).unwrap();
        assert_eq!(store.grid(), Some(&grid()));
        assert_eq!(store.cells().len(), 4);
        assert_eq!(store.cell(3).unwrap().row, 1);
        assert_eq!(store.weather_row_count(), 4);
        assert_eq!(store.assignment(3).unwrap().unwrap().stations[0].station_id, "A");
        assert!(store.assignment(0).unwrap().is_none());

        assert!(store.commit_weather(batch(1, &[day(1)], &[0])).is_err());
        assert!(store.commit_weather(batch(1, &[day(2)], &[0])).is_ok());
        assert_eq!(store.weather_row_count(), 5);
    }

    #[test]
    fn test_grid_change_rejected_once_weather_exists() {
        let tmp = TempDir::new().unwrap();
        let mut store = DatasetStore::create(tmp.path()).unwrap();
        let other = GridSpec { spacing_km: 25.0, ..grid() };

        // Free to regrid while nothing depends on the cells
        store.write_cells(other, &cells()).unwrap();
        store.write_cells(grid(), &cells()).unwrap();
        store.commit_weather(batch(0, &[day(1)], &[0, 1, 2, 3])).unwrap();

        assert!(store.write_cells(grid(), &cells()).is_ok());
        let err = store.write_cells(other, &cells()[..2]).unwrap_err();
        assert!(matches!(err, GridError::Config(_)));
        assert_eq!(store.cells().len(), 4);
        assert_eq!(store.grid(), Some(&grid()));
    }

    #[test]
    fn test_fire_tables() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = DatasetStore::create(tmp.path()).unwrap();
            store.write_cells(grid(), &cells()).unwrap();

            let event = FireEvent {
                fire_id: "F1".to_string(),
                center_cell_id: 0,
                start_date: day(5),
                end_date: day(9),
                total_area_ha: 10.0,
                fire_type: "wildfire".to_string(),
                latitude: 45.0,
                longitude: -75.0,
                radius_km: 0.18,
                affected_cells: vec![0, 2],
            };
            store.write_fire_event(&event).unwrap();
            assert!(matches!(
                store.write_fire_event(&event),
                Err(GridError::DuplicateKey { table: "fire_events", .. })
            ));

            let rows: Vec<CellFireAttribution> = [0, 2]
                .iter()
                .map(|&cell_id| CellFireAttribution {
                    cell_id,
                    fire_id: "F1".to_string(),
                    burned_area_ha: 5.0,
                    start_date: day(5),
                    end_date: day(9),
                })
                .collect();
            store.write_attributions(&rows).unwrap();
            assert!(store.write_attributions(&rows[..1]).is_err());

            assert_eq!(store.fire_events_in_range(day(8), day(20)).len(), 1);
            assert!(store.fire_events_in_range(day(10), day(20)).is_empty());
            assert_eq!(store.attributions_for_fire("F1").unwrap().len(), 2);
            assert!(store.attributions_for_fire("F").unwrap().is_empty());
            assert_eq!(store.attributions_for_cell(2).unwrap().len(), 1);
            let bbox = BoundingBox::new(45.5, 46.5, -75.5, -74.5);
            assert_eq!(store.attributions_in_bbox(&bbox).unwrap().len(), 1);
            assert_eq!(store.finish().unwrap().fire_attributions, 2);
        }

        let reopened = DatasetStore::open(tmp.path()).unwrap();
        assert!(reopened.has_fire_event("F1"));
        assert_eq!(reopened.attributions_for_fire("F1").unwrap().len(), 2);
    }

    #[test]
    fn test_open_requires_database() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(DatasetStore::open(tmp.path()), Err(GridError::Store(_))));
    }
}
