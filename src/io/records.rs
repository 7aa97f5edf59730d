use crate::types::{
    FireRecord, GridError, GridResult, Station, StationId, StationObservation, WeatherValues,
};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read a validated station table
pub fn read_stations<P: AsRef<Path>>(path: P) -> GridResult<Vec<Station>> {
    read_records(path)
}

/// Read a validated per-station daily observation table
pub fn read_observations<P: AsRef<Path>>(path: P) -> GridResult<Vec<StationObservation>> {
    read_records(path)
}

/// Read a validated wildfire table
pub fn read_fires<P: AsRef<Path>>(path: P) -> GridResult<Vec<FireRecord>> {
    read_records(path)
}

/// Read records from either a JSON array or a JSON Lines file
pub fn read_records<T, P>(path: P) -> GridResult<Vec<T>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    log::info!("Reading records from: {}", path.display());

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    // Peek at the first significant byte to tell an array from JSON Lines
    let first = loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(Vec::new());
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => {
                let byte = buf[pos];
                reader.consume(pos);
                break byte;
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    };

    let records: Vec<T> = if first == b'[' {
        serde_json::from_reader(reader).map_err(|e| {
            GridError::InvalidRecord(format!("{}: {}", path.display(), e))
        })?
    } else {
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                GridError::InvalidRecord(format!("{}:{}: {}", path.display(), line_no + 1, e))
            })?;
            records.push(record);
        }
        records
    };

    log::debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Observations indexed by date, then station, for constant-time lookup
#[derive(Debug, Clone, Default)]
pub struct ObservationTable {
    by_date: HashMap<NaiveDate, HashMap<StationId, WeatherValues>>,
    rows: usize,
    duplicates: usize,
}

impl ObservationTable {
    /// Build the index. Repeated (station, date) rows keep the first occurrence.
    pub fn from_observations(observations: Vec<StationObservation>) -> Self {
        let mut table = Self::default();
        for obs in observations {
            let per_station = table.by_date.entry(obs.date).or_default();
            if per_station.contains_key(&obs.station_id) {
                table.duplicates += 1;
                continue;
            }
            per_station.insert(obs.station_id, obs.values);
            table.rows += 1;
        }
        if table.duplicates > 0 {
            log::warn!("Ignored {} duplicate station observations", table.duplicates);
        }
        table
    }

    pub fn get(&self, station_id: &str, date: NaiveDate) -> Option<&WeatherValues> {
        self.by_date.get(&date).and_then(|m| m.get(station_id))
    }

    /// Number of distinct (station, date) rows
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Dates with at least one observation, ascending
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.by_date.keys().copied().collect();
        dates.sort();
        dates
    }
}
