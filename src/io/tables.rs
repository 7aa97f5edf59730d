//! redb table definitions for the dataset store.
//!
//! Integer and tuple keys are used wherever the key is numeric so that key
//! order matches query order. Row payloads are `&[u8]` JSON-serialized
//! domain types. Dates are stored as days from the common era.

use redb::TableDefinition;

/// Store-level metadata keyed by name (`grid`, `station_table`).
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Grid cells keyed by `cell_id`.
pub const CELLS: TableDefinition<u32, &[u8]> = TableDefinition::new("cells");

/// Station pair distances keyed by insertion order.
pub const STATION_DISTANCES: TableDefinition<u64, &[u8]> = TableDefinition::new("station_distances");

/// Cell to station assignments keyed by `cell_id`.
pub const ASSIGNMENTS: TableDefinition<u32, &[u8]> = TableDefinition::new("assignments");

/// Weather rows keyed by `(cell_id, day)`. The key is the uniqueness constraint.
pub const WEATHER: TableDefinition<(u32, i32), &[u8]> = TableDefinition::new("weather");

/// Date index over `WEATHER`, keyed by `(day, cell_id)`.
pub const WEATHER_BY_DATE: TableDefinition<(i32, u32), ()> = TableDefinition::new("weather_by_date");

/// Committed weather rows per day.
pub const WEATHER_DATES: TableDefinition<i32, u64> = TableDefinition::new("weather_dates");

/// Fire events keyed by `fire_id`.
pub const FIRE_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("fire_events");

/// Attribution rows keyed by `{cell_id:010}/{fire_id}`.
pub const ATTRIBUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("cell_fire_attributions");

/// Fire index over `ATTRIBUTIONS`, keyed by `{fire_id}\0{cell_id:010}`.
pub const ATTRIBUTIONS_BY_FIRE: TableDefinition<&str, u32> = TableDefinition::new("attributions_by_fire");

pub const GRID_KEY: &str = "grid";
pub const STATION_TABLE_KEY: &str = "station_table";

pub fn attribution_key(cell_id: u32, fire_id: &str) -> String {
    format!("{:010}/{}", cell_id, fire_id)
}

/// Half-open key range covering every attribution of one cell
pub fn attribution_cell_range(cell_id: u32) -> (String, String) {
    // '0' sorts right after '/'
    (format!("{:010}/", cell_id), format!("{:010}0", cell_id))
}

pub fn fire_index_key(fire_id: &str, cell_id: u32) -> String {
    format!("{}\u{0}{:010}", fire_id, cell_id)
}

/// Half-open key range covering every index entry of one fire
pub fn fire_index_range(fire_id: &str) -> (String, String) {
    (format!("{}\u{0}", fire_id), format!("{}\u{1}", fire_id))
}
