use crate::core::geometry::{equirectangular_km, haversine_km};
use crate::types::{
    CellStationAssignment, GridCell, GridError, GridResult, Station, StationDistance, StationLink,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Station count to use when the closest station is nearer than `max_distance_km`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProximityTier {
    pub max_distance_km: f64,
    pub station_count: usize,
}

/// Nearest-neighbour search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Candidates kept by the planar prefilter before exact refinement
    pub prefilter_candidates: usize,
    /// Station pairs at or beyond this distance are not stored
    pub station_distance_cutoff_km: f64,
    /// Ordered by ascending `max_distance_km`
    pub tiers: Vec<ProximityTier>,
    /// Stations used when the closest one is beyond every tier
    pub fallback_station_count: usize,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            prefilter_candidates: 10,
            station_distance_cutoff_km: 500.0,
            tiers: vec![
                ProximityTier { max_distance_km: 50.0, station_count: 1 },
                ProximityTier { max_distance_km: 200.0, station_count: 3 },
                ProximityTier { max_distance_km: 500.0, station_count: 5 },
            ],
            fallback_station_count: 5,
        }
    }
}

impl ProximityConfig {
    pub fn validate(&self) -> GridResult<()> {
        if self.prefilter_candidates == 0 {
            return Err(GridError::Config("prefilter_candidates must be at least 1".to_string()));
        }
        if !self.station_distance_cutoff_km.is_finite() || self.station_distance_cutoff_km <= 0.0 {
            return Err(GridError::Config(format!(
                "station_distance_cutoff_km must be > 0, got {}",
                self.station_distance_cutoff_km
            )));
        }
        if self.fallback_station_count == 0 {
            return Err(GridError::Config("fallback_station_count must be at least 1".to_string()));
        }
        let mut previous = 0.0;
        for tier in &self.tiers {
            if tier.max_distance_km.is_nan() || tier.max_distance_km <= previous || tier.station_count == 0 {
                return Err(GridError::Config(format!(
                    "proximity tiers must have increasing distances and non-zero counts: {:?}",
                    self.tiers
                )));
            }
            previous = tier.max_distance_km;
        }
        Ok(())
    }

    /// Number of stations to keep given the closest exact distance
    pub fn station_count_for(&self, nearest_km: f64) -> usize {
        self.tiers
            .iter()
            .find(|tier| nearest_km < tier.max_distance_km)
            .map(|tier| tier.station_count)
            .unwrap_or(self.fallback_station_count)
    }
}

/// Two-phase (planar prefilter, haversine refine) station search
pub struct StationProximityIndex {
    stations: Vec<Station>,
    config: ProximityConfig,
}

impl StationProximityIndex {
    pub fn new(stations: &[Station], config: ProximityConfig) -> GridResult<Self> {
        config.validate()?;

        let usable: Vec<Station> = stations
            .iter()
            .filter(|s| s.latitude.is_finite() && s.longitude.is_finite())
            .cloned()
            .collect();
        if usable.len() < stations.len() {
            log::warn!(
                "Ignoring {} stations with non-finite coordinates",
                stations.len() - usable.len()
            );
        }

        Ok(Self { stations: usable, config })
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn config(&self) -> &ProximityConfig {
        &self.config
    }

    /// Ranked stations for a single point, closest first
    pub fn nearest_stations(&self, lat: f64, lon: f64) -> Vec<StationLink> {
        if self.stations.is_empty() {
            return Vec::new();
        }

        // Phase 1: cheap planar distance to every station, keep the k smallest
        let mut candidates: Vec<(f64, usize)> = self
            .stations
            .iter()
            .enumerate()
            .map(|(i, s)| (equirectangular_km(lat, lon, s.latitude, s.longitude), i))
            .collect();

        let k = self.config.prefilter_candidates.min(candidates.len());
        if candidates.len() > k {
            candidates.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
            candidates.truncate(k);
        }

        // Phase 2: exact distance for the survivors only
        let mut refined: Vec<StationLink> = candidates
            .into_iter()
            .map(|(_, i)| {
                let station = &self.stations[i];
                StationLink {
                    station_id: station.id.clone(),
                    distance_km: haversine_km(lat, lon, station.latitude, station.longitude),
                }
            })
            .collect();
        refined.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.station_id.cmp(&b.station_id))
        });

        let keep = self.config.station_count_for(refined[0].distance_km);
        refined.truncate(keep);
        refined
    }

    /// Station assignment for every cell, in cell order
    pub fn assign_cells(&self, cells: &[GridCell]) -> Vec<CellStationAssignment> {
        log::info!(
            "📡 Assigning stations to {} cells from {} stations",
            cells.len(),
            self.stations.len()
        );

        let assign = |cell: &GridCell| CellStationAssignment {
            cell_id: cell.id,
            stations: self.nearest_stations(cell.latitude, cell.longitude),
        };

        #[cfg(feature = "parallel")]
        let assignments: Vec<CellStationAssignment> = {
            use rayon::prelude::*;
            cells.par_iter().map(assign).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let assignments: Vec<CellStationAssignment> = cells.iter().map(assign).collect();

        let uncovered = assignments.iter().filter(|a| a.stations.is_empty()).count();
        if uncovered > 0 {
            log::warn!("{} cells have no candidate stations", uncovered);
        }
        assignments
    }
}

/// Stable 64-bit fingerprint of a station set (ids and coordinates)
pub fn station_fingerprint(stations: &[Station]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    let mut feed = |bytes: &[u8]| {
        for &b in bytes {
            hash ^= b as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    };
    for station in stations {
        feed(station.id.as_bytes());
        feed(&[0xff]);
        feed(&station.latitude.to_bits().to_le_bytes());
        feed(&station.longitude.to_bits().to_le_bytes());
    }
    hash
}

/// Pairwise station distances under a cutoff, computed once per station set
#[derive(Debug, Clone)]
pub struct StationDistanceTable {
    fingerprint: u64,
    cutoff_km: f64,
    pairs: Vec<StationDistance>,
    lookup: HashMap<(String, String), f64>,
}

impl StationDistanceTable {
    /// Compute every pair closer than `cutoff_km`. O(n^2) in the station count.
    pub fn compute(stations: &[Station], cutoff_km: f64) -> Self {
        log::info!(
            "Computing station distance table for {} stations (cutoff {:.0} km)",
            stations.len(),
            cutoff_km
        );
        let start = std::time::Instant::now();

        let pairs_for = |i: usize| -> Vec<StationDistance> {
            let a = &stations[i];
            stations[i + 1..]
                .iter()
                .filter_map(|b| {
                    let d = haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
                    (d < cutoff_km).then(|| StationDistance {
                        station_a: a.id.clone(),
                        station_b: b.id.clone(),
                        distance_km: d,
                    })
                })
                .collect()
        };

        #[cfg(feature = "parallel")]
        let pairs: Vec<StationDistance> = {
            use rayon::prelude::*;
            (0..stations.len()).into_par_iter().flat_map_iter(pairs_for).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let pairs: Vec<StationDistance> = (0..stations.len()).flat_map(pairs_for).collect();

        log::info!("Station distance table: {} pairs in {:?}", pairs.len(), start.elapsed());
        Self::from_pairs(station_fingerprint(stations), cutoff_km, pairs)
    }

    /// Rebuild a table from persisted pairs
    pub fn from_pairs(fingerprint: u64, cutoff_km: f64, pairs: Vec<StationDistance>) -> Self {
        let lookup = pairs
            .iter()
            .map(|p| (Self::key(&p.station_a, &p.station_b), p.distance_km))
            .collect();
        Self { fingerprint, cutoff_km, pairs, lookup }
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn cutoff_km(&self) -> f64 {
        self.cutoff_km
    }

    /// True when this table was built from exactly `stations` with `cutoff_km`
    pub fn matches(&self, stations: &[Station], cutoff_km: f64) -> bool {
        self.fingerprint == station_fingerprint(stations) && self.cutoff_km == cutoff_km
    }

    pub fn pairs(&self) -> &[StationDistance] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Symmetric lookup; `None` when the pair is beyond the cutoff
    pub fn distance(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(0.0);
        }
        self.lookup.get(&Self::key(a, b)).copied()
    }

    /// Closest other station within the cutoff
    pub fn nearest_neighbour(&self, id: &str) -> Option<(&str, f64)> {
        self.pairs
            .iter()
            .filter_map(|p| {
                if p.station_a == id {
                    Some((p.station_b.as_str(), p.distance_km))
                } else if p.station_b == id {
                    Some((p.station_a.as_str(), p.distance_km))
                } else {
                    None
                }
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Mean nearest-neighbour distance over stations that have one
    pub fn mean_nearest_neighbour_km(&self, stations: &[Station]) -> Option<f64> {
        let distances: Vec<f64> = stations
            .iter()
            .filter_map(|s| self.nearest_neighbour(&s.id).map(|(_, d)| d))
            .collect();
        if distances.is_empty() {
            None
        } else {
            Some(distances.iter().sum::<f64>() / distances.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Terrain;
    use approx::assert_relative_eq;

    fn station(id: &str, lat: f64, lon: f64) -> Station {
        Station { id: id.to_string(), latitude: lat, longitude: lon }
    }

    #[test]
    fn test_tier_selection() {
        let config = ProximityConfig::default();
        assert_eq!(config.station_count_for(10.0), 1);
        assert_eq!(config.station_count_for(50.0), 3);
        assert_eq!(config.station_count_for(199.9), 3);
        assert_eq!(config.station_count_for(300.0), 5);
        assert_eq!(config.station_count_for(2000.0), 5);
    }

    #[test]
    fn test_invalid_tiers_rejected() {
        let config = ProximityConfig {
            tiers: vec![
                ProximityTier { max_distance_km: 200.0, station_count: 3 },
                ProximityTier { max_distance_km: 50.0, station_count: 1 },
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_close_station_gives_single_link() {
        let stations = vec![
            station("NEAR", 43.50, -79.00),
            station("MID", 44.50, -79.00),
            station("FAR", 46.00, -79.00),
        ];
        let index = StationProximityIndex::new(&stations, ProximityConfig::default()).unwrap();
        let links = index.nearest_stations(43.52, -79.01);

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].station_id, "NEAR");
    }

    #[test]
    fn test_sparse_region_keeps_five_closest() {
        let stations: Vec<Station> = (0..8)
            .map(|i| station(&format!("S{}", i), 50.0 + i as f64, -100.0))
            .collect();
        let index = StationProximityIndex::new(&stations, ProximityConfig::default()).unwrap();
        // Nearest station is ~1100 km away
        let links = index.nearest_stations(40.0, -100.0);

        assert_eq!(links.len(), 5);
        let ids: Vec<&str> = links.iter().map(|l| l.station_id.as_str()).collect();
        assert_eq!(ids, vec!["S0", "S1", "S2", "S3", "S4"]);
        assert!(links.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    }

    #[test]
    fn test_prefilter_matches_brute_force() {
        let stations: Vec<Station> = (0..40)
            .map(|i| {
                let lat = 45.0 + ((i * 7) % 13) as f64 * 0.3;
                let lon = -80.0 + ((i * 5) % 11) as f64 * 0.4;
                station(&format!("S{:02}", i), lat, lon)
            })
            .collect();
        let index = StationProximityIndex::new(&stations, ProximityConfig::default()).unwrap();
        let links = index.nearest_stations(46.1, -78.3);

        let mut brute: Vec<(f64, &str)> = stations
            .iter()
            .map(|s| (haversine_km(46.1, -78.3, s.latitude, s.longitude), s.id.as_str()))
            .collect();
        brute.sort_by(|a, b| a.0.total_cmp(&b.0));

        assert_eq!(links[0].station_id, brute[0].1);
        assert_relative_eq!(links[0].distance_km, brute[0].0, epsilon = 1e-9);
    }

    #[test]
    fn test_assign_cells_with_no_stations() {
        let index = StationProximityIndex::new(&[], ProximityConfig::default()).unwrap();
        let cells = vec![GridCell {
            id: 0,
            row: 0,
            col: 0,
            latitude: 45.0,
            longitude: -75.0,
            terrain: Terrain::Land,
            is_water: false,
            is_urban: false,
        }];
        let assignments = index.assign_cells(&cells);
        assert_eq!(assignments.len(), 1);
        assert!(assignments[0].stations.is_empty());
    }

    #[test]
    fn test_distance_table_respects_cutoff() {
        let stations = vec![
            station("A", 45.0, -75.0),
            station("B", 45.5, -75.0),
            station("C", 55.0, -75.0),
        ];
        let table = StationDistanceTable::compute(&stations, 500.0);

        assert_eq!(table.len(), 1);
        let ab = table.distance("A", "B").unwrap();
        assert_relative_eq!(ab, table.distance("B", "A").unwrap());
        assert!((ab - 55.6).abs() < 0.5);
        assert!(table.distance("A", "C").is_none());
        assert_eq!(table.nearest_neighbour("A"), Some(("B", ab)));
        assert!(table.nearest_neighbour("C").is_none());
        assert!(table.matches(&stations, 500.0));
        assert!(!table.matches(&stations[..2], 500.0));
    }

    #[test]
    fn test_fingerprint_is_order_and_value_sensitive() {
        let a = vec![station("A", 45.0, -75.0), station("B", 46.0, -75.0)];
        let b = vec![station("B", 46.0, -75.0), station("A", 45.0, -75.0)];
        let c = vec![station("A", 45.0, -75.0), station("B", 46.0, -75.1)];
        assert_eq!(station_fingerprint(&a), station_fingerprint(&a.clone()));
        assert_ne!(station_fingerprint(&a), station_fingerprint(&b));
        assert_ne!(station_fingerprint(&a), station_fingerprint(&c));
    }
}
