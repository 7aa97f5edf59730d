use crate::types::{BoundingBox, GridCell, Terrain};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named rectangular region (water body or metropolitan area)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRegion {
    pub name: String,
    pub bounds: BoundingBox,
}

impl NamedRegion {
    pub fn new(name: &str, min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            name: name.to_string(),
            bounds: BoundingBox::new(min_lat, max_lat, min_lon, max_lon),
        }
    }
}

/// Latitude band occupied by a forest biome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatitudeBand {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl LatitudeBand {
    pub fn contains(&self, lat: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Rule set for the terrain classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainRules {
    pub water_bodies: Vec<NamedRegion>,
    pub urban_areas: Vec<NamedRegion>,
    pub forest_bands: Vec<LatitudeBand>,
}

impl Default for TerrainRules {
    fn default() -> Self {
        Self {
            water_bodies: vec![
                NamedRegion::new("Lake Superior", 46.4, 49.0, -92.2, -84.4),
                NamedRegion::new("Lake Huron", 43.0, 46.3, -84.8, -81.7),
                NamedRegion::new("Georgian Bay", 44.5, 46.1, -81.7, -79.7),
                NamedRegion::new("Lake Erie", 41.4, 42.9, -83.5, -78.9),
                NamedRegion::new("Lake Ontario", 43.3, 43.6, -79.3, -76.5),
                NamedRegion::new("Lake Winnipeg", 50.3, 53.8, -99.3, -96.2),
                NamedRegion::new("Great Slave Lake", 60.8, 62.9, -117.0, -108.8),
                NamedRegion::new("Great Bear Lake", 64.8, 67.1, -125.0, -117.5),
                // Hudson Bay as several boxes that stay off the Ontario and Quebec shores
                NamedRegion::new("Hudson Bay", 57.0, 62.0, -93.5, -79.0),
                NamedRegion::new("Hudson Bay (south)", 55.8, 57.0, -86.5, -79.0),
                NamedRegion::new("Hudson Bay (north)", 62.0, 63.3, -90.5, -84.0),
                NamedRegion::new("James Bay", 51.5, 54.6, -82.0, -79.0),
            ],
            urban_areas: vec![
                NamedRegion::new("Toronto", 43.58, 43.86, -79.64, -79.11),
                NamedRegion::new("Montreal", 45.40, 45.71, -73.98, -73.47),
                NamedRegion::new("Vancouver", 49.00, 49.40, -123.30, -122.90),
                NamedRegion::new("Ottawa", 45.25, 45.50, -75.95, -75.55),
                NamedRegion::new("Calgary", 50.84, 51.21, -114.32, -113.86),
                NamedRegion::new("Edmonton", 53.40, 53.70, -113.72, -113.27),
                NamedRegion::new("Winnipeg", 49.77, 49.99, -97.35, -96.96),
                NamedRegion::new("Quebec City", 46.73, 46.98, -71.45, -71.13),
            ],
            forest_bands: vec![
                LatitudeBand { name: "Boreal".to_string(), min_lat: 46.0, max_lat: 60.0 },
                LatitudeBand { name: "Taiga".to_string(), min_lat: 60.0, max_lat: 68.0 },
            ],
        }
    }
}

/// Cell counts per terrain label
pub type TerrainSummary = BTreeMap<Terrain, usize>;

/// Rule-based terrain labelling
pub struct TerrainClassifier {
    rules: TerrainRules,
}

impl TerrainClassifier {
    pub fn new() -> Self {
        Self { rules: TerrainRules::default() }
    }

    pub fn with_rules(rules: TerrainRules) -> Self {
        Self { rules }
    }

    /// Label for a single point, precedence water > urban > forest > land
    pub fn classify_point(&self, lat: f64, lon: f64) -> Terrain {
        if self.rules.water_bodies.iter().any(|r| r.bounds.contains(lat, lon)) {
            return Terrain::Water;
        }
        if self.rules.urban_areas.iter().any(|r| r.bounds.contains(lat, lon)) {
            return Terrain::Urban;
        }
        if self.rules.forest_bands.iter().any(|b| b.contains(lat)) {
            return Terrain::Forest;
        }
        Terrain::Land
    }

    /// Label every cell in place and return per-terrain counts
    pub fn classify(&self, cells: &mut [GridCell]) -> TerrainSummary {
        log::info!("Classifying terrain for {} cells", cells.len());

        let mut summary = TerrainSummary::new();
        for cell in cells.iter_mut() {
            let terrain = self.classify_point(cell.latitude, cell.longitude);
            cell.set_terrain(terrain);
            *summary.entry(terrain).or_insert(0) += 1;
        }

        for (terrain, count) in &summary {
            log::debug!("  - {}: {}", terrain, count);
        }
        summary
    }
}

impl Default for TerrainClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(id: u32, lat: f64, lon: f64) -> GridCell {
        GridCell {
            id,
            row: 0,
            col: id,
            latitude: lat,
            longitude: lon,
            terrain: Terrain::Land,
            is_water: false,
            is_urban: false,
        }
    }

    #[test]
    fn test_water_takes_precedence_over_urban() {
        let rules = TerrainRules {
            water_bodies: vec![NamedRegion::new("Bay", 10.0, 11.0, 10.0, 11.0)],
            urban_areas: vec![NamedRegion::new("Port", 10.5, 12.0, 10.5, 12.0)],
            forest_bands: vec![LatitudeBand { name: "Band".to_string(), min_lat: 0.0, max_lat: 20.0 }],
        };
        let classifier = TerrainClassifier::with_rules(rules);

        assert_eq!(classifier.classify_point(10.7, 10.7), Terrain::Water);
        assert_eq!(classifier.classify_point(11.5, 11.5), Terrain::Urban);
        assert_eq!(classifier.classify_point(5.0, 5.0), Terrain::Forest);
        assert_eq!(classifier.classify_point(30.0, 5.0), Terrain::Land);
    }

    #[test]
    fn test_default_rules() {
        let classifier = TerrainClassifier::new();
        assert_eq!(classifier.classify_point(43.65, -79.38), Terrain::Urban);
        assert_eq!(classifier.classify_point(43.45, -78.0), Terrain::Water);
        assert_eq!(classifier.classify_point(55.0, -110.0), Terrain::Forest);
        assert_eq!(classifier.classify_point(44.0, -78.0), Terrain::Land);
    }

    #[test]
    fn test_hudson_bay_shores_stay_land() {
        let classifier = TerrainClassifier::new();
        assert_eq!(classifier.classify_point(60.0, -86.0), Terrain::Water);
        assert_eq!(classifier.classify_point(52.5, -80.5), Terrain::Water);
        // Hudson Bay Lowlands, northern Ontario
        assert_eq!(classifier.classify_point(55.0, -90.0), Terrain::Forest);
        // Nunavik interior east of the bay
        assert_eq!(classifier.classify_point(57.0, -75.0), Terrain::Forest);
        // Churchill, on the western shore
        assert_ne!(classifier.classify_point(58.77, -94.17), Terrain::Water);
    }

    #[test]
    fn test_classification_is_total_and_flags_consistent() {
        let mut cells = vec![
            cell(0, 43.45, -78.0),
            cell(1, 43.65, -79.38),
            cell(2, 55.0, -110.0),
            cell(3, 44.0, -78.0),
        ];
        let summary = TerrainClassifier::new().classify(&mut cells);

        assert_eq!(summary.values().sum::<usize>(), cells.len());
        assert!(cells[0].is_water && !cells[0].is_urban);
        assert!(cells[1].is_urban && !cells[1].is_water);
        assert_eq!(cells[2].terrain, Terrain::Forest);
        assert_eq!(cells[3].terrain, Terrain::Land);
    }
}
