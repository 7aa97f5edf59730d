use crate::core::geometry::{km_to_lat_degrees, km_to_lon_degrees};
use crate::types::{BoundingBox, CellId, GridCell, GridError, GridResult, Terrain};

/// Tolerance on the inclusive upper boundary of rows and columns (degrees)
const BOUNDARY_EPSILON: f64 = 1e-9;

/// Curvature-adjusted lattice generator
#[derive(Debug, Clone)]
pub struct GridGenerator {
    bbox: BoundingBox,
    spacing_km: f64,
}

impl GridGenerator {
    /// Create a generator, rejecting invalid boxes and spacings up front
    pub fn new(bbox: BoundingBox, spacing_km: f64) -> GridResult<Self> {
        bbox.validate()?;
        if !spacing_km.is_finite() || spacing_km <= 0.0 {
            return Err(GridError::InvalidSpacing(spacing_km));
        }
        Ok(Self { bbox, spacing_km })
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn spacing_km(&self) -> f64 {
        self.spacing_km
    }

    /// Latitude step between rows in degrees
    pub fn lat_step(&self) -> f64 {
        km_to_lat_degrees(self.spacing_km)
    }

    /// Longitude step for a row centred on `latitude`
    pub fn lon_step(&self, latitude: f64) -> f64 {
        km_to_lon_degrees(self.spacing_km, latitude)
    }

    /// Latitudes of every row, south to north, upper bound inclusive
    pub fn row_latitudes(&self) -> Vec<f64> {
        let step = self.lat_step();
        let mut rows = Vec::new();
        let mut i = 0usize;
        loop {
            let lat = self.bbox.min_lat + i as f64 * step;
            if lat > self.bbox.max_lat + BOUNDARY_EPSILON {
                break;
            }
            rows.push(lat.min(self.bbox.max_lat));
            i += 1;
        }
        rows
    }

    /// Emit the full cell lattice with sequential ids.
    ///
    /// Every cell starts out as [`Terrain::Land`]; the terrain classifier
    /// refines the labels afterwards.
    pub fn generate(&self) -> GridResult<Vec<GridCell>> {
        log::info!(
            "🌐 Generating grid: lat {:.3}..{:.3}, lon {:.3}..{:.3} at {:.2} km",
            self.bbox.min_lat, self.bbox.max_lat, self.bbox.min_lon, self.bbox.max_lon, self.spacing_km
        );

        let mut cells = Vec::new();
        let mut next_id: CellId = 0;

        for (row, lat) in self.row_latitudes().into_iter().enumerate() {
            let lon_step = self.lon_step(lat);
            let mut col = 0usize;
            loop {
                let lon = self.bbox.min_lon + col as f64 * lon_step;
                if lon > self.bbox.max_lon + BOUNDARY_EPSILON {
                    break;
                }
                cells.push(GridCell {
                    id: next_id,
                    row: row as u32,
                    col: col as u32,
                    latitude: lat,
                    longitude: lon.min(self.bbox.max_lon),
                    terrain: Terrain::Land,
                    is_water: false,
                    is_urban: false,
                });
                next_id = next_id.checked_add(1).ok_or_else(|| {
                    GridError::Config(format!(
                        "grid exceeds {} cells; increase spacing or shrink the bounding box",
                        CellId::MAX
                    ))
                })?;
                col += 1;
            }
        }

        log::info!("Grid generated: {} cells", cells.len());
        Ok(cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::haversine_km;

    fn ontario_box() -> BoundingBox {
        BoundingBox::new(43.0, 44.0, -80.0, -78.0)
    }

    #[test]
    fn test_rejects_bad_spacing() {
        assert!(matches!(
            GridGenerator::new(ontario_box(), 0.0),
            Err(GridError::InvalidSpacing(_))
        ));
        assert!(GridGenerator::new(ontario_box(), -5.0).is_err());
        assert!(GridGenerator::new(ontario_box(), f64::NAN).is_err());
    }

    #[test]
    fn test_row_count_matches_spacing() {
        let generator = GridGenerator::new(ontario_box(), 10.0).unwrap();
        let rows = generator.row_latitudes();
        // 1 degree / (10 / 111.32) = 11.13 steps, plus the starting row
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0], 43.0);
        assert!(rows.iter().all(|&lat| lat <= 44.0));
    }

    #[test]
    fn test_cells_within_box_with_sequential_ids() {
        let generator = GridGenerator::new(ontario_box(), 10.0).unwrap();
        let cells = generator.generate().unwrap();

        assert!(!cells.is_empty());
        for (i, cell) in cells.iter().enumerate() {
            assert_eq!(cell.id as usize, i);
            assert!(ontario_box().contains(cell.latitude, cell.longitude));
        }
    }

    #[test]
    fn test_adjacent_cells_are_spacing_apart() {
        let generator = GridGenerator::new(ontario_box(), 10.0).unwrap();
        let cells = generator.generate().unwrap();

        for pair in cells.windows(2) {
            if pair[0].row != pair[1].row {
                continue;
            }
            let d = haversine_km(pair[0].latitude, pair[0].longitude, pair[1].latitude, pair[1].longitude);
            assert!((d - 10.0).abs() < 0.2, "adjacent spacing {} km", d);
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let generator = GridGenerator::new(ontario_box(), 7.5).unwrap();
        assert_eq!(generator.generate().unwrap(), generator.generate().unwrap());
    }

    #[test]
    fn test_northern_rows_have_fewer_cells() {
        let generator = GridGenerator::new(BoundingBox::new(40.0, 70.0, -100.0, -90.0), 25.0).unwrap();
        let cells = generator.generate().unwrap();
        let first_row = cells.iter().filter(|c| c.row == 0).count();
        let last_row_index = cells.last().unwrap().row;
        let last_row = cells.iter().filter(|c| c.row == last_row_index).count();
        assert!(last_row < first_row);
    }
}
