use firegrid::core::geometry::haversine_km;
use firegrid::core::{GridGenerator, TerrainClassifier, TerrainRules};
use firegrid::types::{BoundingBox, GridError, Terrain};
use std::collections::HashSet;

fn ontario() -> BoundingBox {
    BoundingBox::new(43.0, 44.0, -80.0, -78.0)
}

#[test]
fn test_ontario_grid_shape() {
    let _ = env_logger::builder().is_test(true).try_init();

    let generator = GridGenerator::new(ontario(), 10.0).expect("valid grid parameters");
    let cells = generator.generate().expect("grid generation");

    let rows: HashSet<u32> = cells.iter().map(|c| c.row).collect();
    println!("Ontario grid: {} rows, {} cells", rows.len(), cells.len());
    assert!(rows.len() == 11 || rows.len() == 12);

    // Unique ids, every cell inside the box
    let ids: HashSet<u32> = cells.iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), cells.len());
    assert!(cells.iter().all(|c| ontario().contains(c.latitude, c.longitude)));

    // Neighbours in a row are ~10 km apart at every latitude
    for pair in cells.windows(2) {
        if pair[0].row == pair[1].row {
            let d = haversine_km(pair[0].latitude, pair[0].longitude, pair[1].latitude, pair[1].longitude);
            assert!((d - 10.0).abs() < 0.2, "row {} spacing {:.3} km", pair[0].row, d);
        }
    }
}

#[test]
fn test_terrain_labels_follow_default_rules() {
    let generator = GridGenerator::new(ontario(), 10.0).expect("valid grid parameters");
    let mut cells = generator.generate().expect("grid generation");
    let summary = TerrainClassifier::new().classify(&mut cells);

    assert_eq!(summary.values().sum::<usize>(), cells.len());
    assert!(summary.get(&Terrain::Water).copied().unwrap_or(0) > 0);
    assert!(summary.get(&Terrain::Urban).copied().unwrap_or(0) > 0);

    for cell in &cells {
        assert_eq!(cell.is_water, cell.terrain == Terrain::Water);
        assert_eq!(cell.is_urban, cell.terrain == Terrain::Urban);
    }
}

#[test]
fn test_custom_rules_without_water() {
    let rules = TerrainRules { water_bodies: Vec::new(), ..Default::default() };
    let mut cells = GridGenerator::new(ontario(), 10.0).unwrap().generate().unwrap();
    let summary = TerrainClassifier::with_rules(rules).classify(&mut cells);

    assert!(summary.get(&Terrain::Water).is_none());
    assert!(cells.iter().all(|c| !c.is_water));
}

#[test]
fn test_invalid_parameters_fail_fast() {
    assert!(matches!(
        GridGenerator::new(BoundingBox::new(44.0, 43.0, -80.0, -78.0), 10.0),
        Err(GridError::InvalidBoundingBox(_))
    ));
    assert!(matches!(
        GridGenerator::new(BoundingBox::new(43.0, 44.0, -80.0, -78.0), 0.0),
        Err(GridError::InvalidSpacing(_))
    ));
}
