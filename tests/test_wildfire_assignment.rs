use approx::assert_relative_eq;
use chrono::NaiveDate;
use firegrid::core::geometry::haversine_km;
use firegrid::core::resources::{SystemMonitor, SystemSnapshot};
use firegrid::core::wildfire::DropReason;
use firegrid::types::{FireRecord, Station};
use firegrid::{BoundingBox, CancellationToken, DatasetStore, Pipeline, PipelineConfig, PipelineInputs};
use tempfile::TempDir;

const GIB: u64 = 1024 * 1024 * 1024;

struct FixedTelemetry;

impl SystemMonitor for FixedTelemetry {
    fn logical_cores(&self) -> usize {
        2
    }

    fn snapshot(&mut self) -> SystemSnapshot {
        SystemSnapshot {
            total_memory_bytes: 4 * GIB,
            available_memory_bytes: 3 * GIB,
            cpu_usage_percent: 5.0,
        }
    }
}

fn fire(id: &str, lat: f64, lon: f64, area_ha: f64) -> FireRecord {
    FireRecord {
        fire_id: id.to_string(),
        latitude: lat,
        longitude: lon,
        start_date: NaiveDate::from_ymd_opt(2023, 8, 1).unwrap(),
        end_date: Some(NaiveDate::from_ymd_opt(2023, 8, 20).unwrap()),
        area_ha,
        fire_type: "wildfire".to_string(),
    }
}

/// Ontario box with the default rules, so Lake Ontario cells are water
fn run_fires(fires: Vec<FireRecord>) -> (TempDir, DatasetStore, firegrid::RunSummary) {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("temp dir");
    let mut store = DatasetStore::create(tmp.path()).expect("store");
    let config = PipelineConfig {
        bbox: BoundingBox::new(43.0, 44.0, -80.0, -78.0),
        grid_spacing_km: 10.0,
        ..Default::default()
    };
    let inputs = PipelineInputs {
        stations: vec![Station { id: "ST1".to_string(), latitude: 43.9, longitude: -79.0 }],
        observations: Vec::new(),
        fires,
    };
    let summary = Pipeline::new(config)
        .unwrap()
        .run(inputs, &[], &mut store, Box::new(FixedTelemetry), &CancellationToken::new())
        .expect("pipeline run");
    (tmp, store, summary)
}

#[test]
fn test_attributions_cover_footprint_and_sum_to_area() {
    let (_tmp, store, summary) = run_fires(vec![fire("ON-001", 43.85, -79.6, 50_000.0)]);
    assert_eq!(summary.fire_events, 1);

    let event = &store.fire_events()[0];
    assert_relative_eq!(event.radius_km, (50_000.0f64 / std::f64::consts::PI).sqrt() / 10.0, epsilon = 1e-9);
    assert!(event.affected_cells.contains(&event.center_cell_id));

    let rows = store.attributions_for_fire("ON-001").expect("attribution query");
    assert_eq!(rows.len(), event.affected_cells.len());
    let total: f64 = rows.iter().map(|a| a.burned_area_ha).sum();
    assert_relative_eq!(total, 50_000.0, max_relative = 1e-9);

    for row in rows {
        let cell = store.cell(row.cell_id).expect("attributed cell exists");
        assert!(!cell.is_water);
        assert!(haversine_km(event.latitude, event.longitude, cell.latitude, cell.longitude) <= event.radius_km);
        assert_eq!(row.end_date, NaiveDate::from_ymd_opt(2023, 8, 20).unwrap());
    }
}

#[test]
fn test_lake_cells_never_attributed() {
    // Capped 20 km footprint straddling the Lake Ontario shoreline
    let (_tmp, store, summary) = run_fires(vec![fire("ON-002", 43.55, -78.5, 1.0e7)]);
    assert_eq!(summary.fire_events, 1);

    let event = &store.fire_events()[0];
    assert_relative_eq!(event.radius_km, 20.0);
    assert!(!event.affected_cells.is_empty());
    for cell_id in &event.affected_cells {
        assert!(!store.cell(*cell_id).unwrap().is_water);
    }
    assert!(!store.cell(event.center_cell_id).unwrap().is_water);
}

#[test]
fn test_drop_reasons_reported() {
    let (_tmp, store, summary) = run_fires(vec![
        fire("ON-003", 43.45, -78.5, 100.0), // small fire in the lake
        fire("ON-004", 43.9, -79.9, 20_000.0),
        fire("ON-004", 43.1, -78.1, 20_000.0),
        fire("ON-005", 43.9, -79.9, f64::INFINITY),
    ]);

    assert_eq!(summary.fire_events, 1);
    assert_eq!(summary.fires_dropped.get(&DropReason::NoCellsInRadius), Some(&1));
    assert_eq!(summary.fires_dropped.get(&DropReason::DuplicateId), Some(&1));
    assert_eq!(summary.fires_dropped.get(&DropReason::InvalidArea), Some(&1));

    // First occurrence of the duplicate id wins
    let kept = &store.fire_events()[0];
    assert_eq!(kept.fire_id, "ON-004");
    assert_relative_eq!(kept.latitude, 43.9);
}
