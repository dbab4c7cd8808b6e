use lakeheight::core::coastline::CoastlineIndex;
use lakeheight::core::elevation::mosaic_tiles;
use lakeheight::core::geoid::ZeroGeoid;
use lakeheight::core::inpoly::Polygon;
use lakeheight::core::pipeline::{PipelineConfig, ReferenceData, TileInput, TileProcessor};
use lakeheight::io::dem::InMemoryDemSource;
use lakeheight::io::granule::{ChannelFootprints, GranuleMetadata, InMemoryGranuleSource};
use lakeheight::io::tile_name::TileOrigin;
use lakeheight::types::{BodyId, GeoTransform, OccurrenceRaster};
use ndarray::Array2;

const TILE_NAME: &str = "occurrence_80E_30Nv1_4_2021.tif";
const PIXEL: f64 = 0.001;

fn transform() -> GeoTransform {
    GeoTransform::north_up(80.0, 30.0, PIXEL, -PIXEL)
}

fn occurrence() -> OccurrenceRaster {
    let mut data = Array2::from_elem((60, 60), 0u8);
    for i in 10..30 {
        for j in 10..30 {
            data[[i, j]] = 90;
        }
        for j in 45..58 {
            data[[i, j]] = 90;
        }
    }
    OccurrenceRaster::new(data, transform())
}

fn reference() -> ReferenceData {
    let (dam_lon, dam_lat) = transform().pixel_center_to_geo(20, 20);
    ReferenceData {
        dams: vec![[dam_lon, dam_lat]],
        coastline: CoastlineIndex::new(vec![Polygon::from_ring(&[
            [79.0, 29.0],
            [81.0, 29.0],
            [81.0, 31.0],
            [79.0, 31.0],
        ])]),
    }
}

/// Only the top-left DEM tile exists; it covers the first lake
fn dem() -> InMemoryDemSource {
    let origin = TileOrigin::from_mask_name(TILE_NAME).unwrap();
    let tiles = mosaic_tiles(&origin);
    InMemoryDemSource::new().with_tile(tiles[0][0].clone(), Array2::from_elem((30, 30), 100.0))
}

fn footprints(pixels: &[(usize, usize)], heights: &[f64]) -> ChannelFootprints {
    let gt = transform();
    let (lon, lat): (Vec<f64>, Vec<f64>) = pixels.iter().map(|&(r, c)| gt.pixel_center_to_geo(r, c)).unzip();
    ChannelFootprints {
        lon,
        lat,
        height: heights.to_vec(),
        terrain_flag: vec![1; pixels.len()],
        uncertainty: vec![0.2; pixels.len()],
    }
}

fn granule(name: &str, day: u32) -> GranuleMetadata {
    GranuleMetadata {
        filename: name.to_string(),
        lon_min: 79.5,
        lon_max: 80.5,
        lat_min: 29.5,
        lat_max: 30.5,
        year: 2021,
        month: 6,
        day,
        lasers: vec!["gt1l".to_string(), "gt2l".to_string()],
    }
}

fn granules() -> (Vec<GranuleMetadata>, InMemoryGranuleSource) {
    let lake1 = [(15, 15), (15, 16), (15, 17), (16, 15), (16, 16)];
    let lake2 = [(20, 50), (20, 51), (21, 50), (21, 51), (22, 50)];
    let base = [10.0, 10.1, 10.2, 10.1, 10.0];
    let raised: Vec<f64> = base.iter().map(|h| h + 0.2).collect();

    let mut source = InMemoryGranuleSource::new();
    let mut first_pass: Vec<(usize, usize)> = lake1.to_vec();
    first_pass.extend_from_slice(&lake2);
    let mut first_heights = base.to_vec();
    first_heights.extend_from_slice(&[3.0, 3.1, 3.0, 3.1, 3.0]);
    source.insert("g1", "gt1l", footprints(&first_pass, &first_heights));
    source.insert("g2", "gt2l", footprints(&lake1, &base));
    source.insert("g3", "gt1l", footprints(&lake1, &raised));

    let mut far = granule("far", 1);
    far.lon_min = 100.0;
    far.lon_max = 101.0;
    source.insert("far", "gt1l", footprints(&lake1, &base));

    (vec![granule("g1", 1), granule("g2", 11), granule("g3", 21), far], source)
}

#[test]
fn test_tile_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();

    let reference = reference();
    let dem = dem();
    let (metadata, source) = granules();
    let processor = TileProcessor::new(PipelineConfig::default(), &reference, &dem, &metadata, &source, &ZeroGeoid);

    let product = processor
        .process_tile(&TileInput::new(TILE_NAME, occurrence()))
        .expect("Failed to process tile")
        .expect("Tile should contain water");

    assert_eq!(product.origin.product_stem(), "080E_30N");
    assert_eq!(product.mask.bodies.len(), 2);
    assert!(product.mask.bodies[&BodyId(1)].is_reservoir);

    // elevation: the first lake lies in the only existing DEM tile
    assert_eq!(product.elevation[&BodyId(1)].height, 100.0);
    assert!(!product.elevation[&BodyId(2)].is_available());

    // observations ordered by granule then body, ids from 1
    let summary: Vec<(usize, u32, &str)> = product
        .observations
        .iter()
        .map(|o| (o.id, o.body_id.0, o.granule.as_str()))
        .collect();
    assert_eq!(summary, vec![(1, 1, "g1"), (2, 2, "g1"), (3, 1, "g2"), (4, 1, "g3")]);
    assert_eq!(product.observations[0].num_points, 4);
    assert_eq!(product.observations[2].doy, 162);

    assert_eq!(product.records.len(), 2);
    let lake = &product.records[0];
    assert_eq!(lake.body_id, BodyId(1));
    assert_eq!(lake.num_obs, 3);
    assert!((lake.median_height - 10.05).abs() < 1e-9);
    assert!((lake.height_range - 0.2).abs() < 1e-9);
    assert_eq!(lake.reference_height, 100.0);
    assert_eq!(lake.doys, vec![152, 162, 172]);
    assert!(lake.is_reservoir);

    let second = &product.records[1];
    assert_eq!(second.num_obs, 1);
    assert!(second.reference_height.is_nan());
}

#[test]
fn test_repeated_runs_are_identical() {
    let reference = reference();
    let dem = dem();
    let (metadata, source) = granules();
    let processor = TileProcessor::new(PipelineConfig::default(), &reference, &dem, &metadata, &source, &ZeroGeoid);
    let tile = TileInput::new(TILE_NAME, occurrence());

    let a = processor.process_tile(&tile).unwrap().unwrap();
    let b = processor.process_tile(&tile).unwrap().unwrap();
    assert_eq!(
        serde_json::to_string(&a.records).unwrap(),
        serde_json::to_string(&b.records).unwrap()
    );
    assert_eq!(a.observations, b.observations);
}

#[test]
fn test_missing_dem_tiles_do_not_fail() {
    let reference = reference();
    let dem = InMemoryDemSource::new();
    let (metadata, source) = granules();
    let mut config = PipelineConfig::default();
    config.elevation.tile_size = 30;
    let processor = TileProcessor::new(config, &reference, &dem, &metadata, &source, &ZeroGeoid);

    let product = processor
        .process_tile(&TileInput::new(TILE_NAME, occurrence()))
        .unwrap()
        .unwrap();
    assert!(product.elevation.values().all(|e| !e.is_available()));
    assert!(product.records.iter().all(|r| r.reference_height.is_nan()));
}

#[test]
fn test_too_few_observations_skip_aggregation() {
    let reference = reference();
    let dem = dem();
    let (metadata, source) = granules();
    let only_g2: Vec<GranuleMetadata> = metadata.into_iter().filter(|g| g.filename == "g2").collect();
    let processor = TileProcessor::new(PipelineConfig::default(), &reference, &dem, &only_g2, &source, &ZeroGeoid);

    let product = processor
        .process_tile(&TileInput::new(TILE_NAME, occurrence()))
        .unwrap()
        .unwrap();
    assert_eq!(product.observations.len(), 1);
    assert!(product.records.is_empty());
}

#[test]
fn test_batch_isolates_failures() {
    let reference = reference();
    let dem = dem();
    let (metadata, source) = granules();
    let config = PipelineConfig {
        max_workers: 2,
        ..Default::default()
    };
    let processor = TileProcessor::new(config, &reference, &dem, &metadata, &source, &ZeroGeoid);

    let dry = OccurrenceRaster::new(Array2::from_elem((60, 60), 0u8), transform());
    let tiles = vec![
        TileInput::new(TILE_NAME, occurrence()),
        TileInput::new("occurrence_90E_30Nv1_4_2021.tif", dry),
        TileInput::new("no_origin_here.tif", occurrence()),
    ];

    let report = processor.process_batch(&tiles).expect("Failed to run batch");
    assert_eq!(report.products.len(), 1);
    assert_eq!(report.empty, vec!["occurrence_90E_30Nv1_4_2021.tif".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "no_origin_here.tif");
}
