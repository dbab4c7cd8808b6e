//! Per-tile sequencing of the labeling, elevation, attribution and aggregation
//! stages, and batch execution of tiles on a bounded worker pool.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::aggregate::{AggregationParams, Aggregator};
use crate::core::coastline::CoastlineIndex;
use crate::core::elevation::{ElevationParams, ElevationResampler};
use crate::core::footprints::{AttributionParams, FootprintAttributor};
use crate::core::geoid::GeoidModel;
use crate::core::water_mask::{LabelerParams, WaterMask, WaterMaskLabeler};
use crate::io::catalog::TileCatalog;
use crate::io::dem::DemTileSource;
use crate::io::granule::{GranuleMetadata, GranuleSource};
use crate::io::tile_name::TileOrigin;
use crate::types::{BodyId, BodyRecord, ElevationStats, LakeError, LakeResult, Observation, OccurrenceRaster};

/// Configuration of a full processing run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub labeler: LabelerParams,
    pub elevation: ElevationParams,
    pub attribution: AttributionParams,
    pub aggregation: AggregationParams,
    /// Zero the manual exclusion windows before labeling
    pub edit_mode: bool,
    /// Aggregation runs only when a tile has at least this many observations
    pub min_tile_observations: usize,
    /// Worker threads for batch runs
    pub max_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            labeler: LabelerParams::default(),
            elevation: ElevationParams::default(),
            attribution: AttributionParams::default(),
            aggregation: AggregationParams::default(),
            edit_mode: false,
            min_tile_observations: 2,
            max_workers: 8,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration; absent fields keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> LakeResult<Self> {
        log::info!("Loading pipeline configuration from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        if config.max_workers == 0 {
            return Err(LakeError::InvalidFormat("max_workers must be at least 1".to_string()));
        }
        Ok(config)
    }
}

/// Vector reference data shared by every tile
#[derive(Debug)]
pub struct ReferenceData {
    /// Dam locations as `[lon, lat]`
    pub dams: Vec<[f64; 2]>,
    pub coastline: CoastlineIndex,
}

/// One occurrence tile to process
#[derive(Debug, Clone)]
pub struct TileInput {
    /// File name; the tile origin is parsed from it
    pub name: String,
    pub raster: OccurrenceRaster,
}

impl TileInput {
    pub fn new(name: impl Into<String>, raster: OccurrenceRaster) -> Self {
        Self {
            name: name.into(),
            raster,
        }
    }

    /// Read an occurrence GeoTIFF, named after its file name
    #[cfg(feature = "gdal")]
    pub fn read<P: AsRef<Path>>(path: P) -> LakeResult<Self> {
        let name = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| LakeError::InvalidFormat(format!("No file name in {}", path.as_ref().display())))?;
        let raster = crate::io::raster::read_occurrence_raster(path.as_ref())?;
        Ok(Self::new(name, raster))
    }
}

/// Everything produced for one tile with water
#[derive(Debug, Clone)]
pub struct TileProduct {
    pub name: String,
    pub origin: TileOrigin,
    pub mask: WaterMask,
    pub elevation: BTreeMap<BodyId, ElevationStats>,
    pub observations: Vec<Observation>,
    pub records: Vec<BodyRecord>,
}

impl TileProduct {
    pub fn to_catalog(&self) -> TileCatalog {
        TileCatalog {
            origin: self.origin,
            bodies: self.mask.bodies.clone(),
            elevation: self.elevation.clone(),
            records: self.records.clone(),
            observations: self.observations.clone(),
        }
    }
}

/// Outcome of a batch run; failures never abort the batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub products: Vec<TileProduct>,
    /// Tiles without any water body left after labeling
    pub empty: Vec<String>,
    /// Tile name and error message of failed tiles
    pub failures: Vec<(String, String)>,
}

/// Runs the full chain of stages on occurrence tiles
pub struct TileProcessor<'a> {
    config: PipelineConfig,
    reference: &'a ReferenceData,
    dem: &'a dyn DemTileSource,
    granules: &'a [GranuleMetadata],
    granule_source: &'a dyn GranuleSource,
    geoid: &'a dyn GeoidModel,
}

impl<'a> TileProcessor<'a> {
    pub fn new(
        config: PipelineConfig,
        reference: &'a ReferenceData,
        dem: &'a dyn DemTileSource,
        granules: &'a [GranuleMetadata],
        granule_source: &'a dyn GranuleSource,
        geoid: &'a dyn GeoidModel,
    ) -> Self {
        Self {
            config,
            reference,
            dem,
            granules,
            granule_source,
            geoid,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one tile; `Ok(None)` when no water body survives labeling
    pub fn process_tile(&self, tile: &TileInput) -> LakeResult<Option<TileProduct>> {
        log::info!("Processing tile {}", tile.name);
        let origin = TileOrigin::from_mask_name(&tile.name)?;

        let labeler = WaterMaskLabeler::new(self.config.labeler.clone());
        let mask = labeler.label(
            &tile.raster,
            &self.reference.dams,
            &self.reference.coastline,
            self.config.edit_mode,
        )?;
        if mask.is_empty() {
            log::info!("No water bodies in tile {}", tile.name);
            return Ok(None);
        }

        let resampler = ElevationResampler::new(self.config.elevation.clone());
        let attributor = FootprintAttributor::new(self.config.attribution.clone());
        let (elevation, observations) = rayon::join(
            || resampler.resample(self.dem, &origin, &mask.labels),
            || attributor.attribute(&mask.labels, self.granules, self.granule_source, &tile.raster.bounds),
        );
        let elevation = elevation?;

        let records = if observations.len() >= self.config.min_tile_observations {
            Aggregator::new(self.config.aggregation.clone()).aggregate(&observations, &elevation, &mask.bodies, self.geoid)
        } else {
            log::info!(
                "Tile {} has {} observations, skipping aggregation",
                tile.name,
                observations.len()
            );
            Vec::new()
        };

        log::info!("Finished tile {}: {} bodies in catalog", tile.name, records.len());
        Ok(Some(TileProduct {
            name: tile.name.clone(),
            origin,
            mask,
            elevation,
            observations,
            records,
        }))
    }

    /// Process tiles on a pool of `max_workers` threads, in input order
    pub fn process_batch(&self, tiles: &[TileInput]) -> LakeResult<BatchReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers.max(1))
            .build()
            .map_err(|e| LakeError::Processing(format!("Failed to build worker pool: {}", e)))?;
        log::info!("Processing {} tiles on {} workers", tiles.len(), pool.current_num_threads());

        let results: Vec<(String, LakeResult<Option<TileProduct>>)> = pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| (tile.name.clone(), self.process_tile(tile)))
                .collect()
        });

        let mut report = BatchReport::default();
        for (name, result) in results {
            match result {
                Ok(Some(product)) => report.products.push(product),
                Ok(None) => report.empty.push(name),
                Err(e) => {
                    log::warn!("Tile {} failed: {}", name, e);
                    report.failures.push((name, e.to_string()));
                }
            }
        }
        log::info!(
            "Batch finished: {} products, {} empty, {} failed",
            report.products.len(),
            report.empty.len(),
            report.failures.len()
        );
        Ok(report)
    }
}
