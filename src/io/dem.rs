use crate::types::LakeResult;
use ndarray::Array2;
use std::collections::HashMap;
use std::path::PathBuf;

/// Location of one elevation tile inside a tiled DEM product
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TilePath {
    /// Product folder, e.g. `elv_n30e060`
    pub folder: String,
    /// Tile file name, e.g. `n40e075_elv.tif`
    pub file: String,
}

impl TilePath {
    pub fn new(folder: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            file: file.into(),
        }
    }

    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.folder).join(&self.file)
    }
}

impl std::fmt::Display for TilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.folder, self.file)
    }
}

/// Source of DEM tiles; a tile that does not exist is `Ok(None)`
pub trait DemTileSource: Send + Sync {
    fn read_tile(&self, tile: &TilePath) -> LakeResult<Option<Array2<f32>>>;
}

/// DEM tiles held in memory, keyed by tile path
#[derive(Debug, Default, Clone)]
pub struct InMemoryDemSource {
    tiles: HashMap<TilePath, Array2<f32>>,
}

impl InMemoryDemSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tile: TilePath, data: Array2<f32>) {
        self.tiles.insert(tile, data);
    }

    pub fn with_tile(mut self, tile: TilePath, data: Array2<f32>) -> Self {
        self.insert(tile, data);
        self
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl DemTileSource for InMemoryDemSource {
    fn read_tile(&self, tile: &TilePath) -> LakeResult<Option<Array2<f32>>> {
        Ok(self.tiles.get(tile).cloned())
    }
}

/// GeoTIFF DEM tiles under `<root>/<folder>/<file>`, read with GDAL
#[cfg(feature = "gdal")]
#[derive(Debug, Clone)]
pub struct GdalDemSource {
    root: PathBuf,
}

#[cfg(feature = "gdal")]
impl GdalDemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[cfg(feature = "gdal")]
impl DemTileSource for GdalDemSource {
    fn read_tile(&self, tile: &TilePath) -> LakeResult<Option<Array2<f32>>> {
        use crate::types::LakeError;
        use gdal::Dataset;

        let path = self.root.join(tile.relative_path());
        if !path.exists() {
            log::debug!("DEM tile not found: {}", path.display());
            return Ok(None);
        }
        log::info!("Reading DEM tile from: {}", path.display());

        let dataset = Dataset::open(&path)?;
        let (width, height) = dataset.raster_size();
        log::debug!("DEM size: {}x{}", width, height);

        let rasterband = dataset.rasterband(1)?;
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let dem = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| LakeError::Processing(format!("Failed to reshape DEM data: {}", e)))?;
        Ok(Some(dem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_source_lookup() {
        let tile = TilePath::new("elv_n30e060", "n40e075_elv.tif");
        let source = InMemoryDemSource::new().with_tile(tile.clone(), Array2::from_elem((2, 2), 5.0));
        assert_eq!(source.len(), 1);
        assert!(source.read_tile(&tile).unwrap().is_some());
        assert!(source
            .read_tile(&TilePath::new("elv_n30e060", "n40e080_elv.tif"))
            .unwrap()
            .is_none());
        assert_eq!(tile.to_string(), "elv_n30e060/n40e075_elv.tif");
    }
}
