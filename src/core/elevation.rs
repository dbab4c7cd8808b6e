//! Reference DEM resampling onto the label grid and per-body elevation summaries.
//!
//! Tiles are addressed from the occurrence tile origin through fixed lookup
//! tables, mosaicked 2x2, and sampled by nearest neighbour without ever
//! materialising the full-resolution resampled grid.

use ndarray::{concatenate, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::stats::trimmed_summary;
use crate::io::dem::{DemTileSource, TilePath};
use crate::io::tile_name::TileOrigin;
use crate::types::{BodyId, ElevationStats, LabeledRaster, LakeError, LakeResult};

/// Upper bounds (inclusive) of the western longitude folders
const WEST_FOLDERS: [(i32, &str); 5] = [(30, "w030"), (60, "w060"), (90, "w090"), (120, "w120"), (150, "w150")];
const WEST_LAST: &str = "w180";

/// Upper bounds (exclusive) of the eastern longitude folders
const EAST_FOLDERS: [(i32, &str); 5] = [(30, "e000"), (60, "e030"), (90, "e060"), (120, "e090"), (150, "e120")];
const EAST_LAST: &str = "e150";

/// Tile offsets (lon, lat) in the order top-left, top-right, bottom-left, bottom-right
const MOSAIC_OFFSETS: [[(i32, i32); 2]; 2] = [[(0, 5), (-5, 5)], [(0, 10), (-5, 10)]];

/// Elevation resampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationParams {
    /// Side length used for fill tiles when no tile of the mosaic exists
    pub tile_size: usize,
    /// Value of missing DEM cells
    pub fill_value: f32,
}

impl Default for ElevationParams {
    fn default() -> Self {
        Self {
            tile_size: 6000,
            fill_value: -9999.0,
        }
    }
}

/// Latitude 0 tiles are filed with the southern hemisphere
fn is_north(origin: &TileOrigin) -> bool {
    origin.north && origin.lat != 0
}

/// DEM product folder holding the tiles for `origin`, e.g. `elv_n30e060`
pub fn dem_folder(origin: &TileOrigin) -> String {
    let lon = origin.lon;
    let lon_band = if origin.east {
        EAST_FOLDERS
            .iter()
            .find(|(bound, _)| lon < *bound)
            .map_or(EAST_LAST, |(_, name)| *name)
    } else {
        WEST_FOLDERS
            .iter()
            .find(|(bound, _)| lon <= *bound)
            .map_or(WEST_LAST, |(_, name)| *name)
    };

    let lat = origin.lat;
    let lat_band = if is_north(origin) {
        if lat > 60 {
            "n60"
        } else if lat > 30 {
            "n30"
        } else {
            "n00"
        }
    } else if lat < 30 {
        "s30"
    } else {
        "s60"
    };

    format!("elv_{}{}", lat_band, lon_band)
}

/// Tile file for the origin shifted by `(lon_offset, lat_offset)` degrees
pub fn dem_tile_name(origin: &TileOrigin, lon_offset: i32, lat_offset: i32) -> String {
    let ew = if origin.east { 'e' } else { 'w' };
    let ns = if is_north(origin) { 'n' } else { 's' };
    format!(
        "{}{:02}{}{:03}_elv.tif",
        ns,
        origin.lat + lat_offset,
        ew,
        origin.lon + lon_offset
    )
}

/// The four tiles of the mosaic, row-major
pub fn mosaic_tiles(origin: &TileOrigin) -> [[TilePath; 2]; 2] {
    let folder = dem_folder(origin);
    MOSAIC_OFFSETS.map(|row| row.map(|(dx, dy)| TilePath::new(folder.clone(), dem_tile_name(origin, dx, dy))))
}

/// Nearest-neighbour source index for each of `out_len` output cells
pub fn nearest_index_map(in_len: usize, out_len: usize) -> Vec<usize> {
    if in_len == 0 {
        return Vec::new();
    }
    let scale = in_len as f64 / out_len as f64;
    (0..out_len)
        .map(|o| {
            let src = ((o as f64 + 0.5) * scale - 0.5 + 0.5).floor();
            (src.max(0.0) as usize).min(in_len - 1)
        })
        .collect()
}

/// Nearest-neighbour resize of a full grid
pub fn resample_nearest(source: &Array2<f32>, shape: (usize, usize)) -> Array2<f32> {
    let (in_rows, in_cols) = source.dim();
    let row_map = nearest_index_map(in_rows, shape.0);
    let col_map = nearest_index_map(in_cols, shape.1);
    if row_map.is_empty() || col_map.is_empty() {
        return Array2::zeros((row_map.len(), col_map.len()));
    }
    Array2::from_shape_fn(shape, |(r, c)| source[[row_map[r], col_map[c]]])
}

/// Elevation resampler
pub struct ElevationResampler {
    params: ElevationParams,
}

impl ElevationResampler {
    pub fn new(params: ElevationParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(ElevationParams::default())
    }

    /// Read the four tiles around `origin` and join them into one grid.
    ///
    /// Missing tiles become fill tiles with the shape of the tiles that exist.
    pub fn build_mosaic(&self, source: &dyn DemTileSource, origin: &TileOrigin) -> LakeResult<Array2<f32>> {
        let paths = mosaic_tiles(origin);
        let mut tiles: Vec<Option<Array2<f32>>> = Vec::with_capacity(4);
        for path in paths.iter().flatten() {
            let tile = source.read_tile(path)?;
            if tile.is_none() {
                log::warn!("DEM tile {} missing, using fill value", path);
            }
            tiles.push(tile);
        }

        let shape = tiles
            .iter()
            .flatten()
            .map(|t| t.dim())
            .next()
            .unwrap_or((self.params.tile_size, self.params.tile_size));

        let mut grids = Vec::with_capacity(4);
        for (tile, path) in tiles.into_iter().zip(paths.iter().flatten()) {
            let grid = tile.unwrap_or_else(|| Array2::from_elem(shape, self.params.fill_value));
            if grid.dim() != shape {
                return Err(LakeError::InvalidFormat(format!(
                    "DEM tile {} has shape {:?}, expected {:?}",
                    path,
                    grid.dim(),
                    shape
                )));
            }
            grids.push(grid);
        }

        let join = |a: &Array2<f32>, b: &Array2<f32>, axis: usize| {
            concatenate(Axis(axis), &[a.view(), b.view()])
                .map_err(|e| LakeError::Processing(format!("Failed to mosaic DEM tiles: {}", e)))
        };
        let top = join(&grids[0], &grids[1], 1)?;
        let bottom = join(&grids[2], &grids[3], 1)?;
        join(&top, &bottom, 0)
    }

    /// Per-body robust elevation statistics over the label grid
    pub fn resample(
        &self,
        source: &dyn DemTileSource,
        origin: &TileOrigin,
        labels: &LabeledRaster,
    ) -> LakeResult<BTreeMap<BodyId, ElevationStats>> {
        log::info!("Resampling reference DEM for tile {}", origin);
        log::debug!("DEM folder {}, parameters {:?}", dem_folder(origin), self.params);

        let mosaic = self.build_mosaic(source, origin)?;
        let stats = self.body_elevations(&mosaic, labels);

        let available = stats.values().filter(|s| s.is_available()).count();
        log::info!("Elevation available for {} of {} bodies", available, stats.len());
        Ok(stats)
    }

    /// Summaries of `dem` resampled onto the label grid
    pub fn body_elevations(&self, dem: &Array2<f32>, labels: &LabeledRaster) -> BTreeMap<BodyId, ElevationStats> {
        let (rows, cols) = labels.dim();
        let row_map = nearest_index_map(dem.nrows(), rows);
        let col_map = nearest_index_map(dem.ncols(), cols);
        let fill = self.params.fill_value;

        labels
            .body_pixels()
            .into_par_iter()
            .map(|(id, pixels)| {
                let values: Vec<f64> = if row_map.is_empty() || col_map.is_empty() {
                    Vec::new()
                } else {
                    pixels
                        .iter()
                        .map(|&(r, c)| dem[[row_map[r], col_map[c]]])
                        .filter(|v| v.is_finite() && *v != fill)
                        .map(f64::from)
                        .collect()
                };
                let stats = match trimmed_summary(&values) {
                    Some(s) => ElevationStats {
                        height: s.median,
                        std: s.std,
                        mean: s.mean,
                    },
                    None => ElevationStats::unavailable(),
                };
                (id, stats)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::dem::InMemoryDemSource;
    use crate::types::{GeoTransform, LabelStorage};

    fn origin(lon: i32, east: bool, lat: i32, north: bool) -> TileOrigin {
        TileOrigin { lon, east, lat, north }
    }

    #[test]
    fn test_folder_lookup_tables() {
        assert_eq!(dem_folder(&origin(80, true, 30, true)), "elv_n00e060");
        assert_eq!(dem_folder(&origin(30, true, 40, true)), "elv_n30e030");
        assert_eq!(dem_folder(&origin(170, true, 70, true)), "elv_n60e150");
        assert_eq!(dem_folder(&origin(30, false, 10, false)), "elv_s30w030");
        assert_eq!(dem_folder(&origin(160, false, 40, false)), "elv_s60w180");
        // the equator is filed as south
        assert_eq!(dem_folder(&origin(10, true, 0, true)), "elv_s30e000");
    }

    #[test]
    fn test_tile_names() {
        let o = origin(80, true, 30, true);
        assert_eq!(dem_tile_name(&o, 0, 5), "n35e080_elv.tif");
        assert_eq!(dem_tile_name(&o, -5, 10), "n40e075_elv.tif");
        let tiles = mosaic_tiles(&o);
        assert_eq!(tiles[0][1].file, "n35e075_elv.tif");
        assert_eq!(tiles[1][0].file, "n40e080_elv.tif");
        assert_eq!(tiles[1][1].folder, "elv_n00e060");
    }

    #[test]
    fn test_nearest_index_map() {
        assert_eq!(nearest_index_map(4, 2), vec![1, 3]);
        assert_eq!(nearest_index_map(2, 4), vec![0, 0, 1, 1]);
        assert_eq!(nearest_index_map(3, 3), vec![0, 1, 2]);
        let src = Array2::from_shape_fn((2, 2), |(i, j)| (i * 2 + j) as f32);
        let up = resample_nearest(&src, (4, 4));
        assert_eq!(up[[3, 0]], 2.0);
        assert_eq!(up[[1, 1]], 0.0);
    }

    #[test]
    fn test_missing_tiles_fill_and_mosaic_layout() {
        let o = origin(80, true, 30, true);
        let tiles = mosaic_tiles(&o);
        let source = InMemoryDemSource::new().with_tile(tiles[1][1].clone(), Array2::from_elem((2, 3), 7.0));
        let resampler = ElevationResampler::standard();
        let mosaic = resampler.build_mosaic(&source, &o).unwrap();
        assert_eq!(mosaic.dim(), (4, 6));
        assert_eq!(mosaic[[3, 5]], 7.0);
        assert_eq!(mosaic[[0, 0]], -9999.0);

        let bad = source.with_tile(tiles[0][0].clone(), Array2::from_elem((3, 3), 1.0));
        assert!(matches!(
            resampler.build_mosaic(&bad, &o),
            Err(LakeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_body_elevation_excludes_fill() {
        let mut labels = Array2::<u32>::zeros((4, 4));
        labels[[0, 0]] = 1;
        labels[[0, 1]] = 1;
        labels[[3, 3]] = 2;
        let raster = LabeledRaster {
            labels: LabelStorage::compact(labels),
            transform: GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
        };
        let mut dem = Array2::from_elem((4, 4), 12.0f32);
        dem[[3, 3]] = -9999.0;

        let stats = ElevationResampler::standard().body_elevations(&dem, &raster);
        assert_eq!(stats[&BodyId(1)].height, 12.0);
        assert_eq!(stats[&BodyId(1)].std, 0.0);
        assert!(!stats[&BodyId(2)].is_available());
        assert!(stats[&BodyId(2)].mean.is_nan());
    }
}
