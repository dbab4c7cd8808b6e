//! Coastline polygon index and land/ocean classification of water regions

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::core::inpoly::{inpoly, Polygon};

/// Sampling and acceptance parameters for the coastline test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoastlineParams {
    /// Regions above this pixel count are sampled with `large_stride`
    pub large_region_pixels: usize,
    pub large_stride: usize,
    pub small_stride: usize,
    /// Minimum fraction of samples inside land polygons for a region to be kept
    pub min_land_fraction: f64,
}

impl Default for CoastlineParams {
    fn default() -> Self {
        Self {
            large_region_pixels: 5000,
            large_stride: 6,
            small_stride: 3,
            min_land_fraction: 0.9,
        }
    }
}

impl CoastlineParams {
    pub fn stride_for(&self, pixel_count: usize) -> usize {
        let stride = if pixel_count > self.large_region_pixels {
            self.large_stride
        } else {
            self.small_stride
        };
        stride.max(1)
    }
}

#[derive(Debug, Clone)]
struct PolygonEnvelope {
    index: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for PolygonEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Land polygons (lon/lat) behind an R-tree of their bounding boxes
#[derive(Debug)]
pub struct CoastlineIndex {
    polygons: Vec<Polygon>,
    tree: RTree<PolygonEnvelope>,
}

impl CoastlineIndex {
    /// Build the index; polygons without nodes are skipped
    pub fn new(polygons: Vec<Polygon>) -> Self {
        let polygons: Vec<Polygon> = polygons.into_iter().filter(|p| !p.nodes.is_empty()).collect();
        let envelopes = polygons
            .iter()
            .enumerate()
            .filter_map(|(index, p)| {
                let (lo, hi) = p.bounds()?;
                Some(PolygonEnvelope {
                    index,
                    env: AABB::from_corners(lo, hi),
                })
            })
            .collect();
        log::debug!("Indexed {} coastline polygons", polygons.len());
        Self {
            polygons,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Polygons whose bounding box intersects the given box, in insertion order
    pub fn candidates(&self, min: [f64; 2], max: [f64; 2]) -> Vec<&Polygon> {
        let query = AABB::from_corners(min, max);
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|e| e.index)
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.polygons[i]).collect()
    }

    /// Fraction of `points` inside any candidate polygon.
    ///
    /// `None` when no polygon is near the points. A polygon that fails
    /// validation is logged and contributes nothing.
    pub fn land_fraction(&self, points: &[[f64; 2]]) -> Option<f64> {
        if points.is_empty() {
            return None;
        }
        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for p in points {
            for k in 0..2 {
                min[k] = min[k].min(p[k]);
                max[k] = max[k].max(p[k]);
            }
        }

        let candidates = self.candidates(min, max);
        if candidates.is_empty() {
            return None;
        }

        let mut on_land = vec![false; points.len()];
        for poly in candidates {
            match inpoly(points, poly, None) {
                Ok(test) => {
                    for (acc, inside) in on_land.iter_mut().zip(test.inside) {
                        *acc |= inside;
                    }
                }
                Err(e) => log::warn!("Skipping coastline polygon: {}", e),
            }
        }

        let count = on_land.iter().filter(|&&v| v).count();
        Some(count as f64 / points.len() as f64)
    }

    /// Land test used to keep inland water: at least `min_land_fraction` of samples on land
    pub fn is_inland(&self, points: &[[f64; 2]], params: &CoastlineParams) -> bool {
        match self.land_fraction(points) {
            Some(fraction) => fraction >= params.min_land_fraction,
            None => false,
        }
    }
}
