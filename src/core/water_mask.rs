//! Water mask labeling: occurrence threshold, reservoir proximity, morphological
//! cleanup and coastline removal, producing a labeled raster and per-body stats.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::coastline::{CoastlineIndex, CoastlineParams};
use crate::core::morphology::{dilate, dilate_repeated, erode, label_components, regions, Diamond, Region};
use crate::types::{
    BodyId, BodyStats, GeoTransform, LabelStorage, LabeledRaster, LakeResult, OccurrenceRaster,
    OCCURRENCE_NODATA,
};

/// Rectangular pixel window, half-open in both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelWindow {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl PixelWindow {
    pub fn new(row_start: usize, row_end: usize, col_start: usize, col_end: usize) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }

    /// Row and column ranges clipped to `shape`, `None` if nothing is left
    pub fn clip(&self, shape: (usize, usize)) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let rows = self.row_start.min(shape.0)..self.row_end.min(shape.0);
        let cols = self.col_start.min(shape.1)..self.col_end.min(shape.1);
        if rows.is_empty() || cols.is_empty() {
            None
        } else {
            Some((rows, cols))
        }
    }
}

/// Hand-picked windows of known false water zeroed in edit mode
pub fn default_exclusions() -> Vec<PixelWindow> {
    vec![
        PixelWindow::new(13924, 14008, 22545, 22635),
        PixelWindow::new(30698, 30883, 27495, 27911),
        PixelWindow::new(28528, 29102, 29695, 30535),
    ]
}

/// Water mask labeling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelerParams {
    /// Minimum occurrence percentage counted as water
    pub occurrence_threshold: u8,
    pub nodata: u8,
    /// Diamond radius for the reservoir mask dilation and the dam proximity dilation
    pub reservoir_dilation_radius: usize,
    /// Number of successive dilations applied to the dam raster
    pub dam_dilation_iterations: usize,
    pub erosion_radius: usize,
    /// Regions must exceed both `min_extent` and `min_area` (pixels)
    pub min_extent: f64,
    pub min_area: usize,
    pub coastline: CoastlineParams,
    /// Ground area of one pixel in square metres
    pub pixel_area_m2: f64,
    pub manual_exclusions: Vec<PixelWindow>,
}

impl Default for LabelerParams {
    fn default() -> Self {
        Self {
            occurrence_threshold: 75,
            nodata: OCCURRENCE_NODATA,
            reservoir_dilation_radius: 6,
            dam_dilation_iterations: 6,
            erosion_radius: 1,
            min_extent: 0.05,
            min_area: 20,
            coastline: CoastlineParams::default(),
            pixel_area_m2: 900.0,
            manual_exclusions: default_exclusions(),
        }
    }
}

/// Labeled raster plus statistics of every remaining body
#[derive(Debug, Clone)]
pub struct WaterMask {
    pub labels: LabeledRaster,
    pub bodies: BTreeMap<BodyId, BodyStats>,
}

impl WaterMask {
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// Water mask labeler
pub struct WaterMaskLabeler {
    params: LabelerParams,
}

impl WaterMaskLabeler {
    pub fn new(params: LabelerParams) -> Self {
        Self { params }
    }

    /// Labeler with the default thresholds
    pub fn standard() -> Self {
        Self::new(LabelerParams::default())
    }

    pub fn params(&self) -> &LabelerParams {
        &self.params
    }

    /// Segment `raster` into labeled water bodies.
    ///
    /// `dam_points` are `[lon, lat]` pairs. Land regions are recognised with
    /// `coastline`; anything without a nearby land polygon is treated as ocean.
    pub fn label(
        &self,
        raster: &OccurrenceRaster,
        dam_points: &[[f64; 2]],
        coastline: &CoastlineIndex,
        edit_mode: bool,
    ) -> LakeResult<WaterMask> {
        log::info!("Labeling water mask of shape {:?}", raster.data.dim());
        log::debug!("Labeler parameters: {:?}", self.params);
        raster.transform.validate()?;

        let binary = self.binary_mask(raster, edit_mode);
        log::debug!("Water pixels above threshold: {}", binary.iter().filter(|&&v| v).count());

        let reservoirs = self.reservoir_candidates(&binary, &raster.transform, dam_points);

        let mut labels = self.candidate_regions(&binary);
        let removed = self.remove_ocean(&mut labels, &raster.transform, coastline);
        log::debug!("Removed {} coastal or ocean regions", removed);

        let kept = erode(&labels.mapv(|l| l != 0), Diamond::new(self.params.erosion_radius));
        labels.zip_mut_with(&kept, |l, &k| {
            if !k {
                *l = 0;
            }
        });

        let bodies: BTreeMap<BodyId, BodyStats> = regions(&labels)
            .into_values()
            .map(|region| (region.id, self.body_stats(&region, &raster.transform, &reservoirs)))
            .collect();

        let storage = LabelStorage::compact(labels);
        log::info!(
            "Labeled {} water bodies ({}-bit labels)",
            bodies.len(),
            storage.bits()
        );

        Ok(WaterMask {
            labels: LabeledRaster {
                labels: storage,
                transform: raster.transform,
            },
            bodies,
        })
    }

    /// Threshold the occurrence raster; no-data is never water
    pub fn binary_mask(&self, raster: &OccurrenceRaster, edit_mode: bool) -> Array2<bool> {
        let threshold = self.params.occurrence_threshold;
        let nodata = self.params.nodata;
        let mut mask = raster.data.mapv(|v| v != nodata && v >= threshold);

        if edit_mode {
            for window in &self.params.manual_exclusions {
                if let Some((rows, cols)) = window.clip(mask.dim()) {
                    mask.slice_mut(ndarray::s![rows, cols]).fill(false);
                }
            }
        }
        mask
    }

    /// Pixels of dilated water regions that lie within reach of a dam point
    pub fn reservoir_candidates(
        &self,
        binary: &Array2<bool>,
        transform: &GeoTransform,
        dam_points: &[[f64; 2]],
    ) -> Array2<bool> {
        let element = Diamond::new(self.params.reservoir_dilation_radius);
        let dilated = dilate(binary, element);

        let mut dams = Array2::from_elem(binary.dim(), false);
        let mut placed = 0usize;
        for &[lon, lat] in dam_points {
            if let Some(cell) = transform.geo_to_cell(lon, lat, binary.dim()) {
                dams[cell] = true;
                placed += 1;
            }
        }
        log::debug!("{} of {} dam points fall inside the raster", placed, dam_points.len());
        if placed == 0 {
            return Array2::from_elem(binary.dim(), false);
        }

        let proximity = dilate_repeated(&dams, element, self.params.dam_dilation_iterations);
        let (labeled, _) = label_components(&dilated);

        let hit: BTreeSet<u32> = labeled
            .iter()
            .zip(proximity.iter())
            .filter(|(&l, &p)| l != 0 && p)
            .map(|(&l, _)| l)
            .collect();

        labeled.mapv(|l| l != 0 && hit.contains(&l))
    }

    /// Erode, label and keep compact regions above the size thresholds, relabeled in scan order
    pub fn candidate_regions(&self, binary: &Array2<bool>) -> Array2<u32> {
        let eroded = erode(binary, Diamond::new(self.params.erosion_radius));
        let (labels, count) = label_components(&eroded);

        let keep: BTreeSet<u32> = regions(&labels)
            .into_values()
            .filter(|r| r.extent() > self.params.min_extent && r.area() > self.params.min_area)
            .map(|r| r.id.0)
            .collect();
        log::debug!("{} of {} eroded regions pass the size filter", keep.len(), count);

        let filtered = labels.mapv(|l| l != 0 && keep.contains(&l));
        label_components(&filtered).0
    }

    /// Zero every region that is not at least mostly on land; returns the number removed
    pub fn remove_ocean(
        &self,
        labels: &mut Array2<u32>,
        transform: &GeoTransform,
        coastline: &CoastlineIndex,
    ) -> usize {
        let params = &self.params.coastline;
        let all: Vec<Region> = regions(labels).into_values().collect();

        let inland: BTreeSet<u32> = all
            .par_iter()
            .filter(|region| {
                let stride = params.stride_for(region.area());
                let samples: Vec<[f64; 2]> = region
                    .coords
                    .iter()
                    .step_by(stride)
                    .map(|&(r, c)| {
                        let (lon, lat) = transform.pixel_center_to_geo(r, c);
                        [lon, lat]
                    })
                    .collect();
                coastline.is_inland(&samples, params)
            })
            .map(|region| region.id.0)
            .collect();

        labels.mapv_inplace(|l| if inland.contains(&l) { l } else { 0 });
        all.len() - inland.len()
    }

    fn body_stats(&self, region: &Region, transform: &GeoTransform, reservoirs: &Array2<bool>) -> BodyStats {
        let (row, col) = region.centroid();
        let (lon, lat) = transform.pixel_to_geo(row + 0.5, col + 0.5);
        BodyStats {
            id: region.id,
            centroid_row: row,
            centroid_col: col,
            lon,
            lat,
            pixel_area: region.area(),
            area_km2: region.area() as f64 * self.params.pixel_area_m2 * 1e-6,
            extent: region.extent(),
            is_reservoir: region.touches(reservoirs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inpoly::Polygon;
    use approx::assert_relative_eq;

    fn raster_with_block(shape: (usize, usize), rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> OccurrenceRaster {
        let data = Array2::from_shape_fn(shape, |(i, j)| {
            if rows.contains(&i) && cols.contains(&j) {
                90
            } else {
                0
            }
        });
        OccurrenceRaster::new(data, GeoTransform::north_up(80.0, 30.0, 0.01, -0.01))
    }

    fn land() -> CoastlineIndex {
        CoastlineIndex::new(vec![Polygon::from_ring(&[
            [79.0, 29.0],
            [82.0, 29.0],
            [82.0, 31.0],
            [79.0, 31.0],
        ])])
    }

    #[test]
    fn test_all_dry_raster_has_no_bodies() {
        let raster = raster_with_block((30, 30), 0..0, 0..0);
        let mask = WaterMaskLabeler::standard().label(&raster, &[], &land(), false).unwrap();
        assert!(mask.is_empty());
        assert_eq!(mask.labels.dim(), (30, 30));
    }

    #[test]
    fn test_threshold_and_nodata() {
        let mut data = Array2::from_elem((2, 3), 0u8);
        data[[0, 0]] = 75;
        data[[0, 1]] = 74;
        data[[0, 2]] = OCCURRENCE_NODATA;
        data[[1, 0]] = 100;
        let raster = OccurrenceRaster::new(data, GeoTransform::north_up(0.0, 0.0, 1.0, -1.0));
        let mask = WaterMaskLabeler::standard().binary_mask(&raster, false);
        assert!(mask[[0, 0]] && !mask[[0, 1]] && !mask[[0, 2]] && mask[[1, 0]]);
    }

    #[test]
    fn test_exclusion_windows_are_clipped() {
        let params = LabelerParams {
            manual_exclusions: vec![PixelWindow::new(5, 50, 0, 2), PixelWindow::new(100, 200, 0, 5)],
            ..Default::default()
        };
        let raster = raster_with_block((10, 10), 0..10, 0..10);
        let labeler = WaterMaskLabeler::new(params);
        let edited = labeler.binary_mask(&raster, true);
        assert!(!edited[[9, 1]]);
        assert!(edited[[9, 2]]);
        assert!(edited[[4, 0]]);
        assert!(labeler.binary_mask(&raster, false)[[9, 1]]);
    }

    #[test]
    fn test_block_survives_two_erosions() {
        let raster = raster_with_block((40, 40), 10..20, 10..20);
        let labeler = WaterMaskLabeler::standard();

        let candidates = labeler.candidate_regions(&labeler.binary_mask(&raster, false));
        let props = regions(&candidates);
        assert_eq!(props.len(), 1);
        assert_eq!(props[&BodyId(1)].area(), 64);
        assert_relative_eq!(props[&BodyId(1)].extent(), 1.0);

        let mask = labeler.label(&raster, &[], &land(), false).unwrap();
        assert_eq!(mask.bodies.len(), 1);
        let body = &mask.bodies[&BodyId(1)];
        assert_eq!(body.pixel_area, 36);
        assert_relative_eq!(body.area_km2, 36.0 * 900.0 * 1e-6, epsilon = 1e-12);
        assert_relative_eq!(body.centroid_row, 14.5);
        assert_relative_eq!(body.lon, 80.0 + 15.0 * 0.01, epsilon = 1e-9);
        assert!(!body.is_reservoir);
        assert_eq!(mask.labels.labels.bits(), 8);
    }

    #[test]
    fn test_small_regions_are_filtered() {
        // 5x5 erodes to 3x3 = 9 pixels, below the area threshold
        let raster = raster_with_block((30, 30), 5..10, 5..10);
        let mask = WaterMaskLabeler::standard().label(&raster, &[], &land(), false).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn test_reservoir_flag_follows_dam_distance() {
        let raster = raster_with_block((40, 100), 10..20, 10..20);
        let labeler = WaterMaskLabeler::standard();
        let gt = raster.transform;

        let (near_lon, near_lat) = gt.pixel_center_to_geo(15, 15);
        let near = labeler.label(&raster, &[[near_lon, near_lat]], &land(), false).unwrap();
        assert!(near.bodies[&BodyId(1)].is_reservoir);

        let (far_lon, far_lat) = gt.pixel_center_to_geo(15, 85);
        let far = labeler.label(&raster, &[[far_lon, far_lat]], &land(), false).unwrap();
        assert!(!far.bodies[&BodyId(1)].is_reservoir);

        let outside = labeler.label(&raster, &[[0.0, 0.0]], &land(), false).unwrap();
        assert!(!outside.bodies[&BodyId(1)].is_reservoir);
    }

    #[test]
    fn test_regions_off_land_are_removed() {
        let raster = raster_with_block((40, 40), 10..20, 10..20);
        let offshore = CoastlineIndex::new(vec![Polygon::from_ring(&[
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 1.0],
        ])]);
        let labeler = WaterMaskLabeler::standard();
        assert!(labeler.label(&raster, &[], &offshore, false).unwrap().is_empty());
        assert!(labeler.label(&raster, &[], &CoastlineIndex::empty(), false).unwrap().is_empty());
    }
}
