//! Per-body aggregation of observations into height time series.
//!
//! Observations pass fixed quality gates, the surviving heights go through
//! sigma-based outlier rejection, and the remainder is summarised together with
//! the reference DEM height corrected by the geoid model.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::geoid::GeoidModel;
use crate::core::stats::{mean, median, medoid, std_dev};
use crate::types::{BodyId, BodyRecord, BodyStats, ElevationStats, Observation};

/// How outlying heights are removed from a body's series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutlierRejection {
    /// Keep heights within `mean ± k·σ` of all passing heights
    MeanSigma,
    /// Test each height against `mean ± k·σ` of the other passing heights
    LeaveOneOut,
}

/// Aggregation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationParams {
    /// Observations need a trimmed std strictly below this (metres)
    pub max_std: f64,
    pub min_points: usize,
    /// Open interval of plausible heights (metres)
    pub min_height: f64,
    pub max_height: f64,
    pub sigma_factor: f64,
    pub outlier_rejection: OutlierRejection,
    /// Emit bodies without any passing observation, flagged and with NaN heights
    pub include_rejected: bool,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            max_std: 0.25,
            min_points: 3,
            min_height: -15.0,
            max_height: 8000.0,
            sigma_factor: 3.0,
            outlier_rejection: OutlierRejection::MeanSigma,
            include_rejected: false,
        }
    }
}

/// Observation aggregator
pub struct Aggregator {
    params: AggregationParams,
}

impl Aggregator {
    pub fn new(params: AggregationParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(AggregationParams::default())
    }

    pub fn params(&self) -> &AggregationParams {
        &self.params
    }

    /// Quality gate applied to each observation
    pub fn passes(&self, obs: &Observation) -> bool {
        obs.std < self.params.max_std
            && obs.num_points >= self.params.min_points
            && obs.height > self.params.min_height
            && obs.height < self.params.max_height
    }

    /// Indices of `heights` that survive outlier rejection.
    ///
    /// When leave-one-out rejects every height, all of them are kept.
    pub fn inliers(&self, heights: &[f64]) -> Vec<usize> {
        let k = self.params.sigma_factor;
        let within = |h: f64, sample: &[f64]| match (mean(sample), std_dev(sample)) {
            (Some(m), Some(s)) => h <= m + k * s && h >= m - k * s,
            _ => true,
        };

        match self.params.outlier_rejection {
            OutlierRejection::LeaveOneOut if heights.len() >= 3 => {
                let kept: Vec<usize> = (0..heights.len())
                    .filter(|&i| {
                        let others: Vec<f64> = heights
                            .iter()
                            .enumerate()
                            .filter(|&(j, _)| j != i)
                            .map(|(_, &h)| h)
                            .collect();
                        within(heights[i], &others)
                    })
                    .collect();
                if kept.is_empty() {
                    (0..heights.len()).collect()
                } else {
                    kept
                }
            }
            _ => (0..heights.len()).filter(|&i| within(heights[i], heights)).collect(),
        }
    }

    /// One record per body with observations, ascending by body id
    pub fn aggregate(
        &self,
        observations: &[Observation],
        elevation: &BTreeMap<BodyId, ElevationStats>,
        bodies: &BTreeMap<BodyId, BodyStats>,
        geoid: &dyn GeoidModel,
    ) -> Vec<BodyRecord> {
        log::info!("Aggregating {} observations", observations.len());
        log::debug!("Aggregation parameters: {:?}", self.params);

        let mut by_body: BTreeMap<BodyId, Vec<&Observation>> = BTreeMap::new();
        for obs in observations {
            by_body.entry(obs.body_id).or_default().push(obs);
        }

        let records: Vec<BodyRecord> = by_body
            .into_par_iter()
            .filter_map(|(id, group)| {
                let stats = match bodies.get(&id) {
                    Some(s) => s,
                    None => {
                        log::warn!("Dropping observations of body {} without segmentation stats", id);
                        return None;
                    }
                };
                self.body_record(stats, &group, elevation.get(&id), geoid)
            })
            .collect();

        log::info!("Aggregated {} water bodies", records.len());
        records
    }

    fn body_record(
        &self,
        stats: &BodyStats,
        group: &[&Observation],
        elevation: Option<&ElevationStats>,
        geoid: &dyn GeoidModel,
    ) -> Option<BodyRecord> {
        let passing: Vec<&Observation> = group.iter().copied().filter(|o| self.passes(o)).collect();

        let mut record = BodyRecord {
            body_id: stats.id,
            area_km2: stats.area_km2,
            extent: stats.extent,
            is_reservoir: stats.is_reservoir,
            quality_flag: !passing.is_empty(),
            median_height: f64::NAN,
            mean_height: f64::NAN,
            height_range: f64::NAN,
            std: f64::NAN,
            lon: f64::NAN,
            lat: f64::NAN,
            num_obs: 0,
            heights: Vec::new(),
            stds: Vec::new(),
            doys: Vec::new(),
            months: Vec::new(),
            years: Vec::new(),
            reference_height: f64::NAN,
            reference_std: f64::NAN,
            geoid_offset: f64::NAN,
        };

        if passing.is_empty() {
            if !self.params.include_rejected {
                return None;
            }
            log::debug!("Body {} has no observation passing the quality gates", stats.id);
            return Some(record);
        }

        let heights: Vec<f64> = passing.iter().map(|o| o.height).collect();
        let kept: Vec<&Observation> = self.inliers(&heights).into_iter().map(|i| passing[i]).collect();

        record.heights = kept.iter().map(|o| o.height).collect();
        record.stds = kept.iter().map(|o| o.std).collect();
        record.doys = kept.iter().map(|o| o.doy).collect();
        record.months = kept.iter().map(|o| o.month).collect();
        record.years = kept.iter().map(|o| o.year).collect();
        record.num_obs = kept.len();

        record.median_height = median(&record.heights).unwrap_or(f64::NAN);
        record.mean_height = mean(&record.heights).unwrap_or(f64::NAN);
        let (lo, hi) = record
            .heights
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        record.height_range = hi - lo;
        record.std = mean(&record.stds).unwrap_or(f64::NAN);

        let xs: Vec<f64> = kept.iter().map(|o| o.lon).collect();
        let ys: Vec<f64> = kept.iter().map(|o| o.lat).collect();
        if let Some((lon, lat)) = medoid(&xs, &ys) {
            record.lon = lon;
            record.lat = lat;
        }

        record.geoid_offset = geoid.offset(record.lat, record.lon.rem_euclid(360.0));
        match elevation {
            Some(e) => {
                record.reference_height = e.height + record.geoid_offset;
                record.reference_std = e.std;
            }
            None => log::debug!("No reference elevation for body {}", stats.id),
        }

        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geoid::ZeroGeoid;
    use approx::assert_relative_eq;

    fn observation(body: u32, height: f64, std: f64, num_points: usize, lon: f64) -> Observation {
        Observation {
            id: 0,
            body_id: BodyId(body),
            raw_num_points: num_points,
            raw_lon: vec![lon],
            raw_lat: vec![30.0],
            raw_heights: vec![height],
            terrain_flags: vec![0],
            uncertainty: vec![0.1],
            height,
            std,
            num_points,
            lon,
            lat: 30.0,
            doy: 100,
            month: 4,
            year: 2021,
            laser: "gt1l".to_string(),
            granule: "g".to_string(),
        }
    }

    fn body(id: u32) -> BodyStats {
        BodyStats {
            id: BodyId(id),
            centroid_row: 0.0,
            centroid_col: 0.0,
            lon: 80.0,
            lat: 30.0,
            pixel_area: 100,
            area_km2: 0.09,
            extent: 0.8,
            is_reservoir: false,
        }
    }

    #[test]
    fn test_quality_gates() {
        let agg = Aggregator::standard();
        assert!(agg.passes(&observation(1, 10.0, 0.1, 3, 80.0)));
        assert!(!agg.passes(&observation(1, 10.0, 0.25, 3, 80.0)));
        assert!(!agg.passes(&observation(1, 10.0, 0.1, 2, 80.0)));
        assert!(!agg.passes(&observation(1, -15.0, 0.1, 3, 80.0)));
        assert!(!agg.passes(&observation(1, 8000.0, 0.1, 3, 80.0)));
    }

    #[test]
    fn test_single_pass_sigma_cannot_reject_one_of_five() {
        let heights = [10.0, 10.2, 9.8, 10.1, 50.0];
        assert_eq!(Aggregator::standard().inliers(&heights).len(), 5);

        let loo = Aggregator::new(AggregationParams {
            outlier_rejection: OutlierRejection::LeaveOneOut,
            ..Default::default()
        });
        assert_eq!(loo.inliers(&heights), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_mean_sigma_rejects_on_long_series() {
        let mut heights = vec![10.0; 20];
        heights.push(100.0);
        let kept = Aggregator::standard().inliers(&heights);
        assert_eq!(kept.len(), 20);
        assert!(!kept.contains(&20));
    }

    #[test]
    fn test_records_summarise_only_sigma_survivors() {
        // survivors split evenly between two longitudes; the outlier sits on the second
        let mut observations: Vec<Observation> = (0..20)
            .map(|i| observation(1, 10.0, 0.1, 5, if i < 10 { 80.0 } else { 81.0 }))
            .collect();
        observations.push(observation(1, 100.0, 0.1, 5, 81.0));
        let bodies = BTreeMap::from([(BodyId(1), body(1))]);

        let records = Aggregator::standard().aggregate(&observations, &BTreeMap::new(), &bodies, &ZeroGeoid);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.num_obs, 20);
        assert_eq!(r.heights, vec![10.0; 20]);
        assert_eq!(r.mean_height, 10.0);
        assert_eq!(r.median_height, 10.0);
        assert_eq!(r.height_range, 0.0);
        assert_eq!(r.doys.len(), 20);
        assert_eq!(r.lon, 80.0);
    }

    #[test]
    fn test_leave_one_out_records_drop_the_outlier() {
        let observations: Vec<Observation> = [10.0, 10.2, 9.8, 10.1, 50.0]
            .iter()
            .map(|&h| observation(1, h, 0.1, 5, 80.0))
            .collect();
        let bodies = BTreeMap::from([(BodyId(1), body(1))]);
        let loo = Aggregator::new(AggregationParams {
            outlier_rejection: OutlierRejection::LeaveOneOut,
            ..Default::default()
        });

        let records = loo.aggregate(&observations, &BTreeMap::new(), &bodies, &ZeroGeoid);
        let r = &records[0];
        assert_eq!(r.num_obs, 4);
        assert!(!r.heights.contains(&50.0));
        assert_relative_eq!(r.median_height, 10.05, epsilon = 1e-9);
        assert_relative_eq!(r.mean_height, 10.025, epsilon = 1e-9);

        let standard = Aggregator::standard().aggregate(&observations, &BTreeMap::new(), &bodies, &ZeroGeoid);
        assert_eq!(standard[0].num_obs, 5);
    }

    #[test]
    fn test_record_summary_and_reference_height() {
        let observations = vec![
            observation(1, 10.0, 0.1, 5, 80.0),
            observation(1, 10.4, 0.2, 5, 80.1),
            observation(1, 10.2, 0.9, 5, 80.2), // fails the std gate
            observation(2, 3.0, 0.1, 5, 81.0),
            observation(7, 3.0, 0.1, 5, 81.0), // no segmentation stats
        ];
        let elevation = BTreeMap::from([(
            BodyId(1),
            ElevationStats { height: 12.0, std: 1.5, mean: 12.1 },
        )]);
        let bodies = BTreeMap::from([(BodyId(1), body(1)), (BodyId(2), body(2))]);

        let records = Aggregator::standard().aggregate(&observations, &elevation, &bodies, &ZeroGeoid);
        assert_eq!(records.len(), 2);

        let r = &records[0];
        assert_eq!(r.body_id, BodyId(1));
        assert!(r.quality_flag);
        assert_eq!(r.num_obs, 2);
        assert_relative_eq!(r.median_height, 10.2, epsilon = 1e-12);
        assert_relative_eq!(r.height_range, 0.4, epsilon = 1e-12);
        assert_relative_eq!(r.std, 0.15, epsilon = 1e-12);
        assert_eq!(r.lon, 80.0);
        assert_eq!(r.reference_height, 12.0);
        assert_eq!(r.geoid_offset, 0.0);

        let r2 = &records[1];
        assert_eq!(r2.body_id, BodyId(2));
        assert_eq!(r2.lon, 81.0);
        assert!(r2.reference_height.is_nan());
    }

    #[test]
    fn test_bodies_without_passing_observations() {
        let observations = vec![observation(1, 10.0, 0.9, 5, 80.0)];
        let bodies = BTreeMap::from([(BodyId(1), body(1))]);
        let elevation = BTreeMap::new();

        assert!(Aggregator::standard()
            .aggregate(&observations, &elevation, &bodies, &ZeroGeoid)
            .is_empty());

        let keep = Aggregator::new(AggregationParams {
            include_rejected: true,
            ..Default::default()
        });
        let records = keep.aggregate(&observations, &elevation, &bodies, &ZeroGeoid);
        assert_eq!(records.len(), 1);
        assert!(!records[0].quality_flag);
        assert!(records[0].median_height.is_nan());
    }
}
