//! Attribution of altimetry footprints to labeled water bodies.
//!
//! Every (granule, laser, body) triple with enough footprints becomes one
//! [`Observation`] carrying the decile-trimmed height and the raw samples.

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::stats::{medoid, trimmed_summary};
use crate::io::granule::{ChannelFootprints, GranuleMetadata, GranuleSource};
use crate::types::{BodyId, BoundingBox, LabeledRaster, Observation};

/// Footprint attribution parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionParams {
    /// A body needs strictly more footprints than this in one channel
    pub min_raw_points: usize,
}

impl Default for AttributionParams {
    fn default() -> Self {
        Self { min_raw_points: 2 }
    }
}

/// Footprint attributor
pub struct FootprintAttributor {
    params: AttributionParams,
}

impl FootprintAttributor {
    pub fn new(params: AttributionParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(AttributionParams::default())
    }

    /// Observations of every body in `labels` from granules overlapping `bounds`.
    ///
    /// Output is ordered by granule, laser, then body id; ids start at 1.
    pub fn attribute(
        &self,
        labels: &LabeledRaster,
        granules: &[GranuleMetadata],
        source: &dyn GranuleSource,
        bounds: &BoundingBox,
    ) -> Vec<Observation> {
        let selected: Vec<&GranuleMetadata> = granules.iter().filter(|g| g.bounds().overlaps(bounds)).collect();
        log::info!("Attributing footprints from {} of {} granules", selected.len(), granules.len());

        let per_granule: Vec<Vec<Observation>> = selected
            .par_iter()
            .map(|granule| self.attribute_granule(labels, granule, source))
            .collect();

        let mut observations: Vec<Observation> = per_granule.into_iter().flatten().collect();
        for (i, obs) in observations.iter_mut().enumerate() {
            obs.id = i + 1;
        }
        log::info!("Collected {} water body observations", observations.len());
        observations
    }

    fn attribute_granule(
        &self,
        labels: &LabeledRaster,
        granule: &GranuleMetadata,
        source: &dyn GranuleSource,
    ) -> Vec<Observation> {
        let date = match NaiveDate::from_ymd_opt(granule.year, granule.month, granule.day) {
            Some(d) => d,
            None => {
                log::warn!(
                    "Skipping granule {} with invalid date {}-{}-{}",
                    granule.filename,
                    granule.year,
                    granule.month,
                    granule.day
                );
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for laser in &granule.lasers {
            let channel = match source.read_channel(granule, laser) {
                Ok(Some(channel)) => channel,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Skipping unreadable granule {}: {}", granule.filename, e);
                    return Vec::new();
                }
            };
            if let Err(e) = channel.validate() {
                log::warn!("Skipping {} {}: {}", granule.filename, laser, e);
                continue;
            }
            out.extend(self.channel_observations(labels, &channel, granule, laser, date));
        }
        out
    }

    /// Group one channel's footprints by body and summarise each group
    pub fn channel_observations(
        &self,
        labels: &LabeledRaster,
        channel: &ChannelFootprints,
        granule: &GranuleMetadata,
        laser: &str,
        date: NaiveDate,
    ) -> Vec<Observation> {
        let shape = labels.dim();
        let mut by_body: BTreeMap<BodyId, Vec<usize>> = BTreeMap::new();
        for (i, (&lon, &lat)) in channel.lon.iter().zip(&channel.lat).enumerate() {
            if let Some((row, col)) = labels.transform.geo_to_cell(lon, lat, shape) {
                let id = labels.label_at(row, col);
                if !id.is_background() {
                    by_body.entry(id).or_default().push(i);
                }
            }
        }

        by_body
            .into_iter()
            .filter(|(_, idx)| idx.len() > self.params.min_raw_points)
            .filter_map(|(body_id, idx)| {
                let pick = |v: &[f64]| idx.iter().map(|&i| v[i]).collect::<Vec<f64>>();
                let raw_lon = pick(&channel.lon);
                let raw_lat = pick(&channel.lat);
                let raw_heights = pick(&channel.height);

                let summary = trimmed_summary(&raw_heights)?;
                let (lon, lat) = medoid(&raw_lon, &raw_lat)?;

                Some(Observation {
                    id: 0,
                    body_id,
                    raw_num_points: idx.len(),
                    terrain_flags: idx.iter().map(|&i| channel.terrain_flag[i]).collect(),
                    uncertainty: pick(&channel.uncertainty),
                    raw_lon,
                    raw_lat,
                    raw_heights,
                    height: summary.median,
                    std: summary.std,
                    num_points: summary.count,
                    lon,
                    lat,
                    doy: date.ordinal(),
                    month: date.month(),
                    year: date.year(),
                    laser: laser.to_string(),
                    granule: granule.filename.clone(),
                })
            })
            .collect()
    }
}
