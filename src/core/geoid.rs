use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::{LakeError, LakeResult};

/// Ellipsoid to orthometric height correction
pub trait GeoidModel: Send + Sync {
    /// Offset in metres at `lat` and `lon` (degrees, longitude in `[0, 360)`)
    fn offset(&self, lat: f64, lon: f64) -> f64;
}

/// No correction
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroGeoid;

impl GeoidModel for ZeroGeoid {
    fn offset(&self, _lat: f64, _lon: f64) -> f64 {
        0.0
    }
}

/// Geoid undulations on a regular global grid.
///
/// Row 0 is at `lat_start`, rows step by `lat_step` (negative for north-to-south
/// grids). Columns start at longitude 0 and wrap at 360 degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GeoidGridFile")]
pub struct GeoidGrid {
    values: Array2<f32>,
    lat_start: f64,
    lat_step: f64,
    lon_step: f64,
}

/// Serialized form of a grid, checked by `GeoidGrid::new` on load
#[derive(Deserialize)]
struct GeoidGridFile {
    values: Array2<f32>,
    lat_start: f64,
    lat_step: f64,
    lon_step: f64,
}

impl TryFrom<GeoidGridFile> for GeoidGrid {
    type Error = LakeError;

    fn try_from(file: GeoidGridFile) -> LakeResult<Self> {
        GeoidGrid::new(file.values, file.lat_start, file.lat_step, file.lon_step)
    }
}

impl GeoidGrid {
    pub fn new(values: Array2<f32>, lat_start: f64, lat_step: f64, lon_step: f64) -> LakeResult<Self> {
        if values.is_empty() || !lat_step.is_finite() || lat_step == 0.0 || !lon_step.is_finite() || lon_step <= 0.0 {
            return Err(LakeError::InvalidFormat(format!(
                "Invalid geoid grid: shape {:?}, steps {} {}",
                values.dim(),
                lat_step,
                lon_step
            )));
        }
        Ok(Self {
            values,
            lat_start,
            lat_step,
            lon_step,
        })
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn lat_start(&self) -> f64 {
        self.lat_start
    }

    pub fn lat_step(&self) -> f64 {
        self.lat_step
    }

    pub fn lon_step(&self) -> f64 {
        self.lon_step
    }
}

impl GeoidModel for GeoidGrid {
    fn offset(&self, lat: f64, lon: f64) -> f64 {
        let (rows, cols) = self.values.dim();
        if rows == 0 || cols == 0 || !lat.is_finite() || !lon.is_finite() {
            return f64::NAN;
        }

        let r = ((lat - self.lat_start) / self.lat_step).clamp(0.0, (rows - 1) as f64);
        let r0 = r.floor() as usize;
        let r1 = (r0 + 1).min(rows - 1);
        let fr = r - r0 as f64;

        let c = lon.rem_euclid(360.0) / self.lon_step;
        let c0f = c.floor();
        let fc = c - c0f;
        let c0 = (c0f as usize) % cols;
        let c1 = (c0 + 1) % cols;

        let v = |i: usize, j: usize| f64::from(self.values[[i, j]]);
        let top = v(r0, c0) * (1.0 - fc) + v(r0, c1) * fc;
        let bottom = v(r1, c0) * (1.0 - fc) + v(r1, c1) * fc;
        top * (1.0 - fr) + bottom * fr
    }
}
