use crate::types::{LakeError, LakeResult};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Geographic origin of an occurrence tile, as encoded in its file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileOrigin {
    /// Longitude magnitude in degrees
    pub lon: i32,
    pub east: bool,
    /// Latitude magnitude in degrees
    pub lat: i32,
    pub north: bool,
}

impl TileOrigin {
    /// Parse names like `occurrence_80E_30Nv1_4_2021.tif`
    pub fn from_mask_name(name: &str) -> LakeResult<Self> {
        let pattern = Regex::new(r"(\d{1,3})([EW])_(\d{1,2})([NS])v")
            .map_err(|e| LakeError::Processing(format!("Regex error: {}", e)))?;

        let caps = pattern.captures(name).ok_or_else(|| {
            LakeError::Metadata(format!("No tile origin found in name: {}", name))
        })?;

        let lon: i32 = caps[1]
            .parse()
            .map_err(|e| LakeError::Metadata(format!("Invalid longitude in {}: {}", name, e)))?;
        let lat: i32 = caps[3]
            .parse()
            .map_err(|e| LakeError::Metadata(format!("Invalid latitude in {}: {}", name, e)))?;

        if lon > 180 || lat > 90 {
            return Err(LakeError::Metadata(format!(
                "Tile origin out of range in {}: {}{} {}{}",
                name, lon, &caps[2], lat, &caps[4]
            )));
        }

        Ok(Self {
            lon,
            east: &caps[2] == "E",
            lat,
            north: &caps[4] == "N",
        })
    }

    pub fn ew(&self) -> char {
        if self.east {
            'E'
        } else {
            'W'
        }
    }

    pub fn ns(&self) -> char {
        if self.north {
            'N'
        } else {
            'S'
        }
    }

    /// Zero-padded stem used for product file names, e.g. `080E_30N`
    pub fn product_stem(&self) -> String {
        format!("{:03}{}_{:02}{}", self.lon, self.ew(), self.lat, self.ns())
    }
}

impl std::fmt::Display for TileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.product_stem())
    }
}
