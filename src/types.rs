use ndarray::Array2;
use num_traits::NumCast;
use serde::{Deserialize, Serialize};

/// Label value of one water body in a labeled raster (0 is background)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(pub u32);

impl BodyId {
    pub fn is_background(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Strict overlap test (touching edges do not count)
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min_lon < other.max_lon
            && self.max_lon > other.min_lon
            && self.min_lat < other.max_lat
            && self.max_lat > other.min_lat
    }
}

/// Affine pixel to geographic transform, GDAL coefficient order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y
    }

    /// Reject transforms that cannot be inverted
    pub fn validate(&self) -> LakeResult<()> {
        let det = self.determinant();
        if !det.is_finite() || det == 0.0 {
            return Err(LakeError::InvalidFormat(format!(
                "Geotransform is not invertible: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Continuous pixel coordinates (row, col) to (lon, lat)
    pub fn pixel_to_geo(&self, row: f64, col: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Geographic coordinates of a pixel centre
    pub fn pixel_center_to_geo(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_geo(row as f64 + 0.5, col as f64 + 0.5)
    }

    /// Inverse affine: (lon, lat) to continuous (row, col)
    pub fn geo_to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
        let det = self.determinant();
        let dx = lon - self.top_left_x;
        let dy = lat - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (self.pixel_width * dy - self.rotation_y * dx) / det;
        (row, col)
    }

    /// Floored cell index of a geographic point, `None` outside `shape`
    pub fn geo_to_cell(&self, lon: f64, lat: f64, shape: (usize, usize)) -> Option<(usize, usize)> {
        let (row, col) = self.geo_to_pixel(lon, lat);
        if !row.is_finite() || !col.is_finite() {
            return None;
        }
        let row = row.floor();
        let col = col.floor();
        if row < 0.0 || col < 0.0 || row >= shape.0 as f64 || col >= shape.1 as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Geographic extent of a raster of `shape` under this transform
    pub fn bounds(&self, shape: (usize, usize)) -> BoundingBox {
        let (rows, cols) = (shape.0 as f64, shape.1 as f64);
        let corners = [
            self.pixel_to_geo(0.0, 0.0),
            self.pixel_to_geo(0.0, cols),
            self.pixel_to_geo(rows, 0.0),
            self.pixel_to_geo(rows, cols),
        ];
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bbox.min_lon = bbox.min_lon.min(x);
            bbox.max_lon = bbox.max_lon.max(x);
            bbox.min_lat = bbox.min_lat.min(y);
            bbox.max_lat = bbox.max_lat.max(y);
        }
        bbox
    }
}

/// Water occurrence percentage raster (0-100, `OCCURRENCE_NODATA` for no data)
#[derive(Debug, Clone)]
pub struct OccurrenceRaster {
    pub data: Array2<u8>,
    pub transform: GeoTransform,
    pub bounds: BoundingBox,
}

pub const OCCURRENCE_NODATA: u8 = 255;

impl OccurrenceRaster {
    /// Raster whose bounds are derived from the transform
    pub fn new(data: Array2<u8>, transform: GeoTransform) -> Self {
        let bounds = transform.bounds(data.dim());
        Self { data, transform, bounds }
    }
}

/// Label grid storage, narrowed after labeling to the smallest type that holds the max label
#[derive(Debug, Clone, PartialEq)]
pub enum LabelStorage {
    U8(Array2<u8>),
    U16(Array2<u16>),
    U32(Array2<u32>),
}

fn narrow<T: NumCast>(labels: &Array2<u32>) -> Option<Array2<T>> {
    let values: Option<Vec<T>> = labels.iter().map(|&v| T::from(v)).collect();
    Array2::from_shape_vec(labels.dim(), values?).ok()
}

impl LabelStorage {
    /// Pick the narrowest storage able to hold the largest label
    pub fn compact(labels: Array2<u32>) -> Self {
        let max = labels.iter().copied().max().unwrap_or(0);
        if max <= u8::MAX as u32 {
            if let Some(a) = narrow::<u8>(&labels) {
                return LabelStorage::U8(a);
            }
        } else if max <= u16::MAX as u32 {
            if let Some(a) = narrow::<u16>(&labels) {
                return LabelStorage::U16(a);
            }
        }
        LabelStorage::U32(labels)
    }

    pub fn dim(&self) -> (usize, usize) {
        match self {
            LabelStorage::U8(a) => a.dim(),
            LabelStorage::U16(a) => a.dim(),
            LabelStorage::U32(a) => a.dim(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> BodyId {
        match self {
            LabelStorage::U8(a) => BodyId(a[[row, col]] as u32),
            LabelStorage::U16(a) => BodyId(a[[row, col]] as u32),
            LabelStorage::U32(a) => BodyId(a[[row, col]]),
        }
    }

    /// Storage width in bits
    pub fn bits(&self) -> u32 {
        match self {
            LabelStorage::U8(_) => 8,
            LabelStorage::U16(_) => 16,
            LabelStorage::U32(_) => 32,
        }
    }

    pub fn to_u32(&self) -> Array2<u32> {
        match self {
            LabelStorage::U8(a) => a.mapv(|v| v as u32),
            LabelStorage::U16(a) => a.mapv(|v| v as u32),
            LabelStorage::U32(a) => a.clone(),
        }
    }
}

/// Labeled water body raster
#[derive(Debug, Clone)]
pub struct LabeledRaster {
    pub labels: LabelStorage,
    pub transform: GeoTransform,
}

impl LabeledRaster {
    pub fn dim(&self) -> (usize, usize) {
        self.labels.dim()
    }

    pub fn label_at(&self, row: usize, col: usize) -> BodyId {
        self.labels.get(row, col)
    }

    /// Pixel indices grouped by body, row-major within each body
    pub fn body_pixels(&self) -> std::collections::BTreeMap<BodyId, Vec<(usize, usize)>> {
        let (rows, cols) = self.dim();
        let mut out: std::collections::BTreeMap<BodyId, Vec<(usize, usize)>> =
            std::collections::BTreeMap::new();
        for i in 0..rows {
            for j in 0..cols {
                let id = self.label_at(i, j);
                if !id.is_background() {
                    out.entry(id).or_default().push((i, j));
                }
            }
        }
        out
    }
}

/// Per-body segmentation statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyStats {
    pub id: BodyId,
    pub centroid_row: f64,
    pub centroid_col: f64,
    pub lon: f64,
    pub lat: f64,
    pub pixel_area: usize,
    /// Area in km² assuming a fixed ground pixel size
    pub area_km2: f64,
    /// Pixel area over bounding-box area
    pub extent: f64,
    pub is_reservoir: bool,
}

/// JSON has no NaN; missing statistics are written as `null` and read back as NaN
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            s.serialize_none()
        } else {
            s.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

/// Robust reference DEM statistics for one body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElevationStats {
    #[serde(with = "nan_as_null")]
    pub height: f64,
    #[serde(with = "nan_as_null")]
    pub std: f64,
    #[serde(with = "nan_as_null")]
    pub mean: f64,
}

impl ElevationStats {
    pub fn unavailable() -> Self {
        Self {
            height: f64::NAN,
            std: f64::NAN,
            mean: f64::NAN,
        }
    }

    pub fn is_available(&self) -> bool {
        self.height.is_finite()
    }
}

/// One candidate height for one body from one laser of one granule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: usize,
    pub body_id: BodyId,
    pub raw_num_points: usize,
    pub raw_lon: Vec<f64>,
    pub raw_lat: Vec<f64>,
    pub raw_heights: Vec<f64>,
    pub terrain_flags: Vec<i32>,
    pub uncertainty: Vec<f64>,
    /// Median of the decile-trimmed heights
    pub height: f64,
    /// Population std of the decile-trimmed heights
    pub std: f64,
    pub num_points: usize,
    /// Medoid of the raw footprints
    pub lon: f64,
    pub lat: f64,
    pub doy: u32,
    pub month: u32,
    pub year: i32,
    pub laser: String,
    pub granule: String,
}

/// Final catalog entry for one water body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyRecord {
    pub body_id: BodyId,
    pub area_km2: f64,
    pub extent: f64,
    pub is_reservoir: bool,
    pub quality_flag: bool,
    #[serde(with = "nan_as_null")]
    pub median_height: f64,
    #[serde(with = "nan_as_null")]
    pub mean_height: f64,
    #[serde(with = "nan_as_null")]
    pub height_range: f64,
    #[serde(with = "nan_as_null")]
    pub std: f64,
    #[serde(with = "nan_as_null")]
    pub lon: f64,
    #[serde(with = "nan_as_null")]
    pub lat: f64,
    pub num_obs: usize,
    pub heights: Vec<f64>,
    pub stds: Vec<f64>,
    pub doys: Vec<u32>,
    pub months: Vec<u32>,
    pub years: Vec<i32>,
    /// Reference DEM height plus geoid offset
    #[serde(with = "nan_as_null")]
    pub reference_height: f64,
    #[serde(with = "nan_as_null")]
    pub reference_std: f64,
    #[serde(with = "nan_as_null")]
    pub geoid_offset: f64,
}

/// Error types for water body processing
#[derive(Debug, thiserror::Error)]
pub enum LakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for water body operations
pub type LakeResult<T> = Result<T, LakeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_geo_pixel_roundtrip_north_up() {
        let gt = GeoTransform::north_up(80.0, 30.0, 0.00025, -0.00025);
        let (lon, lat) = gt.pixel_center_to_geo(10, 20);
        assert_relative_eq!(lon, 80.0 + 20.5 * 0.00025, epsilon = 1e-12);
        assert_relative_eq!(lat, 30.0 - 10.5 * 0.00025, epsilon = 1e-12);

        assert_eq!(gt.geo_to_cell(lon, lat, (100, 100)), Some((10, 20)));
        assert_eq!(gt.geo_to_cell(79.99, 29.99, (100, 100)), None);
    }

    #[test]
    fn test_singular_transform_rejected() {
        let gt = GeoTransform::north_up(0.0, 0.0, 0.0, -1.0);
        assert!(gt.validate().is_err());
        assert_eq!(gt.geo_to_cell(0.5, -0.5, (10, 10)), None);
    }

    #[test]
    fn test_label_storage_width_follows_max_label() {
        let small = Array2::from_shape_vec((1, 3), vec![0u32, 1, 255]).unwrap();
        assert_eq!(LabelStorage::compact(small).bits(), 8);

        let medium = Array2::from_shape_vec((1, 2), vec![0u32, 256]).unwrap();
        let storage = LabelStorage::compact(medium);
        assert_eq!(storage.bits(), 16);
        assert_eq!(storage.get(0, 1), BodyId(256));

        let large = Array2::from_shape_vec((1, 2), vec![70_000u32, 1]).unwrap();
        assert_eq!(LabelStorage::compact(large).bits(), 32);
    }

    #[test]
    fn test_label_storage_widens_back_to_u32() {
        let labels = Array2::from_shape_vec((2, 2), vec![0u32, 3, 255, 1]).unwrap();
        let storage = LabelStorage::compact(labels.clone());
        assert_eq!(storage.bits(), 8);
        assert_eq!(storage.to_u32(), labels);

        let wide = Array2::from_shape_vec((1, 3), vec![0u32, 300, 65_535]).unwrap();
        let storage = LabelStorage::compact(wide.clone());
        assert_eq!(storage.bits(), 16);
        assert_eq!(storage.to_u32(), wide);
    }

    #[test]
    fn test_missing_elevation_survives_json() {
        let json = serde_json::to_string(&ElevationStats::unavailable()).unwrap();
        assert_eq!(json, r#"{"height":null,"std":null,"mean":null}"#);
        let back: ElevationStats = serde_json::from_str(&json).unwrap();
        assert!(back.height.is_nan() && back.std.is_nan() && back.mean.is_nan());

        let stats = ElevationStats { height: 1.5, std: 0.0, mean: 2.0 };
        let back: ElevationStats = serde_json::from_str(&serde_json::to_string(&stats).unwrap()).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_bounds_and_overlap() {
        let gt = GeoTransform::north_up(10.0, 20.0, 1.0, -1.0);
        let b = gt.bounds((5, 10));
        assert_eq!(b.min_lon, 10.0);
        assert_eq!(b.max_lon, 20.0);
        assert_eq!(b.min_lat, 15.0);
        assert_eq!(b.max_lat, 20.0);

        let touching = BoundingBox { min_lon: 20.0, max_lon: 25.0, min_lat: 15.0, max_lat: 20.0 };
        assert!(!b.overlaps(&touching));
        let inside = BoundingBox { min_lon: 12.0, max_lon: 13.0, min_lat: 16.0, max_lat: 17.0 };
        assert!(b.overlaps(&inside));
    }
}
