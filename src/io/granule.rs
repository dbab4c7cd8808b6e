use crate::types::{BoundingBox, LakeError, LakeResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Sidecar record describing one altimetry granule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranuleMetadata {
    pub filename: String,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Ground-track group names, e.g. `gt1l`
    pub lasers: Vec<String>,
}

impl GranuleMetadata {
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min_lon: self.lon_min,
            max_lon: self.lon_max,
            min_lat: self.lat_min,
            max_lat: self.lat_max,
        }
    }

    /// Build a record from the global attributes of a granule file
    pub fn from_attributes(filename: impl Into<String>, attrs: &GranuleAttributes) -> LakeResult<Self> {
        let (year, month, day) = parse_time_coverage_start(&attrs.time_coverage_start)?;
        Ok(Self {
            filename: filename.into(),
            lon_min: attrs.lon_min,
            lon_max: attrs.lon_max,
            lat_min: attrs.lat_min,
            lat_max: attrs.lat_max,
            year,
            month,
            day,
            lasers: laser_groups(&attrs.groups),
        })
    }
}

/// Global attributes and top-level group names of a granule file
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleAttributes {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
    pub time_coverage_start: String,
    pub groups: Vec<String>,
}

/// Calendar date of an ISO-like timestamp, from its fixed-position fields
pub fn parse_time_coverage_start(value: &str) -> LakeResult<(i32, u32, u32)> {
    let field = |range: std::ops::Range<usize>, what: &str| {
        value
            .get(range)
            .ok_or_else(|| LakeError::Metadata(format!("Timestamp too short: {:?}", value)))
            .and_then(|s| {
                s.parse::<u32>()
                    .map_err(|e| LakeError::Metadata(format!("Invalid {} in {:?}: {}", what, value, e)))
            })
    };
    let year = field(0..4, "year")?;
    let month = field(5..7, "month")?;
    let day = field(8..10, "day")?;
    Ok((year as i32, month, day))
}

/// Group names that hold ground tracks
pub fn laser_groups(groups: &[String]) -> Vec<String> {
    groups.iter().filter(|g| g.contains("gt")).cloned().collect()
}

pub fn load_metadata<P: AsRef<Path>>(path: P) -> LakeResult<Vec<GranuleMetadata>> {
    log::info!("Loading granule metadata from: {}", path.as_ref().display());
    let reader = BufReader::new(File::open(path.as_ref())?);
    let records: Vec<GranuleMetadata> = serde_json::from_reader(reader)?;
    log::debug!("Loaded {} granule records", records.len());
    Ok(records)
}

pub fn save_metadata<P: AsRef<Path>>(path: P, records: &[GranuleMetadata]) -> LakeResult<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer(writer, records)?;
    log::info!("Saved {} granule records to: {}", records.len(), path.as_ref().display());
    Ok(())
}

/// Reads the global attributes of one granule file
pub trait AttributeReader: Send + Sync {
    fn read_attributes(&self, path: &Path) -> LakeResult<GranuleAttributes>;
}

/// Outcome of a metadata extraction run
#[derive(Debug, Default)]
pub struct MetadataBatch {
    pub records: Vec<GranuleMetadata>,
    pub errors: Vec<String>,
}

/// Extract metadata of every granule at least `min_file_size` bytes long.
///
/// Files are read in parallel; per-file failures are collected, not raised.
pub fn extract_metadata(paths: &[PathBuf], reader: &dyn AttributeReader, min_file_size: u64) -> MetadataBatch {
    let selected: Vec<&PathBuf> = paths
        .iter()
        .filter(|p| std::fs::metadata(p).map(|m| m.len() >= min_file_size).unwrap_or(false))
        .collect();
    log::info!("Extracting metadata from {} of {} granule files", selected.len(), paths.len());

    let results: Vec<Result<GranuleMetadata, String>> = selected
        .par_iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            reader
                .read_attributes(path)
                .and_then(|attrs| GranuleMetadata::from_attributes(name.clone(), &attrs))
                .map_err(|e| format!("Error reading file: {} - {}", name, e))
        })
        .collect();

    let mut batch = MetadataBatch::default();
    for result in results {
        match result {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                log::warn!("{}", e);
                batch.errors.push(e);
            }
        }
    }
    batch
}

/// Land-segment footprints of one laser channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelFootprints {
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
    /// Mean terrain height per segment
    pub height: Vec<f64>,
    pub terrain_flag: Vec<i32>,
    pub uncertainty: Vec<f64>,
}

impl ChannelFootprints {
    pub fn len(&self) -> usize {
        self.lon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lon.is_empty()
    }

    /// All per-footprint arrays must have the same length
    pub fn validate(&self) -> LakeResult<()> {
        let n = self.lon.len();
        let lengths = [
            self.lat.len(),
            self.height.len(),
            self.terrain_flag.len(),
            self.uncertainty.len(),
        ];
        if lengths.iter().any(|&l| l != n) {
            return Err(LakeError::InvalidFormat(format!(
                "Footprint arrays have mismatched lengths: lon {} vs {:?}",
                n, lengths
            )));
        }
        Ok(())
    }
}

/// Source of per-laser footprints.
///
/// `Ok(None)` means the channel lacks the required fields; `Err` means the
/// granule itself could not be read.
pub trait GranuleSource: Send + Sync {
    fn read_channel(&self, granule: &GranuleMetadata, laser: &str) -> LakeResult<Option<ChannelFootprints>>;
}

/// Footprints held in memory, keyed by granule file name and laser
#[derive(Debug, Default, Clone)]
pub struct InMemoryGranuleSource {
    channels: HashMap<(String, String), ChannelFootprints>,
    unreadable: HashSet<String>,
}

impl InMemoryGranuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>, laser: impl Into<String>, footprints: ChannelFootprints) {
        self.channels.insert((filename.into(), laser.into()), footprints);
    }

    /// Make every read of `filename` fail
    pub fn mark_unreadable(&mut self, filename: impl Into<String>) {
        self.unreadable.insert(filename.into());
    }
}

impl GranuleSource for InMemoryGranuleSource {
    fn read_channel(&self, granule: &GranuleMetadata, laser: &str) -> LakeResult<Option<ChannelFootprints>> {
        if self.unreadable.contains(&granule.filename) {
            return Err(LakeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("cannot read granule {}", granule.filename),
            )));
        }
        Ok(self
            .channels
            .get(&(granule.filename.clone(), laser.to_string()))
            .cloned())
    }
}
