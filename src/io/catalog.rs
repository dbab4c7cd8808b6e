use crate::io::tile_name::TileOrigin;
use crate::types::{BodyId, BodyRecord, BodyStats, ElevationStats, LakeResult, Observation};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Everything produced for one occurrence tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileCatalog {
    pub origin: TileOrigin,
    pub bodies: BTreeMap<BodyId, BodyStats>,
    pub elevation: BTreeMap<BodyId, ElevationStats>,
    pub records: Vec<BodyRecord>,
    pub observations: Vec<Observation>,
}

impl TileCatalog {
    /// Conventional file name, e.g. `results_080E_30N_v1.json.gz`
    pub fn file_name(&self) -> String {
        format!("results_{}_v1.json.gz", self.origin.product_stem())
    }
}

/// Write a gzip-compressed JSON catalog
pub fn write_catalog<P: AsRef<Path>>(path: P, catalog: &TileCatalog) -> LakeResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, catalog)?;
    encoder.finish()?.flush()?;
    log::info!(
        "Wrote catalog with {} bodies to: {}",
        catalog.records.len(),
        path.display()
    );
    Ok(())
}

/// Write `catalog` into `dir` under its conventional file name
pub fn write_catalog_to_dir<P: AsRef<Path>>(dir: P, catalog: &TileCatalog) -> LakeResult<PathBuf> {
    let path = dir.as_ref().join(catalog.file_name());
    write_catalog(&path, catalog)?;
    Ok(path)
}

pub fn read_catalog<P: AsRef<Path>>(path: P) -> LakeResult<TileCatalog> {
    let file = File::open(path.as_ref())?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let catalog = serde_json::from_reader(decoder)?;
    Ok(catalog)
}
