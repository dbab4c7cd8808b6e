//! Input/output seams: tile names, DEM tiles, granules and catalogs

pub mod catalog;
pub mod dem;
pub mod granule;
#[cfg(feature = "gdal")]
pub mod raster;
pub mod tile_name;

pub use catalog::{read_catalog, write_catalog, write_catalog_to_dir, TileCatalog};
pub use dem::{DemTileSource, InMemoryDemSource, TilePath};
#[cfg(feature = "gdal")]
pub use dem::GdalDemSource;
pub use granule::{
    extract_metadata, load_metadata, save_metadata, AttributeReader, ChannelFootprints, GranuleAttributes,
    GranuleMetadata, GranuleSource, InMemoryGranuleSource, MetadataBatch,
};
#[cfg(feature = "gdal")]
pub use raster::{read_occurrence_raster, write_labeled_raster};
pub use tile_name::TileOrigin;
