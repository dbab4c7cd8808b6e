//! Core water body processing modules

pub mod aggregate;
pub mod coastline;
pub mod elevation;
pub mod footprints;
pub mod geoid;
pub mod inpoly;
pub mod morphology;
pub mod pipeline;
pub mod stats;
pub mod water_mask;

// Re-export main types
pub use aggregate::{AggregationParams, Aggregator, OutlierRejection};
pub use coastline::{CoastlineIndex, CoastlineParams};
pub use elevation::{ElevationParams, ElevationResampler};
pub use footprints::{AttributionParams, FootprintAttributor};
pub use geoid::{GeoidGrid, GeoidModel, ZeroGeoid};
pub use inpoly::{inpoly, Polygon, PolygonTest};
pub use morphology::{Diamond, Region};
pub use pipeline::{BatchReport, PipelineConfig, ReferenceData, TileInput, TileProcessor, TileProduct};
pub use water_mask::{LabelerParams, PixelWindow, WaterMask, WaterMaskLabeler};
