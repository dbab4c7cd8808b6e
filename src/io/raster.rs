use crate::types::{GeoTransform, LabelStorage, LabeledRaster, LakeError, LakeResult, OccurrenceRaster};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Occurrence rasters are geographic (WGS84)
const OCCURRENCE_EPSG: u32 = 4326;

/// Read band 1 of an occurrence GeoTIFF
pub fn read_occurrence_raster<P: AsRef<Path>>(path: P) -> LakeResult<OccurrenceRaster> {
    log::info!("Reading occurrence raster from: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    transform.validate()?;
    let (width, height) = dataset.raster_size();
    log::debug!("Occurrence raster size: {}x{}", width, height);

    let rasterband = dataset.rasterband(1)?;
    let band_data = rasterband.read_as::<u8>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| LakeError::Processing(format!("Failed to reshape occurrence data: {}", e)))?;

    Ok(OccurrenceRaster::new(data, transform))
}

fn write_band<T: GdalType + Copy>(path: &Path, data: &Array2<T>, transform: &GeoTransform) -> LakeResult<()> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = data.dim();

    let mut dataset = driver.create_with_band_type::<T, _>(path, width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(OCCURRENCE_EPSG)?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat: Vec<T> = data.iter().copied().collect();
    let buffer = Buffer::new((width, height), flat);
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(0.0))?;
    Ok(())
}

/// Write a labeled raster as a single-band GeoTIFF of the storage's width
pub fn write_labeled_raster<P: AsRef<Path>>(path: P, raster: &LabeledRaster) -> LakeResult<()> {
    let path = path.as_ref();
    log::info!(
        "Writing {}-bit labeled raster to: {}",
        raster.labels.bits(),
        path.display()
    );
    match &raster.labels {
        LabelStorage::U8(a) => write_band(path, a, &raster.transform),
        LabelStorage::U16(a) => write_band(path, a, &raster.transform),
        LabelStorage::U32(a) => write_band(path, a, &raster.transform),
    }
}
