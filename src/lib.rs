//! lakeheight: water body segmentation and altimetry lake levels
//!
//! Turns a surface-water occurrence raster into labeled water bodies (with
//! ocean and coastline contamination removed), samples a reference DEM over
//! each body, attributes ICESat-2 land-segment footprints to the bodies and
//! aggregates them into outlier-filtered height time series.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types
pub use types::{
    BodyId, BodyRecord, BodyStats, BoundingBox, ElevationStats, GeoTransform, LabelStorage, LabeledRaster,
    LakeError, LakeResult, Observation, OccurrenceRaster,
};

pub use crate::core::{
    inpoly, Aggregator, CoastlineIndex, ElevationResampler, FootprintAttributor, PipelineConfig, Polygon,
    ReferenceData, TileInput, TileProcessor, WaterMaskLabeler,
};
pub use io::{GranuleMetadata, TileCatalog, TileOrigin};

#[cfg(feature = "python")]
mod python {
    use numpy::{PyReadonlyArray2, ToPyArray};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    use crate::core::coastline::CoastlineIndex;
    use crate::core::inpoly::{inpoly, Polygon};
    use crate::core::water_mask::WaterMaskLabeler;
    use crate::types::{GeoTransform, OccurrenceRaster};

    /// Convert an `(n, 2)` array into coordinate pairs
    fn numpy_to_points(arr: &PyReadonlyArray2<f64>) -> PyResult<Vec<[f64; 2]>> {
        let view = arr.as_array();
        if view.ncols() != 2 {
            return Err(PyValueError::new_err(format!(
                "Expected an (n, 2) array, got shape {:?}",
                view.dim()
            )));
        }
        Ok(view.rows().into_iter().map(|r| [r[0], r[1]]).collect())
    }

    /// Point-in-polygon test; without `edges` the nodes form one closed ring
    #[pyfunction]
    #[pyo3(name = "inpoly")]
    fn py_inpoly(
        py: Python,
        points: PyReadonlyArray2<f64>,
        nodes: PyReadonlyArray2<f64>,
        edges: Option<PyReadonlyArray2<i64>>,
        ftol: Option<f64>,
    ) -> PyResult<(PyObject, PyObject)> {
        let pts = numpy_to_points(&points)?;
        let node_list = numpy_to_points(&nodes)?;

        let polygon = match edges {
            Some(e) => {
                let view = e.as_array();
                if view.ncols() != 2 {
                    return Err(PyValueError::new_err("edges must have shape (m, 2)"));
                }
                let mut edge_list = Vec::with_capacity(view.nrows());
                for row in view.rows() {
                    if row[0] < 0 || row[1] < 0 {
                        return Err(PyValueError::new_err("edge indices must be non-negative"));
                    }
                    edge_list.push([row[0] as usize, row[1] as usize]);
                }
                Polygon::new(node_list, edge_list)
            }
            None => Polygon::from_ring(&node_list),
        };

        let result = inpoly(&pts, &polygon, ftol).map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok((
            result.inside.to_pyarray(py).into(),
            result.boundary.to_pyarray(py).into(),
        ))
    }

    /// Label an occurrence array; returns the label grid and per-body columns
    #[pyfunction]
    fn label_water_mask(
        py: Python,
        occurrence: PyReadonlyArray2<u8>,
        geotransform: [f64; 6],
        dams: Option<PyReadonlyArray2<f64>>,
        coastline: Vec<PyReadonlyArray2<f64>>,
        edit: Option<bool>,
    ) -> PyResult<PyObject> {
        let raster = OccurrenceRaster::new(occurrence.as_array().to_owned(), GeoTransform::from_gdal(geotransform));
        let dam_points = match dams {
            Some(d) => numpy_to_points(&d)?,
            None => Vec::new(),
        };
        let mut polygons = Vec::with_capacity(coastline.len());
        for ring in &coastline {
            polygons.push(Polygon::from_ring(&numpy_to_points(ring)?));
        }
        let index = CoastlineIndex::new(polygons);

        let mask = WaterMaskLabeler::standard()
            .label(&raster, &dam_points, &index, edit.unwrap_or(false))
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;

        let bodies: Vec<_> = mask.bodies.values().collect();
        let result = PyDict::new(py);
        result.set_item("labels", mask.labels.labels.to_u32().to_pyarray(py))?;
        result.set_item("ids", bodies.iter().map(|b| b.id.0).collect::<Vec<_>>())?;
        result.set_item("area_km2", bodies.iter().map(|b| b.area_km2).collect::<Vec<_>>())?;
        result.set_item("is_reservoir", bodies.iter().map(|b| b.is_reservoir).collect::<Vec<_>>())?;
        result.set_item("lat", bodies.iter().map(|b| b.lat).collect::<Vec<_>>())?;
        result.set_item("lon", bodies.iter().map(|b| b.lon).collect::<Vec<_>>())?;
        result.set_item("extent", bodies.iter().map(|b| b.extent).collect::<Vec<_>>())?;
        Ok(result.into())
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(py_inpoly, m)?)?;
        m.add_function(wrap_pyfunction!(label_water_mask, m)?)?;
        Ok(())
    }
}
