//! Python bindings, built with the `python` feature.
//!
//! Region text is resolved against a plain two-axis sky image whose reference
//! pixel is the image center, which is enough to normalize files, inspect
//! their lines and rasterize masks from Python.

use std::sync::Arc;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::channels::parse_and_consolidate;
use crate::coordinates::{CoordinateSystem, LinearCoordinateSystem};
use crate::error::RegionError;
use crate::region_list::{Line, LineKind, RegionList};

fn to_py_err(err: RegionError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn sky_list(text: &str, nx: usize, ny: usize, pixel_scale_arcsec: f64) -> PyResult<RegionList> {
    let center = ((nx as f64 - 1.0) / 2.0, (ny as f64 - 1.0) / 2.0);
    let csys: Arc<dyn CoordinateSystem> =
        Arc::new(LinearCoordinateSystem::sky(center, (0.0, 0.0), pixel_scale_arcsec / 3600.0));
    RegionList::from_text(csys, text, vec![nx, ny]).map_err(to_py_err)
}

#[pyclass(name = "RegionLine", get_all)]
#[derive(Debug, Clone)]
pub struct PyRegionLine {
    kind: String,
    text: String,
    shape: Option<String>,
    is_difference: bool,
    is_annotation_only: bool,
}

impl From<&Line> for PyRegionLine {
    fn from(line: &Line) -> Self {
        let kind = match line.kind() {
            LineKind::Annotation => "annotation",
            LineKind::Comment => "comment",
            LineKind::Global => "global",
        };
        let shape = line.shape();
        PyRegionLine {
            kind: kind.to_string(),
            text: line.to_string(),
            shape: shape.map(|s| s.kind.keyword().to_string()),
            is_difference: shape.map_or(false, |s| s.is_difference),
            is_annotation_only: shape.map_or(false, |s| s.is_annotation_only),
        }
    }
}

#[pymethods]
impl PyRegionLine {
    fn __repr__(&self) -> String {
        format!("RegionLine(kind={:?}, text={:?})", self.kind, self.text)
    }
}

/// Merges a channel specification such as `"0-3, 7, >60"`.
#[pyfunction]
fn consolidate_channel_ranges(spec: &str, total_channels: u32) -> PyResult<Vec<(u32, u32)>> {
    parse_and_consolidate(spec, total_channels).map_err(to_py_err)
}

#[pyfunction]
#[pyo3(signature = (text, nx, ny, pixel_scale_arcsec = 1.0))]
fn parse_region_text(text: &str, nx: usize, ny: usize, pixel_scale_arcsec: f64) -> PyResult<Vec<PyRegionLine>> {
    let list = sky_list(text, nx, ny, pixel_scale_arcsec)?;
    Ok(list.lines().iter().map(PyRegionLine::from).collect())
}

/// Re-renders region text in canonical form with a current version header.
#[pyfunction]
#[pyo3(signature = (text, nx, ny, pixel_scale_arcsec = 1.0))]
fn normalize_region_text(text: &str, nx: usize, ny: usize, pixel_scale_arcsec: f64) -> PyResult<String> {
    Ok(sky_list(text, nx, ny, pixel_scale_arcsec)?.print())
}

/// Boolean mask indexed `[y][x]`.
#[pyfunction]
#[pyo3(signature = (text, nx, ny, pixel_scale_arcsec = 1.0))]
fn region_mask(text: &str, nx: usize, ny: usize, pixel_scale_arcsec: f64) -> PyResult<Vec<Vec<bool>>> {
    let list = sky_list(text, nx, ny, pixel_scale_arcsec)?;
    (0..ny)
        .map(|y| {
            (0..nx)
                .map(|x| list.contains(&[x as f64, y as f64]).map_err(to_py_err))
                .collect()
        })
        .collect()
}

#[pymodule]
fn crtf_region(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(consolidate_channel_ranges, m)?)?;
    m.add_function(wrap_pyfunction!(parse_region_text, m)?)?;
    m.add_function(wrap_pyfunction!(normalize_region_text, m)?)?;
    m.add_function(wrap_pyfunction!(region_mask, m)?)?;
    m.add_class::<PyRegionLine>()?;
    Ok(())
}
