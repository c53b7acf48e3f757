//! # Coordinate System Interface
//!
//! Regions are written in world coordinates and evaluated on pixels, so the
//! parser, the combiner and the axis extender all talk to a coordinate system
//! through the [`CoordinateSystem`] trait. A real WCS library can implement
//! it; [`LinearCoordinateSystem`] is a self-contained implementation with a
//! linear mapping per axis, which is what images in `LINEAR`/`CAR`-like
//! projections near the reference pixel need.

use std::fmt;

use crate::error::{RegionError, Result};
use crate::quantity::Quantity;
use crate::spectral::{Doppler, SpectralFrame};
use crate::stokes::PolarizationCode;

/// Pixel <-> world transforms plus the axis layout a region needs.
pub trait CoordinateSystem: fmt::Debug + Send + Sync {
    fn n_pixel_axes(&self) -> usize;

    fn world_axis_units(&self) -> Vec<String>;

    fn to_world(&self, pixel: &[f64]) -> Result<Vec<f64>>;

    fn to_pixel(&self, world: &[f64]) -> Result<Vec<f64>>;

    /// Pixel axis numbers of the longitude-like and latitude-like axes.
    fn direction_axes(&self) -> (usize, usize);

    /// Reference frame of the direction axes, e.g. `J2000`.
    fn direction_frame(&self) -> &str;

    fn spectral_axis(&self) -> Option<usize>;

    fn polarization_axis(&self) -> Option<usize>;

    fn spectral_frame(&self) -> Option<SpectralFrame> {
        None
    }

    /// Rest frequency in Hz.
    fn rest_frequency(&self) -> Option<f64> {
        None
    }

    fn doppler(&self) -> Doppler {
        Doppler::Radio
    }

    fn pixel_of_stokes(&self, code: PolarizationCode) -> Option<usize>;

    fn num_spectral_channels(&self, image_shape: &[usize]) -> Option<usize> {
        self.spectral_axis().and_then(|axis| image_shape.get(axis).copied())
    }

    /// Size of one direction pixel along each direction axis, in degrees.
    fn direction_increments(&self) -> Result<(f64, f64)> {
        let (lon, lat) = self.direction_axes();
        let units = self.world_axis_units();
        let origin = vec![0.0; self.n_pixel_axes()];
        let w0 = self.to_world(&origin)?;
        let step = |axis: usize| -> Result<f64> {
            let mut p = origin.clone();
            p[axis] += 1.0;
            let w1 = self.to_world(&p)?;
            let unit = units.get(axis).map(String::as_str).unwrap_or("deg");
            Quantity::new((w1[axis] - w0[axis]).abs(), unit)
                .to_degrees()
                .ok_or_else(|| RegionError::conversion(format!("direction axis {axis} has non-angular unit {unit}")))
        };
        Ok((step(lon)?, step(lat)?))
    }

    /// Converts a direction (degrees) to direction pixel coordinates,
    /// holding every other axis at its pixel origin.
    fn direction_to_pixel(&self, lon_deg: f64, lat_deg: f64) -> Result<(f64, f64)> {
        let (lon, lat) = self.direction_axes();
        let units = self.world_axis_units();
        let mut world = self.to_world(&vec![0.0; self.n_pixel_axes()])?;
        for (axis, deg) in [(lon, lon_deg), (lat, lat_deg)] {
            let unit = units.get(axis).map(String::as_str).unwrap_or("deg");
            world[axis] = Quantity::new(deg, "deg")
                .to_unit(unit)
                .ok_or_else(|| RegionError::conversion(format!("cannot express degrees in unit {unit}")))?;
        }
        let pixel = self.to_pixel(&world)?;
        Ok((pixel[lon], pixel[lat]))
    }

    /// Converts a frequency in Hz to a fractional spectral pixel.
    fn spectral_to_pixel(&self, freq_hz: f64) -> Result<f64> {
        let axis = self
            .spectral_axis()
            .ok_or_else(|| RegionError::conversion("coordinate system has no spectral axis"))?;
        let mut world = self.to_world(&vec![0.0; self.n_pixel_axes()])?;
        world[axis] = freq_hz;
        Ok(self.to_pixel(&world)?[axis])
    }
}

// --- Linear Implementation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Longitude,
    Latitude,
    Spectral,
    Stokes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearAxis {
    pub kind: AxisKind,
    pub unit: String,
    pub reference_pixel: f64,
    pub reference_value: f64,
    pub increment: f64,
}

impl LinearAxis {
    fn to_world(&self, pixel: f64) -> f64 {
        self.reference_value + self.increment * (pixel - self.reference_pixel)
    }

    fn to_pixel(&self, world: f64) -> f64 {
        self.reference_pixel + (world - self.reference_value) / self.increment
    }
}

/// A coordinate system whose axes are independent linear mappings.
/// The polarization axis, if any, enumerates an explicit list of codes.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCoordinateSystem {
    axes: Vec<LinearAxis>,
    direction_frame: String,
    spectral_frame: Option<SpectralFrame>,
    rest_frequency: Option<f64>,
    doppler: Doppler,
    stokes: Vec<PolarizationCode>,
}

impl LinearCoordinateSystem {
    /// Two direction axes in degrees. The longitude increment is negative,
    /// as for RA increasing to the east.
    pub fn sky(reference_pixel: (f64, f64), reference_deg: (f64, f64), increment_deg: f64) -> Self {
        let axis = |kind, rp, rv, inc| LinearAxis {
            kind,
            unit: "deg".to_string(),
            reference_pixel: rp,
            reference_value: rv,
            increment: inc,
        };
        LinearCoordinateSystem {
            axes: vec![
                axis(AxisKind::Longitude, reference_pixel.0, reference_deg.0, -increment_deg),
                axis(AxisKind::Latitude, reference_pixel.1, reference_deg.1, increment_deg),
            ],
            direction_frame: "J2000".to_string(),
            spectral_frame: None,
            rest_frequency: None,
            doppler: Doppler::Radio,
            stokes: Vec::new(),
        }
    }

    pub fn with_direction_frame(mut self, frame: impl Into<String>) -> Self {
        self.direction_frame = frame.into();
        self
    }

    /// Appends a frequency axis in Hz.
    pub fn with_spectral(
        mut self,
        reference_pixel: f64,
        reference_hz: f64,
        increment_hz: f64,
        frame: SpectralFrame,
        rest_frequency_hz: Option<f64>,
    ) -> Self {
        self.axes.push(LinearAxis {
            kind: AxisKind::Spectral,
            unit: "Hz".to_string(),
            reference_pixel,
            reference_value: reference_hz,
            increment: increment_hz,
        });
        self.spectral_frame = Some(frame);
        self.rest_frequency = rest_frequency_hz;
        self
    }

    pub fn with_doppler(mut self, doppler: Doppler) -> Self {
        self.doppler = doppler;
        self
    }

    /// Appends a polarization axis holding `codes` in pixel order.
    pub fn with_stokes(mut self, codes: Vec<PolarizationCode>) -> Self {
        self.axes.push(LinearAxis {
            kind: AxisKind::Stokes,
            unit: String::new(),
            reference_pixel: 0.0,
            reference_value: 0.0,
            increment: 1.0,
        });
        self.stokes = codes;
        self
    }

    fn find_axis(&self, kind: AxisKind) -> Option<usize> {
        self.axes.iter().position(|a| a.kind == kind)
    }

    /// Code number at a polarization pixel. Pixels past either end of the
    /// axis continue the code numbering one step per pixel.
    fn stokes_code_at(&self, pixel: f64) -> Result<f64> {
        let (first, last) = match (self.stokes.first(), self.stokes.last()) {
            (Some(first), Some(last)) => (first.code() as f64, last.code() as f64),
            _ => return Err(RegionError::conversion("polarization axis has no planes")),
        };
        let index = pixel.round();
        let last_index = (self.stokes.len() - 1) as f64;
        Ok(if index < 0.0 {
            first + index
        } else if index > last_index {
            last + (index - last_index)
        } else {
            self.stokes[index as usize].code() as f64
        })
    }

    fn stokes_pixel_of(&self, world: f64) -> Result<f64> {
        let (first, last) = match (self.stokes.first(), self.stokes.last()) {
            (Some(first), Some(last)) => (first.code() as f64, last.code() as f64),
            _ => return Err(RegionError::conversion("polarization axis has no planes")),
        };
        let last_index = (self.stokes.len() - 1) as f64;
        if world > last {
            return Ok(last_index + (world - last));
        }
        if world < first {
            return Ok(world - first);
        }
        PolarizationCode::from_code(world.round() as u32)
            .and_then(|code| self.pixel_of_stokes(code))
            .map(|p| p as f64)
            .ok_or_else(|| RegionError::conversion(format!("polarization code {world} is not on the axis")))
    }

    fn check_len(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.axes.len() {
            return Err(RegionError::conversion(format!(
                "expected {} coordinates but got {}",
                self.axes.len(),
                values.len()
            )));
        }
        Ok(())
    }
}

impl CoordinateSystem for LinearCoordinateSystem {
    fn n_pixel_axes(&self) -> usize {
        self.axes.len()
    }

    fn world_axis_units(&self) -> Vec<String> {
        self.axes.iter().map(|a| a.unit.clone()).collect()
    }

    fn to_world(&self, pixel: &[f64]) -> Result<Vec<f64>> {
        self.check_len(pixel)?;
        self.axes
            .iter()
            .zip(pixel)
            .map(|(axis, &p)| match axis.kind {
                AxisKind::Stokes => self.stokes_code_at(p),
                _ => Ok(axis.to_world(p)),
            })
            .collect()
    }

    fn to_pixel(&self, world: &[f64]) -> Result<Vec<f64>> {
        self.check_len(world)?;
        self.axes
            .iter()
            .zip(world)
            .map(|(axis, &w)| match axis.kind {
                AxisKind::Stokes => self.stokes_pixel_of(w),
                _ => Ok(axis.to_pixel(w)),
            })
            .collect()
    }

    fn direction_axes(&self) -> (usize, usize) {
        (
            self.find_axis(AxisKind::Longitude).unwrap_or(0),
            self.find_axis(AxisKind::Latitude).unwrap_or(1),
        )
    }

    fn direction_frame(&self) -> &str {
        &self.direction_frame
    }

    fn spectral_axis(&self) -> Option<usize> {
        self.find_axis(AxisKind::Spectral)
    }

    fn polarization_axis(&self) -> Option<usize> {
        self.find_axis(AxisKind::Stokes)
    }

    fn spectral_frame(&self) -> Option<SpectralFrame> {
        self.spectral_frame
    }

    fn rest_frequency(&self) -> Option<f64> {
        self.rest_frequency
    }

    fn doppler(&self) -> Doppler {
        self.doppler
    }

    fn pixel_of_stokes(&self, code: PolarizationCode) -> Option<usize> {
        self.stokes.iter().position(|c| *c == code)
    }
}
