//! # Axis Extender
//!
//! A region line describes a shape on the sky. The `range` and `corr`
//! keywords restrict it along the spectral and polarization axes. This module
//! resolves those restrictions to pixel selections and combines them with a
//! direction-plane region into a full-dimensional region. The combination is
//! an intersection: a pixel is selected only when every axis agrees.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::coordinates::CoordinateSystem;
use crate::error::{RegionError, Result};
use crate::quantity::Quantity;
use crate::region::CompositeRegion;
use crate::stokes::PolarizationCode;

/// Speed of light in m/s.
pub const C: f64 = 299_792_458.0;

// --- Frames and Doppler Conventions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectralFrame {
    Rest,
    Lsrk,
    Lsrd,
    Bary,
    Geo,
    Topo,
    Galacto,
    Lgroup,
    Cmb,
}

impl SpectralFrame {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "REST" => Some(SpectralFrame::Rest),
            "LSRK" => Some(SpectralFrame::Lsrk),
            "LSRD" => Some(SpectralFrame::Lsrd),
            "BARY" => Some(SpectralFrame::Bary),
            "GEO" => Some(SpectralFrame::Geo),
            "TOPO" => Some(SpectralFrame::Topo),
            "GALACTO" => Some(SpectralFrame::Galacto),
            "LGROUP" => Some(SpectralFrame::Lgroup),
            "CMB" => Some(SpectralFrame::Cmb),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpectralFrame::Rest => "REST",
            SpectralFrame::Lsrk => "LSRK",
            SpectralFrame::Lsrd => "LSRD",
            SpectralFrame::Bary => "BARY",
            SpectralFrame::Geo => "GEO",
            SpectralFrame::Topo => "TOPO",
            SpectralFrame::Galacto => "GALACTO",
            SpectralFrame::Lgroup => "LGROUP",
            SpectralFrame::Cmb => "CMB",
        }
    }
}

impl fmt::Display for SpectralFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Velocity definition used to turn a velocity into a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Doppler {
    Radio,
    Optical,
    Z,
    Relativistic,
}

impl Doppler {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "RADIO" => Some(Doppler::Radio),
            "OPTICAL" => Some(Doppler::Optical),
            "Z" => Some(Doppler::Z),
            "RELATIVISTIC" | "BETA" => Some(Doppler::Relativistic),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Doppler::Radio => "RADIO",
            Doppler::Optical => "OPTICAL",
            Doppler::Z => "Z",
            Doppler::Relativistic => "RELATIVISTIC",
        }
    }

    /// Frequency in Hz observed for a line at `rest_hz` moving at `velocity`
    /// (m/s) under this convention.
    pub fn velocity_to_frequency(&self, velocity: f64, rest_hz: f64) -> Result<f64> {
        let beta = velocity / C;
        match self {
            Doppler::Radio => Ok(rest_hz * (1.0 - beta)),
            Doppler::Optical | Doppler::Z => {
                if beta <= -1.0 {
                    return Err(RegionError::validation(format!(
                        "velocity {velocity} m/s is not physical for the {} convention",
                        self.name()
                    )));
                }
                Ok(rest_hz / (1.0 + beta))
            }
            Doppler::Relativistic => {
                if beta.abs() >= 1.0 {
                    return Err(RegionError::validation(format!(
                        "velocity {velocity} m/s is not below the speed of light"
                    )));
                }
                Ok(rest_hz * ((1.0 - beta) / (1.0 + beta)).sqrt())
            }
        }
    }
}

impl fmt::Display for Doppler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// --- Extender ---

/// Resolves spectral and polarization selections against an image.
pub struct AxisExtender<'a> {
    csys: &'a dyn CoordinateSystem,
    image_shape: &'a [usize],
    spectral_pixel_range: Option<(u32, u32)>,
    stokes: Vec<PolarizationCode>,
}

/// The zero, unitless quantity stands for "no limit".
fn is_unset(q: &Quantity) -> bool {
    q.value == 0.0 && q.unit.is_empty()
}

enum LimitKind {
    Pixel,
    Frequency,
    Velocity,
}

fn limit_kind(q: &Quantity) -> Option<LimitKind> {
    if q.is_pixel() {
        Some(LimitKind::Pixel)
    } else if q.to_hz().is_some() {
        Some(LimitKind::Frequency)
    } else if q.to_meters_per_second().is_some() {
        Some(LimitKind::Velocity)
    } else {
        None
    }
}

impl<'a> AxisExtender<'a> {
    pub fn new(csys: &'a dyn CoordinateSystem, image_shape: &'a [usize]) -> Self {
        AxisExtender {
            csys,
            image_shape,
            spectral_pixel_range: None,
            stokes: Vec::new(),
        }
    }

    /// Inclusive channel bounds, `None` meaning the whole spectral axis.
    pub fn spectral_pixel_range(&self) -> Option<(u32, u32)> {
        self.spectral_pixel_range
    }

    pub fn stokes(&self) -> &[PolarizationCode] {
        &self.stokes
    }

    fn n_channels(&self) -> Option<usize> {
        self.csys.num_spectral_channels(self.image_shape)
    }

    /// Resolves `begin`/`end` to an inclusive channel range.
    ///
    /// Both limits unset selects the entire spectral axis. Pixel limits are
    /// taken as channel numbers directly; frequency limits need a matching
    /// `frame`; velocity limits additionally need `doppler` and `rest_freq`.
    pub fn set_frequency_limits<'b>(
        &mut self,
        begin: Option<&'b Quantity>,
        end: Option<&'b Quantity>,
        frame: Option<SpectralFrame>,
        doppler: Option<Doppler>,
        rest_freq: Option<&Quantity>,
    ) -> Result<()> {
        let set = |q: Option<&'b Quantity>| q.filter(|q| !is_unset(q));
        let (begin, end) = match (set(begin), set(end)) {
            (None, None) => {
                self.spectral_pixel_range = None;
                return Ok(());
            }
            (Some(b), Some(e)) => (b, e),
            _ => {
                return Err(RegionError::validation(
                    "both a begin and an end spectral limit must be given, or neither",
                ))
            }
        };
        let n_channels = self
            .n_channels()
            .ok_or_else(|| RegionError::validation("coordinate system has no spectral axis"))?;

        let (lo, hi) = match (limit_kind(begin), limit_kind(end)) {
            (Some(LimitKind::Pixel), Some(LimitKind::Pixel)) => (begin.value, end.value),
            (Some(LimitKind::Frequency), Some(LimitKind::Frequency)) => {
                self.check_frame(frame)?;
                let p0 = self.csys.spectral_to_pixel(begin.to_hz().unwrap_or_default())?;
                let p1 = self.csys.spectral_to_pixel(end.to_hz().unwrap_or_default())?;
                (p0.min(p1), p0.max(p1))
            }
            (Some(LimitKind::Velocity), Some(LimitKind::Velocity)) => {
                self.check_frame(frame)?;
                let doppler = doppler
                    .ok_or_else(|| RegionError::validation("velocity limits require a doppler convention"))?;
                let rest = rest_freq
                    .and_then(Quantity::to_hz)
                    .filter(|hz| *hz > 0.0)
                    .ok_or_else(|| RegionError::validation("velocity limits require a positive rest frequency"))?;
                let f0 = doppler.velocity_to_frequency(begin.to_meters_per_second().unwrap_or_default(), rest)?;
                let f1 = doppler.velocity_to_frequency(end.to_meters_per_second().unwrap_or_default(), rest)?;
                let p0 = self.csys.spectral_to_pixel(f0)?;
                let p1 = self.csys.spectral_to_pixel(f1)?;
                (p0.min(p1), p0.max(p1))
            }
            _ => {
                return Err(RegionError::validation(format!(
                    "spectral limits {begin} and {end} must both be frequencies, velocities or pixels"
                )))
            }
        };

        let (lo, hi) = (lo.round(), hi.round());
        if lo > hi {
            return Err(RegionError::validation(format!(
                "spectral range begin channel {lo} is greater than end channel {hi}"
            )));
        }
        let last = n_channels as f64 - 1.0;
        if hi < 0.0 || lo > last {
            return Err(RegionError::validation(format!(
                "spectral range [{lo}, {hi}] lies outside the {n_channels} image channels"
            )));
        }
        let range = (lo.max(0.0) as u32, hi.min(last) as u32);
        debug!(lo = range.0, hi = range.1, "resolved spectral range");
        self.spectral_pixel_range = Some(range);
        Ok(())
    }

    fn check_frame(&self, frame: Option<SpectralFrame>) -> Result<()> {
        match (frame, self.csys.spectral_frame()) {
            (Some(requested), Some(native)) if requested != native => Err(RegionError::validation(format!(
                "conversion from spectral frame {requested} to the image frame {native} is not supported"
            ))),
            _ => Ok(()),
        }
    }

    /// Restricts the polarization axis to `codes`; empty selects all planes.
    pub fn set_stokes(&mut self, codes: &[PolarizationCode]) -> Result<()> {
        if !codes.is_empty() {
            if self.csys.polarization_axis().is_none() {
                return Err(RegionError::validation("coordinate system has no polarization axis"));
            }
            if let Some(missing) = codes.iter().find(|c| self.csys.pixel_of_stokes(**c).is_none()) {
                return Err(RegionError::validation(format!(
                    "polarization {missing} is not present in the image"
                )));
            }
        }
        self.stokes = codes.to_vec();
        Ok(())
    }

    /// Intersects `direction` with the spectral and polarization selections.
    /// Unset selections cover the whole axis.
    pub fn extend(&self, direction: Arc<CompositeRegion>) -> ExtendedRegion {
        let spectral = self.csys.spectral_axis().map(|axis| {
            let (lo, hi) = self.spectral_pixel_range.unwrap_or_else(|| {
                let n = self.image_shape.get(axis).copied().unwrap_or(1).max(1);
                (0, n as u32 - 1)
            });
            AxisSelection::Range { axis, lo, hi }
        });
        let polarization = self.csys.polarization_axis().map(|axis| {
            let pixels = if self.stokes.is_empty() {
                (0..self.image_shape.get(axis).copied().unwrap_or(0)).collect()
            } else {
                self.stokes.iter().filter_map(|c| self.csys.pixel_of_stokes(*c)).collect()
            };
            AxisSelection::Pixels { axis, pixels }
        });
        ExtendedRegion {
            direction,
            spectral,
            polarization,
        }
    }
}

// --- Extended Region ---

/// A selection along one non-direction pixel axis.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisSelection {
    Range { axis: usize, lo: u32, hi: u32 },
    Pixels { axis: usize, pixels: Vec<usize> },
}

impl AxisSelection {
    pub fn contains(&self, pixel: &[f64]) -> bool {
        match self {
            AxisSelection::Range { axis, lo, hi } => pixel
                .get(*axis)
                .map_or(false, |p| p.round() >= *lo as f64 && p.round() <= *hi as f64),
            AxisSelection::Pixels { axis, pixels } => pixel
                .get(*axis)
                .map_or(false, |p| p.round() >= 0.0 && pixels.contains(&(p.round() as usize))),
        }
    }
}

/// A direction-plane region intersected with spectral and polarization
/// selections.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedRegion {
    pub direction: Arc<CompositeRegion>,
    pub spectral: Option<AxisSelection>,
    pub polarization: Option<AxisSelection>,
}

impl ExtendedRegion {
    pub fn contains(&self, csys: &dyn CoordinateSystem, pixel: &[f64]) -> Result<bool> {
        let axes_ok = self.spectral.as_ref().map_or(true, |s| s.contains(pixel))
            && self.polarization.as_ref().map_or(true, |s| s.contains(pixel));
        Ok(axes_ok && self.direction.contains(csys, pixel)?)
    }
}

/// True when `pixel` lies in the given channel range and polarization set.
/// An absent range or an empty code list leaves that axis unrestricted.
pub(crate) fn non_direction_axes_contain(
    csys: &dyn CoordinateSystem,
    spectral_pixel_range: Option<(u32, u32)>,
    stokes: &[PolarizationCode],
    pixel: &[f64],
) -> bool {
    let spectral_ok = match (csys.spectral_axis(), spectral_pixel_range) {
        (Some(axis), Some((lo, hi))) => AxisSelection::Range { axis, lo, hi }.contains(pixel),
        _ => true,
    };
    let stokes_ok = match csys.polarization_axis() {
        Some(axis) if !stokes.is_empty() => {
            let pixels = stokes.iter().filter_map(|c| csys.pixel_of_stokes(*c)).collect();
            AxisSelection::Pixels { axis, pixels }.contains(pixel)
        }
        _ => true,
    };
    spectral_ok && stokes_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::LinearCoordinateSystem;
    use crate::stokes::PolarizationCode::{I, Q, U, V};

    const SHAPE: [usize; 4] = [100, 100, 64, 4];

    fn cube() -> LinearCoordinateSystem {
        LinearCoordinateSystem::sky((50.0, 50.0), (180.0, 30.0), 1.0 / 3600.0)
            .with_spectral(0.0, 1.4e9, 1.0e6, SpectralFrame::Lsrk, Some(1.42e9))
            .with_stokes(vec![I, Q, U, V])
    }

    fn hz(v: f64) -> Quantity {
        Quantity::new(v, "Hz")
    }

    #[test]
    fn neither_limit_selects_whole_axis() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        ext.set_frequency_limits(None, None, None, None, None).unwrap();
        assert_eq!(ext.spectral_pixel_range(), None);
        let zero = Quantity::new(0.0, "");
        ext.set_frequency_limits(Some(&zero), Some(&zero), None, None, None).unwrap();
        assert_eq!(ext.spectral_pixel_range(), None);
    }

    #[test]
    fn exactly_one_limit_is_rejected() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        let err = ext
            .set_frequency_limits(Some(&hz(1.401e9)), None, None, None, None)
            .unwrap_err();
        assert!(matches!(err, RegionError::Validation { .. }));
    }

    #[test]
    fn frequency_limits_resolve_to_channels() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        ext.set_frequency_limits(
            Some(&Quantity::new(1.41, "GHz")),
            Some(&hz(1.405e9)),
            Some(SpectralFrame::Lsrk),
            None,
            None,
        )
        .unwrap();
        assert_eq!(ext.spectral_pixel_range(), Some((5, 10)));
    }

    #[test]
    fn pixel_limits_bypass_frame_and_doppler() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        let (b, e) = (Quantity::new(3.0, "pix"), Quantity::new(7.0, "pix"));
        ext.set_frequency_limits(Some(&b), Some(&e), Some(SpectralFrame::Bary), None, None)
            .unwrap();
        assert_eq!(ext.spectral_pixel_range(), Some((3, 7)));
    }

    #[test]
    fn reversed_pixel_limits_fail() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        let (b, e) = (Quantity::new(9.0, "pix"), Quantity::new(2.0, "pix"));
        assert!(ext.set_frequency_limits(Some(&b), Some(&e), None, None, None).is_err());
    }

    #[test]
    fn velocity_limits_need_rest_frequency() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        let (b, e) = (Quantity::new(-10.0, "km/s"), Quantity::new(10.0, "km/s"));
        assert!(ext
            .set_frequency_limits(Some(&b), Some(&e), None, Some(Doppler::Radio), None)
            .is_err());
        let rest = Quantity::new(1.42, "GHz");
        ext.set_frequency_limits(Some(&b), Some(&e), None, Some(Doppler::Radio), Some(&rest))
            .unwrap();
        // 1.42 GHz * (1 -+ 10/c) spans about +-47 kHz around channel 20
        assert_eq!(ext.spectral_pixel_range(), Some((20, 20)));
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        let err = ext
            .set_frequency_limits(Some(&hz(1.401e9)), Some(&hz(1.402e9)), Some(SpectralFrame::Topo), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("TOPO"));
    }

    #[test]
    fn out_of_image_range_is_rejected() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        assert!(ext
            .set_frequency_limits(Some(&hz(2.0e9)), Some(&hz(2.1e9)), None, None, None)
            .is_err());
    }

    #[test]
    fn partially_outside_range_is_clamped() {
        let csys = cube();
        let mut ext = AxisExtender::new(&csys, &SHAPE);
        let (b, e) = (Quantity::new(60.0, "pix"), Quantity::new(80.0, "pix"));
        ext.set_frequency_limits(Some(&b), Some(&e), None, None, None).unwrap();
        assert_eq!(ext.spectral_pixel_range(), Some((60, 63)));
    }

    #[test]
    fn stokes_must_be_on_the_axis() {
        let csys = LinearCoordinateSystem::sky((0.0, 0.0), (0.0, 0.0), 1.0).with_stokes(vec![I, V]);
        let shape = [10, 10, 2];
        let mut ext = AxisExtender::new(&csys, &shape);
        assert!(ext.set_stokes(&[Q]).is_err());
        ext.set_stokes(&[V]).unwrap();
        assert_eq!(ext.stokes(), &[V]);
    }

    #[test]
    fn doppler_conventions() {
        let rest = 1.0e9;
        let v = 0.1 * C;
        assert!((Doppler::Radio.velocity_to_frequency(v, rest).unwrap() - 0.9e9).abs() < 1.0);
        assert!((Doppler::Optical.velocity_to_frequency(v, rest).unwrap() - rest / 1.1).abs() < 1.0);
        let rel = Doppler::Relativistic.velocity_to_frequency(v, rest).unwrap();
        assert!((rel - rest * (0.9f64 / 1.1).sqrt()).abs() < 1.0);
        assert!(Doppler::Relativistic.velocity_to_frequency(C, rest).is_err());
        assert_eq!(Doppler::from_name("beta"), Some(Doppler::Relativistic));
    }
}
