//! Pixel-space geometry for region-bearing shapes.
//!
//! Shapes keep their world quantities; [`RegionShape::pixel_geometry`]
//! resolves them against a coordinate system into a [`PixelGeometry`], which
//! answers membership queries for single pixels.

use std::f64::consts::FRAC_PI_2;

use crate::coordinates::CoordinateSystem;
use crate::error::{RegionError, Result};
use crate::quantity::Quantity;
use crate::shape::{QuantityPair, RegionShape, ShapeKind};
use crate::spectral::non_direction_axes_contain;

#[derive(Debug, Clone, PartialEq)]
pub enum PixelGeometry {
    Rect { x: (f64, f64), y: (f64, f64) },
    /// Rectangle of half-widths `half` rotated counterclockwise by `angle` (radians).
    RotatedRect { center: (f64, f64), half: (f64, f64), angle: f64 },
    Polygon { vertices: Vec<(f64, f64)> },
    /// Ellipse with semi-axis `radii.0` along the direction `angle` (radians
    /// from +x), and `radii.1` perpendicular to it.
    Ellipse { center: (f64, f64), radii: (f64, f64), angle: f64 },
    Annulus { center: (f64, f64), inner: (f64, f64), outer: (f64, f64) },
    /// Inclusive pixel bounds on every axis.
    Hyperbox { blc: Vec<f64>, trc: Vec<f64> },
    /// Non-region shapes select nothing.
    Empty,
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn inside_ellipse(dx: f64, dy: f64, radii: (f64, f64), angle: f64) -> bool {
    if radii.0 <= 0.0 || radii.1 <= 0.0 {
        return false;
    }
    let (sin, cos) = angle.sin_cos();
    let u = dx * cos + dy * sin;
    let v = -dx * sin + dy * cos;
    (u / radii.0).powi(2) + (v / radii.1).powi(2) <= 1.0
}

impl PixelGeometry {
    /// Membership of a point in the direction plane.
    pub fn contains_xy(&self, x: f64, y: f64) -> bool {
        match self {
            PixelGeometry::Rect { x: (x0, x1), y: (y0, y1) } => x >= *x0 && x <= *x1 && y >= *y0 && y <= *y1,
            PixelGeometry::RotatedRect { center, half, angle } => {
                let (dx, dy) = (x - center.0, y - center.1);
                let (sin, cos) = angle.sin_cos();
                let u = dx * cos + dy * sin;
                let v = -dx * sin + dy * cos;
                u.abs() <= half.0 && v.abs() <= half.1
            }
            PixelGeometry::Polygon { vertices } => {
                // Even-odd ray casting
                let n = vertices.len();
                if n < 3 {
                    return false;
                }
                let mut inside = false;
                let mut j = n - 1;
                for i in 0..n {
                    let (xi, yi) = vertices[i];
                    let (xj, yj) = vertices[j];
                    if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
            PixelGeometry::Ellipse { center, radii, angle } => inside_ellipse(x - center.0, y - center.1, *radii, *angle),
            PixelGeometry::Annulus { center, inner, outer } => {
                let (dx, dy) = (x - center.0, y - center.1);
                let in_hole = inner.0 > 0.0 && inner.1 > 0.0 && (dx / inner.0).powi(2) + (dy / inner.1).powi(2) < 1.0;
                inside_ellipse(dx, dy, *outer, 0.0) && !in_hole
            }
            PixelGeometry::Hyperbox { blc, trc } => {
                blc.len() >= 2 && (x >= blc[0] && x <= trc[0]) && (y >= blc[1] && y <= trc[1])
            }
            PixelGeometry::Empty => false,
        }
    }

    /// Membership of a full pixel position; `direction_axes` locates the
    /// direction plane within `pixel`.
    pub fn contains(&self, direction_axes: (usize, usize), pixel: &[f64]) -> bool {
        if let PixelGeometry::Hyperbox { blc, trc } = self {
            return pixel.len() == blc.len()
                && pixel
                    .iter()
                    .zip(blc.iter().zip(trc))
                    .all(|(p, (lo, hi))| *p >= *lo && *p <= *hi);
        }
        match (pixel.get(direction_axes.0), pixel.get(direction_axes.1)) {
            (Some(x), Some(y)) => self.contains_xy(*x, *y),
            _ => false,
        }
    }
}

// --- World To Pixel ---

fn check_frame(csys: &dyn CoordinateSystem, frame: &str) -> Result<()> {
    if frame.is_empty() || frame.eq_ignore_ascii_case(csys.direction_frame()) {
        Ok(())
    } else {
        Err(RegionError::conversion(format!(
            "direction frame {frame} differs from the image frame {}",
            csys.direction_frame()
        )))
    }
}

fn point_to_pixel(csys: &dyn CoordinateSystem, frame: &str, point: &QuantityPair) -> Result<(f64, f64)> {
    if point[0].is_pixel() && point[1].is_pixel() {
        return Ok((point[0].value, point[1].value));
    }
    check_frame(csys, frame)?;
    let degrees = |q: &Quantity| {
        q.to_degrees()
            .ok_or_else(|| RegionError::conversion(format!("{q} is not a direction coordinate")))
    };
    csys.direction_to_pixel(degrees(&point[0])?, degrees(&point[1])?)
}

/// A length in pixels along the (x, y) direction axes.
fn length_to_pixels(csys: &dyn CoordinateSystem, length: &Quantity) -> Result<(f64, f64)> {
    if length.is_pixel() {
        return Ok((length.value, length.value));
    }
    let deg = length
        .to_degrees()
        .ok_or_else(|| RegionError::conversion(format!("{length} is not an angular length")))?;
    let (dx, dy) = csys.direction_increments()?;
    Ok((deg / dx, deg / dy))
}

fn angle_to_radians(angle: &Quantity) -> Result<f64> {
    if angle.unit.is_empty() {
        return Ok(angle.value.to_radians());
    }
    angle
        .to_degrees()
        .map(f64::to_radians)
        .ok_or_else(|| RegionError::conversion(format!("{angle} is not an angle")))
}

impl RegionShape {
    /// Resolves the shape against `csys`. Fails with a conversion error when
    /// a world coordinate cannot be expressed in pixels.
    pub fn pixel_geometry(&self, csys: &dyn CoordinateSystem) -> Result<PixelGeometry> {
        let frame = self.direction_frame.as_str();
        let geometry = match &self.kind {
            ShapeKind::RectBox { blc, trc } => {
                let (x0, y0) = point_to_pixel(csys, frame, blc)?;
                let (x1, y1) = point_to_pixel(csys, frame, trc)?;
                PixelGeometry::Rect { x: ordered(x0, x1), y: ordered(y0, y1) }
            }
            ShapeKind::CenterBox { center, widths } => {
                let (cx, cy) = point_to_pixel(csys, frame, center)?;
                let w = length_to_pixels(csys, &widths[0])?.0 / 2.0;
                let h = length_to_pixels(csys, &widths[1])?.1 / 2.0;
                PixelGeometry::Rect { x: (cx - w, cx + w), y: (cy - h, cy + h) }
            }
            ShapeKind::RotBox { center, widths, angle } => PixelGeometry::RotatedRect {
                center: point_to_pixel(csys, frame, center)?,
                half: (
                    length_to_pixels(csys, &widths[0])?.0 / 2.0,
                    length_to_pixels(csys, &widths[1])?.1 / 2.0,
                ),
                angle: angle_to_radians(angle)?,
            },
            ShapeKind::Polygon { vertices } => PixelGeometry::Polygon {
                vertices: vertices
                    .iter()
                    .map(|v| point_to_pixel(csys, frame, v))
                    .collect::<Result<_>>()?,
            },
            ShapeKind::Circle { center, radius } => PixelGeometry::Ellipse {
                center: point_to_pixel(csys, frame, center)?,
                radii: length_to_pixels(csys, radius)?,
                angle: 0.0,
            },
            ShapeKind::Annulus { center, radii } => PixelGeometry::Annulus {
                center: point_to_pixel(csys, frame, center)?,
                inner: length_to_pixels(csys, &radii[0])?,
                outer: length_to_pixels(csys, &radii[1])?,
            },
            // Position angle runs from +y toward -x, so the first axis points
            // along angle + 90 degrees from +x.
            ShapeKind::Ellipse { center, axes, angle } => PixelGeometry::Ellipse {
                center: point_to_pixel(csys, frame, center)?,
                radii: (length_to_pixels(csys, &axes[0])?.1, length_to_pixels(csys, &axes[1])?.0),
                angle: angle_to_radians(angle)? + FRAC_PI_2,
            },
            ShapeKind::WorldBox { blc, trc } => {
                let units = csys.world_axis_units();
                let to_axis_units = |corner: &[Quantity]| -> Result<Vec<f64>> {
                    corner
                        .iter()
                        .zip(&units)
                        .map(|(q, unit)| {
                            q.to_unit(unit)
                                .ok_or_else(|| RegionError::conversion(format!("{q} cannot be expressed in {unit}")))
                        })
                        .collect()
                };
                let p0 = csys.to_pixel(&to_axis_units(blc)?)?;
                let p1 = csys.to_pixel(&to_axis_units(trc)?)?;
                let (blc, trc) = p0.iter().zip(&p1).map(|(a, b)| ordered(*a, *b)).unzip();
                PixelGeometry::Hyperbox { blc, trc }
            }
            ShapeKind::Line { .. } | ShapeKind::Vector { .. } | ShapeKind::Text { .. } | ShapeKind::Symbol { .. } => {
                PixelGeometry::Empty
            }
        };
        Ok(geometry)
    }

    /// Whether the pixel at `pixel` (one coordinate per image axis) lies
    /// inside this shape, including its spectral and polarization selection.
    pub fn contains(&self, csys: &dyn CoordinateSystem, pixel: &[f64]) -> Result<bool> {
        if pixel.len() != csys.n_pixel_axes() {
            return Err(RegionError::conversion(format!(
                "pixel has {} coordinates but the image has {} axes",
                pixel.len(),
                csys.n_pixel_axes()
            )));
        }
        if !non_direction_axes_contain(csys, self.spectral_pixel_range, &self.stokes_list, pixel) {
            return Ok(false);
        }
        Ok(self.pixel_geometry(csys)?.contains(csys.direction_axes(), pixel))
    }
}
