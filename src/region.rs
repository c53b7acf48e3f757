//! # Composite Regions
//!
//! The region a list of shape lines describes, built up left to right:
//! every new shape is either unioned into the running composite or
//! subtracted from it. Nodes are immutable and shared through `Arc`, so each
//! step of the construction history stays valid as a region of its own.

use std::fmt;
use std::sync::Arc;

use crate::coordinates::CoordinateSystem;
use crate::error::Result;
use crate::shape::RegionShape;

#[derive(Debug, Clone, PartialEq)]
pub enum CompositeRegion {
    Leaf(Arc<RegionShape>),
    Union(Arc<CompositeRegion>, Arc<CompositeRegion>),
    /// Pixels of the first operand that are not in the second.
    Difference(Arc<CompositeRegion>, Arc<CompositeRegion>),
}

impl CompositeRegion {
    pub fn leaf(shape: Arc<RegionShape>) -> Arc<Self> {
        Arc::new(CompositeRegion::Leaf(shape))
    }

    pub fn union(lhs: Arc<Self>, rhs: Arc<Self>) -> Arc<Self> {
        Arc::new(CompositeRegion::Union(lhs, rhs))
    }

    pub fn difference(base: Arc<Self>, subtracted: Arc<Self>) -> Arc<Self> {
        Arc::new(CompositeRegion::Difference(base, subtracted))
    }

    /// Folds `shape` into `current`: unioned, or subtracted when the shape is
    /// a difference. Without a current region the shape becomes the seed.
    pub fn combine(current: Option<&Arc<Self>>, shape: Arc<RegionShape>) -> Arc<Self> {
        let is_difference = shape.is_difference;
        let leaf = CompositeRegion::leaf(shape);
        match current {
            None => leaf,
            Some(current) if is_difference => CompositeRegion::difference(Arc::clone(current), leaf),
            Some(current) => CompositeRegion::union(Arc::clone(current), leaf),
        }
    }

    /// Shapes in left-to-right order.
    pub fn leaves(&self) -> Vec<&Arc<RegionShape>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Arc<RegionShape>>) {
        match self {
            CompositeRegion::Leaf(shape) => out.push(shape),
            CompositeRegion::Union(a, b) | CompositeRegion::Difference(a, b) => {
                a.collect_leaves(out);
                b.collect_leaves(out);
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            CompositeRegion::Leaf(_) => 1,
            CompositeRegion::Union(a, b) | CompositeRegion::Difference(a, b) => 1 + a.depth().max(b.depth()),
        }
    }

    /// Whether the pixel at `pixel` belongs to the region.
    pub fn contains(&self, csys: &dyn CoordinateSystem, pixel: &[f64]) -> Result<bool> {
        match self {
            CompositeRegion::Leaf(shape) => shape.contains(csys, pixel),
            CompositeRegion::Union(a, b) => Ok(a.contains(csys, pixel)? || b.contains(csys, pixel)?),
            CompositeRegion::Difference(a, b) => Ok(a.contains(csys, pixel)? && !b.contains(csys, pixel)?),
        }
    }
}

impl fmt::Display for CompositeRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeRegion::Leaf(shape) => f.write_str(shape.kind.keyword()),
            CompositeRegion::Union(a, b) => write!(f, "union({a}, {b})"),
            CompositeRegion::Difference(a, b) => write!(f, "difference({a}, {b})"),
        }
    }
}
