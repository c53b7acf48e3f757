//! Serializable form of a composite region.
//!
//! Nested unions are flattened into one `union` node with all operands in
//! order. Each shape carries its CRTF text plus the channel range and
//! polarizations it was restricted to.

use serde::Serialize;

use crate::region::CompositeRegion;
use crate::shape::RegionShape;
use crate::stokes::format_stokes_list;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SerializedRegion {
    Shape {
        name: String,
        /// The shape rendered as a CRTF line, without the difference marker.
        crtf: String,
        direction_frame: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        channels: Option<[u32; 2]>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stokes: Option<String>,
    },
    Union {
        regions: Vec<SerializedRegion>,
    },
    /// `regions[0]` minus `regions[1]`.
    Difference {
        regions: Vec<SerializedRegion>,
    },
}

impl From<&RegionShape> for SerializedRegion {
    fn from(shape: &RegionShape) -> Self {
        let plain = RegionShape {
            is_difference: false,
            ..shape.clone()
        };
        SerializedRegion::Shape {
            name: shape.kind.keyword().to_string(),
            crtf: plain.to_string(),
            direction_frame: shape.direction_frame.clone(),
            channels: shape.spectral_pixel_range.map(|(lo, hi)| [lo, hi]),
            stokes: (!shape.stokes_list.is_empty()).then(|| format_stokes_list(&shape.stokes_list)),
        }
    }
}

impl From<&CompositeRegion> for SerializedRegion {
    fn from(region: &CompositeRegion) -> Self {
        match region {
            CompositeRegion::Leaf(shape) => SerializedRegion::from(shape.as_ref()),
            CompositeRegion::Union(a, b) => {
                let mut regions = match SerializedRegion::from(a.as_ref()) {
                    SerializedRegion::Union { regions } => regions,
                    other => vec![other],
                };
                regions.push(SerializedRegion::from(b.as_ref()));
                SerializedRegion::Union { regions }
            }
            CompositeRegion::Difference(a, b) => SerializedRegion::Difference {
                regions: vec![SerializedRegion::from(a.as_ref()), SerializedRegion::from(b.as_ref())],
            },
        }
    }
}

impl SerializedRegion {
    /// Number of shape nodes in the tree.
    pub fn n_shapes(&self) -> usize {
        match self {
            SerializedRegion::Shape { .. } => 1,
            SerializedRegion::Union { regions } | SerializedRegion::Difference { regions } => {
                regions.iter().map(SerializedRegion::n_shapes).sum()
            }
        }
    }
}
