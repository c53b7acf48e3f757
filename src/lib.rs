//! # CRTF Region
//!
//! A parser for CASA region text format (CRTF) files, written in Rust using
//! nom 7.1. Region text is parsed into lines, shape lines are folded into a
//! composite region (unions and differences, in file order), and spectral and
//! polarization selections extend the sky region to the remaining image axes.
//! Includes optional Python bindings via PyO3 (`python` feature).
//!
//! ```
//! use std::sync::Arc;
//! use crtf_region::{LinearCoordinateSystem, RegionList};
//!
//! let csys = Arc::new(LinearCoordinateSystem::sky((50.0, 50.0), (180.0, 30.0), 1.0 / 3600.0));
//! let text = "#CRTFv0\nbox [[10pix, 10pix], [40pix, 40pix]]\n- circle [[25pix, 25pix], 5pix]\n";
//! let list = RegionList::from_text(csys, text, vec![100, 100]).unwrap();
//! assert!(list.contains(&[12.0, 12.0]).unwrap());
//! assert!(!list.contains(&[25.0, 25.0]).unwrap());
//! ```

pub mod channels;
pub mod coordinates;
pub mod error;
pub mod geometry;
pub mod parser;
pub mod quantity;
pub mod record;
pub mod region;
pub mod region_list;
pub mod shape;
pub mod spectral;
pub mod stokes;

#[cfg(feature = "python")]
mod python;

pub use channels::{consolidate_ranges, parse_and_consolidate};
pub use coordinates::{CoordinateSystem, LinearCoordinateSystem};
pub use error::{RegionError, Result};
pub use parser::{parse, ParseOptions, ParsedRegionText, RegionSource, CURRENT_VERSION};
pub use quantity::{read_quantity, Quantity};
pub use record::SerializedRegion;
pub use region::CompositeRegion;
pub use region_list::{Line, LineKind, RegionList};
pub use shape::{Keyword, RegionShape, ShapeKind};
pub use spectral::{AxisExtender, Doppler, ExtendedRegion, SpectralFrame};
pub use stokes::PolarizationCode;
