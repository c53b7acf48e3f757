//! # Region List
//!
//! An ordered list of region text lines plus the composite region they
//! describe. Every region-bearing line appended to a list that knows its
//! coordinate system extends the composite by one step; all steps are kept as
//! the construction history, the last one being the current region.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::coordinates::CoordinateSystem;
use crate::error::{RegionError, Result};
use crate::parser::{parse, parse_version_header, ParseOptions, RegionSource, CURRENT_VERSION, MAGIC};
use crate::quantity::Quantity;
use crate::record::SerializedRegion;
use crate::region::CompositeRegion;
use crate::shape::{format_params, ParamSet, RegionShape, ShapeKind};
use crate::spectral::AxisExtender;

// --- Lines ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Annotation,
    Comment,
    Global,
}

/// One line of region text.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// Text after the leading `#`, unmodified.
    Comment(String),
    Annotation(Arc<RegionShape>),
    /// Parameters declared by a `global` line.
    Global(ParamSet),
}

impl Line {
    pub fn kind(&self) -> LineKind {
        match self {
            Line::Annotation(_) => LineKind::Annotation,
            Line::Comment(_) => LineKind::Comment,
            Line::Global(_) => LineKind::Global,
        }
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            Line::Comment(text) => Some(text),
            _ => None,
        }
    }

    pub fn shape(&self) -> Option<&Arc<RegionShape>> {
        match self {
            Line::Annotation(shape) => Some(shape),
            _ => None,
        }
    }
}

impl From<RegionShape> for Line {
    fn from(shape: RegionShape) -> Self {
        Line::Annotation(Arc::new(shape))
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Comment(text) => write!(f, "#{text}"),
            Line::Annotation(shape) => write!(f, "{shape}"),
            Line::Global(params) => write!(f, "global {}", format_params(params)),
        }
    }
}

// --- Region List ---

#[derive(Debug, Clone)]
struct ImageContext {
    csys: Arc<dyn CoordinateSystem>,
    image_shape: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RegionList {
    lines: Vec<Line>,
    history: Vec<Arc<CompositeRegion>>,
    image: Option<ImageContext>,
    file_version: Option<u32>,
}

impl Default for RegionList {
    fn default() -> Self {
        RegionList::empty()
    }
}

impl RegionList {
    /// A list that only records lines; it can never build a region.
    pub fn empty() -> Self {
        RegionList {
            lines: Vec::new(),
            history: Vec::new(),
            image: None,
            file_version: None,
        }
    }

    /// An empty list that builds regions for an image.
    pub fn with_coordinate_system(csys: Arc<dyn CoordinateSystem>, image_shape: Vec<usize>) -> Self {
        RegionList {
            image: Some(ImageContext { csys, image_shape }),
            ..RegionList::empty()
        }
    }

    /// Parses a region file. Fails with [`RegionError::Version`] when the
    /// file declares a version below `min_version`.
    pub fn from_file(
        path: impl AsRef<Path>,
        csys: Arc<dyn CoordinateSystem>,
        image_shape: Vec<usize>,
        min_version: u32,
    ) -> Result<Self> {
        let options = ParseOptions::default().with_min_version(min_version);
        Self::from_file_with_options(path, csys, image_shape, &options)
    }

    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        csys: Arc<dyn CoordinateSystem>,
        image_shape: Vec<usize>,
        options: &ParseOptions,
    ) -> Result<Self> {
        Self::build(RegionSource::File(path.as_ref()), csys, image_shape, options)
    }

    /// Parses region text held in memory.
    pub fn from_text(csys: Arc<dyn CoordinateSystem>, text: &str, image_shape: Vec<usize>) -> Result<Self> {
        Self::from_text_with_options(csys, text, image_shape, &ParseOptions::default())
    }

    pub fn from_text_with_options(
        csys: Arc<dyn CoordinateSystem>,
        text: &str,
        image_shape: Vec<usize>,
        options: &ParseOptions,
    ) -> Result<Self> {
        Self::build(RegionSource::Text(text), csys, image_shape, options)
    }

    fn build(
        source: RegionSource<'_>,
        csys: Arc<dyn CoordinateSystem>,
        image_shape: Vec<usize>,
        options: &ParseOptions,
    ) -> Result<Self> {
        let parsed = parse(source, csys.as_ref(), &image_shape, options)?;
        let mut list = RegionList::with_coordinate_system(csys, image_shape);
        list.file_version = parsed.version;
        for line in parsed.lines {
            list.add_line(line);
        }
        Ok(list)
    }

    /// Appends a line. Region-bearing, non annotation-only shapes extend the
    /// composite region when the list has a coordinate system.
    ///
    /// A difference added to an empty history is replaced by a box over the
    /// whole image. If that box cannot be converted to world coordinates the
    /// line is still stored, but a warning is logged and the history is left
    /// unchanged, so [`history`](Self::history) can be shorter than the
    /// number of region-bearing lines.
    pub fn add_line(&mut self, line: Line) {
        if let Some(next) = self.fold(&line) {
            debug!(step = self.history.len() + 1, region = %next, "extended composite region");
            self.history.push(next);
        }
        self.lines.push(line);
    }

    fn fold(&self, line: &Line) -> Option<Arc<CompositeRegion>> {
        let image = self.image.as_ref()?;
        let shape = line.shape().filter(|s| s.folds_into_region())?;
        match self.history.last() {
            // A leading difference selects the whole image; its own geometry is dropped
            None if shape.is_difference => match full_image_box(image) {
                Ok(seed) => Some(CompositeRegion::leaf(Arc::new(seed))),
                Err(err) => {
                    warn!(%err, "cannot build the full image region, skipping difference");
                    None
                }
            },
            current => Some(CompositeRegion::combine(current, Arc::clone(shape))),
        }
    }

    pub fn n_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn line_at(&self, index: usize) -> Result<&Line> {
        self.lines.get(index).ok_or(RegionError::Index {
            index,
            len: self.lines.len(),
        })
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Every composite built so far, oldest first.
    pub fn history(&self) -> &[Arc<CompositeRegion>] {
        &self.history
    }

    pub fn can_build_region(&self) -> bool {
        self.image.is_some()
    }

    /// The current composite region, `None` when no region-bearing line has
    /// been added yet.
    pub fn get_region(&self) -> Result<Option<Arc<CompositeRegion>>> {
        if !self.can_build_region() {
            return Err(RegionError::State);
        }
        Ok(self.history.last().cloned())
    }

    /// The current composite region as a serializable tree.
    pub fn region_as_record(&self) -> Result<SerializedRegion> {
        let region = self.history.last().ok_or(RegionError::EmptyRegion)?;
        Ok(SerializedRegion::from(region.as_ref()))
    }

    /// Whether a full image pixel lies inside the current region.
    pub fn contains(&self, pixel: &[f64]) -> Result<bool> {
        let image = self.image.as_ref().ok_or(RegionError::State)?;
        match self.history.last() {
            Some(region) => region.contains(image.csys.as_ref(), pixel),
            None => Ok(false),
        }
    }

    /// An axis extender bound to this list's coordinate system and image.
    pub fn extender(&self) -> Result<AxisExtender<'_>> {
        let image = self.image.as_ref().ok_or(RegionError::State)?;
        Ok(AxisExtender::new(image.csys.as_ref(), &image.image_shape))
    }

    /// Version from the parsed file header, if there was one.
    pub fn file_version(&self) -> Option<u32> {
        self.file_version
    }

    /// Renders the list as CRTF text, starting with the version header.
    pub fn print(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RegionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{MAGIC}v{CURRENT_VERSION}")?;
        for (i, line) in self.lines.iter().enumerate() {
            // A header of any version may already be in the list as a leading comment
            if i == 0 && line.comment().is_some_and(|c| parse_version_header(&format!("#{c}")).is_some()) {
                continue;
            }
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// A box from pixel 0 to the image shape on every axis, in world units.
fn full_image_box(image: &ImageContext) -> Result<RegionShape> {
    let csys = image.csys.as_ref();
    let origin = vec![0.0; image.image_shape.len()];
    let extent: Vec<f64> = image.image_shape.iter().map(|n| *n as f64).collect();
    let units = csys.world_axis_units();
    let corner = |pixel: &[f64]| -> Result<Vec<Quantity>> {
        Ok(csys
            .to_world(pixel)?
            .into_iter()
            .zip(&units)
            .map(|(value, unit)| Quantity::new(value, unit.as_str()))
            .collect())
    };
    let kind = ShapeKind::WorldBox {
        blc: corner(&origin)?,
        trc: corner(&extent)?,
    };
    Ok(RegionShape::new(kind).with_direction_frame(csys.direction_frame()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::LinearCoordinateSystem;

    fn pix(v: f64) -> Quantity {
        Quantity::new(v, "pix")
    }

    fn sky() -> Arc<dyn CoordinateSystem> {
        Arc::new(LinearCoordinateSystem::sky((50.0, 50.0), (180.0, 30.0), 1.0 / 3600.0))
    }

    fn circle(x: f64, r: f64) -> RegionShape {
        RegionShape::new(ShapeKind::Circle { center: [pix(x), pix(50.0)], radius: pix(r) })
    }

    #[test]
    fn test_union_chain_and_history() {
        let mut list = RegionList::with_coordinate_system(sky(), vec![100, 100]);
        list.add_line(circle(10.0, 2.0).into());
        list.add_line(Line::Comment(" between".into()));
        list.add_line(circle(20.0, 2.0).into());
        list.add_line(circle(30.0, 2.0).into());
        assert_eq!(list.n_lines(), 4);
        assert_eq!(list.history().len(), 3);
        let region = list.get_region().unwrap().unwrap();
        assert_eq!(region.to_string(), "union(union(circle, circle), circle)");
        assert!(list.contains(&[30.0, 50.0]).unwrap());
        assert!(!list.contains(&[40.0, 50.0]).unwrap());
    }

    #[test]
    fn test_leading_difference_becomes_whole_image() {
        let mut list = RegionList::with_coordinate_system(sky(), vec![100, 100]);
        list.add_line(circle(50.0, 5.0).difference(true).into());
        let region = list.get_region().unwrap().unwrap();
        match region.as_ref() {
            CompositeRegion::Leaf(shape) => assert!(matches!(shape.kind, ShapeKind::WorldBox { .. })),
            other => panic!("expected the full image box, got {other}"),
        }
        assert!(list.contains(&[5.0, 5.0]).unwrap());
        assert!(list.contains(&[99.0, 99.0]).unwrap());
        assert!(list.contains(&[50.0, 50.0]).unwrap());

        list.add_line(circle(50.0, 5.0).difference(true).into());
        assert_eq!(list.history().len(), 2);
        assert!(!list.contains(&[50.0, 50.0]).unwrap());
        assert!(list.contains(&[5.0, 5.0]).unwrap());
    }

    #[test]
    fn test_unconvertible_image_box_skips_the_seed() {
        // three image axes against a two-axis coordinate system
        let mut list = RegionList::with_coordinate_system(sky(), vec![100, 100, 4]);
        list.add_line(circle(50.0, 5.0).difference(true).into());
        assert_eq!(list.n_lines(), 1);
        assert!(list.history().is_empty());

        list.add_line(circle(20.0, 3.0).into());
        assert_eq!(list.n_lines(), 2);
        assert_eq!(list.history().len(), 1);
        assert!(matches!(list.history()[0].as_ref(), CompositeRegion::Leaf(_)));
    }

    #[test]
    fn test_annotations_do_not_extend_the_region() {
        let mut list = RegionList::with_coordinate_system(sky(), vec![100, 100]);
        list.add_line(circle(10.0, 2.0).annotation_only(true).into());
        list.add_line(
            RegionShape::new(ShapeKind::Text { position: [pix(1.0), pix(1.0)], text: "x".into() }).into(),
        );
        assert_eq!(list.n_lines(), 2);
        assert!(list.history().is_empty());
        assert_eq!(list.get_region().unwrap(), None);
        assert!(matches!(list.region_as_record(), Err(RegionError::EmptyRegion)));
    }

    #[test]
    fn test_list_without_image_cannot_build() {
        let mut list = RegionList::empty();
        list.add_line(circle(10.0, 2.0).into());
        assert_eq!(list.n_lines(), 1);
        assert!(list.history().is_empty());
        assert!(matches!(list.get_region(), Err(RegionError::State)));
        assert!(matches!(list.region_as_record(), Err(RegionError::EmptyRegion)));
    }

    #[test]
    fn test_line_at_bounds() {
        let mut list = RegionList::empty();
        list.add_line(Line::Comment("x".into()));
        assert_eq!(list.line_at(0).unwrap().comment(), Some("x"));
        assert!(matches!(list.line_at(1), Err(RegionError::Index { index: 1, len: 1 })));
    }

    #[test]
    fn test_print_header_is_not_duplicated() {
        let mut list = RegionList::empty();
        list.add_line(Line::Comment("CRTFv0".into()));
        list.add_line(circle(1.0, 1.0).into());
        assert_eq!(list.print(), "#CRTFv0\ncircle [[1pix, 50pix], 1pix]\n");

        let mut list = RegionList::empty();
        list.add_line(Line::Comment("CRTFv3".into()));
        assert_eq!(list.print(), "#CRTFv0\n");

        let mut list = RegionList::empty();
        list.add_line(Line::Comment(" notes".into()));
        assert_eq!(list.print(), "#CRTFv0\n# notes\n");
    }

    #[test]
    fn test_print_keeps_comments_that_only_start_like_a_header() {
        for text in ["CRTF notes about M31", "CRTF", "CRTFv"] {
            let mut list = RegionList::empty();
            list.add_line(Line::Comment(text.into()));
            assert_eq!(list.print(), format!("#CRTFv0\n#{text}\n"));
        }
    }
}
