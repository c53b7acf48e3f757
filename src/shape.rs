//! # Region Shapes
//!
//! One [`RegionShape`] per shape line. The geometry is kept in the world
//! quantities it was written with; pixel geometry is derived on demand by the
//! `geometry` module. Rendering a shape with `Display` produces its CRTF line.

use std::collections::BTreeMap;
use std::fmt;

use crate::quantity::Quantity;
use crate::stokes::PolarizationCode;

// --- Shape Kinds ---

/// A point or a pair of lengths, as `[a, b]`.
pub type QuantityPair = [Quantity; 2];

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    RectBox { blc: QuantityPair, trc: QuantityPair },
    CenterBox { center: QuantityPair, widths: QuantityPair },
    RotBox { center: QuantityPair, widths: QuantityPair, angle: Quantity },
    Polygon { vertices: Vec<QuantityPair> },
    Circle { center: QuantityPair, radius: Quantity },
    Annulus { center: QuantityPair, radii: QuantityPair },
    Ellipse { center: QuantityPair, axes: QuantityPair, angle: Quantity },
    Line { start: QuantityPair, end: QuantityPair },
    Vector { start: QuantityPair, end: QuantityPair },
    Text { position: QuantityPair, text: String },
    Symbol { position: QuantityPair, symbol: char },
    /// A box over every pixel axis of an image, corners in world units.
    WorldBox { blc: Vec<Quantity>, trc: Vec<Quantity> },
}

impl ShapeKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            ShapeKind::RectBox { .. } => "box",
            ShapeKind::CenterBox { .. } => "centerbox",
            ShapeKind::RotBox { .. } => "rotbox",
            ShapeKind::Polygon { .. } => "poly",
            ShapeKind::Circle { .. } => "circle",
            ShapeKind::Annulus { .. } => "annulus",
            ShapeKind::Ellipse { .. } => "ellipse",
            ShapeKind::Line { .. } => "line",
            ShapeKind::Vector { .. } => "vector",
            ShapeKind::Text { .. } => "text",
            ShapeKind::Symbol { .. } => "symbol",
            ShapeKind::WorldBox { .. } => "worldbox",
        }
    }

    /// Lines, vectors, text and symbols only decorate a display.
    pub fn is_region_bearing(&self) -> bool {
        !matches!(
            self,
            ShapeKind::Line { .. } | ShapeKind::Vector { .. } | ShapeKind::Text { .. } | ShapeKind::Symbol { .. }
        )
    }
}

fn fmt_pair(p: &QuantityPair) -> String {
    format!("[{}, {}]", p[0], p[1])
}

fn quote(text: &str) -> String {
    if text.contains('"') {
        format!("'{text}'")
    } else {
        format!("\"{text}\"")
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kw = self.keyword();
        match self {
            ShapeKind::RectBox { blc: a, trc: b }
            | ShapeKind::CenterBox { center: a, widths: b }
            | ShapeKind::Annulus { center: a, radii: b }
            | ShapeKind::Line { start: a, end: b }
            | ShapeKind::Vector { start: a, end: b } => write!(f, "{kw} [{}, {}]", fmt_pair(a), fmt_pair(b)),
            ShapeKind::RotBox { center, widths: axes, angle } | ShapeKind::Ellipse { center, axes, angle } => {
                write!(f, "{kw} [{}, {}, {angle}]", fmt_pair(center), fmt_pair(axes))
            }
            ShapeKind::Polygon { vertices } => {
                let v: Vec<String> = vertices.iter().map(fmt_pair).collect();
                write!(f, "{kw} [{}]", v.join(", "))
            }
            ShapeKind::Circle { center, radius } => write!(f, "{kw} [{}, {radius}]", fmt_pair(center)),
            ShapeKind::Text { position, text } => write!(f, "{kw} [{}, {}]", fmt_pair(position), quote(text)),
            ShapeKind::Symbol { position, symbol } => write!(f, "{kw} [{}, {symbol}]", fmt_pair(position)),
            ShapeKind::WorldBox { blc, trc } => {
                let join = |v: &[Quantity]| v.iter().map(|q| q.to_string()).collect::<Vec<_>>().join(", ");
                write!(f, "{kw} [[{}], [{}]]", join(blc), join(trc))
            }
        }
    }
}

// --- Line Parameters ---

/// Keywords accepted after the shape parameters and on `global` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Keyword {
    Coord,
    Corr,
    Frame,
    Range,
    Veltype,
    Restfreq,
    Linewidth,
    Linestyle,
    Symsize,
    Symthick,
    Color,
    Font,
    Fontsize,
    Fontstyle,
    Usetex,
    Label,
    Labelcolor,
    Labelpos,
    Labeloff,
}

impl Keyword {
    pub fn from_name(name: &str) -> Option<Self> {
        let kw = match name.trim().to_lowercase().as_str() {
            "coord" => Keyword::Coord,
            "corr" => Keyword::Corr,
            "frame" => Keyword::Frame,
            "range" => Keyword::Range,
            "veltype" => Keyword::Veltype,
            "restfreq" => Keyword::Restfreq,
            "linewidth" => Keyword::Linewidth,
            "linestyle" => Keyword::Linestyle,
            "symsize" => Keyword::Symsize,
            "symthick" => Keyword::Symthick,
            "color" => Keyword::Color,
            "font" => Keyword::Font,
            "fontsize" => Keyword::Fontsize,
            "fontstyle" => Keyword::Fontstyle,
            "usetex" => Keyword::Usetex,
            "label" => Keyword::Label,
            "labelcolor" => Keyword::Labelcolor,
            "labelpos" => Keyword::Labelpos,
            "labeloff" => Keyword::Labeloff,
            _ => return None,
        };
        Some(kw)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Keyword::Coord => "coord",
            Keyword::Corr => "corr",
            Keyword::Frame => "frame",
            Keyword::Range => "range",
            Keyword::Veltype => "veltype",
            Keyword::Restfreq => "restfreq",
            Keyword::Linewidth => "linewidth",
            Keyword::Linestyle => "linestyle",
            Keyword::Symsize => "symsize",
            Keyword::Symthick => "symthick",
            Keyword::Color => "color",
            Keyword::Font => "font",
            Keyword::Fontsize => "fontsize",
            Keyword::Fontstyle => "fontstyle",
            Keyword::Usetex => "usetex",
            Keyword::Label => "label",
            Keyword::Labelcolor => "labelcolor",
            Keyword::Labelpos => "labelpos",
            Keyword::Labeloff => "labeloff",
        }
    }

    /// Keywords that select along the spectral axis.
    pub fn is_spectral(&self) -> bool {
        matches!(self, Keyword::Frame | Keyword::Range | Keyword::Veltype | Keyword::Restfreq)
    }

    fn is_list(&self) -> bool {
        matches!(self, Keyword::Range | Keyword::Corr | Keyword::Labeloff)
    }
}

/// Validated parameter values in canonical text form, keyed by keyword.
pub type ParamSet = BTreeMap<Keyword, String>;

pub fn format_param(key: Keyword, value: &str) -> String {
    if key == Keyword::Label {
        format!("{}={}", key.name(), quote(value))
    } else if key.is_list() {
        format!("{}=[{}]", key.name(), value)
    } else {
        format!("{}={}", key.name(), value)
    }
}

pub fn format_params(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format_param(*k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

// --- Region Shape ---

#[derive(Debug, Clone, PartialEq)]
pub struct RegionShape {
    pub kind: ShapeKind,
    /// Subtract from the running composite instead of adding to it.
    pub is_difference: bool,
    /// Never folded into the composite, whatever the kind.
    pub is_annotation_only: bool,
    /// Inclusive channel bounds; `None` is the entire spectral axis.
    pub spectral_pixel_range: Option<(u32, u32)>,
    pub stokes_list: Vec<PolarizationCode>,
    /// Frame of the direction coordinates, e.g. `J2000`.
    pub direction_frame: String,
    /// Parameters written on the line itself (globals are not repeated).
    pub params: ParamSet,
}

impl RegionShape {
    pub fn new(kind: ShapeKind) -> Self {
        RegionShape {
            kind,
            is_difference: false,
            is_annotation_only: false,
            spectral_pixel_range: None,
            stokes_list: Vec::new(),
            direction_frame: String::new(),
            params: ParamSet::new(),
        }
    }

    pub fn difference(mut self, is_difference: bool) -> Self {
        self.is_difference = is_difference;
        self
    }

    pub fn annotation_only(mut self, is_annotation_only: bool) -> Self {
        self.is_annotation_only = is_annotation_only;
        self
    }

    pub fn with_spectral_pixel_range(mut self, range: Option<(u32, u32)>) -> Self {
        self.spectral_pixel_range = range;
        self
    }

    pub fn with_stokes(mut self, stokes: Vec<PolarizationCode>) -> Self {
        self.stokes_list = stokes;
        self
    }

    pub fn with_direction_frame(mut self, frame: impl Into<String>) -> Self {
        self.direction_frame = frame.into();
        self
    }

    pub fn with_param(mut self, key: Keyword, value: impl Into<String>) -> Self {
        self.params.insert(key, value.into());
        self
    }

    pub fn is_region_bearing(&self) -> bool {
        self.kind.is_region_bearing()
    }

    /// Whether adding this shape changes the composite region.
    pub fn folds_into_region(&self) -> bool {
        self.is_region_bearing() && !self.is_annotation_only
    }
}

impl fmt::Display for RegionShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_difference {
            f.write_str("- ")?;
        } else if self.is_annotation_only {
            f.write_str("ann ")?;
        }
        write!(f, "{}", self.kind)?;
        if !self.params.is_empty() {
            write!(f, ", {}", format_params(&self.params))?;
        }
        Ok(())
    }
}
