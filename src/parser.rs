//! # CRTF Line Parser
//!
//! Turns CRTF region text into [`Line`]s. Parsing happens in two passes per
//! line: a nom grammar splits the line into a [`RawLine`] (shape keyword,
//! parameters, `key=value` attributes), then the attributes are validated,
//! merged with the current `global` parameters and resolved against the
//! coordinate system into a [`RegionShape`].
//!
//! A file may start with a version header (`#CRTFv0`). The first line that
//! fails the grammar aborts the parse with a [`RegionError::Syntax`] naming
//! the line; a shape whose world coordinates cannot be converted to pixels is
//! skipped with a warning.

use std::path::Path;
use std::sync::Arc;

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while1},
    character::complete::{alpha1, anychar, char as nom_char, digit1, multispace0, multispace1},
    combinator::{cut, eof, map, map_opt, map_res, opt, rest, value, verify},
    error::{context, ContextError, ErrorKind, ParseError, VerboseError},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    Finish, Parser,
};
use tracing::{debug, info, warn};

use crate::channels::parse_and_consolidate;
use crate::coordinates::CoordinateSystem;
use crate::error::{RegionError, Result};
use crate::quantity::{read_quantity, Input, ParserResult, Quantity};
use crate::region_list::Line;
use crate::shape::{Keyword, ParamSet, QuantityPair, RegionShape, ShapeKind};
use crate::spectral::{AxisExtender, Doppler, SpectralFrame};
use crate::stokes::{format_stokes_list, parse_stokes_list, PolarizationCode};

/// Magic that starts a version header, e.g. `#CRTFv0`.
pub const MAGIC: &str = "#CRTF";

/// The most recent version of the format this parser understands.
pub const CURRENT_VERSION: u32 = 0;

const DIRECTION_FRAMES: &[&str] = &[
    "J2000", "JMEAN", "JTRUE", "APP", "B1950", "B1950_VLA", "BMEAN", "BTRUE", "GALACTIC", "HADEC", "AZEL",
    "AZELSW", "AZELGEO", "AZELSWGEO", "JNAT", "ECLIPTIC", "MECLIPTIC", "TECLIPTIC", "SUPERGAL", "ITRF", "TOPO",
    "ICRS",
];

// --- Options ---

/// Knobs for a single parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOptions {
    /// Oldest acceptable file version.
    pub min_version: u32,
    /// Region text parsed ahead of the input.
    pub prepend_region: Option<String>,
    /// Channel specification replacing every `range` (one range at most).
    pub global_override_chans: Option<String>,
    /// Stokes list replacing every `corr`.
    pub global_override_stokes: Option<String>,
}

impl ParseOptions {
    pub fn with_min_version(mut self, min_version: u32) -> Self {
        self.min_version = min_version;
        self
    }

    pub fn with_prepend_region(mut self, text: impl Into<String>) -> Self {
        self.prepend_region = Some(text.into());
        self
    }

    pub fn with_global_override_chans(mut self, chans: impl Into<String>) -> Self {
        self.global_override_chans = Some(chans.into());
        self
    }

    pub fn with_global_override_stokes(mut self, stokes: impl Into<String>) -> Self {
        self.global_override_stokes = Some(stokes.into());
        self
    }
}

/// Where region text comes from.
#[derive(Debug, Clone, Copy)]
pub enum RegionSource<'a> {
    Text(&'a str),
    File(&'a Path),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRegionText {
    pub lines: Vec<Line>,
    /// Version from the header, `None` when the input had no header.
    pub version: Option<u32>,
}

// --- Raw Line Grammar ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Marker {
    Difference,
    AnnotationOnly,
}

/// One line split by the grammar, before any validation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawLine {
    Comment(String),
    Global(Vec<(String, String)>),
    Shape {
        marker: Option<Marker>,
        kind: ShapeKind,
        attributes: Vec<(String, String)>,
    },
    Empty,
}

fn ws<'a>(input: Input<'a>) -> ParserResult<'a, &'a str> {
    multispace0(input)
}

fn comma_sep<'a>(input: Input<'a>) -> ParserResult<'a, ()> {
    value((), tuple((ws, nom_char(','), ws)))(input)
}

fn bracketed<'a, O, F>(inner: F) -> impl FnMut(Input<'a>) -> ParserResult<'a, O>
where
    F: Parser<Input<'a>, O, VerboseError<Input<'a>>>,
{
    delimited(pair(nom_char('['), ws), inner, pair(ws, nom_char(']')))
}

fn quantity<'a>(input: Input<'a>) -> ParserResult<'a, Quantity> {
    context(
        "quantity",
        map_opt(take_while1(|c: char| c != ',' && c != '[' && c != ']'), read_quantity),
    )(input)
}

fn quantity_pair<'a>(input: Input<'a>) -> ParserResult<'a, QuantityPair> {
    context(
        "pair [a, b]",
        map(bracketed(separated_pair(quantity, comma_sep, quantity)), |(a, b)| [a, b]),
    )(input)
}

fn quoted_string<'a>(input: Input<'a>) -> ParserResult<'a, &'a str> {
    alt((
        delimited(nom_char('"'), take_until("\""), nom_char('"')),
        delimited(nom_char('\''), take_until("'"), nom_char('\'')),
    ))(input)
}

fn two_pairs<'a>(input: Input<'a>) -> ParserResult<'a, (QuantityPair, QuantityPair)> {
    bracketed(separated_pair(quantity_pair, comma_sep, quantity_pair))(input)
}

fn pairs_and_angle<'a>(input: Input<'a>) -> ParserResult<'a, (QuantityPair, QuantityPair, Quantity)> {
    map(
        bracketed(tuple((quantity_pair, comma_sep, quantity_pair, comma_sep, quantity))),
        |(a, _, b, _, angle)| (a, b, angle),
    )(input)
}

fn unknown_shape<'a>(input: Input<'a>) -> nom::Err<VerboseError<Input<'a>>> {
    nom::Err::Failure(VerboseError::add_context(
        input,
        "unable to determine annotation type",
        VerboseError::from_error_kind(input, ErrorKind::Tag),
    ))
}

/// Parameters of the shape named `keyword` (lowercase).
fn parse_shape_body<'a>(keyword: &str, input: Input<'a>) -> ParserResult<'a, ShapeKind> {
    match keyword {
        "box" => context("box [[x1, y1], [x2, y2]]", map(two_pairs, |(blc, trc)| ShapeKind::RectBox { blc, trc }))(input),
        "centerbox" => context(
            "centerbox [[x, y], [width, height]]",
            map(two_pairs, |(center, widths)| ShapeKind::CenterBox { center, widths }),
        )(input),
        "rotbox" => context(
            "rotbox [[x, y], [width, height], angle]",
            map(pairs_and_angle, |(center, widths, angle)| ShapeKind::RotBox { center, widths, angle }),
        )(input),
        "poly" => context(
            "poly [[x1, y1], [x2, y2], [x3, y3], ...]",
            map(
                verify(bracketed(separated_list1(comma_sep, quantity_pair)), |v: &Vec<QuantityPair>| v.len() >= 3),
                |vertices| ShapeKind::Polygon { vertices },
            ),
        )(input),
        "circle" => context(
            "circle [[x, y], radius]",
            map(bracketed(separated_pair(quantity_pair, comma_sep, quantity)), |(center, radius)| {
                ShapeKind::Circle { center, radius }
            }),
        )(input),
        "annulus" => context(
            "annulus [[x, y], [r1, r2]]",
            map(two_pairs, |(center, radii)| ShapeKind::Annulus { center, radii }),
        )(input),
        "ellipse" => context(
            "ellipse [[x, y], [b1, b2], angle]",
            map(pairs_and_angle, |(center, axes, angle)| ShapeKind::Ellipse { center, axes, angle }),
        )(input),
        "line" => context("line [[x1, y1], [x2, y2]]", map(two_pairs, |(start, end)| ShapeKind::Line { start, end }))(
            input,
        ),
        "vector" => context(
            "vector [[x1, y1], [x2, y2]]",
            map(two_pairs, |(start, end)| ShapeKind::Vector { start, end }),
        )(input),
        "text" => context(
            "text [[x, y], 'text']",
            map(bracketed(separated_pair(quantity_pair, comma_sep, quoted_string)), |(position, text)| {
                ShapeKind::Text { position, text: text.to_string() }
            }),
        )(input),
        "symbol" => context(
            "symbol [[x, y], c]",
            map(bracketed(separated_pair(quantity_pair, comma_sep, anychar)), |(position, symbol)| {
                ShapeKind::Symbol { position, symbol }
            }),
        )(input),
        _ => Err(unknown_shape(input)),
    }
}

/// Parses `key=value`. Labels must be quoted; bracketed values keep their
/// inner text; anything else runs to the next comma.
fn parse_attribute<'a>(input: Input<'a>) -> ParserResult<'a, (String, String)> {
    let (i, key) = terminated(alpha1, tuple((ws, nom_char('='), ws)))(input)?;
    let (i, raw) = if key.eq_ignore_ascii_case("label") {
        cut(context("quoted label", quoted_string))(i)?
    } else {
        alt((
            delimited(nom_char('['), take_until("]"), nom_char(']')),
            quoted_string,
            take_while1(|c: char| c != ','),
        ))(i)?
    };
    Ok((i, (key.to_string(), raw.trim().to_string())))
}

fn parse_attribute_list<'a>(input: Input<'a>) -> ParserResult<'a, Vec<(String, String)>> {
    many0(preceded(tuple((ws, opt(nom_char(',')), ws)), parse_attribute))(input)
}

fn parse_shape_line<'a>(input: Input<'a>) -> ParserResult<'a, RawLine> {
    let (i, marker) = opt(alt((
        value(Marker::Difference, pair(nom_char('-'), ws)),
        value(Marker::AnnotationOnly, pair(tag_no_case("ann"), multispace1)),
    )))(input)?;
    let (i, keyword) = terminated(alpha1, ws)(i)?;
    let keyword = keyword.to_lowercase();
    let (i, kind) = cut(|i| parse_shape_body(&keyword, i))(i)?;
    let (i, attributes) = parse_attribute_list(i)?;
    Ok((i, RawLine::Shape { marker, kind, attributes }))
}

fn parse_line_content<'a>(input: Input<'a>) -> ParserResult<'a, RawLine> {
    preceded(
        ws,
        alt((
            map(preceded(nom_char('#'), rest), |c: &str| RawLine::Comment(c.to_string())),
            map(preceded(pair(tag_no_case("global"), multispace1), parse_attribute_list), RawLine::Global),
            parse_shape_line,
            map(eof, |_| RawLine::Empty),
        )),
    )(input)
}

/// Splits one line, or returns the nom error trace rendered against it.
pub(crate) fn parse_raw_line(line: &str) -> std::result::Result<RawLine, String> {
    match terminated(parse_line_content, pair(ws, eof))(line).finish() {
        Ok((_, raw)) => Ok(raw),
        Err(e) => Err(nom::error::convert_error(line, e)),
    }
}

/// The version declared by a `#CRTFv<N>` header line. Any other line,
/// including `#CRTF` without a version, is not a header.
pub(crate) fn parse_version_header(line: &str) -> Option<u32> {
    let header: ParserResult<'_, u32> = preceded(
        tuple((ws, tag(MAGIC), tag_no_case("v"))),
        map_res(digit1, |s: &str| s.parse::<u32>()),
    )(line);
    header.ok().map(|(_, version)| version)
}

// --- Attribute Validation ---

fn positive_int(value: &str) -> std::result::Result<String, String> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n.to_string()),
        _ => Err("must be a positive integer".to_string()),
    }
}

fn one_of(value: &str, allowed: &[&str]) -> std::result::Result<String, String> {
    let lower = value.to_lowercase();
    if allowed.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(format!("must be one of {}", allowed.join(", ")))
    }
}

/// Two quantities written `a, b`.
fn range_limits(value: &str) -> Option<(Quantity, Quantity)> {
    let (a, b) = value.split_once(',')?;
    Some((read_quantity(a)?, read_quantity(b)?))
}

/// Canonical text for a validated value, or why it is invalid.
fn canonical_value(key: Keyword, value: &str) -> std::result::Result<String, String> {
    match key {
        Keyword::Coord => {
            let upper = value.to_uppercase();
            if DIRECTION_FRAMES.contains(&upper.as_str()) {
                Ok(upper)
            } else {
                Err("unknown direction reference frame".to_string())
            }
        }
        Keyword::Corr => parse_stokes_list(value)
            .map(|codes| format_stokes_list(&codes))
            .map_err(|e| e.to_string()),
        Keyword::Frame => SpectralFrame::from_name(value)
            .map(|f| f.name().to_string())
            .ok_or_else(|| "unknown spectral reference frame".to_string()),
        Keyword::Veltype => Doppler::from_name(value)
            .map(|d| d.name().to_string())
            .ok_or_else(|| "unknown doppler type".to_string()),
        Keyword::Restfreq => read_quantity(value)
            .filter(|q| q.to_hz().is_some())
            .map(|q| q.to_string())
            .ok_or_else(|| "must be a frequency".to_string()),
        Keyword::Range => range_limits(value)
            .map(|(a, b)| format!("{a}, {b}"))
            .ok_or_else(|| "must be two quantities".to_string()),
        Keyword::Linewidth | Keyword::Symsize | Keyword::Symthick => positive_int(value),
        Keyword::Fontsize => value
            .parse::<u32>()
            .map(|n| n.to_string())
            .map_err(|_| "must be an integer".to_string()),
        Keyword::Linestyle => {
            if ["-", "--", "-.", ":"].contains(&value) {
                Ok(value.to_string())
            } else {
                Err("must be one of -, --, -., :".to_string())
            }
        }
        Keyword::Fontstyle => one_of(value, &["normal", "bold", "italic", "bold-italic"]),
        Keyword::Labelpos => one_of(value, &["left", "right", "top", "bottom"]),
        Keyword::Usetex => match value.to_lowercase().as_str() {
            "t" | "true" => Ok("true".to_string()),
            "f" | "false" => Ok("false".to_string()),
            _ => Err("must be true or false".to_string()),
        },
        Keyword::Labeloff => {
            let parts: Vec<&str> = value.split(',').map(str::trim).collect();
            match parts.as_slice() {
                [a, b] => match (a.parse::<i64>(), b.parse::<i64>()) {
                    (Ok(a), Ok(b)) => Ok(format!("{a}, {b}")),
                    _ => Err("must be two integers".to_string()),
                },
                _ => Err("must be two integers".to_string()),
            }
        }
        Keyword::Color | Keyword::Font | Keyword::Labelcolor => {
            if value.is_empty() {
                Err("must not be empty".to_string())
            } else {
                Ok(value.to_string())
            }
        }
        Keyword::Label => Ok(value.to_string()),
    }
}

// --- Line Resolution ---

struct RegionTextParser<'a> {
    csys: &'a dyn CoordinateSystem,
    image_shape: &'a [usize],
    globals: ParamSet,
    override_range: Option<(u32, u32)>,
    override_stokes: Option<Vec<PolarizationCode>>,
}

/// Attaches the line to a validation error raised while resolving it.
fn at_line(err: RegionError, number: usize, text: &str) -> RegionError {
    match err {
        RegionError::Validation { reason } => RegionError::validation(format!("line {number}: {reason} ({text})")),
        other => other,
    }
}

impl<'a> RegionTextParser<'a> {
    fn new(csys: &'a dyn CoordinateSystem, image_shape: &'a [usize], options: &ParseOptions) -> Result<Self> {
        let mut parser = RegionTextParser {
            csys,
            image_shape,
            globals: ParamSet::new(),
            override_range: None,
            override_stokes: None,
        };
        if let Some(chans) = options.global_override_chans.as_deref() {
            parser.override_range = parser.resolve_override_chans(chans)?;
        }
        if let Some(stokes) = options.global_override_stokes.as_deref() {
            if csys.polarization_axis().is_none() {
                warn!(stokes, "no polarization axis, ignoring stokes override");
            } else {
                let codes = parse_stokes_list(stokes)?;
                AxisExtender::new(csys, image_shape).set_stokes(&codes)?;
                parser.override_stokes = Some(codes);
            }
        }
        Ok(parser)
    }

    /// The single channel range `chans` resolves to. `None` when it selects
    /// no channels, which leaves every line's own `range` in effect.
    fn resolve_override_chans(&self, chans: &str) -> Result<Option<(u32, u32)>> {
        if chans.trim().is_empty() {
            return Ok(None);
        }
        let n_channels = match self.csys.num_spectral_channels(self.image_shape) {
            Some(n) => n,
            None => {
                warn!(chans, "no spectral axis, ignoring channel override");
                return Ok(None);
            }
        };
        let total = u32::try_from(n_channels)
            .map_err(|_| RegionError::validation(format!("{n_channels} channels is more than supported")))?;
        let ranges = parse_and_consolidate(chans, total)?;
        match ranges.as_slice() {
            [] => Ok(None),
            [(lo, hi)] => {
                let (b, e) = (Quantity::new(f64::from(*lo), "pix"), Quantity::new(f64::from(*hi), "pix"));
                let mut ext = AxisExtender::new(self.csys, self.image_shape);
                ext.set_frequency_limits(Some(&b), Some(&e), None, None, None)?;
                Ok(ext.spectral_pixel_range())
            }
            _ => Err(RegionError::validation(format!(
                "overriding spectral specification {chans} must be limited to a single channel range"
            ))),
        }
    }

    /// Validates `attributes` into a parameter set, dropping keys the
    /// coordinate system or an override makes irrelevant.
    fn params(&self, attributes: &[(String, String)], number: usize, text: &str) -> Result<ParamSet> {
        let mut params = ParamSet::new();
        for (name, raw) in attributes {
            let key = Keyword::from_name(name)
                .ok_or_else(|| RegionError::syntax(number, text, format!("unrecognized key {name}")))?;
            let value = canonical_value(key, raw)
                .map_err(|why| RegionError::syntax(number, text, format!("invalid {} value {raw}: {why}", key.name())))?;
            if key == Keyword::Corr {
                if self.csys.polarization_axis().is_none() {
                    warn!(line = number, "no polarization axis, ignoring corr={value}");
                    continue;
                }
                if self.override_stokes.is_some() {
                    debug!(line = number, "corr replaced by the global stokes override");
                    continue;
                }
            }
            if key.is_spectral() {
                if self.csys.spectral_axis().is_none() {
                    warn!(line = number, "no spectral axis, ignoring {}={value}", key.name());
                    continue;
                }
                if key == Keyword::Range && self.override_range.is_some() {
                    debug!(line = number, "range replaced by the global channel override");
                    continue;
                }
            }
            params.insert(key, value);
        }
        Ok(params)
    }

    fn spectral_range(&self, effective: &ParamSet) -> Result<Option<(u32, u32)>> {
        if let Some(range) = self.override_range {
            return Ok(Some(range));
        }
        let Some((begin, end)) = effective.get(&Keyword::Range).and_then(|r| range_limits(r)) else {
            return Ok(None);
        };
        let frame = effective.get(&Keyword::Frame).and_then(|f| SpectralFrame::from_name(f));
        let doppler = effective
            .get(&Keyword::Veltype)
            .and_then(|d| Doppler::from_name(d))
            .unwrap_or_else(|| self.csys.doppler());
        let rest = effective
            .get(&Keyword::Restfreq)
            .and_then(|r| read_quantity(r))
            .or_else(|| self.csys.rest_frequency().map(|hz| Quantity::new(hz, "Hz")));
        let mut ext = AxisExtender::new(self.csys, self.image_shape);
        ext.set_frequency_limits(Some(&begin), Some(&end), frame, Some(doppler), rest.as_ref())?;
        Ok(ext.spectral_pixel_range())
    }

    fn stokes(&self, effective: &ParamSet) -> Result<Vec<PolarizationCode>> {
        let codes = match (&self.override_stokes, effective.get(&Keyword::Corr)) {
            (Some(codes), _) => codes.clone(),
            (None, Some(corr)) => parse_stokes_list(corr)?,
            (None, None) => Vec::new(),
        };
        if !codes.is_empty() {
            AxisExtender::new(self.csys, self.image_shape).set_stokes(&codes)?;
        }
        Ok(codes)
    }

    fn shape(
        &self,
        marker: Option<Marker>,
        kind: ShapeKind,
        params: ParamSet,
        number: usize,
        text: &str,
    ) -> Result<Option<RegionShape>> {
        let mut effective = self.globals.clone();
        effective.extend(params.iter().map(|(k, v)| (*k, v.clone())));

        if !effective.contains_key(&Keyword::Label)
            && [Keyword::Labelcolor, Keyword::Labelpos, Keyword::Labeloff]
                .iter()
                .any(|k| effective.contains_key(k))
        {
            warn!(line = number, "label styling given without a label");
        }

        let direction_frame = effective
            .get(&Keyword::Coord)
            .cloned()
            .unwrap_or_else(|| self.csys.direction_frame().to_string());
        let resolved = self
            .spectral_range(&effective)
            .and_then(|range| Ok((range, self.stokes(&effective)?)));
        let (spectral_pixel_range, stokes) = match resolved {
            Ok(resolved) => resolved,
            Err(RegionError::Conversion { reason }) => {
                warn!(line = number, %reason, "skipping shape, spectral limits cannot be converted");
                return Ok(None);
            }
            Err(e) => return Err(at_line(e, number, text)),
        };

        let shape = RegionShape::new(kind)
            .difference(marker == Some(Marker::Difference))
            .annotation_only(marker == Some(Marker::AnnotationOnly))
            .with_direction_frame(direction_frame)
            .with_spectral_pixel_range(spectral_pixel_range)
            .with_stokes(stokes);
        let shape = RegionShape { params, ..shape };

        if shape.is_region_bearing() {
            if let Err(err) = shape.pixel_geometry(self.csys) {
                match err {
                    RegionError::Conversion { reason } => {
                        warn!(line = number, %reason, "skipping shape, world coordinates cannot be converted");
                        return Ok(None);
                    }
                    other => return Err(other),
                }
            }
        }
        match marker {
            Some(Marker::Difference) => debug!(line = number, shape = shape.kind.keyword(), "difference"),
            Some(Marker::AnnotationOnly) => debug!(line = number, shape = shape.kind.keyword(), "annotation only"),
            None => {}
        }
        Ok(Some(shape))
    }

    fn line(&mut self, number: usize, text: &str) -> Result<Option<Line>> {
        let raw = parse_raw_line(text).map_err(|reason| RegionError::syntax(number, text, reason))?;
        match raw {
            RawLine::Empty => Ok(None),
            RawLine::Comment(comment) => Ok(Some(Line::Comment(comment))),
            RawLine::Global(attributes) => {
                let params = self.params(&attributes, number, text)?;
                self.globals.extend(params.iter().map(|(k, v)| (*k, v.clone())));
                Ok(Some(Line::Global(params)))
            }
            RawLine::Shape { marker, kind, attributes } => {
                let params = self.params(&attributes, number, text)?;
                Ok(self
                    .shape(marker, kind, params, number, text)?
                    .map(|shape| Line::Annotation(Arc::new(shape))))
            }
        }
    }
}

// --- Entry Point ---

fn check_version(found: u32, min_version: u32) -> Result<()> {
    if found < min_version {
        return Err(RegionError::Version { found, required: min_version });
    }
    if found > CURRENT_VERSION {
        return Err(RegionError::FutureVersion { found, current: CURRENT_VERSION });
    }
    Ok(())
}

/// Parses region text into lines, resolving each shape against `csys` and
/// `image_shape`.
pub fn parse(
    source: RegionSource<'_>,
    csys: &dyn CoordinateSystem,
    image_shape: &[usize],
    options: &ParseOptions,
) -> Result<ParsedRegionText> {
    let owned;
    let text = match source {
        RegionSource::Text(text) => text,
        RegionSource::File(path) => {
            owned = std::fs::read_to_string(path).map_err(|source| RegionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            owned.as_str()
        }
    };

    let (version, skip_first) = match text.lines().next().and_then(parse_version_header) {
        Some(found) => {
            check_version(found, options.min_version)?;
            info!(version = found, "found CRTF version header");
            (Some(found), true)
        }
        None => {
            warn!("no CRTF version header found, assuming version {CURRENT_VERSION}");
            check_version(CURRENT_VERSION, options.min_version)?;
            (None, false)
        }
    };

    let prepend: Vec<&str> = options.prepend_region.as_deref().map_or_else(Vec::new, |p| p.lines().collect());
    let body = text.lines().skip(usize::from(skip_first));
    let first_body_number = prepend.len() + 1 + usize::from(skip_first);

    let mut parser = RegionTextParser::new(csys, image_shape, options)?;
    let mut lines = Vec::new();
    let numbered = prepend
        .iter()
        .copied()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .chain(body.enumerate().map(|(i, l)| (first_body_number + i, l)));
    for (number, text) in numbered {
        if let Some(line) = parser.line(number, text)? {
            lines.push(line);
        }
    }

    let n_regions = lines
        .iter()
        .filter_map(Line::shape)
        .filter(|s| s.folds_into_region())
        .count();
    info!(lines = lines.len(), "combined {n_regions} image regions");
    Ok(ParsedRegionText { lines, version })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::LinearCoordinateSystem;
    use crate::stokes::PolarizationCode::{I, Q, U, V};

    macro_rules! assert_raw_shape {
        ($input:expr, $kind:pat, $marker:expr, $n_attrs:expr) => {
            match parse_raw_line($input) {
                Ok(RawLine::Shape { marker, kind, attributes }) => {
                    assert!(matches!(kind, $kind), "shape mismatch for '{}': {:?}", $input, kind);
                    assert_eq!(marker, $marker, "marker mismatch for '{}'", $input);
                    assert_eq!(attributes.len(), $n_attrs, "attribute count mismatch for '{}': {:?}", $input, attributes);
                }
                Ok(other) => panic!("expected a shape for '{}', got {:?}", $input, other),
                Err(e) => panic!("parsing failed for '{}':\n{}", $input, e),
            }
        };
    }

    macro_rules! assert_raw_fails {
        ($input:expr) => {
            assert!(parse_raw_line($input).is_err(), "expected '{}' to fail", $input);
        };
    }

    fn sky() -> LinearCoordinateSystem {
        LinearCoordinateSystem::sky((50.0, 50.0), (180.0, 30.0), 1.0 / 3600.0)
    }

    fn cube() -> LinearCoordinateSystem {
        sky()
            .with_spectral(0.0, 1.4e9, 1.0e6, SpectralFrame::Lsrk, Some(1.42e9))
            .with_stokes(vec![I, Q, U, V])
    }

    const SKY_SHAPE: [usize; 2] = [100, 100];
    const CUBE_SHAPE: [usize; 4] = [100, 100, 64, 4];

    fn parse_sky(text: &str) -> Result<ParsedRegionText> {
        parse(RegionSource::Text(text), &sky(), &SKY_SHAPE, &ParseOptions::default())
    }

    fn parse_cube(text: &str, options: &ParseOptions) -> Result<ParsedRegionText> {
        parse(RegionSource::Text(text), &cube(), &CUBE_SHAPE, options)
    }

    fn only_shape(parsed: &ParsedRegionText) -> &RegionShape {
        let shapes: Vec<_> = parsed.lines.iter().filter_map(Line::shape).collect();
        assert_eq!(shapes.len(), 1, "{:?}", parsed.lines);
        shapes[0]
    }

    #[test]
    fn test_raw_shapes() {
        assert_raw_shape!("box [[0pix, 0pix], [10pix, 10pix]]", ShapeKind::RectBox { .. }, None, 0);
        assert_raw_shape!("centerbox[[5pix,5pix],[2pix,2pix]]", ShapeKind::CenterBox { .. }, None, 0);
        assert_raw_shape!("rotbox [[5pix, 5pix], [2pix, 4pix], 30deg]", ShapeKind::RotBox { .. }, None, 0);
        assert_raw_shape!("poly [[0pix, 0pix], [4pix, 0pix], [2pix, 3pix]]", ShapeKind::Polygon { .. }, None, 0);
        assert_raw_shape!("circle [[12h30m00s, -30d00m00s], 10arcsec]", ShapeKind::Circle { .. }, None, 0);
        assert_raw_shape!("annulus [[1pix, 1pix], [2pix, 4pix]]", ShapeKind::Annulus { .. }, None, 0);
        assert_raw_shape!("ellipse [[1pix, 1pix], [4pix, 2pix], 0deg]", ShapeKind::Ellipse { .. }, None, 0);
        assert_raw_shape!("line [[1pix, 1pix], [4pix, 2pix]]", ShapeKind::Line { .. }, None, 0);
        assert_raw_shape!("vector [[1pix, 1pix], [4pix, 2pix]]", ShapeKind::Vector { .. }, None, 0);
        assert_raw_shape!("text [[1pix, 1pix], 'a, b]']", ShapeKind::Text { .. }, None, 0);
        assert_raw_shape!("symbol [[1pix, 1pix], ,]", ShapeKind::Symbol { symbol: ',', .. }, None, 0);
    }

    #[test]
    fn test_raw_markers_and_attributes() {
        assert_raw_shape!("- circle [[1pix, 1pix], 2pix]", ShapeKind::Circle { .. }, Some(Marker::Difference), 0);
        assert_raw_shape!("-circle [[1pix, 1pix], 2pix]", ShapeKind::Circle { .. }, Some(Marker::Difference), 0);
        assert_raw_shape!("ann circle [[1pix, 1pix], 2pix]", ShapeKind::Circle { .. }, Some(Marker::AnnotationOnly), 0);
        assert_raw_shape!("annulus [[1pix, 1pix], [2pix, 3pix]]", ShapeKind::Annulus { .. }, None, 0);
        assert_raw_shape!(
            "circle [[1pix, 1pix], 2pix], color=red, range=[1GHz, 2GHz], label='a, b'",
            ShapeKind::Circle { .. },
            None,
            3
        );
        assert_raw_shape!("circle [[1pix, 1pix], 2pix] coord=J2000", ShapeKind::Circle { .. }, None, 1);
    }

    #[test]
    fn test_raw_other_lines() {
        assert_eq!(parse_raw_line("# a comment").unwrap(), RawLine::Comment(" a comment".into()));
        assert_eq!(parse_raw_line("   ").unwrap(), RawLine::Empty);
        assert_eq!(
            parse_raw_line("global color=blue, linewidth=2").unwrap(),
            RawLine::Global(vec![("color".into(), "blue".into()), ("linewidth".into(), "2".into())])
        );
    }

    #[test]
    fn test_raw_failures() {
        assert_raw_fails!("circle [[1pix, 1pix]]");
        assert_raw_fails!("poly [[0pix, 0pix], [4pix, 0pix]]");
        assert_raw_fails!("hexagon [[0pix, 0pix], 1pix]");
        assert_raw_fails!("symbol [[1pix, 1pix], ab]");
        assert_raw_fails!("text [[1pix, 1pix], unquoted]");
        assert_raw_fails!("circle [[1pix, 1pix], 2pix], label=unquoted");
        assert_raw_fails!("circle [[1pix, 1pix], 2pix],");
    }

    #[test]
    fn test_version_header() {
        assert_eq!(parse_version_header("#CRTFv0"), Some(0));
        assert_eq!(parse_version_header("#CRTFv12 extra"), Some(12));
        assert_eq!(parse_version_header("#CRTF"), None);
        assert_eq!(parse_version_header("#CRTFv"), None);
        assert_eq!(parse_version_header("#CRTF regions for M31"), None);
        assert_eq!(parse_version_header("# CRTFv0"), None);

        let parsed = parse_sky("#CRTFv0\ncircle [[1pix, 1pix], 2pix]").unwrap();
        assert_eq!(parsed.version, Some(0));
        assert_eq!(parsed.lines.len(), 1);

        let parsed = parse_sky("circle [[1pix, 1pix], 2pix]").unwrap();
        assert_eq!(parsed.version, None);
    }

    #[test]
    fn test_comment_starting_with_magic_is_kept() {
        let parsed = parse_sky("#CRTF regions for M31\ncircle [[1pix, 1pix], 2pix]").unwrap();
        assert_eq!(parsed.version, None);
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.lines[0], Line::Comment("CRTF regions for M31".into()));

        let parsed = parse_sky("#CRTF\ncircle [[1pix, 1pix], 2pix]").unwrap();
        assert_eq!(parsed.lines[0], Line::Comment("CRTF".into()));
    }

    #[test]
    fn test_version_checks() {
        let err = parse_sky("#CRTFv1\n").unwrap_err();
        assert!(matches!(err, RegionError::FutureVersion { found: 1, current: 0 }));
        let options = ParseOptions::default().with_min_version(1);
        let err = parse(RegionSource::Text("#CRTFv0\n"), &sky(), &SKY_SHAPE, &options).unwrap_err();
        assert!(matches!(err, RegionError::Version { found: 0, required: 1 }));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let parsed = parse_sky("#CRTFv0\n\n# first\n#second\n   \n").unwrap();
        assert_eq!(parsed.lines, vec![Line::Comment(" first".into()), Line::Comment("second".into())]);
    }

    #[test]
    fn test_syntax_error_names_the_line() {
        let err = parse_sky("#CRTFv0\ncircle [[1pix, 1pix], 2pix]\ncircle [[1pix]]").unwrap_err();
        match err {
            RegionError::Syntax { line, text, .. } => {
                assert_eq!(line, 3);
                assert_eq!(text, "circle [[1pix]]");
            }
            other => panic!("expected a syntax error, got {other}"),
        }
    }

    #[test]
    fn test_unknown_key_is_a_syntax_error() {
        let err = parse_sky("circle [[1pix, 1pix], 2pix], colour=red").unwrap_err();
        assert!(matches!(err, RegionError::Syntax { line: 1, .. }), "{err}");
    }

    #[test]
    fn test_attribute_validation() {
        for bad in [
            "linewidth=0",
            "symsize=x",
            "usetex=maybe",
            "labeloff=[1]",
            "linestyle=~",
            "restfreq=5km/s",
            "coord=NOWHERE",
            "corr=[I, W]",
        ] {
            let text = format!("circle [[1pix, 1pix], 2pix], {bad}");
            assert!(parse_sky(&text).is_err(), "{bad} should be rejected");
        }
        let parsed = parse_sky("circle [[1pix, 1pix], 2pix], usetex=T, linewidth=3, labeloff=[1,-2]").unwrap();
        let shape = only_shape(&parsed);
        assert_eq!(shape.params.get(&Keyword::Usetex).map(String::as_str), Some("true"));
        assert_eq!(shape.params.get(&Keyword::Labeloff).map(String::as_str), Some("1, -2"));
    }

    #[test]
    fn test_missing_axes_drop_keywords() {
        let parsed = parse_sky("circle [[1pix, 1pix], 2pix], corr=[I], range=[1GHz, 2GHz], color=red").unwrap();
        let shape = only_shape(&parsed);
        assert_eq!(shape.params.len(), 1);
        assert!(shape.stokes_list.is_empty());
        assert_eq!(shape.spectral_pixel_range, None);
    }

    #[test]
    fn test_spectral_and_stokes_resolution() {
        let parsed = parse_cube(
            "circle [[1pix, 1pix], 2pix], range=[1.405GHz, 1.41GHz], corr=[Q, V]",
            &ParseOptions::default(),
        )
        .unwrap();
        let shape = only_shape(&parsed);
        assert_eq!(shape.spectral_pixel_range, Some((5, 10)));
        assert_eq!(shape.stokes_list, vec![Q, V]);
    }

    #[test]
    fn test_velocity_range_uses_image_rest_frequency() {
        let parsed = parse_cube(
            "circle [[1pix, 1pix], 2pix], range=[-10km/s, 10km/s], veltype=radio",
            &ParseOptions::default(),
        )
        .unwrap();
        assert_eq!(only_shape(&parsed).spectral_pixel_range, Some((20, 20)));
    }

    #[test]
    fn test_bad_spectral_range_is_a_validation_error() {
        let err = parse_cube("circle [[1pix, 1pix], 2pix], range=[3GHz, 4GHz]", &ParseOptions::default())
            .unwrap_err();
        assert!(matches!(err, RegionError::Validation { .. }), "{err}");
        assert!(err.to_string().contains("line 1"));

        let err = parse_cube("circle [[1pix, 1pix], 2pix], range=[1GHz, 5pix]", &ParseOptions::default())
            .unwrap_err();
        assert!(matches!(err, RegionError::Validation { .. }), "{err}");
    }

    #[test]
    fn test_globals_apply_to_following_lines() {
        let parsed = parse_cube(
            "circle [[1pix, 1pix], 2pix]\nglobal corr=[U], color=green\nbox [[0pix, 0pix], [1pix, 1pix]], corr=[I]\ncircle [[1pix, 1pix], 2pix]",
            &ParseOptions::default(),
        )
        .unwrap();
        let shapes: Vec<_> = parsed.lines.iter().filter_map(Line::shape).collect();
        assert!(shapes[0].stokes_list.is_empty());
        assert_eq!(shapes[1].stokes_list, vec![I]);
        assert_eq!(shapes[2].stokes_list, vec![U]);
        // globals are not copied into the shape's own parameters
        assert!(shapes[2].params.is_empty());
        assert!(matches!(parsed.lines[1], Line::Global(_)));
    }

    #[test]
    fn test_global_overrides() {
        let options = ParseOptions::default()
            .with_global_override_chans("3-6")
            .with_global_override_stokes("V");
        let parsed = parse_cube("circle [[1pix, 1pix], 2pix], range=[1.405GHz, 1.41GHz], corr=[Q]", &options).unwrap();
        let shape = only_shape(&parsed);
        assert_eq!(shape.spectral_pixel_range, Some((3, 6)));
        assert_eq!(shape.stokes_list, vec![V]);
        assert!(shape.params.is_empty());

        let options = ParseOptions::default().with_global_override_chans("1-2, 8-9");
        assert!(matches!(
            parse_cube("circle [[1pix, 1pix], 2pix]", &options),
            Err(RegionError::Validation { .. })
        ));
    }

    #[test]
    fn test_empty_channel_override_keeps_line_ranges() {
        for chans in ["", "  "] {
            let options = ParseOptions::default().with_global_override_chans(chans);
            let parsed = parse_cube("circle [[1pix, 1pix], 2pix], range=[3pix, 6pix]", &options).unwrap();
            let shape = only_shape(&parsed);
            assert_eq!(shape.spectral_pixel_range, Some((3, 6)), "override {chans:?}");
            assert_eq!(shape.params.get(&Keyword::Range).map(String::as_str), Some("3pix, 6pix"));
        }
    }

    #[test]
    fn test_image_doppler_applies_without_veltype() {
        let optical = || {
            sky()
                .with_spectral(0.0, 1.4e9, 1.0e6, SpectralFrame::Lsrk, Some(1.42e9))
                .with_doppler(Doppler::Optical)
                .with_stokes(vec![I, Q, U, V])
        };
        let text = "circle [[1pix, 1pix], 2pix], range=[-8000km/s, -7900km/s]";
        let parsed = parse(RegionSource::Text(text), &optical(), &CUBE_SHAPE, &ParseOptions::default()).unwrap();
        // 1.42GHz / (1 + v/c) lands on channels 58.43..58.93
        assert_eq!(only_shape(&parsed).spectral_pixel_range, Some((58, 59)));

        let explicit = parse_cube(&format!("{text}, veltype=optical"), &ParseOptions::default()).unwrap();
        assert_eq!(only_shape(&explicit).spectral_pixel_range, Some((58, 59)));

        // 1.42GHz * (1 - v/c) lands on channels 57.42..57.89
        let radio = parse_cube(text, &ParseOptions::default()).unwrap();
        assert_eq!(only_shape(&radio).spectral_pixel_range, Some((57, 58)));
    }

    #[test]
    fn test_prepend_region() {
        let options = ParseOptions::default().with_prepend_region("box [[0pix, 0pix], [1pix, 1pix]]");
        let parsed = parse_cube("#CRTFv0\ncircle [[1pix, 1pix], 2pix]", &options).unwrap();
        let kinds: Vec<_> = parsed.lines.iter().filter_map(Line::shape).map(|s| s.kind.keyword()).collect();
        assert_eq!(kinds, vec!["box", "circle"]);
        assert_eq!(parsed.version, Some(0));
    }

    #[test]
    fn test_unconvertible_shape_is_skipped() {
        let parsed = parse_sky(
            "circle [[10deg, 20deg], 1arcsec], coord=GALACTIC\ncircle [[1pix, 1pix], 2pix]\ncircle [[1pix, 1pix], 2GHz]",
        )
        .unwrap();
        assert_eq!(parsed.lines.len(), 1);
    }

    #[test]
    fn test_sexagesimal_is_normalized() {
        let parsed = parse_sky("circle [[12:00:00, 30.00.00], 10arcsec]").unwrap();
        match &only_shape(&parsed).kind {
            ShapeKind::Circle { center, .. } => {
                assert_eq!(center[0], Quantity::new(180.0, "deg"));
                assert_eq!(center[1], Quantity::new(30.0, "deg"));
            }
            other => panic!("expected a circle, got {other:?}"),
        }
    }
}
