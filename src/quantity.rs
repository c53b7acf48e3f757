//! # Quantity Parsers
//!
//! Parsers for the numeric values found in CRTF region lines: plain numbers
//! with units (`10arcsec`, `1.4GHz`, `-20km/s`, `100pix`) and the sexagesimal
//! angle notations (`12h30m00s`, `-30d15m00s`, `12:30:00`, `-30.15.00`).
//! Sexagesimal values are normalized to degrees so that rendering a parsed
//! quantity and parsing it again yields the same value.

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while},
    character::complete::{char as nom_char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize},
    error::{context, VerboseError},
    number::complete::double,
    sequence::{pair, preceded, terminated, tuple},
    Finish, IResult,
};

pub(crate) type Input<'a> = &'a str;
pub(crate) type ParserResult<'a, O> = IResult<Input<'a>, O, VerboseError<Input<'a>>>;

// --- Quantity ---

/// A value with its unit as written in the region text.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

impl Quantity {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Quantity {
            value,
            unit: unit.into(),
        }
    }

    pub fn is_pixel(&self) -> bool {
        self.unit == "pix"
    }

    /// Angular value in degrees, if the unit is angular.
    pub fn to_degrees(&self) -> Option<f64> {
        let scale = match self.unit.as_str() {
            "deg" => 1.0,
            "rad" => 1.0_f64.to_degrees(),
            "arcmin" | "'" => 1.0 / 60.0,
            "arcsec" | "\"" => 1.0 / 3600.0,
            "mas" => 1.0 / 3_600_000.0,
            _ => return None,
        };
        Some(self.value * scale)
    }

    /// Value in Hz, if the unit is a frequency.
    pub fn to_hz(&self) -> Option<f64> {
        let scale = match self.unit.as_str() {
            "Hz" => 1.0,
            "kHz" => 1.0e3,
            "MHz" => 1.0e6,
            "GHz" => 1.0e9,
            "THz" => 1.0e12,
            _ => return None,
        };
        Some(self.value * scale)
    }

    /// Value in m/s, if the unit is a velocity.
    pub fn to_meters_per_second(&self) -> Option<f64> {
        let scale = match self.unit.as_str() {
            "m/s" => 1.0,
            "km/s" => 1.0e3,
            _ => return None,
        };
        Some(self.value * scale)
    }

    /// Converts the value to the given world axis unit.
    pub fn to_unit(&self, unit: &str) -> Option<f64> {
        if self.unit == unit {
            return Some(self.value);
        }
        match unit {
            "deg" => self.to_degrees(),
            "rad" => self.to_degrees().map(f64::to_radians),
            "arcmin" => self.to_degrees().map(|d| d * 60.0),
            "arcsec" => self.to_degrees().map(|d| d * 3600.0),
            "Hz" => self.to_hz(),
            "m/s" => self.to_meters_per_second(),
            "km/s" => self.to_meters_per_second().map(|v| v / 1.0e3),
            _ => None,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

// --- Helper Parsers for Numbers ---

/// Parses an optional sign (+ or -)
fn parse_optional_sign<'a>(input: Input<'a>) -> ParserResult<'a, Option<char>> {
    opt(alt((nom_char('+'), nom_char('-'))))(input)
}

fn apply_sign(sign: Option<char>, value: f64) -> f64 {
    if sign == Some('-') {
        -value
    } else {
        value
    }
}

fn parse_unsigned_f64<'a>(input: Input<'a>) -> ParserResult<'a, f64> {
    map_res(
        recognize(pair(digit1, opt(pair(nom_char('.'), opt(digit1))))),
        |s: Input<'a>| s.parse::<f64>(),
    )(input)
}

// --- Sexagesimal Formats ---

/// Parses HHh[MMm[SSs]] or DDd[MMm[SSs]].
/// Returns the decimal value scaled by `scale`.
fn parse_sexagesimal_units_format<'a>(
    primary_unit: &'static str,
    scale: f64,
    ctx_label: &'static str,
) -> impl FnMut(Input<'a>) -> ParserResult<'a, f64> {
    move |i: Input<'a>| {
        context(
            ctx_label,
            map(
                tuple((
                    parse_optional_sign,
                    parse_unsigned_f64,
                    tag_no_case(primary_unit),
                    opt(tuple((
                        parse_unsigned_f64,
                        tag_no_case("m"),
                        opt(terminated(parse_unsigned_f64, tag_no_case("s"))),
                    ))),
                )),
                |(sign, v1, _, rest)| {
                    let mut total = v1;
                    if let Some((v2, _, seconds)) = rest {
                        total += v2 / 60.0;
                        if let Some(v3) = seconds {
                            total += v3 / 3600.0;
                        }
                    }
                    apply_sign(sign, total) * scale
                },
            ),
        )(i)
    }
}

/// Parses HH:MM[:SS.S], which is always a time angle (15 degrees per hour).
fn parse_colon_sexagesimal_format<'a>(input: Input<'a>) -> ParserResult<'a, f64> {
    context(
        "colon-separated HMS",
        map(
            tuple((
                parse_optional_sign,
                parse_unsigned_f64,
                nom_char(':'),
                parse_unsigned_f64,
                opt(preceded(nom_char(':'), parse_unsigned_f64)),
            )),
            |(sign, h, _, m, s)| apply_sign(sign, h + m / 60.0 + s.unwrap_or(0.0) / 3600.0) * 15.0,
        ),
    )(input)
}

/// Parses DD.MM.SS[.S], the dotted degrees notation.
fn parse_dotted_sexagesimal_format<'a>(input: Input<'a>) -> ParserResult<'a, f64> {
    context(
        "dot-separated DMS",
        map(
            tuple((
                parse_optional_sign,
                map_res(digit1, |s: Input<'a>| s.parse::<f64>()),
                nom_char('.'),
                map_res(digit1, |s: Input<'a>| s.parse::<f64>()),
                nom_char('.'),
                parse_unsigned_f64,
            )),
            |(sign, d, _, m, _, s)| apply_sign(sign, d + m / 60.0 + s / 3600.0),
        ),
    )(input)
}

// --- Unit Parsers ---

fn is_unit_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '/' || c == '\'' || c == '"'
}

/// Parses a number followed by an optional unit, e.g. `10arcsec` or `1.4 GHz`.
fn parse_number_with_unit<'a>(input: Input<'a>) -> ParserResult<'a, Quantity> {
    context(
        "number with unit",
        map(
            pair(double, preceded(multispace0, take_while(is_unit_char))),
            |(value, unit): (f64, &str)| Quantity::new(value, unit),
        ),
    )(input)
}

/// Parses any quantity form. Each alternative must consume the whole input,
/// so `10deg` is not taken as `10d` followed by garbage.
pub(crate) fn parse_quantity<'a>(input: Input<'a>) -> ParserResult<'a, Quantity> {
    let degrees = |v: f64| Quantity::new(v, "deg");
    alt((
        map(
            all_consuming(parse_sexagesimal_units_format("h", 15.0, "HMS format (e.g., 12h30m00s)")),
            degrees,
        ),
        map(
            all_consuming(parse_sexagesimal_units_format("d", 1.0, "DMS format (e.g., -30d15m00s)")),
            degrees,
        ),
        map(all_consuming(parse_colon_sexagesimal_format), degrees),
        map(all_consuming(parse_dotted_sexagesimal_format), degrees),
        all_consuming(parse_number_with_unit),
    ))(input)
}

/// Reads a quantity from a trimmed string. A matching pair of surrounding
/// quotes is ignored, so `10"` keeps its arcsecond unit.
pub fn read_quantity(text: &str) -> Option<Quantity> {
    let mut trimmed = text.trim();
    for quote in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            trimmed = trimmed[1..trimmed.len() - 1].trim();
        }
    }
    if trimmed.is_empty() {
        return None;
    }
    parse_quantity(trimmed).finish().ok().map(|(_, q)| q)
}
