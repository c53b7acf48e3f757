//! Channel selection strings such as `0~3, 7, >60` (or with `-` ranges),
//! resolved against the number of channels of an image and merged into
//! sorted, non-overlapping inclusive ranges.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char as nom_char, digit1, multispace0},
    combinator::{all_consuming, map, map_res},
    sequence::{delimited, preceded, separated_pair},
    Finish,
};
use tracing::debug;

use crate::error::{RegionError, Result};
use crate::quantity::{Input, ParserResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelToken {
    Single(u32),
    Range(u32, u32),
    Below { bound: u32, inclusive: bool },
    Above { bound: u32, inclusive: bool },
}

fn channel_number<'a>(input: Input<'a>) -> ParserResult<'a, u32> {
    delimited(multispace0, map_res(digit1, |s: Input<'a>| s.parse::<u32>()), multispace0)(input)
}

fn channel_token<'a>(input: Input<'a>) -> ParserResult<'a, ChannelToken> {
    all_consuming(alt((
        map(preceded(tag("<="), channel_number), |bound| ChannelToken::Below { bound, inclusive: true }),
        map(preceded(nom_char('<'), channel_number), |bound| ChannelToken::Below { bound, inclusive: false }),
        map(preceded(tag(">="), channel_number), |bound| ChannelToken::Above { bound, inclusive: true }),
        map(preceded(nom_char('>'), channel_number), |bound| ChannelToken::Above { bound, inclusive: false }),
        map(
            separated_pair(channel_number, alt((nom_char('-'), nom_char('~'))), channel_number),
            |(a, b)| ChannelToken::Range(a, b),
        ),
        map(channel_number, ChannelToken::Single),
    )))(input)
}

/// Resolves one token to an inclusive `(min, max)` pair. Bounds are signed so
/// that `<0` and `>n` on an empty axis are detected instead of wrapping.
fn resolve(token: ChannelToken, text: &str, total_channels: u32) -> Result<(i64, i64)> {
    let last = i64::from(total_channels) - 1;
    let (min, max) = match token {
        ChannelToken::Single(n) => (i64::from(n), i64::from(n)),
        ChannelToken::Range(a, b) => (i64::from(a), i64::from(b)),
        ChannelToken::Below { bound, inclusive } => {
            let max = if inclusive { i64::from(bound) } else { i64::from(bound) - 1 };
            if max < 0 {
                return Err(RegionError::validation(format!(
                    "max channel cannot be less than zero in channel specification {text}"
                )));
            }
            (0, max)
        }
        ChannelToken::Above { bound, inclusive } => {
            let min = if inclusive { i64::from(bound) } else { i64::from(bound) + 1 };
            if min > last {
                return Err(RegionError::validation(format!(
                    "min channel {min} in channel specification {text} is past the last channel {last}"
                )));
            }
            (min, last)
        }
    };
    if min > max {
        return Err(RegionError::validation(format!(
            "min channel cannot be greater than max channel in channel specification {text}"
        )));
    }
    if max > i64::from(total_channels) {
        return Err(RegionError::validation(format!(
            "channel specification {text} exceeds the {total_channels} available channels"
        )));
    }
    Ok((min, max))
}

/// Parses a comma separated channel specification and merges the result.
///
/// Each token is `n`, `a-b` (or `a~b`), `<n`, `<=n`, `>n` or `>=n`. An empty
/// specification selects nothing and yields an empty list.
pub fn parse_and_consolidate(spec: &str, total_channels: u32) -> Result<Vec<(u32, u32)>> {
    if spec.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut ranges = Vec::new();
    for text in spec.split(',').map(str::trim) {
        let (_, token) = channel_token(text).finish().map_err(|_| {
            RegionError::validation(format!("cannot parse channel specification {text:?}"))
        })?;
        let (min, max) = resolve(token, text, total_channels)?;
        // both bounds lie in [0, total_channels] here
        ranges.push((min as u32, max as u32));
    }
    let merged = consolidate_ranges(ranges);
    debug!(spec, ranges = ?merged, "consolidated channel ranges");
    Ok(merged)
}

/// Sorts by min (ties: larger max first) and sweeps once. A range that
/// starts strictly inside the previous one and ends past it extends it; a
/// range lying within the previous one is dropped. Anything else, including
/// a range starting exactly at the previous max, opens a new range.
pub fn consolidate_ranges(mut ranges: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
    ranges.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
    for (min, max) in ranges {
        match merged.last_mut() {
            Some(last) if min < last.1 && max > last.1 => last.1 = max,
            Some(last) if max <= last.1 => {}
            _ => merged.push((min, max)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", vec![])]
    #[case("3", vec![(3, 3)])]
    #[case("2-5", vec![(2, 5)])]
    #[case("2~5", vec![(2, 5)])]
    #[case("<5", vec![(0, 4)])]
    #[case("<=5", vec![(0, 5)])]
    #[case(">45", vec![(46, 49)])]
    #[case(">=45", vec![(45, 49)])]
    #[case("5-10, 8-12, 15-20", vec![(5, 12), (15, 20)])]
    #[case("0-4, 5-9", vec![(0, 4), (5, 9)])]
    #[case("15-20, 1, 3 - 4", vec![(1, 1), (3, 4), (15, 20)])]
    #[case("2-8, 3-5", vec![(2, 8)])]
    fn test_valid_specifications(#[case] spec: &str, #[case] expected: Vec<(u32, u32)>) {
        assert_eq!(parse_and_consolidate(spec, 50).unwrap(), expected);
    }

    #[rstest]
    #[case("<0")]
    #[case(">100")]
    #[case(">=50")]
    #[case("3-1")]
    #[case("10-60")]
    #[case("51")]
    #[case("a-b")]
    #[case("-3")]
    #[case("1,,2")]
    #[case("99999999999")]
    fn test_invalid_specifications(#[case] spec: &str) {
        let err = parse_and_consolidate(spec, 50).unwrap_err();
        assert!(matches!(err, RegionError::Validation { .. }), "{spec}: {err}");
    }

    #[test]
    fn test_max_equal_to_total_is_accepted() {
        assert_eq!(parse_and_consolidate("45-50", 50).unwrap(), vec![(45, 50)]);
    }

    #[test]
    fn test_touching_ranges_do_not_merge() {
        assert_eq!(consolidate_ranges(vec![(4, 9), (0, 4)]), vec![(0, 4), (4, 9)]);
        assert_eq!(parse_and_consolidate("0-4, 4-9", 20).unwrap(), vec![(0, 4), (4, 9)]);
        // a single channel at the previous max adds nothing
        assert_eq!(consolidate_ranges(vec![(0, 4), (4, 4)]), vec![(0, 4)]);
    }

    #[test]
    fn test_output_is_sorted_and_disjoint() {
        let merged = consolidate_ranges(vec![(30, 35), (1, 2), (10, 20), (12, 25), (0, 40)]);
        assert_eq!(merged, vec![(0, 40)]);
        let merged = consolidate_ranges(vec![(30, 35), (1, 2), (10, 20), (12, 25)]);
        for pair in merged.windows(2) {
            assert!(pair[0].1 < pair[1].0);
        }
    }

    #[test]
    fn test_empty_axis() {
        assert!(parse_and_consolidate(">0", 0).is_err());
        assert!(parse_and_consolidate(">=0", 0).is_err());
    }
}
