//! Polarization (Stokes / correlation) codes selectable with the `corr`
//! keyword. Numeric codes follow the FITS/CASA Stokes enumeration.

use std::fmt;

use crate::error::{RegionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolarizationCode {
    I, Q, U, V,
    RR, RL, LR, LL,
    XX, XY, YX, YY,
    RX, RY, LX, LY,
    XR, XL, YR, YL,
    PP, PQ, QP, QQ,
}

use PolarizationCode::*;

const ALL_CODES: [PolarizationCode; 24] = [
    I, Q, U, V, RR, RL, LR, LL, XX, XY, YX, YY, RX, RY, LX, LY, XR, XL, YR, YL, PP, PQ, QP, QQ,
];

impl PolarizationCode {
    /// CASA Stokes type number (I = 1 ... QQ = 24).
    pub fn code(&self) -> u32 {
        ALL_CODES.iter().position(|c| c == self).map_or(0, |p| p as u32 + 1)
    }

    pub fn from_code(code: u32) -> Option<Self> {
        code.checked_sub(1).and_then(|i| ALL_CODES.get(i as usize)).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            I => "I", Q => "Q", U => "U", V => "V",
            RR => "RR", RL => "RL", LR => "LR", LL => "LL",
            XX => "XX", XY => "XY", YX => "YX", YY => "YY",
            RX => "RX", RY => "RY", LX => "LX", LY => "LY",
            XR => "XR", XL => "XL", YR => "YR", YL => "YL",
            PP => "PP", PQ => "PQ", QP => "QP", QQ => "QQ",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        ALL_CODES.iter().copied().find(|c| c.name() == upper)
    }
}

impl fmt::Display for PolarizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses a comma separated list such as `I, Q` or `RR,LL`.
pub fn parse_stokes_list(text: &str) -> Result<Vec<PolarizationCode>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            PolarizationCode::from_name(s)
                .ok_or_else(|| RegionError::validation(format!("Unknown correlation type {s}")))
        })
        .collect()
}

pub fn format_stokes_list(codes: &[PolarizationCode]) -> String {
    codes.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
}
