//! Flight category classification from visibility and ceiling.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::metar::SkyCondition;

/// Visibility assumed when a report carries sky layers but no visibility group.
const ASSUMED_VISIBILITY_SM: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
    #[default]
    #[serde(alias = "UNKNOWN")]
    Unkn,
}

impl FlightCategory {
    /// Classify from a statute-mile visibility string (`"10"`, `"M0.25"`,
    /// `"P6"`) and the reported sky layers.
    pub fn classify(visibility_statute_mi: Option<&str>, sky: &[SkyCondition]) -> Self {
        if visibility_statute_mi.is_none() && sky.is_empty() {
            return FlightCategory::Unkn;
        }

        let visibility = visibility_statute_mi
            .and_then(parse_statute_miles)
            .unwrap_or(ASSUMED_VISIBILITY_SM);
        let ceiling = ceiling_ft(sky).map(f64::from).unwrap_or(f64::INFINITY);

        Self::from_values(visibility, ceiling)
    }

    pub fn from_values(visibility_sm: f64, ceiling_ft: f64) -> Self {
        if visibility_sm >= 5.0 && ceiling_ft >= 3000.0 {
            FlightCategory::Vfr
        } else if visibility_sm >= 3.0 && ceiling_ft >= 1000.0 {
            FlightCategory::Mvfr
        } else if visibility_sm >= 1.0 && ceiling_ft >= 500.0 {
            FlightCategory::Ifr
        } else {
            FlightCategory::Lifr
        }
    }

    /// Position in the VFR..LIFR scale with UNKN last.
    pub fn rank(&self) -> u8 {
        match self {
            FlightCategory::Vfr => 0,
            FlightCategory::Mvfr => 1,
            FlightCategory::Ifr => 2,
            FlightCategory::Lifr => 3,
            FlightCategory::Unkn => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlightCategory::Vfr => "VFR",
            FlightCategory::Mvfr => "MVFR",
            FlightCategory::Ifr => "IFR",
            FlightCategory::Lifr => "LIFR",
            FlightCategory::Unkn => "UNKN",
        }
    }
}

impl fmt::Display for FlightCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlightCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VFR" => Ok(Self::Vfr),
            "MVFR" => Ok(Self::Mvfr),
            "IFR" => Ok(Self::Ifr),
            "LIFR" => Ok(Self::Lifr),
            "UNKN" | "UNKNOWN" => Ok(Self::Unkn),
            _ => Err(format!("Unknown flight category: {}", s)),
        }
    }
}

/// Strip the `M` (less than) / `P` (more than) qualifier and parse.
pub fn parse_statute_miles(value: &str) -> Option<f64> {
    let value = value
        .strip_prefix('M')
        .or_else(|| value.strip_prefix('P'))
        .unwrap_or(value);
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Lowest broken, overcast or vertical-visibility layer. A vertical
/// visibility group without a height counts as a ground-level ceiling;
/// broken/overcast layers with an unreported base are skipped.
pub fn ceiling_ft(sky: &[SkyCondition]) -> Option<i32> {
    sky.iter()
        .filter_map(|layer| match layer.sky_cover.as_str() {
            "VV" => Some(layer.cloud_base_ft_agl.unwrap_or(0)),
            "BKN" | "OVC" => layer.cloud_base_ft_agl,
            _ => None,
        })
        .min()
}
