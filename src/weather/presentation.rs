//! Display colors and labels for flight categories on the map.

use super::flight_category::FlightCategory;

/// Marker color for an airport that has no observation at all.
pub const NO_METAR_COLOR: &str = "#696969";

impl FlightCategory {
    pub fn color(&self) -> &'static str {
        match self {
            FlightCategory::Vfr => "#018000",
            FlightCategory::Mvfr => "#0000ff",
            FlightCategory::Ifr => "#ff0100",
            FlightCategory::Lifr => "#7f007f",
            FlightCategory::Unkn => "#3e3e3e",
        }
    }

    /// Human readable name for legends and tooltips.
    pub fn label(&self) -> &'static str {
        match self {
            FlightCategory::Vfr => "Visual Flight Rules",
            FlightCategory::Mvfr => "Marginal Visual Flight Rules",
            FlightCategory::Ifr => "Instrument Flight Rules",
            FlightCategory::Lifr => "Low Instrument Flight Rules",
            FlightCategory::Unkn => "Unknown",
        }
    }
}

/// Color for a marker whose airport may not have a METAR.
pub fn marker_color(category: Option<FlightCategory>) -> &'static str {
    category.map(|c| c.color()).unwrap_or(NO_METAR_COLOR)
}
