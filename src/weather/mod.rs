//! METAR decoding, flight categories and the latest-observation cache.

pub mod flight_category;
pub mod metar;
pub mod presentation;
pub mod service;
pub mod source;

pub use flight_category::FlightCategory;
pub use metar::{parse_many, Metar, MetarParseError, Remarks, RunwayVisualRange, SkyCondition};
pub use presentation::{marker_color, NO_METAR_COLOR};
pub use service::{normalize_icaos, MetarService};
pub use source::{AviationWeatherClient, MetarSource, SourceError};
