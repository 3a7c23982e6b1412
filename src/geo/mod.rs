//! Geographic coordinates and map bounding boxes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundsError {
    #[error("bounds must have 4 comma separated values (ne_lat,ne_lon,sw_lat,sw_lon), got {0}")]
    Arity(usize),
    #[error("bounds value '{0}' is not a number")]
    NotANumber(String),
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("south latitude {south} is north of north latitude {north}")]
    Inverted { south: f64, north: f64 },
}

/// A map viewport. When `south_west.lon > north_east.lon` the box crosses the
/// antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north_east: Coordinate,
    pub south_west: Coordinate,
}

impl Bounds {
    pub fn new(north_east: Coordinate, south_west: Coordinate) -> Result<Self, BoundsError> {
        for c in [north_east, south_west] {
            if !(-90.0..=90.0).contains(&c.lat) {
                return Err(BoundsError::Latitude(c.lat));
            }
            if !(-180.0..=180.0).contains(&c.lon) {
                return Err(BoundsError::Longitude(c.lon));
            }
        }
        if south_west.lat > north_east.lat {
            return Err(BoundsError::Inverted {
                south: south_west.lat,
                north: north_east.lat,
            });
        }
        Ok(Self {
            north_east,
            south_west,
        })
    }

    /// Parse the `ne_lat,ne_lon,sw_lat,sw_lon` query form.
    pub fn parse(s: &str) -> Result<Self, BoundsError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BoundsError::Arity(parts.len()));
        }

        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| BoundsError::NotANumber(part.to_string()))?;
        }

        Self::new(
            Coordinate::new(values[0], values[1]),
            Coordinate::new(values[2], values[3]),
        )
    }

    /// Bounds from the raw corners of a map view. Map longitudes keep growing
    /// past ±180 when the view is panned across the antimeridian or zoomed
    /// out, so they are wrapped back into range. A view spanning the whole
    /// globe becomes [-180, 180]. Latitudes are clamped to the poles.
    pub fn from_map_view(
        north_east: Coordinate,
        south_west: Coordinate,
    ) -> Result<Self, BoundsError> {
        for value in [north_east.lat, north_east.lon, south_west.lat, south_west.lon] {
            if !value.is_finite() {
                return Err(BoundsError::NotANumber(value.to_string()));
            }
        }

        let (east, west) = if north_east.lon - south_west.lon >= 360.0 {
            (180.0, -180.0)
        } else {
            (wrap_longitude(north_east.lon), wrap_longitude(south_west.lon))
        };

        Self::new(
            Coordinate::new(north_east.lat.clamp(-90.0, 90.0), east),
            Coordinate::new(south_west.lat.clamp(-90.0, 90.0), west),
        )
    }

    pub fn wraps_antimeridian(&self) -> bool {
        self.south_west.lon > self.north_east.lon
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        if point.lat < self.south_west.lat || point.lat > self.north_east.lat {
            return false;
        }
        if self.wraps_antimeridian() {
            point.lon >= self.south_west.lon || point.lon <= self.north_east.lon
        } else {
            point.lon >= self.south_west.lon && point.lon <= self.north_east.lon
        }
    }

    /// Render the query string form accepted by [`Bounds::parse`].
    pub fn to_query(&self) -> String {
        format!(
            "{},{},{},{}",
            self.north_east.lat, self.north_east.lon, self.south_west.lat, self.south_west.lon
        )
    }
}

/// Map any longitude onto [-180, 180], keeping +180 as the eastern edge.
fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

impl std::str::FromStr for Bounds {
    type Err = BoundsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_bounds() {
        let bounds = Bounds::parse("39.5,-76.5,38.5,-78.0").unwrap();
        assert_eq!(bounds.north_east, Coordinate::new(39.5, -76.5));
        assert_eq!(bounds.south_west, Coordinate::new(38.5, -78.0));
        assert!(!bounds.wraps_antimeridian());
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let bounds = Bounds::parse(" 10, 20 ,0 , 5").unwrap();
        assert_eq!(bounds.south_west, Coordinate::new(0.0, 5.0));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Bounds::parse("1,2,3"), Err(BoundsError::Arity(3)));
        assert_eq!(
            Bounds::parse("1,2,x,4"),
            Err(BoundsError::NotANumber("x".to_string()))
        );
        assert_eq!(Bounds::parse("91,0,0,0"), Err(BoundsError::Latitude(91.0)));
        assert_eq!(Bounds::parse("10,181,0,0"), Err(BoundsError::Longitude(181.0)));
        assert!(matches!(
            Bounds::parse("10,10,20,0"),
            Err(BoundsError::Inverted { .. })
        ));
        assert!(Bounds::parse("NaN,0,0,0").is_err());
    }

    #[test]
    fn test_contains() {
        let bounds = Bounds::parse("40,-70,30,-80").unwrap();
        assert!(bounds.contains(Coordinate::new(38.9445, -77.4558)));
        assert!(bounds.contains(Coordinate::new(40.0, -70.0)));
        assert!(!bounds.contains(Coordinate::new(41.0, -75.0)));
        assert!(!bounds.contains(Coordinate::new(35.0, -69.0)));
    }

    #[test]
    fn test_contains_across_antimeridian() {
        let bounds = Bounds::parse("60,-170,50,170").unwrap();
        assert!(bounds.wraps_antimeridian());
        assert!(bounds.contains(Coordinate::new(55.0, 175.0)));
        assert!(bounds.contains(Coordinate::new(55.0, -175.0)));
        assert!(!bounds.contains(Coordinate::new(55.0, 0.0)));
    }

    #[test]
    fn test_map_view_wraps_longitudes() {
        // Panned east across the antimeridian
        let bounds = Bounds::from_map_view(
            Coordinate::new(60.0, 190.0),
            Coordinate::new(50.0, 170.0),
        )
        .unwrap();
        assert_eq!(bounds.north_east, Coordinate::new(60.0, -170.0));
        assert_eq!(bounds.south_west, Coordinate::new(50.0, 170.0));
        assert!(bounds.wraps_antimeridian());
        assert!(bounds.contains(Coordinate::new(55.0, 175.0)));

        // A whole world copy to the west
        let bounds = Bounds::from_map_view(
            Coordinate::new(40.0, -430.0),
            Coordinate::new(30.0, -440.0),
        )
        .unwrap();
        assert_eq!(bounds.north_east.lon, -70.0);
        assert_eq!(bounds.south_west.lon, -80.0);

        let edge =
            Bounds::from_map_view(Coordinate::new(10.0, 180.0), Coordinate::new(0.0, -180.0))
                .unwrap();
        assert_eq!(edge.north_east.lon, 180.0);
        assert_eq!(edge.south_west.lon, -180.0);
    }

    #[test]
    fn test_map_view_zoomed_out() {
        let bounds = Bounds::from_map_view(
            Coordinate::new(95.0, 400.0),
            Coordinate::new(-95.0, -300.0),
        )
        .unwrap();
        assert_eq!(bounds.north_east, Coordinate::new(90.0, 180.0));
        assert_eq!(bounds.south_west, Coordinate::new(-90.0, -180.0));
        // Still a valid query for the server
        assert_eq!(Bounds::parse(&bounds.to_query()).unwrap(), bounds);

        assert!(Bounds::from_map_view(
            Coordinate::new(f64::NAN, 0.0),
            Coordinate::new(0.0, 0.0)
        )
        .is_err());
    }

    #[test]
    fn test_query_form_parses_back() {
        let bounds = Bounds::parse("39.5,-76.5,38.5,-78").unwrap();
        assert_eq!(bounds.to_query().parse::<Bounds>().unwrap(), bounds);
    }
}
