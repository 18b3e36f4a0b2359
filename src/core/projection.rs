use geo::Point;

use crate::error::AppError;

// Spherical mercator constants (EPSG:3857).
const EARTH_RADIUS_M: f64 = 6_378_137.0;
const MAX_LATITUDE: f64 = 90.0;
const MAX_LONGITUDE: f64 = 180.0;

/// Convert GPS coordinates (EPSG:4326, lon/lat degrees) into the web-map
/// projection (EPSG:3857, meters), e.g.
/// (7.1397, 50.6966) => (794787.768416722, 6567800.23790998).
///
/// Pure math, no state; the only failure mode is out-of-range degrees
/// (mercator is undefined at the poles).
pub fn to_web_mercator(point: Point<f64>) -> Result<Point<f64>, AppError> {
    let (lon, lat) = (point.x(), point.y());
    if !lon.is_finite() || !lat.is_finite() || lon.abs() > MAX_LONGITUDE || lat.abs() >= MAX_LATITUDE
    {
        return Err(AppError::validation(format!(
            "coordinates ({lon}, {lat}) are outside valid longitude/latitude range"
        )));
    }

    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    Ok(Point::new(x, y))
}

/// Inverse of [`to_web_mercator`], back to lon/lat degrees.
pub fn to_geodetic(point: Point<f64>) -> Point<f64> {
    let lon = (point.x() / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (point.y() / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    Point::new(lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_reference_conversion() {
        let projected =
            to_web_mercator(Point::new(7.1396999999998805, 50.69659999999914)).unwrap();
        assert!((projected.x() - 794_787.768416722).abs() < 1e-4, "{}", projected.x());
        assert!((projected.y() - 6_567_800.23790998).abs() < 1e-4, "{}", projected.y());
    }

    #[test]
    fn round_trips_within_tolerance() {
        for (lon, lat) in [
            (7.1397, 50.6966),
            (-32.44150999999994, -3.849019999999944),
            (0.0, 0.0),
            (179.9, 84.9),
        ] {
            let projected = to_web_mercator(Point::new(lon, lat)).unwrap();
            let back = to_geodetic(projected);
            assert!((back.x() - lon).abs() < 1e-6, "lon {lon}");
            assert!((back.y() - lat).abs() < 1e-6, "lat {lat}");
        }
    }

    #[test]
    fn out_of_range_degrees_are_rejected() {
        for (lon, lat) in [(181.0, 0.0), (0.0, 90.0), (0.0, -95.0), (f64::NAN, 0.0)] {
            assert!(
                matches!(
                    to_web_mercator(Point::new(lon, lat)),
                    Err(AppError::Validation(_))
                ),
                "({lon}, {lat})"
            );
        }
    }
}
