//! Coordinate resolution for reports without direct latitude/longitude.
//!
//! Grid-reference systems and gazetteers live outside this crate; they plug
//! in through [`CoordinateResolver`]. The engine calls the resolver at most
//! once per ingest attempt.

use crate::sitmap_geo::Coordinate;

/// Turns a textual location token into a position.
pub trait CoordinateResolver: Send + Sync {
    /// Returns `None` when the token does not describe a usable position.
    fn resolve(&self, token: &str) -> Option<Coordinate>;
}

/// Resolver that never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

impl CoordinateResolver for NoopResolver {
    fn resolve(&self, _token: &str) -> Option<Coordinate> {
        None
    }
}

/// Extracts a decimal-degree pair embedded in free text.
///
/// The first decimal token within latitude range becomes the latitude, the
/// next decimal token within longitude range becomes the longitude:
/// `"2 trucks at 60.1699, 24.9384 heading north"` resolves to
/// `(60.1699, 24.9384)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecimalDegreesResolver;

impl DecimalDegreesResolver {
    fn parse_decimal(token: &str) -> Option<f64> {
        if token.matches('.').count() != 1 || !token.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }
        token.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

impl CoordinateResolver for DecimalDegreesResolver {
    fn resolve(&self, token: &str) -> Option<Coordinate> {
        let mut lat = None;
        let mut lon = None;

        for part in token.split(|c: char| c.is_whitespace() || c == ',' || c == ';') {
            let Some(value) = Self::parse_decimal(part) else {
                continue;
            };
            if lat.is_none() && (-90.0..=90.0).contains(&value) {
                lat = Some(value);
            } else if lon.is_none() && (-180.0..=180.0).contains(&value) {
                lon = Some(value);
            }
            if lat.is_some() && lon.is_some() {
                break;
            }
        }

        Coordinate::new(lat?, lon?).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_pair_in_text() {
        let resolved = DecimalDegreesResolver
            .resolve("2 trucks at 60.1699, 24.9384 heading north")
            .unwrap();
        assert_eq!(resolved.lat, 60.1699);
        assert_eq!(resolved.lon, 24.9384);
    }

    #[test]
    fn test_longitude_outside_latitude_range() {
        let resolved = DecimalDegreesResolver.resolve("pos -33.86 151.21").unwrap();
        assert_eq!(resolved.lat, -33.86);
        assert_eq!(resolved.lon, 151.21);
    }

    #[test]
    fn test_integers_and_single_values_do_not_resolve() {
        assert!(DecimalDegreesResolver.resolve("3 tanks near the bridge").is_none());
        assert!(DecimalDegreesResolver.resolve("bearing 45.5").is_none());
        assert!(DecimalDegreesResolver.resolve("").is_none());
    }

    #[test]
    fn test_noop_resolver() {
        assert!(NoopResolver.resolve("60.1 24.9").is_none());
    }
}
