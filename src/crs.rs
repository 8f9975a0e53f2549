//! The coordinate reference system translation capability.
//!
//! The engine itself performs only affine grid math; anything involving a
//! datum or a projection is delegated to a [CrsTranslator] supplied by the
//! embedder when a [Dataset](crate::Dataset) is constructed. No process-wide
//! state is consulted.

use crate::Result;
use std::fmt::Debug;

/// Translates between projected and geographic coordinates.
pub trait CrsTranslator: Debug {
    /// Converts projected coordinates to geographic `(longitude, latitude)`.
    fn projected_to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64)>;

    /// Converts geographic `(longitude, latitude)` to projected coordinates.
    fn geographic_to_projected(&self, longitude: f64, latitude: f64) -> Result<(f64, f64)>;

    /// Returns true when the named horizontal CRS is geographic.
    ///
    /// Surface corrections weight northing distances by the spacing ratio
    /// only for geographic reference systems.
    fn is_geographic(&self, horizontal_crs: &str) -> bool {
        let upper = horizontal_crs.to_ascii_uppercase();
        upper.contains("GEOGCS") || upper.contains("GEOGRAPHIC")
    }
}

/// A translator for data whose projected and geographic frames coincide.
///
/// This is the default capability; files carrying a projected CRS that is
/// never converted to geographic coordinates lose nothing by it.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTranslator;

impl CrsTranslator for IdentityTranslator {
    fn projected_to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok((x, y))
    }

    fn geographic_to_projected(&self, longitude: f64, latitude: f64) -> Result<(f64, f64)> {
        Ok((longitude, latitude))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trip() {
        let translator = IdentityTranslator;
        assert_eq!((1., 2.), translator.projected_to_geographic(1., 2.).unwrap());
        assert_eq!((1., 2.), translator.geographic_to_projected(1., 2.).unwrap());
    }

    #[test]
    fn geographic_detection() {
        let translator = IdentityTranslator;
        assert!(translator.is_geographic("GEOGCS[\"WGS 84\"]"));
        assert!(!translator.is_geographic("PROJCS[\"UTM zone 19N\"]"));
    }
}
