//! Ellipsoid surface projection and ECEF ↔ geographic conversion.

use super::{Cartesian3, Cartographic, EPSILON12};
use crate::error::{IndexerError, Result};

/// Squared distance from the ellipsoid center below which the surface
/// projection is considered degenerate (0.1 m²).
pub const CENTER_TOLERANCE_SQUARED: f64 = 0.1;

/// Upper bound on Newton iterations; the projection converges in a handful.
const MAX_ITERATIONS: usize = 64;

/// Reference ellipsoid described by its three radii.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub radii: Cartesian3,
    pub one_over_radii: Cartesian3,
    pub one_over_radii_squared: Cartesian3,
    pub center_tolerance_squared: f64,
}

impl Ellipsoid {
    pub const fn new(radii: Cartesian3) -> Self {
        Self {
            radii,
            one_over_radii: Cartesian3::new(1.0 / radii.x, 1.0 / radii.y, 1.0 / radii.z),
            one_over_radii_squared: Cartesian3::new(
                1.0 / (radii.x * radii.x),
                1.0 / (radii.y * radii.y),
                1.0 / (radii.z * radii.z),
            ),
            center_tolerance_squared: CENTER_TOLERANCE_SQUARED,
        }
    }

    /// Projects `cartesian` onto the surface along the geodetic normal.
    pub fn scale_to_geodetic_surface(&self, cartesian: Cartesian3) -> Result<Cartesian3> {
        scale_to_geodetic_surface(
            cartesian,
            self.one_over_radii,
            self.one_over_radii_squared,
            self.center_tolerance_squared,
        )
    }

    /// Unit normal of the surface at a point already on it.
    pub fn geodetic_surface_normal(&self, surface: Cartesian3) -> Cartesian3 {
        (surface * self.one_over_radii_squared).normalize()
    }
}

/// WGS84 reference ellipsoid.
pub const WGS84: Ellipsoid = Ellipsoid::new(Cartesian3::new(
    6_378_137.0,
    6_378_137.0,
    6_356_752.314_245_179_3,
));

/// Projects an ECEF point onto the ellipsoid surface.
///
/// Runs a Newton iteration on the Lagrange multiplier λ until the surface
/// equation residual drops to 1e-12.
///
/// # Errors
///
/// Returns `IndexerError::Geometry` when a component is not finite, when the
/// point lies within the center tolerance and the initial scale ratio is not
/// finite, or when the iteration fails to converge.
pub fn scale_to_geodetic_surface(
    cartesian: Cartesian3,
    one_over_radii: Cartesian3,
    one_over_radii_squared: Cartesian3,
    center_tolerance_squared: f64,
) -> Result<Cartesian3> {
    if !cartesian.is_finite() {
        return Err(IndexerError::Geometry(format!(
            "cannot project non-finite point {:?}",
            cartesian
        )));
    }

    let x2 = cartesian.x * cartesian.x * one_over_radii.x * one_over_radii.x;
    let y2 = cartesian.y * cartesian.y * one_over_radii.y * one_over_radii.y;
    let z2 = cartesian.z * cartesian.z * one_over_radii.z * one_over_radii.z;

    let squared_norm = x2 + y2 + z2;
    let ratio = (1.0 / squared_norm).sqrt();

    // Initial approximation: scale along the ray through the center
    let intersection = cartesian * ratio;

    if squared_norm < center_tolerance_squared {
        return if ratio.is_finite() {
            Ok(intersection)
        } else {
            Err(IndexerError::Geometry(format!(
                "point {:?} is at the ellipsoid center",
                cartesian
            )))
        };
    }

    let gradient = intersection * one_over_radii_squared * 2.0;

    let mut lambda = (1.0 - ratio) * cartesian.length() / (0.5 * gradient.length());
    let mut correction = 0.0;

    for _ in 0..MAX_ITERATIONS {
        lambda -= correction;

        let x_multiplier = 1.0 / (1.0 + lambda * one_over_radii_squared.x);
        let y_multiplier = 1.0 / (1.0 + lambda * one_over_radii_squared.y);
        let z_multiplier = 1.0 / (1.0 + lambda * one_over_radii_squared.z);

        let x_multiplier2 = x_multiplier * x_multiplier;
        let y_multiplier2 = y_multiplier * y_multiplier;
        let z_multiplier2 = z_multiplier * z_multiplier;

        let func = x2 * x_multiplier2 + y2 * y_multiplier2 + z2 * z_multiplier2 - 1.0;

        if func.abs() <= EPSILON12 {
            return Ok(Cartesian3::new(
                cartesian.x * x_multiplier,
                cartesian.y * y_multiplier,
                cartesian.z * z_multiplier,
            ));
        }

        let denominator = x2 * x_multiplier2 * x_multiplier * one_over_radii_squared.x
            + y2 * y_multiplier2 * y_multiplier * one_over_radii_squared.y
            + z2 * z_multiplier2 * z_multiplier * one_over_radii_squared.z;

        let derivative = -2.0 * denominator;
        correction = func / derivative;

        if !correction.is_finite() {
            break;
        }
    }

    Err(IndexerError::Geometry(format!(
        "surface projection of {:?} did not converge",
        cartesian
    )))
}

/// Converts an ECEF point to longitude/latitude/height on WGS84.
pub fn cartographic_from_cartesian3(cartesian: Cartesian3) -> Result<Cartographic> {
    let surface = WGS84.scale_to_geodetic_surface(cartesian)?;

    let n = WGS84.geodetic_surface_normal(surface);
    let h = cartesian - surface;

    let longitude = n.y.atan2(n.x);
    let latitude = n.z.asin();
    let height = h.dot(cartesian).signum() * h.length();

    Ok(Cartographic {
        longitude,
        latitude,
        height,
    })
}

/// Converts a WGS84 geographic position to an ECEF point.
pub fn cartesian3_from_cartographic(position: &Cartographic) -> Cartesian3 {
    let cos_latitude = position.latitude.cos();
    let n = Cartesian3::new(
        cos_latitude * position.longitude.cos(),
        cos_latitude * position.longitude.sin(),
        position.latitude.sin(),
    )
    .normalize();

    let radii_squared = WGS84.radii * WGS84.radii;
    let k = radii_squared * n;
    let gamma = n.dot(k).sqrt();

    k / gamma + n * position.height
}
