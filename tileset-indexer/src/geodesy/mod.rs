//! Geodetic math module
//!
//! Provides conversions between Earth-Centered-Earth-Fixed (ECEF) cartesian
//! coordinates and geographic coordinates on the WGS84 ellipsoid, geodetic
//! bounding rectangles, and the 4×4 matrix helpers used to place glTF
//! vertices in the world.

mod ellipsoid;
mod matrix;
mod rectangle;

pub use ellipsoid::{
    cartesian3_from_cartographic, cartographic_from_cartesian3, scale_to_geodetic_surface,
    Ellipsoid, CENTER_TOLERANCE_SQUARED, WGS84,
};
pub use matrix::{
    affine_transform, matrix_from_column_major, translation_matrix, y_up_to_z_up, IDENTITY,
};
pub use rectangle::{rectangle_from_cartographic_array, Rectangle, RectangleAccumulator};

use std::f64::consts::{PI, TAU};

/// ECEF coordinate in meters.
pub type Cartesian3 = glam::DVec3;

/// 4×4 column-major transform.
pub type Matrix4 = glam::DMat4;

/// 1e-12, the convergence threshold of the surface projection.
pub const EPSILON12: f64 = 1e-12;

/// 1e-14, tolerance used when normalizing angles.
pub const EPSILON14: f64 = 1e-14;

/// Geographic position on the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cartographic {
    /// Longitude in radians
    pub longitude: f64,
    /// Latitude in radians
    pub latitude: f64,
    /// Height above the ellipsoid in meters
    pub height: f64,
}

impl Cartographic {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    /// Builds a cartographic from degrees (height stays in meters).
    pub fn from_degrees(longitude: f64, latitude: f64, height: f64) -> Self {
        Self::new(longitude.to_radians(), latitude.to_radians(), height)
    }

    pub fn longitude_degrees(&self) -> f64 {
        self.longitude.to_degrees()
    }

    pub fn latitude_degrees(&self) -> f64 {
        self.latitude.to_degrees()
    }
}

/// Maps an angle onto `[0, 2π]`.
///
/// Angles that are a non-zero multiple of 2π map to 2π rather than 0.
pub fn zero_to_two_pi(angle: f64) -> f64 {
    if (0.0..=TAU).contains(&angle) {
        return angle;
    }
    let modulo = angle.rem_euclid(TAU);
    if modulo.abs() < EPSILON14 && angle.abs() > EPSILON14 {
        return TAU;
    }
    modulo
}

/// Maps an angle onto `[-π, π]`.
pub fn negative_pi_to_pi(angle: f64) -> f64 {
    if (-PI..=PI).contains(&angle) {
        return angle;
    }
    zero_to_two_pi(angle + PI) - PI
}
