//! 4×4 transform helpers for tile and glTF node matrices.
//!
//! All matrices are column-major, matching the layout used by both
//! `tileset.json` transforms and glTF node matrices.

use super::{Cartesian3, Matrix4};
use glam::DVec4;

pub const IDENTITY: Matrix4 = Matrix4::IDENTITY;

/// Builds a matrix from 16 column-major values.
pub fn matrix_from_column_major(values: &[f64; 16]) -> Matrix4 {
    Matrix4::from_cols_array(values)
}

/// Translation-only matrix.
pub fn translation_matrix(translation: Cartesian3) -> Matrix4 {
    Matrix4::from_translation(translation)
}

/// Rotation converting glTF's Y-up axis convention to the Z-up convention
/// of 3D Tiles: `(x, y, z) → (x, -z, y)`.
pub fn y_up_to_z_up() -> Matrix4 {
    Matrix4::from_cols(
        DVec4::new(1.0, 0.0, 0.0, 0.0),
        DVec4::new(0.0, 0.0, 1.0, 0.0),
        DVec4::new(0.0, -1.0, 0.0, 0.0),
        DVec4::new(0.0, 0.0, 0.0, 1.0),
    )
}

/// Transforms a point, assuming the last row of `m` is `[0, 0, 0, 1]`.
pub fn affine_transform(m: &Matrix4, point: Cartesian3) -> Cartesian3 {
    m.transform_point3(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Cartesian3, b: Cartesian3) -> bool {
        (a - b).length() < 1e-9
    }

    #[test]
    fn test_column_major_translation() {
        let mut values = [0.0; 16];
        values[0] = 1.0;
        values[5] = 1.0;
        values[10] = 1.0;
        values[15] = 1.0;
        values[12] = 10.0;
        values[13] = 20.0;
        values[14] = 30.0;

        let m = matrix_from_column_major(&values);
        let p = affine_transform(&m, Cartesian3::new(1.0, 2.0, 3.0));
        assert!(approx(p, Cartesian3::new(11.0, 22.0, 33.0)));
    }

    #[test]
    fn test_y_up_to_z_up() {
        let p = affine_transform(&y_up_to_z_up(), Cartesian3::new(1.0, 2.0, 3.0));
        assert!(approx(p, Cartesian3::new(1.0, -3.0, 2.0)));
    }

    #[test]
    fn test_composition_order() {
        let parent = translation_matrix(Cartesian3::new(100.0, 0.0, 0.0));
        let child = y_up_to_z_up();
        let p = affine_transform(&(parent * child), Cartesian3::new(0.0, 1.0, 0.0));
        assert!(approx(p, Cartesian3::new(100.0, 0.0, 1.0)));
    }
}
