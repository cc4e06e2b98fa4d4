//! Conversions between glam affine transforms and GPU layouts

use glam::{Affine3A, Mat4};

/// Column-major 4x3 affine matrix (four columns of three floats), 48 bytes.
pub type GpuTransform = [[f32; 3]; 4];

/// Row-major 3x4 matrix as consumed by top-level acceleration structure instances.
pub type InstanceTransform = [[f32; 4]; 3];

/// Pack an affine transform into the GPU column-major layout.
#[inline]
pub fn to_gpu(transform: &Affine3A) -> GpuTransform {
    transform.to_cols_array_2d()
}

/// Unpack a GPU column-major transform.
#[inline]
pub fn from_gpu(transform: &GpuTransform) -> Affine3A {
    Affine3A::from_cols_array_2d(transform)
}

/// Convert to the row-major 3x4 instance layout (translation in the last column).
pub fn to_instance(transform: &Affine3A) -> InstanceTransform {
    let m = Mat4::from(*transform);
    [
        m.row(0).to_array(),
        m.row(1).to_array(),
        m.row(2).to_array(),
    ]
}

/// Build an affine transform from a column-major 4x4 matrix, dropping the projective row.
pub fn from_cols_4x4(cols: &[[f32; 4]; 4]) -> Affine3A {
    Affine3A::from_mat4(Mat4::from_cols_array_2d(cols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn test_gpu_layout_is_column_major() {
        let t = Affine3A::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let gpu = to_gpu(&t);
        assert_eq!(gpu[0], [1.0, 0.0, 0.0]);
        assert_eq!(gpu[3], [1.0, 2.0, 3.0]);
        assert_eq!(from_gpu(&gpu), t);
    }

    #[test]
    fn test_instance_layout_is_row_major() {
        let t = Affine3A::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::IDENTITY,
            Vec3::new(4.0, 5.0, 6.0),
        );
        let rows = to_instance(&t);
        assert_eq!(rows[0], [2.0, 0.0, 0.0, 4.0]);
        assert_eq!(rows[1], [0.0, 2.0, 0.0, 5.0]);
        assert_eq!(rows[2], [0.0, 0.0, 2.0, 6.0]);
    }

    #[test]
    fn test_from_cols_4x4() {
        let cols = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [7.0, 8.0, 9.0, 1.0],
        ];
        let t = from_cols_4x4(&cols);
        assert_eq!(Vec3::from(t.translation), Vec3::new(7.0, 8.0, 9.0));
    }
}
