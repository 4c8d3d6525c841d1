//! Transform maths: rotate orders and TRS matrix composition.

use nalgebra as na;

/// Euler rotation order. The first axis named is applied first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotateOrder {
    #[default]
    Xyz,
    Yzx,
    Zxy,
    Xzy,
    Yxz,
    Zyx,
}

impl RotateOrder {
    /// Numbering matches the host transform node's rotate-order channel.
    pub fn from_index(index: u8) -> Option<RotateOrder> {
        match index {
            0 => Some(RotateOrder::Xyz),
            1 => Some(RotateOrder::Yzx),
            2 => Some(RotateOrder::Zxy),
            3 => Some(RotateOrder::Xzy),
            4 => Some(RotateOrder::Yxz),
            5 => Some(RotateOrder::Zyx),
            _ => None,
        }
    }

    fn axis_order(self) -> [Axis; 3] {
        use Axis::*;
        match self {
            RotateOrder::Xyz => [X, Y, Z],
            RotateOrder::Yzx => [Y, Z, X],
            RotateOrder::Zxy => [Z, X, Y],
            RotateOrder::Xzy => [X, Z, Y],
            RotateOrder::Yxz => [Y, X, Z],
            RotateOrder::Zyx => [Z, Y, X],
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
    Z,
}

fn axis_rotation(axis: Axis, angle_radians: f64) -> na::Rotation3<f64> {
    let unit = match axis {
        Axis::X => na::Vector3::x_axis(),
        Axis::Y => na::Vector3::y_axis(),
        Axis::Z => na::Vector3::z_axis(),
    };
    na::Rotation3::from_axis_angle(&unit, angle_radians)
}

/// Rotation matrix from per-axis angles in degrees, composed in the given
/// rotate order (first named axis applied first).
pub fn rotate_matrix(
    rx_degrees: f64,
    ry_degrees: f64,
    rz_degrees: f64,
    rotate_order: RotateOrder,
) -> na::Matrix4<f64> {
    let angle = |axis: Axis| match axis {
        Axis::X => rx_degrees.to_radians(),
        Axis::Y => ry_degrees.to_radians(),
        Axis::Z => rz_degrees.to_radians(),
    };
    let [a, b, c] = rotate_order.axis_order();
    let rotation =
        axis_rotation(c, angle(c)) * axis_rotation(b, angle(b)) * axis_rotation(a, angle(a));
    rotation.to_homogeneous()
}

/// Local transform matrix from translate / rotate (degrees) / scale
/// values: scale first, then rotation, then translation.
pub fn transform_matrix(
    translate: (f64, f64, f64),
    rotate_degrees: (f64, f64, f64),
    scale: (f64, f64, f64),
    rotate_order: RotateOrder,
) -> na::Matrix4<f64> {
    let t = na::Translation3::new(translate.0, translate.1, translate.2).to_homogeneous();
    let r = rotate_matrix(
        rotate_degrees.0,
        rotate_degrees.1,
        rotate_degrees.2,
        rotate_order,
    );
    let s = na::Matrix4::new_nonuniform_scaling(&na::Vector3::new(scale.0, scale.1, scale.2));
    t * r * s
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_transform() {
        let m = transform_matrix(
            (0.0, 0.0, 0.0),
            (0.0, 0.0, 0.0),
            (1.0, 1.0, 1.0),
            RotateOrder::Xyz,
        );
        assert_relative_eq!(m, na::Matrix4::identity(), epsilon = 1e-12);
    }

    #[test]
    fn rotate_order_changes_result() {
        let a = rotate_matrix(90.0, 90.0, 0.0, RotateOrder::Xyz);
        let b = rotate_matrix(90.0, 90.0, 0.0, RotateOrder::Yxz);
        let p = na::Vector4::new(1.0, 0.0, 0.0, 1.0);
        let pa = a * p;
        let pb = b * p;
        assert!((pa - pb).norm() > 0.5);
    }

    #[test]
    fn translate_moves_point() {
        let m = transform_matrix(
            (1.0, 2.0, 3.0),
            (0.0, 0.0, 0.0),
            (1.0, 1.0, 1.0),
            RotateOrder::Xyz,
        );
        let p = m * na::Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 2.0);
        assert_relative_eq!(p.z, 3.0);
    }

    #[test]
    fn xyz_rotation_applies_x_first() {
        // Rotate 90 about X then 90 about Y: +Z axis -> -Y -> stays -Y
        // after Y rotation only if X applied first.
        let m = rotate_matrix(90.0, 90.0, 0.0, RotateOrder::Xyz);
        let p = m * na::Vector4::new(0.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, -1.0, epsilon = 1e-12);
        assert_relative_eq!(p.z, 0.0, epsilon = 1e-12);
    }
}
