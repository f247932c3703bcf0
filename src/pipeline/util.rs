use nalgebra::{Vector2, Vector3, Vector4};

use crate::config::W_EPSILON;

/// Perspective divide of a homogeneous point. Points with a (near) zero w
/// are returned undivided.
pub fn divide_w(v: Vector4<f32>) -> Vector4<f32> {
    if v.w.abs() > W_EPSILON {
        return v / v.w;
    }
    return v;
}

/// Convex combination of three vectors with barycentric weights.
pub fn blend3(values: [&Vector3<f32>; 3], weights: &Vector3<f32>) -> Vector3<f32> {
    return values[0] * weights.x + values[1] * weights.y + values[2] * weights.z;
}

pub fn blend2(values: [&Vector2<f32>; 3], weights: &Vector3<f32>) -> Vector2<f32> {
    return values[0] * weights.x + values[1] * weights.y + values[2] * weights.z;
}

/// Color channels clamped to [0, 1] and scaled to rgba8, alpha is opaque.
pub fn to_rgba8(color: &Vector3<f32>) -> [u8; 4] {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0) as u8;
    return [channel(color.x), channel(color.y), channel(color.z), 255];
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::vector;

    #[test]
    fn divide_skips_degenerate_w() {
        assert_eq!(divide_w(vector![2.0, 4.0, 6.0, 2.0]), vector![1.0, 2.0, 3.0, 1.0]);
        assert_eq!(divide_w(vector![2.0, 4.0, 6.0, 0.0]), vector![2.0, 4.0, 6.0, 0.0]);
    }

    #[test]
    fn rgba_channels_are_clamped() {
        assert_eq!(to_rgba8(&vector![-0.5, 0.5, 2.0]), [0, 127, 255, 255]);
    }

    #[test]
    fn blend_weights_each_value() {
        let values = [vector![1.0, 0.0], vector![0.0, 1.0], vector![1.0, 1.0]];
        let blended = blend2([&values[0], &values[1], &values[2]], &vector![0.5, 0.25, 0.25]);
        assert_eq!(blended, vector![0.75, 0.5]);
    }
}
