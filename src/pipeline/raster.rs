//! Scan conversion and depth resolution.
//!
//! One work item per live primitive walks the pixels of its bounding box and
//! commits covered samples through the fragment buffer's per-pixel locks.
//! Samples are taken at pixel centers in viewport space and stored at the
//! mirrored address `(W - 1 - x, H - 1 - y)`.

use std::sync::Arc;

use nalgebra::{vector, Vector2, Vector3};

use super::buffer::{FragmentBuffer, Primitive};
use super::util::{blend2, blend3};
use crate::config::{NormalMode, PipelineConfig, AREA_EPSILON, COVERAGE_EPSILON, W_EPSILON};
use crate::device::Device;
use crate::error::DeviceError;

/// Rasterizer toggles for one frame.
#[derive(Debug, Clone, Copy)]
pub struct RasterParams {
    pub perspective_correct: bool,
    pub texture_mapping: bool,
    pub normal_mode: NormalMode,
}

impl RasterParams {
    pub fn from_config(config: &PipelineConfig) -> Self {
        return Self {
            perspective_correct: config.perspective_correct,
            texture_mapping: config.texture_mapping,
            normal_mode: config.normal_mode,
        };
    }
}

/// Inclusive pixel ranges of a primitive's bounding box on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

/// `floor(min)..=ceil(max)` of the three viewport positions, clamped to the
/// canvas. `None` if the box misses the canvas or a position is not finite.
pub fn bounding_box(primitive: &Primitive, width: u32, height: u32) -> Option<PixelBox> {
    if width == 0 || height == 0 {
        return None;
    }
    let xs = primitive.vertices.map(|v| v.position.x);
    let ys = primitive.vertices.map(|v| v.position.y);
    if xs.iter().chain(ys.iter()).any(|c| !c.is_finite()) {
        return None;
    }

    let clamp = |low: f32, high: f32, size: u32| -> Option<(u32, u32)> {
        let low = low.floor().max(0.0);
        let high = high.ceil().min((size - 1) as f32);
        if low > high {
            return None;
        }
        return Some((low as u32, high as u32));
    };
    let (x_min, x_max) = clamp(xs[0].min(xs[1]).min(xs[2]), xs[0].max(xs[1]).max(xs[2]), width)?;
    let (y_min, y_max) = clamp(ys[0].min(ys[1]).min(ys[2]), ys[0].max(ys[1]).max(ys[2]), height)?;
    return Some(PixelBox { x_min, x_max, y_min, y_max });
}

/// Twice the signed area of `(a, b, p)`.
fn edge(a: &Vector2<f32>, b: &Vector2<f32>, p: &Vector2<f32>) -> f32 {
    return (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
}

/// Barycentric coordinates of `p`, `None` for a (near) zero-area triangle.
pub fn barycentric(corners: &[Vector2<f32>; 3], p: &Vector2<f32>) -> Option<Vector3<f32>> {
    let [a, b, c] = corners;
    let area = edge(a, b, c);
    if !(area.abs() >= AREA_EPSILON) {
        return None;
    }
    return Some(vector![edge(b, c, p) / area, edge(c, a, p) / area, edge(a, b, p) / area]);
}

/// Accepts coordinates within tolerance of the triangle and snaps them into
/// `[0, 1]` with a sum of exactly 1.
pub fn coverage(bary: &Vector3<f32>) -> Option<Vector3<f32>> {
    if bary.iter().any(|&b| !(b >= -COVERAGE_EPSILON && b <= 1.0 + COVERAGE_EPSILON)) {
        return None;
    }
    let clamped = bary.map(|b| b.clamp(0.0, 1.0));
    let sum = clamped.sum();
    if sum <= 0.0 {
        return None;
    }
    return Some(clamped / sum);
}

/// Barycentric weights reweighted by inverse eye-space depth.
///
/// Falls back to the affine weights when a vertex sits on the eye plane.
pub fn perspective_weights(bary: &Vector3<f32>, eye_z: &[f32; 3]) -> Vector3<f32> {
    if eye_z.iter().any(|z| z.abs() < W_EPSILON) {
        return *bary;
    }
    let weighted = vector![bary.x / eye_z[0], bary.y / eye_z[1], bary.z / eye_z[2]];
    let sum = weighted.sum();
    if sum.abs() < W_EPSILON {
        return *bary;
    }
    return weighted / sum;
}

/// Scan-converts one primitive into `fragments`. Returns the number of
/// samples it committed.
pub fn rasterize_primitive(fragments: &FragmentBuffer, primitive: &Primitive, id: u32, params: &RasterParams) -> usize {
    let (width, height) = (fragments.width, fragments.height);
    let Some(pixels) = bounding_box(primitive, width, height) else {
        return 0;
    };
    let corners = primitive.vertices.map(|v| v.position.xy());
    let [v0, v1, v2] = &primitive.vertices;
    let eye_z = [v0.eye_position.z, v1.eye_position.z, v2.eye_position.z];
    let face_normal = (v0.eye_normal + v1.eye_normal + v2.eye_normal)
        .try_normalize(f32::EPSILON)
        .unwrap_or_else(Vector3::zeros);
    let texture = if params.texture_mapping { v0.texture } else { None };

    let mut committed = 0;
    for y in pixels.y_min..=pixels.y_max {
        for x in pixels.x_min..=pixels.x_max {
            let sample = vector![x as f32 + 0.5, y as f32 + 0.5];
            let Some(bary) = barycentric(&corners, &sample).as_ref().and_then(coverage) else {
                continue;
            };
            let depth = bary.x * v0.position.z + bary.y * v1.position.z + bary.z * v2.position.z;
            let index = fragments.index(width - 1 - x, height - 1 - y);

            let stored = fragments.resolve(index, depth, id, |fragment| {
                let weights = if params.perspective_correct {
                    perspective_weights(&bary, &eye_z)
                } else {
                    bary
                };
                fragment.uv = blend2([&v0.uv, &v1.uv, &v2.uv], &weights);
                fragment.eye_position = blend3([&v0.eye_position, &v1.eye_position, &v2.eye_position], &weights);
                fragment.eye_normal = match params.normal_mode {
                    NormalMode::PerFace => face_normal,
                    NormalMode::PerVertex => blend3([&v0.eye_normal, &v1.eye_normal, &v2.eye_normal], &weights)
                        .try_normalize(f32::EPSILON)
                        .unwrap_or_else(Vector3::zeros),
                };
                fragment.color = vector![1.0, 1.0, 1.0];
                fragment.texture = texture;
            });
            if stored {
                committed += 1;
            }
        }
    }
    return committed;
}

/// Rasterizes the first `live` primitives, one work item each.
pub fn run(
    device: &Device,
    fragments: &Arc<FragmentBuffer>,
    primitives: &Arc<Vec<Primitive>>,
    live: usize,
    params: RasterParams,
) -> Result<(), DeviceError> {
    let fragments = Arc::clone(fragments);
    let primitives = Arc::clone(primitives);
    return device.launch("rasterize", live, move |i| {
        rasterize_primitive(&fragments, &primitives[i], i as u32, &params);
    });
}
