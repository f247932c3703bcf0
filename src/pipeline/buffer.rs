//! Frame-scoped data passed between the pipeline stages: camera uniforms,
//! lights, transformed vertices, primitives and the per-pixel fragment
//! records with their locks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use nalgebra::{Matrix3, Matrix4, Point3, Vector2, Vector3, Vector4};

use crate::config::Light;
use crate::scene::{TextureId, Topology};

/// Camera matrices for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameUniforms {
    pub mvp: Matrix4<f32>,       // Model to clip space.
    pub mv: Matrix4<f32>,        // Model to eye space.
    pub mv_normal: Matrix3<f32>, // Model to eye space, for normals.
}

impl FrameUniforms {
    /// Derives the normal matrix as the inverse transpose of `mv`'s linear part.
    pub fn new(projection: &Matrix4<f32>, model_view: &Matrix4<f32>) -> Self {
        let linear = model_view.fixed_slice::<3, 3>(0, 0).into_owned();
        let mv_normal = linear
            .try_inverse()
            .map(|m| m.transpose())
            .unwrap_or_else(Matrix3::identity);
        return Self {
            mvp: projection * model_view,
            mv: *model_view,
            mv_normal,
        };
    }
}

/// Light with its position carried into eye space for the current frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct EyeLight {
    pub eye_position: Point3<f32>,
    pub emittance: f32,
}

impl EyeLight {
    pub fn from_light(light: &Light, uniforms: &FrameUniforms) -> Self {
        let eye = super::util::divide_w(uniforms.mv * light.position.to_homogeneous());
        return Self {
            eye_position: Point3::from(eye.xyz()),
            emittance: light.emittance,
        };
    }
}

/// Output of the vertex stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformedVertex {
    pub position: Vector4<f32>, // Viewport x and y, NDC z, and w.
    pub eye_position: Vector3<f32>,
    pub eye_normal: Vector3<f32>,
    pub uv: Vector2<f32>,
    pub texture: Option<TextureId>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Primitive {
    pub topology: Topology,
    pub vertices: [TransformedVertex; 3],
}

/// Nearest surface found for a pixel and its interpolated attributes.
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub depth: f32,
    pub eye_position: Vector3<f32>,
    pub eye_normal: Vector3<f32>,
    pub uv: Vector2<f32>,
    pub color: Vector3<f32>,
    pub texture: Option<TextureId>,
    // Primitive that committed the fragment, breaks depth ties.
    pub primitive: u32,
    // Sobel responses of the distance field.
    pub sobel_x: f32,
    pub sobel_y: f32,
}

impl Default for Fragment {
    fn default() -> Self {
        return Self {
            depth: f32::INFINITY,
            eye_position: Vector3::zeros(),
            eye_normal: Vector3::zeros(),
            uv: Vector2::zeros(),
            color: Vector3::zeros(),
            texture: None,
            primitive: u32::MAX,
            sobel_x: 0.0,
            sobel_y: 0.0,
        };
    }
}

impl Fragment {
    /// Whether any primitive reached this pixel during the frame.
    pub fn is_covered(&self) -> bool {
        return self.depth.is_finite();
    }

    pub fn gradient(&self) -> f32 {
        return (self.sobel_x * self.sobel_x + self.sobel_y * self.sobel_y).sqrt();
    }
}

/// Locked fragment of one pixel, the lock is released on drop.
pub type FragmentGuard<'a> = MutexGuard<'a, Fragment>;

struct FragmentSlot {
    // Mirror of the fragment's depth, readable without the lock.
    depth: AtomicU32,
    fragment: Mutex<Fragment>,
}

impl FragmentSlot {
    fn new() -> Self {
        return Self {
            depth: AtomicU32::new(f32::INFINITY.to_bits()),
            fragment: Mutex::new(Fragment::default()),
        };
    }

    fn try_lock(&self) -> Option<FragmentGuard<'_>> {
        return match self.fragment.try_lock() {
            Ok(guard) => Some(guard),
            // The device reports the panicking kernel, the record stays usable.
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };
    }

    fn lock(&self) -> FragmentGuard<'_> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            std::hint::spin_loop();
        }
    }

    fn depth(&self) -> f32 {
        return f32::from_bits(self.depth.load(Ordering::Acquire));
    }
}

/// Fragment records of the whole canvas, shared by concurrent work items.
///
/// Every access goes through the pixel's lock. Depth only ever decreases
/// between two clears.
pub struct FragmentBuffer {
    pub width: u32,
    pub height: u32,
    slots: Vec<FragmentSlot>,
}

impl FragmentBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let n_pixels = (width as usize) * (height as usize);
        return Self {
            width,
            height,
            slots: (0..n_pixels).map(|_| FragmentSlot::new()).collect(),
        };
    }

    pub fn len(&self) -> usize {
        return self.slots.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.slots.is_empty();
    }

    /// Row-major buffer index of a pixel.
    pub fn index(&self, x: u32, y: u32) -> usize {
        return x as usize + y as usize * self.width as usize;
    }

    /// Spins until the pixel's lock is acquired.
    pub fn lock(&self, index: usize) -> FragmentGuard<'_> {
        return self.slots[index].lock();
    }

    /// Takes the pixel's lock only if nobody holds it.
    pub fn try_lock(&self, index: usize) -> Option<FragmentGuard<'_>> {
        return self.slots[index].try_lock();
    }

    /// Copy of a pixel's fragment.
    pub fn load(&self, index: usize) -> Fragment {
        return *self.slots[index].lock();
    }

    /// Current depth of a pixel without taking its lock.
    pub fn depth(&self, index: usize) -> f32 {
        return self.slots[index].depth();
    }

    /// Resets a pixel to the empty fragment at infinite depth.
    pub fn clear(&self, index: usize) {
        let slot = &self.slots[index];
        let mut fragment = slot.lock();
        *fragment = Fragment::default();
        slot.depth.store(f32::INFINITY.to_bits(), Ordering::Release);
    }

    /// Commits a candidate surface if it is nearer than the stored one. At
    /// equal depth the lower primitive index wins, so the outcome does not
    /// depend on which work item arrives first.
    ///
    /// `write` fills in the attributes while the pixel is locked, after depth
    /// and primitive have been set. Returns whether the candidate was
    /// committed. The loop ends as soon as a nearer surface is stored,
    /// whoever wrote it.
    pub fn resolve<F>(&self, index: usize, depth: f32, primitive: u32, write: F) -> bool
    where
        F: FnOnce(&mut Fragment),
    {
        let slot = &self.slots[index];
        loop {
            if !(depth <= slot.depth()) {
                return false;
            }
            if let Some(mut fragment) = slot.try_lock() {
                let nearer = depth < fragment.depth || (depth == fragment.depth && primitive < fragment.primitive);
                if !nearer {
                    return false;
                }
                fragment.depth = depth;
                fragment.primitive = primitive;
                slot.depth.store(depth.to_bits(), Ordering::Release);
                write(&mut *fragment);
                return true;
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::vector;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn new_buffer_is_empty_at_infinity() {
        let buffer = FragmentBuffer::new(3, 2);
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.index(2, 1), 5);
        assert!(!buffer.load(4).is_covered());
        assert_eq!(buffer.depth(4), f32::INFINITY);
    }

    #[test]
    fn resolve_keeps_the_nearest_depth() {
        let buffer = FragmentBuffer::new(1, 1);
        assert!(buffer.resolve(0, 0.5, 4, |f| f.color = vector![1.0, 0.0, 0.0]));
        assert!(!buffer.resolve(0, 0.7, 0, |f| f.color = vector![0.0, 1.0, 0.0]));
        assert!(!buffer.resolve(0, 0.5, 4, |f| f.color = vector![0.0, 0.0, 1.0]));
        assert!(buffer.resolve(0, 0.2, 9, |f| f.color = vector![1.0, 1.0, 1.0]));
        let fragment = buffer.load(0);
        assert_eq!(fragment.depth, 0.2);
        assert_eq!(fragment.primitive, 9);
        assert_eq!(fragment.color, vector![1.0, 1.0, 1.0]);
    }

    #[test]
    fn equal_depth_goes_to_the_lower_primitive() {
        let buffer = FragmentBuffer::new(1, 1);
        assert!(buffer.resolve(0, 0.5, 3, |f| f.uv = vector![3.0, 0.0]));
        assert!(!buffer.resolve(0, 0.5, 7, |f| f.uv = vector![7.0, 0.0]));
        assert!(buffer.resolve(0, 0.5, 1, |f| f.uv = vector![1.0, 0.0]));
        assert_eq!(buffer.load(0).uv, vector![1.0, 0.0]);
    }

    #[test]
    fn clear_resets_depth_and_attributes() {
        let buffer = FragmentBuffer::new(1, 1);
        buffer.resolve(0, 0.1, 0, |f| f.sobel_x = 3.0);
        buffer.clear(0);
        let fragment = buffer.load(0);
        assert!(!fragment.is_covered());
        assert_eq!(fragment.sobel_x, 0.0);
        assert_eq!(fragment.primitive, u32::MAX);
        assert!(buffer.resolve(0, 0.9, 5, |_| {}));
    }

    #[test]
    fn contended_pixel_ends_with_the_minimum() {
        let buffer = Arc::new(FragmentBuffer::new(1, 1));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for k in 0..500 {
                        let depth = ((k * 7 + t * 13) % 1000) as f32 / 1000.0 + 0.001;
                        buffer.resolve(0, depth, t, |f| f.uv = vector![depth, t as f32]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let fragment = buffer.load(0);
        let candidates: Vec<(f32, u32)> = (0..8u32)
            .flat_map(|t| (0..500u32).map(move |k| (((k * 7 + t * 13) % 1000) as f32 / 1000.0 + 0.001, t)))
            .collect();
        let expected = candidates.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
        let winner = candidates.iter().filter(|c| c.0 == expected).map(|c| c.1).min().unwrap();
        assert_eq!(fragment.depth, expected);
        assert_eq!(fragment.primitive, winner);
        // Attributes belong to the committed depth, never to a losing writer.
        assert_eq!(fragment.uv, vector![expected, winner as f32]);
    }

    #[test]
    fn lock_is_exclusive() {
        let buffer = FragmentBuffer::new(2, 1);
        let held = buffer.lock(0);
        assert!(buffer.try_lock(0).is_none());
        assert!(buffer.try_lock(1).is_some());
        drop(held);
        assert!(buffer.try_lock(0).is_some());
    }

    #[test]
    fn pixel_stays_usable_after_a_writer_panics() {
        let buffer = Arc::new(FragmentBuffer::new(1, 1));
        let writer = Arc::clone(&buffer);
        let result = thread::spawn(move || {
            writer.resolve(0, 0.5, 0, |_| panic!("kernel failure"));
        })
        .join();
        assert!(result.is_err());
        assert!(buffer.resolve(0, 0.25, 1, |f| f.uv = vector![1.0, 0.0]));
        assert_eq!(buffer.load(0).uv, vector![1.0, 0.0]);
    }

    #[test]
    fn normal_matrix_undoes_nonuniform_scale() {
        let model_view = Matrix4::new_nonuniform_scaling(&vector![2.0, 1.0, 1.0]);
        let uniforms = FrameUniforms::new(&Matrix4::identity(), &model_view);
        assert!((uniforms.mv_normal[(0, 0)] - 0.5).abs() < 1e-6);
        assert_eq!(uniforms.mvp, model_view);
    }
}
