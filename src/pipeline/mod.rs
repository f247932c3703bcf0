//! The per-frame rasterization pipeline.
//!
//! A [`Pipeline`] owns the device, the bound scene and every frame-scoped
//! buffer. Each `render` call runs the stages in order, each one a kernel
//! launch closed by a barrier:
//!
//! clear -> vertex -> assembly -> visibility filter -> raster -> texture
//! -> lighting -> sobel -> compose -> present.

pub mod assembly;
pub mod buffer;
pub mod cull;
pub mod present;
pub mod raster;
pub mod shade;
pub mod util;
pub mod vertex;

use std::sync::Arc;

use nalgebra::Vector3;

pub use buffer::{EyeLight, Fragment, FrameUniforms, Primitive, TransformedVertex};

use crate::config::{Light, PipelineConfig, SobelMode, MAX_LIGHTS};
use crate::device::{host_mut, Device};
use crate::error::PipelineError;
use crate::scene::GeometryStore;
use buffer::FragmentBuffer;
use raster::RasterParams;

/// Buffers sized by the canvas.
struct FrameBuffers {
    width: u32,
    height: u32,
    fragments: Arc<FragmentBuffer>,
    field: Arc<Vec<f32>>,
    framebuffer: Arc<Vec<Vector3<f32>>>,
    lights: Arc<Vec<EyeLight>>,
}

impl FrameBuffers {
    fn new(width: u32, height: u32) -> Self {
        let fragments = FragmentBuffer::new(width, height);
        let n_pixels = fragments.len();
        return Self {
            width,
            height,
            fragments: Arc::new(fragments),
            field: Arc::new(vec![0.0; n_pixels]),
            framebuffer: Arc::new(vec![Vector3::zeros(); n_pixels]),
            lights: Arc::new(Vec::with_capacity(MAX_LIGHTS)),
        };
    }
}

/// Buffers sized by the bound scene.
struct SceneBuffers {
    store: Arc<GeometryStore>,
    vertices: Arc<Vec<TransformedVertex>>,
    primitives: Arc<Vec<Primitive>>,
    compaction: cull::Compaction,
}

pub struct Pipeline {
    config: PipelineConfig,
    device: Device,
    frame: Option<FrameBuffers>,
    scene: Option<SceneBuffers>,
    live_primitives: usize,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        check_lights(&config.lights)?;
        let device = Device::new(config.workers);
        return Ok(Self {
            config,
            device,
            frame: None,
            scene: None,
            live_primitives: 0,
        });
    }

    /// Allocates the canvas-sized buffers, releasing previous ones. A bound
    /// scene stays bound.
    pub fn init(&mut self, width: u32, height: u32) -> Result<(), PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::EmptyCanvas { width, height });
        }
        self.frame = None;
        self.frame = Some(FrameBuffers::new(width, height));
        self.live_primitives = 0;
        log::info!("pipeline initialized for a {}x{} canvas", width, height);
        return Ok(());
    }

    /// Binds a scene and sizes the vertex and primitive arenas for it.
    pub fn set_scene(&mut self, store: GeometryStore) {
        log::info!(
            "scene bound: {} meshes, {} textures, {} vertices, {} primitives, {} skipped",
            store.meshes().len(),
            store.textures().len(),
            store.vertex_count(),
            store.primitive_count(),
            store.diagnostics().len()
        );
        self.scene = Some(SceneBuffers {
            vertices: Arc::new(vec![TransformedVertex::default(); store.vertex_count()]),
            primitives: Arc::new(vec![Primitive::default(); store.primitive_count()]),
            compaction: cull::Compaction::default(),
            store: Arc::new(store),
        });
        self.live_primitives = 0;
    }

    pub fn set_lights(&mut self, lights: Vec<Light>) -> Result<(), PipelineError> {
        check_lights(&lights)?;
        self.config.lights = lights;
        return Ok(());
    }

    /// Releases every frame and scene buffer. Safe to call at any time.
    pub fn shutdown(&mut self) {
        if self.frame.is_some() || self.scene.is_some() {
            log::info!("pipeline shut down");
        }
        self.frame = None;
        self.scene = None;
        self.live_primitives = 0;
    }

    /// Renders one frame into `surface`, RGBA8, four bytes per pixel in
    /// buffer addressing.
    pub fn render(&mut self, surface: &mut [u8], uniforms: &FrameUniforms) -> Result<(), PipelineError> {
        let frame = self.frame.as_mut().ok_or(PipelineError::NotInitialized)?;
        let scene = self.scene.as_mut().ok_or(PipelineError::NoScene)?;
        let expected = 4 * frame.fragments.len();
        if surface.len() != expected {
            return Err(PipelineError::SurfaceSize { expected, actual: surface.len() });
        }
        let device = &self.device;
        let config = &self.config;

        let fragments = Arc::clone(&frame.fragments);
        device.launch("clear_fragments", frame.fragments.len(), move |i| fragments.clear(i))?;

        let lights = host_mut(&mut frame.lights, "lights")?;
        lights.clear();
        lights.extend(config.lights.iter().map(|light| EyeLight::from_light(light, uniforms)));

        vertex::run(device, &scene.store, &mut scene.vertices, uniforms, frame.width, frame.height)?;
        assembly::run(device, &scene.store, &scene.vertices, &mut scene.primitives)?;

        let total = scene.store.primitive_count();
        let mut live = total;
        if config.backface_culling {
            live = cull::run(device, &mut scene.primitives, &mut scene.compaction, total)?;
        }
        self.live_primitives = live;

        raster::run(device, &frame.fragments, &scene.primitives, live, RasterParams::from_config(config))?;
        if config.texture_mapping {
            shade::run_texture(device, &frame.fragments, &scene.store, config.texture_filter)?;
        }
        shade::run_lighting(device, &frame.fragments, &frame.lights, config.ambient, config.background)?;
        if config.sobel != SobelMode::Off {
            shade::run_sobel(device, &frame.fragments, &mut frame.field, config.sobel)?;
        }
        shade::run_compose(device, &frame.fragments, &mut frame.framebuffer, config)?;
        present::run(device, &frame.framebuffer, surface)?;

        log::trace!("frame rendered: {} of {} primitives survived culling", live, total);
        return Ok(());
    }

    /// Canvas size set by the last `init`.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        return self.frame.as_ref().map(|f| (f.width, f.height));
    }

    pub fn store(&self) -> Option<&GeometryStore> {
        return self.scene.as_ref().map(|s| s.store.as_ref());
    }

    /// Primitives that reached the rasterizer in the last frame.
    pub fn live_primitives(&self) -> usize {
        return self.live_primitives;
    }

    /// Fragment left at buffer address `(x, y)` by the last frame.
    pub fn fragment(&self, x: u32, y: u32) -> Option<Fragment> {
        let frame = self.frame.as_ref()?;
        if x >= frame.width || y >= frame.height {
            return None;
        }
        return Some(frame.fragments.load(frame.fragments.index(x, y)));
    }

    /// Final colors of the last frame, before conversion to the surface format.
    pub fn framebuffer(&self) -> Option<&[Vector3<f32>]> {
        return self.frame.as_ref().map(|f| f.framebuffer.as_slice());
    }
}

fn check_lights(lights: &[Light]) -> Result<(), PipelineError> {
    if lights.len() > MAX_LIGHTS {
        return Err(PipelineError::TooManyLights { max: MAX_LIGHTS, count: lights.len() });
    }
    return Ok(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SobelMode, TextureFilter};
    use crate::scene::{MeshData, Texture, Topology};
    use nalgebra::{point, vector, Matrix4, Point3, Vector2};

    const BACKGROUND: [u8; 4] = [20, 20, 25, 255];
    const AMBIENT: [u8; 4] = [38, 38, 38, 255];

    fn config() -> PipelineConfig {
        return PipelineConfig {
            lights: Vec::new(),
            workers: 2,
            ..Default::default()
        };
    }

    fn triangle(positions: [Point3<f32>; 3]) -> MeshData {
        return MeshData {
            topology: Topology::Triangle,
            indices: vec![0, 1, 2],
            positions: positions.to_vec(),
            normals: vec![Vector3::z(); 3],
            uvs: vec![vector![0.0, 0.0], vector![1.0, 0.0], vector![0.0, 1.0]],
            texture: None,
        };
    }

    fn lower_left() -> MeshData {
        return triangle([point![-1.0, -1.0, 0.5], point![1.0, -1.0, 0.5], point![-1.0, 1.0, 0.5]]);
    }

    fn scene(meshes: Vec<MeshData>) -> GeometryStore {
        let mut store = GeometryStore::new();
        for (i, mesh) in meshes.into_iter().enumerate() {
            store.push_mesh(i, 0, mesh);
        }
        return store;
    }

    fn identity() -> FrameUniforms {
        return FrameUniforms::new(&Matrix4::identity(), &Matrix4::identity());
    }

    fn pixel(surface: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = 4 * (x + y * width) as usize;
        return [surface[i], surface[i + 1], surface[i + 2], surface[i + 3]];
    }

    #[test]
    fn ambient_triangle_end_to_end() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        pipeline.init(4, 4).unwrap();
        pipeline.set_scene(scene(vec![lower_left()]));
        let mut surface = vec![0u8; 64];
        pipeline.render(&mut surface, &identity()).unwrap();

        assert_eq!(pipeline.live_primitives(), 1);
        // Row 0 of the surface is the bottom of the image, the triangle fills
        // the lower-left half including the diagonal.
        for y in 0..4 {
            for x in 0..4 {
                let expected = if x + y <= 3 { AMBIENT } else { BACKGROUND };
                assert_eq!(pixel(&surface, 4, x, y), expected, "pixel ({}, {})", x, y);
                assert_eq!(pipeline.fragment(x, y).unwrap().is_covered(), x + y <= 3);
            }
        }
        assert_eq!(pipeline.fragment(0, 0).unwrap().depth, 0.5);
        assert!(pipeline.fragment(4, 0).is_none());
    }

    #[test]
    fn back_faces_are_culled_unless_disabled() {
        let reversed = triangle([point![-1.0, -1.0, 0.5], point![-1.0, 1.0, 0.5], point![1.0, -1.0, 0.5]]);
        let mut pipeline = Pipeline::new(config()).unwrap();
        pipeline.init(4, 4).unwrap();
        pipeline.set_scene(scene(vec![reversed.clone()]));
        let mut surface = vec![0u8; 64];
        pipeline.render(&mut surface, &identity()).unwrap();
        assert_eq!(pipeline.live_primitives(), 0);
        assert!(surface.chunks_exact(4).all(|p| p == BACKGROUND));

        let mut pipeline = Pipeline::new(PipelineConfig { backface_culling: false, ..config() }).unwrap();
        pipeline.init(4, 4).unwrap();
        pipeline.set_scene(scene(vec![reversed]));
        pipeline.render(&mut surface, &identity()).unwrap();
        assert_eq!(pipeline.live_primitives(), 1);
        assert_eq!(pixel(&surface, 4, 0, 0), AMBIENT);
    }

    #[test]
    fn nearer_mesh_wins_across_meshes() {
        let far = lower_left();
        let mut near = lower_left();
        for p in near.positions.iter_mut() {
            p.z = 0.25;
        }
        near.normals = vec![-Vector3::z(); 3];
        let mut pipeline = Pipeline::new(config()).unwrap();
        pipeline.init(4, 4).unwrap();
        pipeline.set_scene(scene(vec![far, near]));
        let mut surface = vec![0u8; 64];
        pipeline.render(&mut surface, &identity()).unwrap();

        let fragment = pipeline.fragment(1, 1).unwrap();
        assert_eq!(fragment.depth, 0.25);
        assert_eq!(fragment.primitive, 1);
        assert_eq!(fragment.eye_normal, -Vector3::z());
    }

    #[test]
    fn rendering_is_idempotent() {
        let mut store = GeometryStore::new();
        let texture = Texture::from_rgb8(2, 2, vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 0]).unwrap();
        let texture = store.add_texture(texture);
        let mut textured = lower_left();
        textured.texture = Some(texture);
        store.push_mesh(0, 0, textured);
        let mut overlapping = triangle([point![1.0, 1.0, 0.4], point![-1.0, 1.0, 0.6], point![1.0, -1.0, 0.6]]);
        overlapping.uvs = vec![Vector2::zeros(); 3];
        store.push_mesh(1, 0, overlapping);

        let config = PipelineConfig {
            texture_filter: TextureFilter::Bilinear,
            sobel: SobelMode::Direct,
            cel_bands: 3,
            ..PipelineConfig::default()
        };
        let mut pipeline = Pipeline::new(config).unwrap();
        pipeline.init(32, 24).unwrap();
        pipeline.set_scene(store);
        let projection = Matrix4::new_perspective(4.0 / 3.0, 1.0, 0.1, 10.0);
        let model_view = Matrix4::new_translation(&vector![0.0, 0.0, -2.5]);
        let uniforms = FrameUniforms::new(&projection, &model_view);

        let mut first = vec![0u8; 4 * 32 * 24];
        let mut second = vec![1u8; 4 * 32 * 24];
        pipeline.render(&mut first, &uniforms).unwrap();
        pipeline.render(&mut second, &uniforms).unwrap();
        assert_eq!(first, second);
        assert!(first.chunks_exact(4).any(|p| p != BACKGROUND));
    }

    #[test]
    fn api_misuse_is_reported() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        let mut surface = vec![0u8; 64];
        assert!(matches!(pipeline.render(&mut surface, &identity()), Err(PipelineError::NotInitialized)));

        pipeline.init(4, 4).unwrap();
        assert!(matches!(pipeline.render(&mut surface, &identity()), Err(PipelineError::NoScene)));

        pipeline.set_scene(scene(vec![lower_left()]));
        let mut short = vec![0u8; 60];
        assert!(matches!(
            pipeline.render(&mut short, &identity()),
            Err(PipelineError::SurfaceSize { expected: 64, actual: 60 })
        ));
        assert!(matches!(pipeline.init(0, 4), Err(PipelineError::EmptyCanvas { width: 0, height: 4 })));

        let lights = vec![Light { position: Point3::origin(), emittance: 1.0 }; MAX_LIGHTS + 1];
        assert!(matches!(pipeline.set_lights(lights.clone()), Err(PipelineError::TooManyLights { .. })));
        assert!(matches!(
            Pipeline::new(PipelineConfig { lights, ..config() }),
            Err(PipelineError::TooManyLights { .. })
        ));

        pipeline.shutdown();
        pipeline.shutdown();
        assert!(matches!(pipeline.render(&mut surface, &identity()), Err(PipelineError::NotInitialized)));
    }

    #[test]
    fn reinit_keeps_the_scene() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        pipeline.init(4, 4).unwrap();
        pipeline.set_scene(scene(vec![lower_left()]));
        pipeline.init(8, 6).unwrap();
        assert_eq!(pipeline.dimensions(), Some((8, 6)));
        assert_eq!(pipeline.store().unwrap().primitive_count(), 1);

        let mut surface = vec![0u8; 4 * 8 * 6];
        pipeline.render(&mut surface, &identity()).unwrap();
        assert_eq!(pixel(&surface, 8, 0, 0), AMBIENT);
        assert_eq!(pixel(&surface, 8, 7, 5), BACKGROUND);
        assert_eq!(pipeline.framebuffer().unwrap().len(), 48);
    }

    #[test]
    fn lights_brighten_facing_surfaces() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        pipeline.init(4, 4).unwrap();
        pipeline.set_scene(scene(vec![lower_left()]));
        pipeline.set_lights(vec![Light { position: point![0.0, 0.0, 100.0], emittance: 0.5 }]).unwrap();
        let mut surface = vec![0u8; 64];
        pipeline.render(&mut surface, &identity()).unwrap();

        let lit = pixel(&surface, 4, 0, 0)[0];
        assert!(lit > AMBIENT[0] && lit < 255);
    }
}
