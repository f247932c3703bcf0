use std::f32::consts::FRAC_PI_4;
use std::path::Path;
use std::time;

use nalgebra::{vector, Matrix4, Point3, Vector3};
use show_image::{create_window, event, ImageInfo, ImageView, WindowOptions};

use tiny_rasterizer::config::{NormalMode, SobelMode, TextureFilter};
use tiny_rasterizer::scene::{load_gltf, load_obj};
use tiny_rasterizer::{FrameUniforms, GeometryStore, LoadError, Pipeline, PipelineConfig};

pub struct Params {
    pub width: u32,
    pub height: u32,
    pub print_fps: bool,
    pub asset_path: String,
    pub texture_path: Option<String>,
    pub preset: String,
    pub output_path: Option<String>,
}

/// Named pipeline configurations selectable from the command line.
pub fn preset(name: &str) -> Option<PipelineConfig> {
    let config = match name {
        "default" => PipelineConfig::default(),
        "toon" => PipelineConfig::toon(),
        "flat" => PipelineConfig {
            texture_mapping: false,
            normal_mode: NormalMode::PerFace,
            ..Default::default()
        },
        "affine" => PipelineConfig {
            perspective_correct: false,
            texture_filter: TextureFilter::Nearest,
            ..Default::default()
        },
        "outline" => PipelineConfig {
            sobel: SobelMode::Direct,
            ..Default::default()
        },
        _ => return None,
    };
    return Some(config);
}

/// Picks the loader by file extension, anything but `.obj` is read as glTF.
fn load_scene(params: &Params) -> Result<GeometryStore, LoadError> {
    let path = Path::new(&params.asset_path);
    let is_obj = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("obj"));
    if is_obj {
        return load_obj(path, params.texture_path.as_deref().map(Path::new));
    }
    return load_gltf(path);
}

/// Camera circling the scene bounds.
struct Orbit {
    center: Point3<f32>,
    radius: f32,
}

impl Orbit {
    fn new(store: &GeometryStore) -> Self {
        return match store.bounds() {
            Some((low, high)) => Self {
                center: nalgebra::center(&low, &high),
                radius: ((high - low).norm() * 1.25).max(1.0e-3),
            },
            None => Self { center: Point3::origin(), radius: 3.0 },
        };
    }

    fn uniforms(&self, angle: f32, aspect: f32) -> FrameUniforms {
        let offset = vector![angle.sin(), 0.35, angle.cos()] * self.radius;
        let eye = self.center + offset;
        let view = Matrix4::look_at_rh(&eye, &self.center, &Vector3::y());
        let projection = Matrix4::new_perspective(aspect, FRAC_PI_4, 0.05 * self.radius, 4.0 * self.radius);
        return FrameUniforms::new(&projection, &view);
    }
}

/// The pipeline's surface starts at the bottom row, images start at the top.
fn flip_rows(surface: &[u8], width: u32) -> Vec<u8> {
    let row = 4 * width as usize;
    return surface.chunks_exact(row).rev().flatten().copied().collect();
}

/// Helper, defining exit event to be an Escape key press.
fn is_exit_event(window_event: event::WindowEvent) -> bool {
    if let event::WindowEvent::KeyboardInput(event) = window_event {
        if event.input.key_code == Some(event::VirtualKeyCode::Escape) && event.input.state.is_released() {
            return true;
        }
    }
    return false;
}

/// Loads the scene and either saves one frame or shows frames in a window
/// until Escape is released.
pub fn run(params: Params) -> Result<(), Box<dyn std::error::Error>> {
    let config = preset(&params.preset).ok_or_else(|| format!("unknown preset `{}`", params.preset))?;
    let store = load_scene(&params)?;
    let orbit = Orbit::new(&store);
    let aspect = params.width as f32 / params.height as f32;

    let mut pipeline = Pipeline::new(config)?;
    pipeline.init(params.width, params.height)?;
    pipeline.set_scene(store);
    let mut surface = vec![0u8; 4 * (params.width * params.height) as usize];

    if let Some(output_path) = &params.output_path {
        pipeline.render(&mut surface, &orbit.uniforms(0.0, aspect))?;
        let image_data = flip_rows(&surface, params.width);
        image::save_buffer(output_path, &image_data, params.width, params.height, image::ColorType::Rgba8)?;
        log::info!("saved frame to {}", output_path);
        pipeline.shutdown();
        return Ok(());
    }

    let window_options = WindowOptions {
        size: Some([params.width, params.height]),
        ..Default::default()
    };
    let window = create_window("output", window_options)?;
    let event_channel = window.event_channel()?;

    let mut exit = false;
    let time_begin = time::Instant::now();
    let mut frame_counter_time_begin = time::Instant::now();
    let mut frame_counter: u32 = 0;
    while !exit {
        let passed_time = time::Instant::now().duration_since(time_begin).as_secs_f32();
        pipeline.render(&mut surface, &orbit.uniforms(0.5 * passed_time, aspect))?;

        let image_data = flip_rows(&surface, params.width);
        let image_view = ImageView::new(ImageInfo::rgba8(params.width, params.height), &image_data);
        window.set_image("image", image_view)?;

        // Draining the events piled up since the last frame, looking for exit.
        exit = event_channel.try_iter().fold(false, |exit, window_event| exit || is_exit_event(window_event));

        if params.print_fps {
            frame_counter += 1;
            if time::Instant::now().duration_since(frame_counter_time_begin).as_secs_f32() > 1.0 {
                log::info!("FPS --- {} ({} primitives drawn)", frame_counter, pipeline.live_primitives());
                frame_counter_time_begin = time::Instant::now();
                frame_counter = 0;
            }
        }
    }

    pipeline.shutdown();
    return Ok(());
}
