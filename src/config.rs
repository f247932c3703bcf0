use nalgebra::{point, vector, Point3, Vector3};

/// Guard for homogeneous W before a perspective divide.
pub const W_EPSILON: f32 = 1.0e-6;
/// Guard for the signed area used as the barycentric denominator.
pub const AREA_EPSILON: f32 = 1.0e-6;
/// Slack on each barycentric component in the coverage test.
pub const COVERAGE_EPSILON: f32 = 1.0e-5;
/// Distance written for pixels no primitive covered, fed to the Sobel pass.
pub const EMPTY_DISTANCE: f32 = 1.0e4;
/// Side of the square pixel tile loaded by the tiled Sobel kernel.
pub const SOBEL_TILE: u32 = 16;
/// Upper bound on the number of point lights.
pub const MAX_LIGHTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Bilinear,
}

/// Where a fragment's eye-space normal comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalMode {
    /// Barycentric blend of the three vertex normals.
    PerVertex,
    /// One normal for the whole triangle.
    PerFace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SobelMode {
    Off,
    /// Every pixel reads its 3x3 neighborhood from the distance field.
    Direct,
    /// Neighborhoods are served from a per-tile copy of the distance field.
    Tiled,
}

/// Point light in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Point3<f32>,
    pub emittance: f32,
}

/// Pipeline stage toggles and shading constants, fixed at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub texture_mapping: bool,
    pub perspective_correct: bool,
    pub texture_filter: TextureFilter,
    pub backface_culling: bool,
    pub normal_mode: NormalMode,
    /// Number of cel-shading bands, 0 disables quantization.
    pub cel_bands: u32,
    pub sobel: SobelMode,
    /// Sobel magnitude above which a pixel is drawn as outline.
    pub outline_threshold: f32,
    pub ambient: f32,
    pub background: Vector3<f32>,
    pub lights: Vec<Light>,
    /// Worker threads of the device pool, 0 picks the available parallelism.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        return Self {
            texture_mapping: true,
            perspective_correct: true,
            texture_filter: TextureFilter::Bilinear,
            backface_culling: true,
            normal_mode: NormalMode::PerVertex,
            cel_bands: 0,
            sobel: SobelMode::Off,
            outline_threshold: 1.0,
            ambient: 0.15,
            background: vector![0.08, 0.08, 0.1],
            lights: vec![
                Light { position: point![5.0, 10.0, 10.0], emittance: 0.7 },
                Light { position: point![-8.0, 4.0, -6.0], emittance: 0.3 },
            ],
            workers: 0,
        };
    }
}

impl PipelineConfig {
    /// Configuration with the stylized look: banded colors and outlines.
    pub fn toon() -> Self {
        return Self {
            cel_bands: 4,
            sobel: SobelMode::Tiled,
            ..Default::default()
        };
    }
}
