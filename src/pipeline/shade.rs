//! Per-pixel shading stages run after depth resolution: texture sampling,
//! Lambert lighting, the Sobel edge pass and final color composition.

use std::sync::Arc;

use nalgebra::{Vector2, Vector3};

use super::buffer::{EyeLight, Fragment, FragmentBuffer};
use crate::config::{PipelineConfig, SobelMode, TextureFilter, EMPTY_DISTANCE, SOBEL_TILE};
use crate::device::{host_mut, Device};
use crate::error::DeviceError;
use crate::scene::{GeometryStore, Texture};

/// Filtered texture color at `uv`, texels outside the image are black.
pub fn sample_texture(texture: &Texture, uv: &Vector2<f32>, filter: TextureFilter) -> Vector3<f32> {
    let (w, h) = (texture.width as f32, texture.height as f32);
    match filter {
        TextureFilter::Nearest => {
            return texture.texel((uv.x * w).floor() as i64, (uv.y * h).floor() as i64);
        }
        TextureFilter::Bilinear => {
            let tx = uv.x * w - 0.5;
            let ty = uv.y * h - 0.5;
            let (x0, y0) = (tx.floor(), ty.floor());
            let (fx, fy) = (tx - x0, ty - y0);
            let (x0, y0) = (x0 as i64, y0 as i64);

            let top = texture.texel(x0, y0) * (1.0 - fx) + texture.texel(x0 + 1, y0) * fx;
            let bottom = texture.texel(x0, y0 + 1) * (1.0 - fx) + texture.texel(x0 + 1, y0 + 1) * fx;
            return top * (1.0 - fy) + bottom * fy;
        }
    }
}

/// Ambient plus the Lambert term of every light.
pub fn lambert(fragment: &Fragment, lights: &[EyeLight], ambient: f32) -> f32 {
    let mut light = ambient;
    for l in lights {
        let Some(direction) = (l.eye_position.coords - fragment.eye_position).try_normalize(f32::EPSILON) else {
            continue;
        };
        light += l.emittance * fragment.eye_normal.dot(&direction).max(0.0);
    }
    return light;
}

/// Rounds every channel up to the next of `bands` levels.
pub fn quantize(color: &Vector3<f32>, bands: u32) -> Vector3<f32> {
    let bands = bands as f32;
    return color.map(|c| (c * bands).ceil() / bands);
}

/// Value fed to the edge detector for one fragment.
pub fn distance(fragment: &Fragment) -> f32 {
    if fragment.is_covered() {
        return fragment.eye_position.norm();
    }
    return EMPTY_DISTANCE;
}

/// 3x3 Sobel responses around a pixel. `tap(dx, dy)` reads the neighbor at
/// that offset, or `None` when it falls off the canvas, in which case the
/// center sample is used.
fn sobel_from_taps<F>(tap: F) -> (f32, f32)
where
    F: Fn(i64, i64) -> Option<f32>,
{
    const X_KERNEL: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
    const Y_KERNEL: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

    let center = tap(0, 0).unwrap_or(EMPTY_DISTANCE);
    let (mut gx, mut gy) = (0.0, 0.0);
    for row in 0..3 {
        for col in 0..3 {
            let value = tap(col as i64 - 1, row as i64 - 1).unwrap_or(center);
            gx += X_KERNEL[row][col] * value;
            gy += Y_KERNEL[row][col] * value;
        }
    }
    return (gx, gy);
}

/// Sobel responses at `(x, y)` reading the whole field.
pub fn sobel_direct(field: &[f32], width: u32, height: u32, x: u32, y: u32) -> (f32, f32) {
    return sobel_from_taps(|dx, dy| read_field(field, width, height, x as i64 + dx, y as i64 + dy));
}

fn read_field(field: &[f32], width: u32, height: u32, x: i64, y: i64) -> Option<f32> {
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
        return None;
    }
    return Some(field[x as usize + y as usize * width as usize]);
}

/// Copy of one tile of the distance field.
pub struct FieldTile {
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl FieldTile {
    /// Loads tile number `tile`, tiles run row-major over the canvas.
    pub fn load(field: &[f32], width: u32, height: u32, tile: usize) -> Self {
        let tiles_x = tiles_along(width);
        let x0 = (tile % tiles_x) as u32 * SOBEL_TILE;
        let y0 = (tile / tiles_x) as u32 * SOBEL_TILE;
        let tile_width = SOBEL_TILE.min(width - x0);
        let tile_height = SOBEL_TILE.min(height - y0);

        let mut values = Vec::with_capacity((tile_width * tile_height) as usize);
        for y in y0..y0 + tile_height {
            let row = (y * width) as usize;
            values.extend_from_slice(&field[row + x0 as usize..row + (x0 + tile_width) as usize]);
        }
        return Self { x0, y0, width: tile_width, height: tile_height, values };
    }

    fn get(&self, x: i64, y: i64) -> Option<f32> {
        let (lx, ly) = (x - self.x0 as i64, y - self.y0 as i64);
        if lx < 0 || ly < 0 || lx >= self.width as i64 || ly >= self.height as i64 {
            return None;
        }
        return Some(self.values[lx as usize + ly as usize * self.width as usize]);
    }

    /// Sobel responses at canvas pixel `(x, y)` of this tile. Taps outside
    /// the tile are read from the full field.
    pub fn sobel(&self, field: &[f32], width: u32, height: u32, x: u32, y: u32) -> (f32, f32) {
        return sobel_from_taps(|dx, dy| {
            let (nx, ny) = (x as i64 + dx, y as i64 + dy);
            return self.get(nx, ny).or_else(|| read_field(field, width, height, nx, ny));
        });
    }

    /// Canvas pixels covered by this tile.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        return (self.y0..self.y0 + self.height).flat_map(move |y| (self.x0..self.x0 + self.width).map(move |x| (x, y)));
    }
}

fn tiles_along(size: u32) -> usize {
    return ((size + SOBEL_TILE - 1) / SOBEL_TILE) as usize;
}

/// Replaces the flat color of textured fragments with their filtered texel.
pub fn run_texture(
    device: &Device,
    fragments: &Arc<FragmentBuffer>,
    store: &Arc<GeometryStore>,
    filter: TextureFilter,
) -> Result<(), DeviceError> {
    let fragments = Arc::clone(fragments);
    let store = Arc::clone(store);
    return device.launch("texture_sample", fragments.len(), move |i| {
        let mut fragment = fragments.lock(i);
        if !fragment.is_covered() {
            return;
        }
        if let Some(texture) = fragment.texture.and_then(|id| store.texture(id)) {
            fragment.color = sample_texture(texture, &fragment.uv, filter);
        }
    });
}

/// Lights covered fragments and paints the rest with the background.
pub fn run_lighting(
    device: &Device,
    fragments: &Arc<FragmentBuffer>,
    lights: &Arc<Vec<EyeLight>>,
    ambient: f32,
    background: Vector3<f32>,
) -> Result<(), DeviceError> {
    let fragments = Arc::clone(fragments);
    let lights = Arc::clone(lights);
    return device.launch("lambert", fragments.len(), move |i| {
        let mut fragment = fragments.lock(i);
        if fragment.is_covered() {
            let light = lambert(&fragment, &lights, ambient);
            fragment.color *= light;
        } else {
            fragment.color = background;
        }
    });
}

/// Fills the distance field and stores each fragment's Sobel responses.
pub fn run_sobel(
    device: &Device,
    fragments: &Arc<FragmentBuffer>,
    field: &mut Arc<Vec<f32>>,
    mode: SobelMode,
) -> Result<(), DeviceError> {
    let (width, height) = (fragments.width, fragments.height);
    let sampled = Arc::clone(fragments);
    device.map_into("distance_field", &mut host_mut(field, "distance field")?[..], move |i| {
        distance(&sampled.load(i))
    })?;

    let fragments = Arc::clone(fragments);
    let field = Arc::clone(field);
    match mode {
        SobelMode::Off => return Ok(()),
        SobelMode::Direct => {
            return device.launch("sobel_direct", fragments.len(), move |i| {
                let (x, y) = (i as u32 % width, i as u32 / width);
                let (gx, gy) = sobel_direct(&field, width, height, x, y);
                let mut fragment = fragments.lock(i);
                fragment.sobel_x = gx;
                fragment.sobel_y = gy;
            });
        }
        SobelMode::Tiled => {
            let tiles = tiles_along(width) * tiles_along(height);
            return device.launch("sobel_tiled", tiles, move |tile| {
                let local = FieldTile::load(&field, width, height, tile);
                for (x, y) in local.pixels() {
                    let (gx, gy) = local.sobel(&field, width, height, x, y);
                    let mut fragment = fragments.lock(fragments.index(x, y));
                    fragment.sobel_x = gx;
                    fragment.sobel_y = gy;
                }
            });
        }
    }
}

/// Final color of one fragment: cel bands on covered pixels, black where the
/// edge response exceeds the outline threshold.
pub fn compose(fragment: &Fragment, config: &PipelineConfig) -> Vector3<f32> {
    if config.sobel != SobelMode::Off && fragment.gradient() > config.outline_threshold {
        return Vector3::zeros();
    }
    if config.cel_bands > 0 && fragment.is_covered() {
        return quantize(&fragment.color, config.cel_bands);
    }
    return fragment.color;
}

pub fn run_compose(
    device: &Device,
    fragments: &Arc<FragmentBuffer>,
    framebuffer: &mut Arc<Vec<Vector3<f32>>>,
    config: &PipelineConfig,
) -> Result<(), DeviceError> {
    let fragments = Arc::clone(fragments);
    let config = config.clone();
    return device.map_into("compose", &mut host_mut(framebuffer, "framebuffer")?[..], move |i| {
        compose(&fragments.load(i), &config)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{point, vector};

    fn checker() -> Texture {
        #[rustfmt::skip]
        let pixels = vec![
            0, 0, 0,       255, 255, 255,
            255, 0, 0,     0, 255, 0,
        ];
        return Texture::from_rgb8(2, 2, pixels).unwrap();
    }

    fn covered(eye_position: Vector3<f32>) -> Fragment {
        return Fragment {
            depth: 0.5,
            eye_position,
            eye_normal: Vector3::z(),
            color: vector![1.0, 1.0, 1.0],
            ..Default::default()
        };
    }

    #[test]
    fn bilinear_center_averages_the_corners() {
        let color = sample_texture(&checker(), &vector![0.5, 0.5], TextureFilter::Bilinear);
        let expected = vector![510.0, 510.0, 255.0] / (4.0 * 255.0);
        assert!((color - expected).norm() < 1e-6);
    }

    #[test]
    fn bilinear_texel_centers_are_exact() {
        let texture = checker();
        let color = sample_texture(&texture, &vector![0.75, 0.25], TextureFilter::Bilinear);
        assert!((color - vector![1.0, 1.0, 1.0]).norm() < 1e-6);
        // Half way past the last texel the black border is blended in.
        let edge = sample_texture(&texture, &vector![1.0, 0.25], TextureFilter::Bilinear);
        assert!((edge - vector![0.5, 0.5, 0.5]).norm() < 1e-6);
    }

    #[test]
    fn nearest_picks_the_containing_texel() {
        let texture = checker();
        assert_eq!(sample_texture(&texture, &vector![0.1, 0.9], TextureFilter::Nearest), vector![1.0, 0.0, 0.0]);
        assert_eq!(sample_texture(&texture, &vector![1.2, 0.9], TextureFilter::Nearest), Vector3::zeros());
    }

    #[test]
    fn lambert_adds_facing_lights_only() {
        let fragment = covered(vector![0.0, 0.0, -2.0]);
        let lights = [
            EyeLight { eye_position: point![0.0, 0.0, 0.0], emittance: 0.5 },
            EyeLight { eye_position: point![0.0, 0.0, -5.0], emittance: 0.8 },
            EyeLight { eye_position: point![2.0, 0.0, -2.0], emittance: 1.0 },
        ];
        assert!((lambert(&fragment, &lights, 0.15) - 0.65).abs() < 1e-6);
        assert_eq!(lambert(&fragment, &[], 0.15), 0.15);
    }

    #[test]
    fn quantize_rounds_up_to_bands() {
        let banded = quantize(&vector![0.1, 0.26, 1.0], 4);
        assert_eq!(banded, vector![0.25, 0.5, 1.0]);
        assert_eq!(quantize(&vector![0.0, 0.5, 0.75], 4), vector![0.0, 0.5, 0.75]);
    }

    /// Field of a square plateau at distance 2 on an empty background.
    fn plateau(width: u32, height: u32) -> Vec<f32> {
        return (0..width * height)
            .map(|i| {
                let (x, y) = (i % width, i / width);
                if (3..width - 3).contains(&x) && (3..height - 3).contains(&y) {
                    return 2.0;
                }
                return EMPTY_DISTANCE;
            })
            .collect();
    }

    #[test]
    fn flat_regions_have_no_gradient() {
        let (width, height) = (20, 18);
        let field = plateau(width, height);
        let (gx, gy) = sobel_direct(&field, width, height, 9, 9);
        assert_eq!((gx, gy), (0.0, 0.0));
        // Canvas corners replicate the center sample.
        assert_eq!(sobel_direct(&field, width, height, 0, 0), (0.0, 0.0));
        assert_eq!(sobel_direct(&field, width, height, width - 1, height - 1), (0.0, 0.0));
    }

    #[test]
    fn silhouettes_exceed_the_threshold() {
        let (width, height) = (20, 18);
        let field = plateau(width, height);
        let (gx, gy) = sobel_direct(&field, width, height, 3, 9);
        let fragment = Fragment { sobel_x: gx, sobel_y: gy, ..covered(vector![0.0, 0.0, -2.0]) };
        assert!(fragment.gradient() > PipelineConfig::default().outline_threshold);

        let config = PipelineConfig::toon();
        assert_eq!(compose(&fragment, &config), Vector3::zeros());
    }

    #[test]
    fn tiled_sobel_matches_direct() {
        let (width, height) = (37, 21);
        let field: Vec<f32> = (0..width * height).map(|i| ((i * 7919) % 101) as f32 * 0.37).collect();
        let tiles = tiles_along(width) * tiles_along(height);
        let mut visited = 0;
        for tile in 0..tiles {
            let local = FieldTile::load(&field, width, height, tile);
            for (x, y) in local.pixels() {
                assert_eq!(local.sobel(&field, width, height, x, y), sobel_direct(&field, width, height, x, y));
                visited += 1;
            }
        }
        assert_eq!(visited, width * height);
    }

    #[test]
    fn stages_run_over_the_fragment_buffer() {
        let device = Device::new(2);
        let fragments = Arc::new(FragmentBuffer::new(20, 18));
        for y in 3..15 {
            for x in 3..17 {
                fragments.resolve(fragments.index(x, y), 0.5, 0, |f| *f = covered(vector![0.0, 0.0, -2.0]));
            }
        }
        let lights = Arc::new(Vec::new());
        let background = vector![0.1, 0.2, 0.3];
        run_lighting(&device, &fragments, &lights, 0.5, background).unwrap();

        let mut field = Arc::new(vec![0.0; fragments.len()]);
        run_sobel(&device, &fragments, &mut field, SobelMode::Tiled).unwrap();
        assert_eq!(field[fragments.index(0, 0)], EMPTY_DISTANCE);
        assert_eq!(field[fragments.index(9, 9)], 2.0);

        let mut framebuffer = Arc::new(vec![Vector3::zeros(); fragments.len()]);
        run_compose(&device, &fragments, &mut framebuffer, &PipelineConfig::toon()).unwrap();
        assert_eq!(framebuffer[fragments.index(0, 0)], background);
        assert_eq!(framebuffer[fragments.index(9, 9)], vector![0.5, 0.5, 0.5]);
        assert_eq!(framebuffer[fragments.index(3, 9)], Vector3::zeros());
    }
}
