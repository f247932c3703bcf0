//! Copies the framebuffer into a caller-owned RGBA8 surface.

use std::sync::Arc;

use nalgebra::Vector3;

use super::util::to_rgba8;
use crate::device::Device;
use crate::error::DeviceError;

/// Writes pixel `i` of `framebuffer` to bytes `4 * i..4 * i + 4` of `surface`.
/// The caller checks that `surface` holds four bytes per pixel.
pub fn run(device: &Device, framebuffer: &Arc<Vec<Vector3<f32>>>, surface: &mut [u8]) -> Result<(), DeviceError> {
    let colors = Arc::clone(framebuffer);
    return device.map_with(
        "present",
        framebuffer.len(),
        move |i| to_rgba8(&colors[i]),
        |i, rgba| surface[4 * i..4 * i + 4].copy_from_slice(&rgba),
    );
}
